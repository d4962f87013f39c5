//! Configuration resolution: defaults, then environment, then flags.

use profilescope::ScopeConfig;

/// Values given on the command line. `None` keeps the lower layer's value.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub base_url: Option<String>,
    pub locale: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Resolve the engine configuration for this invocation.
pub fn resolve_config(flags: &FlagOverrides) -> anyhow::Result<ScopeConfig> {
    let config = apply_flags(ScopeConfig::from_env(), flags);
    config.validate()?;
    Ok(config)
}

fn apply_flags(mut config: ScopeConfig, flags: &FlagOverrides) -> ScopeConfig {
    if let Some(base) = &flags.base_url {
        config.base_url = base.clone();
    }
    if let Some(locale) = &flags.locale {
        config.locale = locale.clone();
    }
    if let Some(ms) = flags.timeout_ms {
        config.request_timeout_ms = ms;
    }
    config
}
