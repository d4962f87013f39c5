//! profilescope CLI entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use profilescope::{Category, ProfileScope, Subject};
use profilescope_cli::commands;
use profilescope_cli::{resolve_config, FlagOverrides};

#[derive(Parser)]
#[command(
    name = "profilescope",
    about = "Extract profile pages into typed tab content and playable media URLs",
    version
)]
struct Cli {
    /// Upstream origin (overrides PROFILESCOPE_BASE_URL).
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Locale sent upstream (overrides PROFILESCOPE_LOCALE).
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the profile record and highlight tiles.
    Profile {
        subject: Subject,
    },

    /// Print the tiles of one category.
    Tab {
        subject: Subject,
        /// profile, spotlight, stories, lenses, tagged or related.
        category: Category,
    },

    /// Validate which categories exist for a subject.
    Tabs {
        subject: Subject,

        /// Give up waiting after this many milliseconds.
        #[arg(long, default_value_t = 3000)]
        deadline_ms: u64,
    },

    /// Resolve a content item's canonical URL to a playable media URL.
    Resolve {
        canonical_url: String,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   profilescope completions bash > ~/.local/share/bash-completion/completions/profilescope
    ///   profilescope completions zsh > ~/.zfunc/_profilescope
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "profilescope", &mut std::io::stdout());
        return Ok(());
    }

    let config = resolve_config(&FlagOverrides {
        base_url: cli.base_url,
        locale: cli.locale,
        timeout_ms: cli.timeout_ms,
    })?;
    tracing::debug!("upstream {} (locale {})", config.base_url, config.locale);
    let scope = Arc::new(ProfileScope::new(config)?);

    let output = match cli.command {
        Commands::Profile { subject } => commands::profile(&scope, &subject).await?,
        Commands::Tab { subject, category } => commands::tab(&scope, &subject, category).await?,
        Commands::Tabs {
            subject,
            deadline_ms,
        } => commands::tabs(&scope, &subject, Duration::from_millis(deadline_ms)).await?,
        Commands::Resolve { canonical_url } => commands::resolve(&scope, &canonical_url).await?,
        Commands::Completions { .. } => return Ok(()),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
