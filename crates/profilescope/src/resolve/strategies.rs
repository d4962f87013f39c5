//! The eight media resolution strategies, highest confidence first.

use super::manifest::{self, ManifestKind};
use super::media::{
    absolutize, content_id, has_video_extension, is_http_url, is_known_media_host, is_still_asset,
    looks_like_video_url, unescape_script, video_equivalents,
};
use super::snapshot::MediaSnapshot;
use crate::document::{walk_json, MAX_JSON_DEPTH};
use crate::fetch::DocumentSource;
use crate::normalize::fields::background_image_url;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Property names that carry playable media in embedded payloads.
const VIDEO_KEYS: &[&str] = &[
    "contentUrl",
    "videoUrl",
    "video_url",
    "videoSrc",
    "mediaUrl",
    "media_url",
    "mediaStreamUrl",
    "snapUrl",
    "streamUrl",
    "playbackUrl",
    "hlsUrl",
    "hlsPlaylistUrl",
    "dashUrl",
    "mp4Url",
    "embedUrl",
    "downloadUrl",
    "sourceUrl",
    "fileUrl",
    "src",
    "url",
];

/// Keys never followed for media: they point at stills.
const STILL_KEY_MARKERS: &[&str] = &["thumbnail", "poster", "preview", "icon"];

/// Globals that client frameworks hydrate their cache from.
const STATE_MARKERS: &[&str] = &[
    "__APOLLO_STATE__",
    "__INITIAL_STATE__",
    "__PRELOADED_STATE__",
    "__NUXT__",
    "__remixContext",
];

/// Manifests fetched per resolution.
const MAX_MANIFESTS: usize = 3;

/// A URL a strategy proposes. `verified` is set when the strategy already
/// confirmed it with a probe or by reading a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub verified: bool,
}

impl Candidate {
    pub fn unverified(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verified: false,
        }
    }

    pub fn verified(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verified: true,
        }
    }
}

/// Everything a strategy may look at.
pub struct ResolveContext<'a> {
    pub canonical_url: &'a str,
    pub snapshot: &'a MediaSnapshot,
    pub source: &'a dyn DocumentSource,
    pub cdn_templates: &'a [String],
}

impl ResolveContext<'_> {
    /// Probe `url` and report whether it serves video.
    pub async fn confirm(&self, url: &str) -> bool {
        match self.source.probe(url).await {
            Ok(outcome) => {
                tracing::debug!("probe {url}: {} {:?}", outcome.status, outcome.content_type);
                outcome.is_video()
            }
            Err(e) => {
                tracing::debug!("probe {url} failed: {e}");
                false
            }
        }
    }

    fn absolute(&self, raw: &str) -> Option<String> {
        absolutize(raw, self.snapshot.base.as_ref())
    }
}

#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// 1-based position in the chain.
    fn index(&self) -> u8;

    fn name(&self) -> &'static str;

    fn confidence(&self) -> f32;

    /// Proposed URLs, best first. An empty list means the strategy missed.
    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate>;
}

/// The production chain, in priority order.
pub fn default_strategies() -> Vec<Box<dyn ResolveStrategy>> {
    vec![
        Box::new(PayloadSearch),
        Box::new(DataAttributeScan),
        Box::new(MediaElements),
        Box::new(BackgroundImage),
        Box::new(StateBlobSearch),
        Box::new(CdnReconstruction),
        Box::new(ScriptPatternScan),
        Box::new(StreamingManifest),
    ]
}

/// Video extensions first, otherwise document order.
fn rank_by_extension(mut urls: Vec<String>) -> Vec<String> {
    urls.dedup();
    let (mut with_ext, without): (Vec<_>, Vec<_>) = urls.into_iter().partition(|u| has_video_extension(u));
    with_ext.extend(without);
    let mut seen = std::collections::HashSet::new();
    with_ext.retain(|u| seen.insert(u.clone()));
    with_ext
}

/// 1. Recursive search of embedded JSON payloads for video-bearing keys.
pub struct PayloadSearch;

#[async_trait]
impl ResolveStrategy for PayloadSearch {
    fn index(&self) -> u8 {
        1
    }

    fn name(&self) -> &'static str {
        "payload-search"
    }

    fn confidence(&self) -> f32 {
        0.95
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let mut hits = Vec::new();
        for payload in &ctx.snapshot.payloads {
            walk_json(payload, MAX_JSON_DEPTH, &mut |key, value, _| {
                let (Some(key), Some(s)) = (key, value.as_str()) else {
                    return;
                };
                let lower = key.to_ascii_lowercase();
                if STILL_KEY_MARKERS.iter().any(|m| lower.contains(m)) || !VIDEO_KEYS.contains(&key) {
                    return;
                }
                let s = s.trim();
                if !is_http_url(s) || is_still_asset(s) {
                    return;
                }
                // Generic keys only count when the value itself looks like media.
                if matches!(key, "src" | "url") && !has_video_extension(s) && !is_known_media_host(s) {
                    return;
                }
                if let Some(url) = ctx.absolute(s) {
                    hits.push(url);
                }
            });
        }
        rank_by_extension(hits)
            .into_iter()
            .map(Candidate::unverified)
            .collect()
    }
}

/// 2. `data-*` attributes naming video, media, src or url.
pub struct DataAttributeScan;

#[async_trait]
impl ResolveStrategy for DataAttributeScan {
    fn index(&self) -> u8 {
        2
    }

    fn name(&self) -> &'static str {
        "data-attributes"
    }

    fn confidence(&self) -> f32 {
        0.90
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let mut hits = Vec::new();
        for element in &ctx.snapshot.elements {
            for (name, value) in &element.attrs {
                let name = name.to_ascii_lowercase();
                if !name.starts_with("data-") {
                    continue;
                }
                if !["video", "media", "src", "url"].iter().any(|w| name.contains(w)) {
                    continue;
                }
                let Some(url) = ctx.absolute(value) else {
                    continue;
                };
                if is_still_asset(&url) {
                    continue;
                }
                if has_video_extension(&url) || is_known_media_host(&url) {
                    hits.push(url);
                }
            }
        }
        rank_by_extension(hits)
            .into_iter()
            .map(Candidate::unverified)
            .collect()
    }
}

/// 3. `<video src>`, nested `<source src>` and `og:video` metadata.
pub struct MediaElements;

#[async_trait]
impl ResolveStrategy for MediaElements {
    fn index(&self) -> u8 {
        3
    }

    fn name(&self) -> &'static str {
        "media-elements"
    }

    fn confidence(&self) -> f32 {
        0.90
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        ctx.snapshot
            .media_sources
            .iter()
            .filter_map(|src| ctx.absolute(src))
            .map(Candidate::unverified)
            .collect()
    }
}

/// 4. Poster backgrounds rewritten to their video equivalent. Only probed
/// guesses count.
pub struct BackgroundImage;

#[async_trait]
impl ResolveStrategy for BackgroundImage {
    fn index(&self) -> u8 {
        4
    }

    fn name(&self) -> &'static str {
        "background-image"
    }

    fn confidence(&self) -> f32 {
        0.70
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let stills: Vec<String> = ctx
            .snapshot
            .elements
            .iter()
            .filter_map(|el| el.get("style"))
            .filter_map(background_image_url)
            .filter_map(|raw| ctx.absolute(&raw))
            .filter(|url| {
                let lower = url.to_ascii_lowercase();
                lower.contains("poster") || lower.contains("thumb")
            })
            .collect();

        for still in stills {
            for guess in video_equivalents(&still) {
                if ctx.confirm(&guess).await {
                    return vec![Candidate::verified(guess)];
                }
            }
        }
        Vec::new()
    }
}

/// 5. Client-side cache state assigned to a well-known global.
pub struct StateBlobSearch;

#[async_trait]
impl ResolveStrategy for StateBlobSearch {
    fn index(&self) -> u8 {
        5
    }

    fn name(&self) -> &'static str {
        "state-blob"
    }

    fn confidence(&self) -> f32 {
        0.80
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let mut hits = Vec::new();
        for script in &ctx.snapshot.scripts {
            for state in state_blobs(script) {
                walk_json(&state, MAX_JSON_DEPTH, &mut |_, value, _| {
                    if let Some(s) = value.as_str() {
                        let s = unescape_script(s.trim());
                        if looks_like_video_url(&s) {
                            if let Some(url) = ctx.absolute(&s) {
                                hits.push(url);
                            }
                        }
                    }
                });
            }
        }
        rank_by_extension(hits)
            .into_iter()
            .map(Candidate::unverified)
            .collect()
    }
}

/// Decoded objects assigned to any state marker in `script`.
fn state_blobs(script: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for marker in STATE_MARKERS {
        let mut from = 0;
        while let Some(pos) = script[from..].find(marker) {
            let after = from + pos + marker.len();
            from = after;
            let rest = &script[after..];
            // Expect `= {` or `": {` shortly after the marker.
            let Some(brace) = rest.find('{') else {
                break;
            };
            if !rest[..brace].trim().trim_start_matches(['"', '\'', ']']).trim().starts_with(['=', ':'])
            {
                continue;
            }
            if let Some(json) = balanced_object(&rest[brace..]) {
                match serde_json::from_str::<Value>(json) {
                    Ok(v) => out.push(v),
                    Err(e) => tracing::debug!("state blob after {marker} did not decode: {e}"),
                }
            }
        }
    }
    out
}

/// The `{...}` object at the start of `text`, honoring strings and escapes.
pub fn balanced_object(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 6. Content id substituted into known CDN URL templates.
pub struct CdnReconstruction;

#[async_trait]
impl ResolveStrategy for CdnReconstruction {
    fn index(&self) -> u8 {
        6
    }

    fn name(&self) -> &'static str {
        "cdn-reconstruction"
    }

    fn confidence(&self) -> f32 {
        0.75
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let Some(id) = content_id(ctx.canonical_url) else {
            return Vec::new();
        };
        for template in ctx.cdn_templates {
            if !template.contains("{id}") {
                continue;
            }
            let url = template.replace("{id}", &id);
            if ctx.confirm(&url).await {
                return vec![Candidate::verified(url)];
            }
        }
        Vec::new()
    }
}

fn quoted_video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']((?:https?:)?//[^"'\s]+?\.(?:mp4|m4v|mov|webm)(?:\?[^"'\s]*)?)["']"#)
            .expect("quoted video regex is valid")
    })
}

fn bare_video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(https?://[^\s"'<>()\\]+?\.(?:mp4|m4v|mov|webm))\b"#).expect("bare video regex is valid")
    })
}

fn hex_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9a-fA-F]{40,}").expect("hex regex is valid"))
}

/// Video URLs in script text, quoted matches first.
fn scan_video_literals(text: &str) -> Vec<String> {
    let mut out: Vec<String> = quoted_video_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    out.extend(bare_video_re().find_iter(text).map(|m| m.as_str().to_string()));
    out.retain(|u| !is_still_asset(u));
    out
}

/// Text hidden as long hexadecimal runs.
fn decode_hex_runs(text: &str) -> Vec<String> {
    hex_run_re()
        .find_iter(text)
        .filter_map(|m| {
            let run = m.as_str();
            let even = &run[..run.len() - run.len() % 2];
            hex::decode(even).ok()
        })
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect()
}

/// 7. Regular-expression scan of inline scripts, with a pass over decoded
/// hex runs.
pub struct ScriptPatternScan;

#[async_trait]
impl ResolveStrategy for ScriptPatternScan {
    fn index(&self) -> u8 {
        7
    }

    fn name(&self) -> &'static str {
        "script-patterns"
    }

    fn confidence(&self) -> f32 {
        0.60
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let mut hits = Vec::new();
        for script in &ctx.snapshot.scripts {
            let text = unescape_script(script);
            hits.extend(scan_video_literals(&text));
            for decoded in decode_hex_runs(&text) {
                hits.extend(scan_video_literals(&unescape_script(&decoded)));
            }
        }
        let hits: Vec<String> = hits.iter().filter_map(|u| ctx.absolute(u)).collect();
        rank_by_extension(hits)
            .into_iter()
            .map(Candidate::unverified)
            .collect()
    }
}

/// 8. HLS or DASH manifests referenced by the page, read down to their first
/// segment.
pub struct StreamingManifest;

impl StreamingManifest {
    async fn first_segment(&self, ctx: &ResolveContext<'_>, manifest_url: &str) -> Option<String> {
        let kind = ManifestKind::of(manifest_url)?;
        let body = match ctx.source.fetch(manifest_url).await {
            Ok(doc) => doc.body,
            Err(e) => {
                tracing::debug!("manifest {manifest_url}: {e}");
                return None;
            }
        };
        match kind {
            ManifestKind::Dash => {
                let reference = manifest::first_dash_url(&body)?;
                manifest::resolve_reference(manifest_url, &reference)
            }
            ManifestKind::Hls => {
                let uri = manifest::first_hls_uri(&body)?;
                let resolved = manifest::resolve_reference(manifest_url, uri)?;
                if !manifest::is_hls_master(&body) {
                    return Some(resolved);
                }
                // One level down: master -> media playlist.
                let media = match ctx.source.fetch(&resolved).await {
                    Ok(doc) => doc.body,
                    Err(e) => {
                        tracing::debug!("media playlist {resolved}: {e}");
                        return None;
                    }
                };
                let segment = manifest::first_hls_uri(&media)?;
                manifest::resolve_reference(&resolved, segment)
            }
        }
    }
}

#[async_trait]
impl ResolveStrategy for StreamingManifest {
    fn index(&self) -> u8 {
        8
    }

    fn name(&self) -> &'static str {
        "streaming-manifest"
    }

    fn confidence(&self) -> f32 {
        0.50
    }

    async fn candidates(&self, ctx: &ResolveContext<'_>) -> Vec<Candidate> {
        let mut manifests = Vec::new();
        for script in &ctx.snapshot.scripts {
            manifests.extend(manifest::find_manifest_urls(&unescape_script(script)));
        }
        for element in &ctx.snapshot.elements {
            for (_, value) in &element.attrs {
                manifests.extend(manifest::find_manifest_urls(value));
            }
        }
        for src in &ctx.snapshot.media_sources {
            if ManifestKind::of(src).is_some() {
                manifests.extend(ctx.absolute(src));
            }
        }
        let mut seen = std::collections::HashSet::new();
        manifests.retain(|m| seen.insert(m.clone()));

        for manifest_url in manifests.into_iter().take(MAX_MANIFESTS) {
            if let Some(segment) = self.first_segment(ctx, &manifest_url).await {
                return vec![Candidate::verified(segment)];
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_object() {
        let text = r#"{"a":{"b":"}"},"c":"\"{"} trailing"#;
        assert_eq!(balanced_object(text), Some(r#"{"a":{"b":"}"},"c":"\"{"}"#));
        assert_eq!(balanced_object("{unclosed"), None);
        assert_eq!(balanced_object("nope"), None);
    }

    #[test]
    fn test_state_blobs() {
        let script = r#"window.__APOLLO_STATE__ = {"Snap:1":{"mediaUrl":"https:\/\/cf-st.sc-cdn.net\/d\/x.mp4"}};"#;
        let blobs = state_blobs(script);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0]["Snap:1"]["mediaUrl"], "https://cf-st.sc-cdn.net/d/x.mp4");
        assert!(state_blobs("console.log('__NUXT__')").is_empty());
    }

    #[test]
    fn test_scan_video_literals_excludes_stills() {
        let text = r#"var a = "https://cdn.x/thumb/a.mp4"; var b = 'https://cdn.x/v/b_540x960.mp4'; var c = "https://cdn.x/v/c.mp4";"#;
        assert_eq!(scan_video_literals(text)[0], "https://cdn.x/v/c.mp4");
        assert!(scan_video_literals(text).iter().all(|u| u.ends_with("c.mp4")));
    }

    #[test]
    fn test_hex_runs_decode() {
        let hidden = hex::encode("https://cdn.x/v/hidden.mp4");
        let decoded = decode_hex_runs(&format!("var k = '{hidden}';"));
        assert_eq!(decoded, vec!["https://cdn.x/v/hidden.mp4"]);
    }

    #[test]
    fn test_rank_by_extension() {
        let ranked = rank_by_extension(vec![
            "https://cf-st.sc-cdn.net/d/a".to_string(),
            "https://cdn.x/b.mp4".to_string(),
            "https://cf-st.sc-cdn.net/d/a".to_string(),
        ]);
        assert_eq!(ranked, vec!["https://cdn.x/b.mp4", "https://cf-st.sc-cdn.net/d/a"]);
    }

    #[test]
    fn test_default_chain_order() {
        let chain = default_strategies();
        let indices: Vec<u8> = chain.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let confidences: Vec<f32> = chain.iter().map(|s| s.confidence()).collect();
        assert_eq!(confidences, vec![0.95, 0.90, 0.90, 0.70, 0.80, 0.75, 0.60, 0.50]);
    }
}
