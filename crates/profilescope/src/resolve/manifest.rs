//! Minimal HLS and DASH manifest reading: just enough to find the first
//! playable segment.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
}

impl ManifestKind {
    pub fn of(url: &str) -> Option<Self> {
        let end = url.find(['?', '#']).unwrap_or(url.len());
        let path = url[..end].to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            Some(ManifestKind::Hls)
        } else if path.ends_with(".mpd") {
            Some(ManifestKind::Dash)
        } else {
            None
        }
    }
}

fn manifest_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:https?:)?//[^\s"'<>\\]+?\.(?:m3u8|mpd)(?:\?[^\s"'<>\\]*)?"#)
            .expect("manifest regex is valid")
    })
}

/// Every `.m3u8`/`.mpd` URL mentioned in `text`, in order, without repeats.
pub fn find_manifest_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in manifest_url_re().find_iter(text) {
        let url = m.as_str();
        let url = if url.starts_with("//") {
            format!("https:{url}")
        } else {
            url.to_string()
        };
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

/// A master playlist lists variant streams instead of segments.
pub fn is_hls_master(body: &str) -> bool {
    body.contains("#EXT-X-STREAM-INF")
}

/// First URI line of an HLS playlist (a variant in a master, a segment in a
/// media playlist).
pub fn first_hls_uri(body: &str) -> Option<&str> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

/// First media reference in a DASH manifest: the first `SegmentURL`
/// (or, failing that, `Initialization`) joined onto a directory `BaseURL`.
pub fn first_dash_url(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut in_base = false;
    let mut base: Option<String> = None;
    let mut segment: Option<String> = None;
    let mut init: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"BaseURL" => {
                in_base = base.is_none();
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"SegmentURL" if segment.is_none() => segment = attr_value(&e, b"media"),
                b"Initialization" if init.is_none() => init = attr_value(&e, b"sourceURL"),
                _ => {}
            },
            Ok(Event::Text(t)) if in_base => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if !text.is_empty() {
                    base = Some(text);
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"BaseURL" => in_base = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("unreadable DASH manifest: {e}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    match (base, segment.or(init)) {
        (Some(base), Some(segment)) if base.ends_with('/') => Some(format!("{base}{segment}")),
        (Some(base), _) => Some(base),
        (None, segment) => segment,
    }
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Resolve a manifest-relative reference.
pub fn resolve_reference(manifest_url: &str, reference: &str) -> Option<String> {
    let base = Url::parse(manifest_url).ok()?;
    base.join(reference).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(ManifestKind::of("https://x/a/master.m3u8?t=1"), Some(ManifestKind::Hls));
        assert_eq!(ManifestKind::of("https://x/a/manifest.mpd"), Some(ManifestKind::Dash));
        assert_eq!(ManifestKind::of("https://x/a/clip.mp4"), None);
    }

    #[test]
    fn test_find_manifest_urls() {
        let text = r#"{"hls":"https://cdn.x/v/master.m3u8?sig=1","dash":"//cdn.x/v/m.mpd","again":"https://cdn.x/v/master.m3u8?sig=1"}"#;
        assert_eq!(
            find_manifest_urls(text),
            vec!["https://cdn.x/v/master.m3u8?sig=1", "https://cdn.x/v/m.mpd"]
        );
    }

    #[test]
    fn test_hls_playlists() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";
        assert!(is_hls_master(master));
        assert_eq!(first_hls_uri(master), Some("low/index.m3u8"));

        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n";
        assert!(!is_hls_master(media));
        assert_eq!(first_hls_uri(media), Some("seg0.ts"));
    }

    #[test]
    fn test_dash() {
        let with_base = r#"<MPD><Period><BaseURL>https://cdn.x/v/</BaseURL>
            <SegmentList><Initialization sourceURL="init.mp4"/><SegmentURL media="seg1.m4s"/></SegmentList>
            </Period></MPD>"#;
        assert_eq!(first_dash_url(with_base).as_deref(), Some("https://cdn.x/v/seg1.m4s"));

        let file_base = "<MPD><BaseURL>video_720.mp4</BaseURL></MPD>";
        assert_eq!(first_dash_url(file_base).as_deref(), Some("video_720.mp4"));

        let init_only = r#"<MPD><Initialization sourceURL="init.mp4?a=1&amp;b=2"/></MPD>"#;
        assert_eq!(first_dash_url(init_only).as_deref(), Some("init.mp4?a=1&b=2"));

        assert_eq!(first_dash_url("<MPD></MPD>"), None);
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(
            resolve_reference("https://cdn.x/v/master.m3u8", "low/index.m3u8").as_deref(),
            Some("https://cdn.x/v/low/index.m3u8")
        );
    }
}
