//! URL classification helpers for media resolution.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Playable files. Manifests (`.m3u8`, `.mpd`) are not listed: they only
/// resolve through their first segment.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm"];

/// Hosts that serve the upstream's media.
const KNOWN_MEDIA_HOSTS: &[&str] = &["sc-cdn.net", "snapads.com"];

/// Words marking still images rather than playable media.
const STILL_MARKERS: &[&str] = &["thumb", "poster", "preview"];

fn dimension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{2,4}x\d{2,4}").expect("dimension regex is valid"))
}

fn path_of(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// The URL path ends in a known video file extension.
pub fn has_video_extension(url: &str) -> bool {
    let path = path_of(url).to_ascii_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => VIDEO_EXTENSIONS.contains(&ext),
        None => false,
    }
}

pub fn is_known_media_host(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed
        .host_str()
        .is_some_and(|host| KNOWN_MEDIA_HOSTS.iter().any(|h| host == *h || host.ends_with(&format!(".{h}"))))
}

/// Thumbnails, posters, previews and anything carrying an `NxM` size token.
pub fn is_still_asset(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    STILL_MARKERS.iter().any(|m| lower.contains(m)) || dimension_re().is_match(&lower)
}

pub fn is_http_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://") || s.starts_with("//")
}

/// An absolute or protocol-relative URL with a video extension that is not
/// a still asset.
pub fn looks_like_video_url(s: &str) -> bool {
    is_http_url(s) && has_video_extension(s) && !is_still_asset(s)
}

/// Undo JSON string escaping that hides slashes and ampersands in scripts.
pub fn unescape_script(text: &str) -> String {
    text.replace("\\/", "/")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("\\u0026", "&")
}

/// Absolute form of `raw` relative to `base`. Inline and blob URLs are dropped.
pub fn absolutize(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if raw.is_empty() || lower.starts_with("blob:") || lower.starts_with("data:") || lower.starts_with("javascript:") {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if let Ok(url) = Url::parse(raw) {
        return Some(url.to_string());
    }
    base.and_then(|b| b.join(raw).ok()).map(String::from)
}

/// Content identifier in a canonical URL: the segment after `/spotlight/`,
/// `/story/` or `/s/`, else the last path segment.
pub fn content_id(canonical_url: &str) -> Option<String> {
    let path = match Url::parse(canonical_url) {
        Ok(u) => u.path().to_string(),
        Err(_) => path_of(canonical_url).to_string(),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for marker in ["spotlight", "story", "s"] {
        if let Some(pos) = segments.iter().position(|s| *s == marker) {
            if let Some(id) = segments.get(pos + 1) {
                return Some(id.to_string());
            }
        }
    }
    segments.last().map(|s| s.to_string())
}

/// Guesses at the video behind a poster or thumbnail URL: the still segment
/// swapped for a video one and the image extension for `.mp4`.
pub fn video_equivalents(still_url: &str) -> Vec<String> {
    let path_end = still_url.find(['?', '#']).unwrap_or(still_url.len());
    let (path, _) = still_url.split_at(path_end);

    let with_mp4 = match path.rsplit_once('.') {
        Some((stem, ext))
            if matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "webp" | "gif") =>
        {
            format!("{stem}.mp4")
        }
        _ => path.to_string(),
    };

    let mut out = Vec::new();
    for (from, to) in [
        ("/thumbnail/", "/video/"),
        ("/thumbnails/", "/videos/"),
        ("/thumb/", "/video/"),
        ("/poster/", "/video/"),
        ("/posters/", "/videos/"),
        ("/preview/", "/media/"),
        ("_thumb", ""),
        ("_poster", ""),
        ("-thumb", ""),
        ("-poster", ""),
    ] {
        if with_mp4.contains(from) {
            let candidate = with_mp4.replacen(from, to, 1);
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    if with_mp4 != path && !out.contains(&with_mp4) {
        out.push(with_mp4);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_extension() {
        assert!(has_video_extension("https://cdn/x/abc.mp4?sig=1"));
        assert!(has_video_extension("https://cdn/x/clip.WEBM"));
        assert!(!has_video_extension("https://cdn/x/master.m3u8"));
        assert!(!has_video_extension("https://cdn/x/manifest.mpd?t=1"));
        assert!(!has_video_extension("https://cdn/x/abc.jpg"));
        assert!(!has_video_extension("https://cdn/x/abc"));
    }

    #[test]
    fn test_still_assets() {
        assert!(is_still_asset("https://cdn/thumbnail/abc.mp4"));
        assert!(is_still_asset("https://cdn/abc_720x1280.mp4"));
        assert!(!is_still_asset("https://cf-st.sc-cdn.net/d/abc.mp4"));
        assert!(looks_like_video_url("https://cf-st.sc-cdn.net/d/abc.mp4"));
        assert!(!looks_like_video_url("/relative/abc.mp4"));
    }

    #[test]
    fn test_known_hosts() {
        assert!(is_known_media_host("https://cf-st.sc-cdn.net/d/abc"));
        assert!(!is_known_media_host("https://evil-sc-cdn.net/d/abc"));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(
            unescape_script(r"https:\/\/cdn/a.mp4?x=1&y=2"),
            "https://cdn/a.mp4?x=1&y=2"
        );
    }

    #[test]
    fn test_content_id() {
        assert_eq!(content_id("https://www.snapchat.com/spotlight/vid123").as_deref(), Some("vid123"));
        assert_eq!(content_id("https://www.snapchat.com/s/abc?x=1").as_deref(), Some("abc"));
        assert_eq!(content_id("https://www.snapchat.com/p/zzz/").as_deref(), Some("zzz"));
        assert_eq!(content_id("https://www.snapchat.com/"), None);
    }

    #[test]
    fn test_video_equivalents() {
        let guesses = video_equivalents("https://cdn/media/thumbnail/abc.jpg?sig=2");
        assert_eq!(guesses[0], "https://cdn/media/video/abc.mp4");
        assert!(guesses.contains(&"https://cdn/media/thumbnail/abc.mp4".to_string()));
    }

    #[test]
    fn test_absolutize() {
        let base = Url::parse("https://www.snapchat.com/spotlight/x").unwrap();
        assert_eq!(
            absolutize("/v/a.mp4", Some(&base)).as_deref(),
            Some("https://www.snapchat.com/v/a.mp4")
        );
        assert_eq!(absolutize("blob:https://x/1", Some(&base)), None);
        assert_eq!(absolutize("//cdn/a.mp4", None).as_deref(), Some("https://cdn/a.mp4"));
    }
}
