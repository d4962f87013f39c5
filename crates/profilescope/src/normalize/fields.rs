//! Small text parsers shared by tile and profile extraction.

use regex::Regex;
use std::sync::OnceLock;

fn counter_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:[.,]\d+)*[KkMmBb]?$").expect("counter regex is valid"))
}

fn handle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9._-]{0,63})").expect("handle regex is valid"))
}

fn profile_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|/)(?:add|@)/?([A-Za-z0-9][A-Za-z0-9._-]{0,63})(?:[/?#]|$)")
            .expect("profile href regex is valid")
    })
}

fn background_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"background(?:-image)?\s*:[^;]*url\(\s*['"]?([^'")]+)['"]?\s*\)"#)
            .expect("background url regex is valid")
    })
}

fn audience_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:[.,]\d+)*\s?[KMB]?)\s+(?:subscribers|followers)")
            .expect("audience regex is valid")
    })
}

/// A display counter such as `12K`, `1.2M`, `4,321` or `500`.
pub fn is_counter_token(token: &str) -> bool {
    counter_token_re().is_match(token)
}

/// Engagement counters in a tile's text: the longest run of consecutive
/// counter tokens (the last one on ties), truncated to three entries.
pub fn counter_run(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut best: (usize, usize) = (0, 0);
    let mut i = 0;
    while i < tokens.len() {
        if is_counter_token(tokens[i]) {
            let start = i;
            while i < tokens.len() && is_counter_token(tokens[i]) {
                i += 1;
            }
            if i - start >= best.1 - best.0 {
                best = (start, i);
            }
        } else {
            i += 1;
        }
    }
    tokens[best.0..best.1]
        .iter()
        .take(3)
        .map(|t| t.to_string())
        .collect()
}

/// Tile text with the counter run and `@handles` removed.
pub fn residual_text(text: &str) -> Option<String> {
    let counters = counter_run(text);
    let tokens: Vec<&str> = text.split_whitespace().collect();

    // Drop the counter run at its last occurrence.
    let mut skip = vec![false; tokens.len()];
    let n = counters.len();
    if n > 0 && tokens.len() >= n {
        let start = (0..=tokens.len() - n).rev().find(|&s| {
            tokens[s..s + n]
                .iter()
                .zip(&counters)
                .all(|(t, c)| *t == c.as_str())
        });
        if let Some(start) = start {
            for flag in skip.iter_mut().skip(start).take(n) {
                *flag = true;
            }
        }
    }

    let kept: Vec<&str> = tokens
        .iter()
        .zip(skip)
        .filter(|(t, skipped)| !skipped && !t.starts_with('@'))
        .map(|(t, _)| *t)
        .collect();
    let joined = kept.join(" ");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// First `@handle` mentioned in a piece of text.
pub fn handle_in_text(text: &str) -> Option<String> {
    handle_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
}

/// Strip a leading `@` from a scraped handle. Handles containing spaces are
/// display names, not usernames, and are rejected.
pub fn clean_handle(raw: &str) -> Option<String> {
    let h = raw.trim();
    let h = h.strip_prefix('@').unwrap_or(h).trim();
    if h.is_empty() || h.contains(char::is_whitespace) {
        None
    } else {
        Some(h.to_string())
    }
}

/// Username from a profile link such as `/add/alice` or `https://host/@alice`.
pub fn user_from_href(href: &str) -> Option<String> {
    let path = match url::Url::parse(href) {
        Ok(u) => u.path().to_string(),
        Err(_) => href.to_string(),
    };
    profile_href_re()
        .captures(&path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// URL inside an inline `background-image: url(...)` declaration.
pub fn background_image_url(style: &str) -> Option<String> {
    background_url_re()
        .captures(style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First URL of a `srcset` attribute.
pub fn first_srcset_url(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .map(String::from)
        .filter(|s| !s.is_empty())
}

/// Parse a compact counter into a number: `12K` → 12000, `1.2M` → 1200000,
/// `4,321` → 4321.
pub fn parse_compact_count(raw: &str) -> Option<u64> {
    let s: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }
    let (digits, multiplier) = match s.chars().last()?.to_ascii_uppercase() {
        'K' => (&s[..s.len() - 1], 1_000f64),
        'M' => (&s[..s.len() - 1], 1_000_000f64),
        'B' => (&s[..s.len() - 1], 1_000_000_000f64),
        _ => (s.as_str(), 1f64),
    };
    let normalized = if multiplier > 1.0 {
        // With a suffix, a comma is a decimal separator ("1,2K").
        digits.replace(',', ".")
    } else {
        digits.replace(',', "")
    };
    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Follower/subscriber count from free text ("1.2M Subscribers").
pub fn audience_in_text(text: &str) -> Option<String> {
    audience_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Drop the site suffix from a page title: `Alice (@alice) | Snapchat` → `Alice`.
pub fn strip_title_suffix(raw: &str) -> Option<String> {
    let mut title = raw.trim();
    for sep in [" | ", " - ", " • "] {
        if let Some(idx) = title.rfind(sep) {
            title = &title[..idx];
        }
    }
    if let Some(idx) = title.find(" (@") {
        title = &title[..idx];
    }
    let title = title.trim();
    if title.is_empty() || title.eq_ignore_ascii_case("snapchat") {
        None
    } else {
        Some(title.to_string())
    }
}
