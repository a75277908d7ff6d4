//! Naming and URL helpers
//!
//! Pure functions used to turn user-supplied titles and pasted URLs into
//! something safe to use as a directory name and as a request target.

use chrono::{DateTime, Local};
use flvgrab_types::{DEFAULT_EXPLORE_BASE_URL, DEFAULT_POLL_INTERVAL_MINUTES};
use regex::Regex;
use std::sync::OnceLock;

/// Title used when nothing usable can be derived from pasted text
pub const FALLBACK_TITLE: &str = "视频";

/// Broad protocol family of a source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http://` or `https://`
    Http,
    /// `rtmp://`
    Rtmp,
    Other,
}

fn http_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)https?://[^\s'"`]+"#).expect("valid regex"))
}

fn ffmpeg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ffmpeg").expect("valid regex"))
}

fn output_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\./([^/\\\s]+?)(\d{8,})\.flv").expect("valid regex"))
}

fn trailing_stamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8,}$").expect("valid regex"))
}

/// Make a display name safe for use as a file or directory name.
///
/// Path separators become spaces, the remaining characters that are illegal
/// in file names and all control characters are dropped, and whitespace runs
/// collapse to a single space. Leading dots are stripped so the result can
/// never be `.`, `..` or a hidden entry.
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let cleaned: String = trimmed
        .chars()
        .filter_map(|c| match c {
            '/' | '\\' => Some(' '),
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_start_matches(|c| c == '.' || c == ' ')
        .to_string()
}

/// Strip wrapping quote characters and pull the first `http(s)://` token
/// out of pasted text. Text without such a token is returned stripped.
pub fn normalize_url(raw: &str) -> String {
    let mut u = raw.trim();
    for quote in ['`', '"', '\''] {
        u = u.trim_matches(quote);
    }
    let u = u.trim();

    match http_token_re().find(u) {
        Some(m) => m.as_str().to_string(),
        None => u.to_string(),
    }
}

/// Classify an address by scheme.
///
/// Strings that fail strict parsing but still start with `rtmp://` are
/// treated as RTMP so odd-looking live addresses reach ffmpeg.
pub fn classify_scheme(raw: &str) -> Scheme {
    match url::Url::parse(raw) {
        Ok(parsed) => match parsed.scheme() {
            "http" | "https" => Scheme::Http,
            "rtmp" => Scheme::Rtmp,
            _ => Scheme::Other,
        },
        Err(_) => {
            let lower = raw.trim().to_ascii_lowercase();
            if lower.starts_with("rtmp://") {
                Scheme::Rtmp
            } else {
                Scheme::Other
            }
        }
    }
}

/// Swap `http` and `https`; anything unparseable or non-http comes back unchanged.
pub fn toggle_scheme(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    let target = match parsed.scheme() {
        "http" => "https",
        "https" => "http",
        _ => return raw.to_string(),
    };
    if parsed.set_scheme(target).is_err() {
        return raw.to_string();
    }
    parsed.to_string()
}

/// `YYYYMMDDhhmmss` in local time
pub fn timestamp_string(at: DateTime<Local>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Title and URL recovered from a pasted ffmpeg-style command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub title: String,
    pub url: String,
}

/// Pull a capture request out of free-form pasted text such as
/// `Some Show ffmpeg -i "http://host/live.flv" -c copy ./Some Show20240101.flv`.
///
/// The title comes from the text before `ffmpeg` (or before the URL when
/// there is no `ffmpeg`), then from an output file name, then from the URL's
/// last path segment. Returns `None` when no http(s) URL is present.
pub fn parse_command_text(text: &str) -> Option<ParsedCommand> {
    let token = http_token_re().find(text)?;
    let url = normalize_url(token.as_str());
    if classify_scheme(&url) != Scheme::Http {
        return None;
    }

    let prefix_end = ffmpeg_re()
        .find(text)
        .map(|m| m.start())
        .unwrap_or(token.start());
    let mut candidate = text[..prefix_end].trim().to_string();

    if candidate.is_empty() {
        if let Some(caps) = output_name_re().captures(text) {
            candidate = caps[1].to_string();
        }
    }

    if candidate.is_empty() {
        if let Ok(parsed) = url::Url::parse(&url) {
            let base = parsed
                .path_segments()
                .and_then(|s| s.last())
                .unwrap_or("")
                .to_string();
            let base = strip_suffix_ignore_case(&base, ".flv");
            let stripped = trailing_stamp_re().replace(base, "").to_string();
            candidate = if stripped.is_empty() {
                base.to_string()
            } else {
                stripped
            };
        }
    }

    let mut title = sanitize_name(&candidate);
    if title.is_empty() {
        title = FALLBACK_TITLE.to_string();
    }

    Some(ParsedCommand { title, url })
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> &'a str {
    if value.len() >= suffix.len() {
        let split = value.len() - suffix.len();
        if value.is_char_boundary(split) && value[split..].eq_ignore_ascii_case(suffix) {
            return &value[..split];
        }
    }
    value
}

/// Coerce a stored or submitted directory API base into a usable prefix
pub fn ensure_base_url(raw: Option<&str>) -> String {
    let mut v = normalize_url(raw.unwrap_or(""));
    let lower = v.to_ascii_lowercase();
    if v.is_empty() || !(lower.starts_with("http://") || lower.starts_with("https://")) {
        v = DEFAULT_EXPLORE_BASE_URL.to_string();
    }
    if !v.ends_with('/') {
        v.push('/');
    }
    v
}

/// Parse a refresh interval in minutes, clamped to 1..=60
pub fn ensure_interval_minutes(raw: Option<&str>) -> u32 {
    let text = raw.unwrap_or("").trim();
    let digits_end = text
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    match text[..digits_end].parse::<i64>() {
        Ok(n) => n.clamp(1, 60) as u32,
        Err(_) => DEFAULT_POLL_INTERVAL_MINUTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("My: Show/Title*"), "My Show Title");
        assert_eq!(sanitize_name("  a   b\t\tc  "), "a b c");
        assert_eq!(sanitize_name("<bad>|name?"), "badname");
        assert_eq!(sanitize_name("line\u{0007}bell"), "linebell");
        assert_eq!(sanitize_name("   "), "");
        assert_eq!(sanitize_name("主播 直播"), "主播 直播");
        assert_eq!(sanitize_name("a\u{7f}b\u{85}c"), "abc");
        assert_eq!(sanitize_name(".."), "");
        assert_eq!(sanitize_name("."), "");
        assert_eq!(sanitize_name("../up"), "up");
        assert_eq!(sanitize_name(". . /x"), "x");
        assert_eq!(sanitize_name("v1.0 final"), "v1.0 final");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("`http://example.com/a b`"),
            "http://example.com/a"
        );
        assert_eq!(
            normalize_url("  \"https://x.com/live.flv?k=v\"  "),
            "https://x.com/live.flv?k=v"
        );
        assert_eq!(
            normalize_url("ffmpeg -i 'http://h/s.flv' -c copy out.flv"),
            "http://h/s.flv"
        );
        assert_eq!(normalize_url("rtmp://host/app/key"), "rtmp://host/app/key");
        assert_eq!(normalize_url(""), "");

        let once = normalize_url("`http://example.com/a`");
        assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn test_classify_scheme() {
        assert_eq!(classify_scheme("https://x/y.flv"), Scheme::Http);
        assert_eq!(classify_scheme("http://x/y.flv"), Scheme::Http);
        assert_eq!(classify_scheme("rtmp://x/y"), Scheme::Rtmp);
        assert_eq!(classify_scheme("rtmp://[broken/y"), Scheme::Rtmp);
        assert_eq!(classify_scheme("ftp://x/y"), Scheme::Other);
        assert_eq!(classify_scheme("not a url"), Scheme::Other);
    }

    #[test]
    fn test_toggle_scheme() {
        assert_eq!(toggle_scheme("http://a.com/x.flv"), "https://a.com/x.flv");
        assert_eq!(toggle_scheme("https://a.com/x.flv"), "http://a.com/x.flv");
        assert_eq!(toggle_scheme("rtmp://a.com/x"), "rtmp://a.com/x");
        assert_eq!(toggle_scheme("garbage"), "garbage");
    }

    #[test]
    fn test_timestamp_string() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp_string(at), "20240305070809");
    }

    #[test]
    fn test_parse_command_prefers_text_before_ffmpeg() {
        let parsed = parse_command_text(
            "Night Show ffmpeg -i \"http://h.com/live/abc.flv\" -c copy ./x20240101.flv",
        )
        .unwrap();
        assert_eq!(parsed.title, "Night Show");
        assert_eq!(parsed.url, "http://h.com/live/abc.flv");
    }

    #[test]
    fn test_parse_command_uses_output_name() {
        let parsed =
            parse_command_text("ffmpeg -i http://h.com/live/abc.flv -c copy ./Anchor20240101120000.flv")
                .unwrap();
        assert_eq!(parsed.title, "Anchor");
    }

    #[test]
    fn test_parse_command_falls_back_to_url_segment() {
        let parsed = parse_command_text("ffmpeg -i http://h.com/live/room12320240101.flv").unwrap();
        assert_eq!(parsed.title, "room123");

        let parsed = parse_command_text("http://h.com/live/").unwrap();
        assert_eq!(parsed.title, FALLBACK_TITLE);
    }

    #[test]
    fn test_parse_command_requires_http_url() {
        assert!(parse_command_text("ffmpeg -i rtmp://h/app/key").is_none());
        assert!(parse_command_text("nothing here").is_none());
    }

    #[test]
    fn test_settings_coercion() {
        assert_eq!(ensure_base_url(None), DEFAULT_EXPLORE_BASE_URL);
        assert_eq!(ensure_base_url(Some("ftp://x")), DEFAULT_EXPLORE_BASE_URL);
        assert_eq!(ensure_base_url(Some("http://dir.local/api")), "http://dir.local/api/");

        assert_eq!(ensure_interval_minutes(None), 10);
        assert_eq!(ensure_interval_minutes(Some("abc")), 10);
        assert_eq!(ensure_interval_minutes(Some("0")), 1);
        assert_eq!(ensure_interval_minutes(Some("15min")), 15);
        assert_eq!(ensure_interval_minutes(Some("600")), 60);
    }
}
