use std::path::Path;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CloneError;

/// Fixed desktop user-agent sent by both the browser page and the asset
/// fetcher, to reduce the chance of being served a degraded bot variant.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Validate and normalize a raw user string into a fetchable absolute URL.
/// Prepends `https://` when no scheme is present; only http(s) is accepted.
pub fn normalize_url(input: &str) -> Result<Url, CloneError> {
    let trimmed = input.trim();
    let has_scheme = trimmed
        .get(..7)
        .map(|p| p.eq_ignore_ascii_case("http://"))
        .unwrap_or(false)
        || trimmed
            .get(..8)
            .map(|p| p.eq_ignore_ascii_case("https://"))
            .unwrap_or(false);
    let with_scheme = if has_scheme {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed =
        Url::parse(&with_scheme).map_err(|_| CloneError::InvalidUrl(input.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CloneError::InvalidUrl(input.to_string()));
    }
    Ok(parsed)
}

/// Short deterministic digest of a URL, used as the content-addressed
/// filename stem for downloaded assets.
pub fn hash_url(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Output folder name for one clone: sanitized hostname plus a millisecond
/// timestamp, which gives concurrent runs naturally distinct directories.
pub fn safe_folder_name(url: &Url) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let hostname = url.host_str().unwrap_or("unknown");
    let sanitized: String = hostname
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}_{millis}")
}

/// File extension (with leading dot) for a downloaded asset: the URL path's
/// extension when it has a plausible one, otherwise a content-type lookup.
pub fn extension_for(url: &str, content_type: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(ext) = Path::new(parsed.path()).extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if !ext.is_empty() && ext.len() < 9 {
                return format!(".{ext}");
            }
        }
    }

    let base = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let mapped = match base.as_str() {
        "text/css" => ".css",
        "text/javascript" | "application/javascript" | "application/x-javascript" => ".js",
        "text/html" => ".html",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "image/x-icon" => ".ico",
        "font/woff" | "application/font-woff" | "application/x-font-woff" => ".woff",
        "font/woff2" | "application/font-woff2" => ".woff2",
        "font/ttf" | "application/x-font-ttf" => ".ttf",
        "font/otf" => ".otf",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "audio/mpeg" | "audio/mp3" => ".mp3",
        "application/json" => ".json",
        _ => "",
    };
    if !mapped.is_empty() {
        return mapped.to_string();
    }

    // Last resort for content types outside the fixed table.
    if !base.is_empty() {
        if let Some(exts) = mime_guess::get_mime_extensions_str(&base) {
            if let Some(first) = exts.first() {
                return format!(".{first}");
            }
        }
    }
    String::new()
}

/// Asset type buckets, mirrored in the on-disk `assets/<bucket>/` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetBucket {
    Css,
    Js,
    Images,
    Fonts,
    Video,
    Audio,
    Other,
}

impl AssetBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetBucket::Css => "css",
            AssetBucket::Js => "js",
            AssetBucket::Images => "images",
            AssetBucket::Fonts => "fonts",
            AssetBucket::Video => "video",
            AssetBucket::Audio => "audio",
            AssetBucket::Other => "other",
        }
    }

    /// Classify by extension first, content-type second.
    pub fn classify(url: &str, content_type: &str) -> Self {
        let ext = extension_for(url, content_type);
        match ext.as_str() {
            ".css" => return AssetBucket::Css,
            ".js" => return AssetBucket::Js,
            ".png" | ".jpg" | ".jpeg" | ".gif" | ".webp" | ".svg" | ".ico" | ".bmp" => {
                return AssetBucket::Images
            }
            ".woff" | ".woff2" | ".ttf" | ".otf" | ".eot" => return AssetBucket::Fonts,
            ".mp4" | ".webm" | ".avi" => return AssetBucket::Video,
            ".mp3" | ".wav" | ".ogg" | ".m4a" => return AssetBucket::Audio,
            _ => {}
        }

        if content_type.contains("css") {
            AssetBucket::Css
        } else if content_type.contains("javascript") {
            AssetBucket::Js
        } else if content_type.contains("image") {
            AssetBucket::Images
        } else if content_type.contains("font") {
            AssetBucket::Fonts
        } else if content_type.contains("video") {
            AssetBucket::Video
        } else if content_type.contains("audio") {
            AssetBucket::Audio
        } else {
            AssetBucket::Other
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point, for
/// log and progress lines.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn is_data_url(url: &str) -> bool {
    url.trim_start().starts_with("data:")
}

/// Resolve a possibly-relative reference against a base. Returns the input
/// unchanged when it cannot be resolved, matching the graceful-degradation
/// policy of the rewrite stage.
pub fn resolve_url(base: &Url, reference: &str) -> String {
    if reference.is_empty() || is_data_url(reference) {
        return reference.to_string();
    }
    match base.join(reference) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => reference.to_string(),
    }
}

/// Parse a `srcset`/`imagesrcset` attribute into its URL tokens. Each entry's
/// URL is the part before the first whitespace; `1x`/`480w` descriptors are
/// discarded, as are data URLs.
pub fn parse_srcset(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|part| {
            let url = part.trim().split_whitespace().next()?;
            if url.is_empty() || is_data_url(url) {
                None
            } else {
                Some(url.to_string())
            }
        })
        .collect()
}

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("valid css url regex")
});

/// Extract every `url(...)` token (quoted or unquoted) from CSS text.
pub fn extract_css_urls(css: &str) -> Vec<String> {
    CSS_URL_RE
        .captures_iter(css)
        .filter_map(|cap| {
            let url = cap.get(1)?.as_str();
            if is_data_url(url) {
                None
            } else {
                Some(url.to_string())
            }
        })
        .collect()
}

/// Detect image-proxy URLs (image-optimization endpoints that wrap the real
/// source URL in a query parameter) and return the decoded real URL.
///
/// Recognized shapes: a path containing both `/api/` and `image`, the
/// framework route `/_next/image`, or any path containing `proxy`, carrying a
/// `source`, `url`, or `src` query parameter.
pub fn extract_proxy_image_url(url: &str) -> Option<String> {
    // Accept both absolute URLs and bare path+query strings.
    let dummy = Url::parse("http://dummy/").ok()?;
    let parsed = dummy.join(url).ok()?;
    let path = parsed.path();

    let proxy_shaped = (path.contains("/api/") && path.contains("image"))
        || path.contains("/_next/image")
        || path.contains("proxy");
    if !proxy_shaped {
        return None;
    }

    for param in ["source", "url", "src"] {
        if let Some((_, value)) = parsed.query_pairs().find(|(k, _)| k == param) {
            if !value.is_empty() {
                return Some(value.into_owned());
            }
        }
    }
    None
}
