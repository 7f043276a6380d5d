use indexmap::IndexMap;
use url::Url;

use crate::url_utils::{resolve_url, AssetBucket};

/// The immutable snapshot produced by the render stage: the fully hydrated
/// DOM serialized as text, plus the post-redirect URL every later resolution
/// must use as its base.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub html: String,
    pub final_url: Url,
}

/// One distinct real resource URL. `local_path` stays `None` until a
/// download succeeds; a record that keeps `None` is excluded from rewriting
/// and counted in the failure tally.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub source_url: String,
    pub local_path: Option<String>,
    pub content_type: Option<String>,
    pub bucket: Option<AssetBucket>,
    pub byte_size: u64,
}

/// Everything the extract stage discovered: pending asset records keyed by
/// resolved absolute URL (insertion-ordered, so downloads are deterministic)
/// plus the proxy-URL → real-URL mapping. Built by extraction, populated by
/// the download sweep, consumed read-only by the CSS and rewrite stages.
#[derive(Debug, Default)]
pub struct AssetCatalog {
    records: IndexMap<String, AssetRecord>,
    proxy_map: IndexMap<String, String>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolved absolute URL as a pending download target.
    pub fn register(&mut self, url: &str) {
        self.records
            .entry(url.to_string())
            .or_insert_with(|| AssetRecord {
                source_url: url.to_string(),
                local_path: None,
                content_type: None,
                bucket: None,
                byte_size: 0,
            });
    }

    /// Record that `proxy_url` wraps `real_url`. The proxy URL itself is
    /// never downloaded.
    pub fn register_proxy(&mut self, proxy_url: &str, real_url: &str) {
        self.proxy_map
            .insert(proxy_url.to_string(), real_url.to_string());
    }

    pub fn mark_downloaded(
        &mut self,
        url: &str,
        local_path: String,
        content_type: String,
        bucket: AssetBucket,
        byte_size: u64,
    ) {
        let record = self
            .records
            .entry(url.to_string())
            .or_insert_with(|| AssetRecord {
                source_url: url.to_string(),
                local_path: None,
                content_type: None,
                bucket: None,
                byte_size: 0,
            });
        record.local_path = Some(local_path);
        record.content_type = Some(content_type);
        record.bucket = Some(bucket);
        record.byte_size = byte_size;
    }

    pub fn contains(&self, url: &str) -> bool {
        self.records.contains_key(url)
    }

    pub fn local_path(&self, url: &str) -> Option<&str> {
        self.records.get(url)?.local_path.as_deref()
    }

    /// Local path for a real URL recorded behind a proxy. Tries the raw real
    /// URL first, then the real URL resolved against the page base (proxies
    /// often wrap site-relative paths).
    pub fn local_path_for_real(&self, real_url: &str, base: &Url) -> Option<&str> {
        self.local_path(real_url)
            .or_else(|| self.local_path(&resolve_url(base, real_url)))
    }

    /// URLs still awaiting a download attempt, in discovery order.
    pub fn pending_urls(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.local_path.is_none())
            .map(|r| r.source_url.clone())
            .collect()
    }

    /// Successfully downloaded records, in discovery order.
    pub fn downloaded(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.values().filter(|r| r.local_path.is_some())
    }

    pub fn proxy_mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.proxy_map.iter().map(|(p, r)| (p.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut catalog = AssetCatalog::new();
        catalog.register("https://cdn.test/a.png");
        catalog.mark_downloaded(
            "https://cdn.test/a.png",
            "assets/images/abc.png".into(),
            "image/png".into(),
            AssetBucket::Images,
            10,
        );
        // Re-registering must not clear the downloaded state.
        catalog.register("https://cdn.test/a.png");
        assert_eq!(catalog.local_path("https://cdn.test/a.png"), Some("assets/images/abc.png"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_pending_excludes_downloaded() {
        let mut catalog = AssetCatalog::new();
        catalog.register("https://cdn.test/a.png");
        catalog.register("https://cdn.test/b.png");
        catalog.mark_downloaded(
            "https://cdn.test/a.png",
            "assets/images/a.png".into(),
            "image/png".into(),
            AssetBucket::Images,
            1,
        );
        assert_eq!(catalog.pending_urls(), vec!["https://cdn.test/b.png".to_string()]);
        assert_eq!(catalog.downloaded().count(), 1);
    }

    #[test]
    fn test_local_path_for_real_resolves_relative() {
        let base = Url::parse("https://site.test/").unwrap();
        let mut catalog = AssetCatalog::new();
        catalog.register("https://site.test/static/hero.png");
        catalog.mark_downloaded(
            "https://site.test/static/hero.png",
            "assets/images/hero.png".into(),
            "image/png".into(),
            AssetBucket::Images,
            1,
        );
        assert_eq!(
            catalog.local_path_for_real("/static/hero.png", &base),
            Some("assets/images/hero.png")
        );
    }
}
