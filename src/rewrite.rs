use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use url::Url;

use crate::catalog::AssetCatalog;
use crate::url_utils::{extract_proxy_image_url, resolve_url};

/// Replace every recognized textual form of a downloaded asset's URL in the
/// captured HTML with its local path. The HTML is treated as opaque text so
/// formatting elsewhere in the document survives byte-for-byte; references
/// whose download failed are left pointing at their original remote URL.
pub fn rewrite_html(html: &str, catalog: &AssetCatalog, final_url: &Url) -> String {
    let variants = build_variant_index(catalog, final_url);
    let mut out = html.to_string();

    for (variant, local) in &variants {
        out = out.replace(&format!("\"{variant}\""), &format!("\"{local}\""));
        out = out.replace(&format!("'{variant}'"), &format!("'{local}'"));
        out = out.replace(&format!("url({variant})"), &format!("url({local})"));
        out = out.replace(&format!("url(\"{variant}\")"), &format!("url(\"{local}\")"));
        out = out.replace(&format!("url('{variant}')"), &format!("url('{local}')"));
    }

    out = rewrite_relative_refs(&out, catalog, final_url);
    out = collapse_proxy_srcsets(&out, catalog, final_url);
    out = rewrite_srcset_entries(&out, catalog, final_url);
    out
}

/// Every textual form a downloaded asset's URL might take in the raw HTML,
/// mapped to its local path and sorted longest-first. Longest-first matters:
/// a bare path is a substring of path+query, and replacing it first would
/// leave a partially-rewritten token behind.
pub fn build_variant_index(catalog: &AssetCatalog, final_url: &Url) -> Vec<(String, String)> {
    let mut index: IndexMap<String, String> = IndexMap::new();

    for record in catalog.downloaded() {
        let Some(local) = record.local_path.clone() else { continue };
        index.insert(record.source_url.clone(), local.clone());

        let Ok(parsed) = Url::parse(&record.source_url) else { continue };
        let path = parsed.path();
        let path_query = match parsed.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        };

        // Derived variants never clobber another record's exact-URL mapping,
        // so two assets differing only in query string both stay reachable.
        index.entry(path_query.clone()).or_insert_with(|| local.clone());
        // A bare "/" would clobber every root-relative href in the document.
        if path.len() > 1 {
            index.entry(path.to_string()).or_insert_with(|| local.clone());
        }

        if let Some(host) = parsed.host_str() {
            let authority = match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            };
            index
                .entry(format!("//{authority}{path_query}"))
                .or_insert_with(|| local.clone());
            if path.len() > 1 {
                index
                    .entry(format!("//{authority}{path}"))
                    .or_insert_with(|| local.clone());
            }
            // CDNs vary cache-busting query strings; match origin+path too.
            if parsed.query().is_some() {
                index
                    .entry(format!("{}://{}{}", parsed.scheme(), authority, path))
                    .or_insert_with(|| local.clone());
            }
        }
    }

    // Proxy URLs rewrite to the local path of the real image they wrap.
    for (proxy_url, real_url) in catalog.proxy_mappings() {
        let Some(local) = catalog.local_path_for_real(real_url, final_url) else {
            continue;
        };
        let local = local.to_string();
        index.entry(proxy_url.to_string()).or_insert_with(|| local.clone());
        if let Ok(parsed) = Url::parse(proxy_url) {
            let path_query = match parsed.query() {
                Some(q) => format!("{}?{}", parsed.path(), q),
                None => parsed.path().to_string(),
            };
            index
                .entry(path_query.replace('&', "&amp;"))
                .or_insert_with(|| local.clone());
            index.entry(path_query).or_insert(local);
        }
    }

    // HTML serializers commonly encode & as &amp; inside attribute values,
    // so every ampersand-bearing variant also gets an encoded twin.
    let encoded: Vec<(String, String)> = index
        .iter()
        .filter(|(variant, _)| variant.contains('&') && !variant.contains("&amp;"))
        .map(|(variant, local)| (variant.replace('&', "&amp;"), local.clone()))
        .collect();
    for (variant, local) in encoded {
        index.entry(variant).or_insert(local);
    }

    let mut sorted: Vec<(String, String)> = index.into_iter().collect();
    sorted.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    sorted
}

static REL_REF_DOUBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:src|href)="(\.\.?/[^"]+)""#).expect("valid regex")
});
static REL_REF_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:src|href)='(\.\.?/[^']+)'"#).expect("valid regex")
});
static REL_CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(['"]?(\.\.?/[^'")]+)['"]?\)"#).expect("valid regex")
});

/// The variant table cannot enumerate `./`/`../` forms generically; resolve
/// them against the final URL at rewrite time instead.
fn rewrite_relative_refs(html: &str, catalog: &AssetCatalog, final_url: &Url) -> String {
    let substitute_attr = |caps: &Captures| -> String {
        let whole = &caps[0];
        let rel_path = &caps[1];
        let absolute = resolve_url(final_url, rel_path);
        match catalog.local_path(&absolute) {
            Some(local) => whole.replace(rel_path, local),
            None => whole.to_string(),
        }
    };

    let out = REL_REF_DOUBLE.replace_all(html, substitute_attr);
    let out = REL_REF_SINGLE.replace_all(&out, substitute_attr);
    let out = REL_CSS_URL.replace_all(&out, |caps: &Captures| -> String {
        let rel_path = &caps[1];
        let absolute = resolve_url(final_url, rel_path);
        match catalog.local_path(&absolute) {
            Some(local) => format!("url('{local}')"),
            None => caps[0].to_string(),
        }
    });
    out.into_owned()
}

static SRCSET_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(srcset|imagesrcset)="([^"]+)""#).expect("valid regex")
});
static PROXY_IN_SRCSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/api/[^?\s]+\?[^\s,]+|/_next/image\?[^\s,]+"#).expect("valid regex")
});

/// Collapse `srcset`/`imagesrcset` values still containing proxy-shaped URLs
/// to the single resolved local path. Only one concrete image was downloaded
/// per logical resource, so the multi-resolution request set is not kept.
fn collapse_proxy_srcsets(html: &str, catalog: &AssetCatalog, final_url: &Url) -> String {
    SRCSET_ATTR
        .replace_all(html, |caps: &Captures| -> String {
            let attr = &caps[1];
            let value = &caps[2];
            if !value.contains("/api/") && !value.contains("proxy") && !value.contains("/_next/image") {
                return caps[0].to_string();
            }

            if let Some(m) = PROXY_IN_SRCSET.find(value) {
                let proxy_url = m.as_str().replace("&amp;", "&");
                if let Some(real) = extract_proxy_image_url(&proxy_url) {
                    if let Some(local) = catalog.local_path_for_real(&real, final_url) {
                        return format!("{attr}=\"{local}\"");
                    }
                }
            }
            caps[0].to_string()
        })
        .into_owned()
}

/// Rewrite each remaining srcset entry's URL token individually, keeping
/// descriptors and the comma-separated syntax intact. A token whose download
/// failed stays a valid remote reference.
fn rewrite_srcset_entries(html: &str, catalog: &AssetCatalog, final_url: &Url) -> String {
    SRCSET_ATTR
        .replace_all(html, |caps: &Captures| -> String {
            let attr = &caps[1];
            let value = &caps[2];
            let mut changed = false;

            let rewritten: Vec<String> = value
                .split(',')
                .map(|entry| {
                    let entry = entry.trim();
                    let mut parts = entry.splitn(2, char::is_whitespace);
                    let Some(token) = parts.next().filter(|t| !t.is_empty()) else {
                        return entry.to_string();
                    };
                    let descriptor = parts.next();

                    // Attribute text may carry entity-encoded ampersands.
                    let decoded = token.replace("&amp;", "&");
                    let absolute = resolve_url(final_url, &decoded);
                    let local = catalog.local_path(&absolute).or_else(|| {
                        extract_proxy_image_url(&absolute)
                            .and_then(|real| catalog.local_path_for_real(&real, final_url))
                    });

                    match local {
                        Some(local) => {
                            changed = true;
                            match descriptor {
                                Some(d) => format!("{local} {d}"),
                                None => local.to_string(),
                            }
                        }
                        None => entry.to_string(),
                    }
                })
                .collect();

            if changed {
                format!("{attr}=\"{}\"", rewritten.join(", "))
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_utils::AssetBucket;

    fn downloaded(catalog: &mut AssetCatalog, url: &str, local: &str) {
        catalog.register(url);
        catalog.mark_downloaded(
            url,
            local.to_string(),
            "image/png".to_string(),
            AssetBucket::Images,
            1,
        );
    }

    fn base() -> Url {
        Url::parse("https://site.test/shop/").unwrap()
    }

    #[test]
    fn test_rewrites_all_quote_forms() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/img/a.png", "assets/images/aa.png");

        let html = concat!(
            r#"<img src="https://site.test/img/a.png">"#,
            r#"<img src='https://site.test/img/a.png'>"#,
            r#"<div style="background:url(https://site.test/img/a.png)"></div>"#,
            r#"<style>.x{background:url("https://site.test/img/a.png")}</style>"#,
            r#"<style>.y{background:url('https://site.test/img/a.png')}</style>"#,
        );
        let out = rewrite_html(html, &catalog, &base());
        assert!(!out.contains("https://site.test/img/a.png"));
        assert_eq!(out.matches("assets/images/aa.png").count(), 5);
    }

    #[test]
    fn test_path_variants_rewritten() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/img/a.png?v=2", "assets/images/aa.png");

        let html = concat!(
            r#"<img src="/img/a.png?v=2">"#,
            r#"<img src="/img/a.png">"#,
            r#"<img src="//site.test/img/a.png?v=2">"#,
            r#"<img src="https://site.test/img/a.png">"#, // query stripped by a CDN
        );
        let out = rewrite_html(html, &catalog, &base());
        assert!(!out.contains("/img/a.png"));
        assert_eq!(out.matches("assets/images/aa.png").count(), 4);
    }

    #[test]
    fn test_longest_variant_wins() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/img/a.png", "assets/images/plain.png");
        downloaded(&mut catalog, "https://site.test/img/a.png?v=2", "assets/images/versioned.png");

        let html = r#"<img src="/img/a.png?v=2"><img src="/img/a.png">"#;
        let out = rewrite_html(html, &catalog, &base());
        // The longer variant must not be corrupted into a mixed token.
        assert!(out.contains(r#"src="assets/images/versioned.png""#));
        assert!(out.contains(r#"src="assets/images/plain.png""#));
        assert!(!out.contains("?v=2"));
    }

    #[test]
    fn test_failed_asset_keeps_original_url() {
        let mut catalog = AssetCatalog::new();
        catalog.register("https://site.test/img/broken.png");
        downloaded(&mut catalog, "https://site.test/img/ok.png", "assets/images/ok.png");

        let html = r#"<img src="https://site.test/img/broken.png"><img src="https://site.test/img/ok.png">"#;
        let out = rewrite_html(html, &catalog, &base());
        assert!(out.contains(r#"src="https://site.test/img/broken.png""#));
        assert!(out.contains(r#"src="assets/images/ok.png""#));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/img/a.png?v=2", "assets/images/aa.png");
        let html = r#"<img src="/img/a.png?v=2"><link href="/img/a.png">"#;

        let once = rewrite_html(html, &catalog, &base());
        let twice = rewrite_html(&once, &catalog, &base());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_proxy_variants_raw_and_entity_encoded() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://cdn.test/photo.jpg", "assets/images/ph.jpg");
        catalog.register_proxy(
            "https://site.test/api/proxy-image?source=https%3A%2F%2Fcdn.test%2Fphoto.jpg&w=800",
            "https://cdn.test/photo.jpg",
        );

        let html = concat!(
            r#"<img src="/api/proxy-image?source=https%3A%2F%2Fcdn.test%2Fphoto.jpg&amp;w=800">"#,
            r#"<img src="/api/proxy-image?source=https%3A%2F%2Fcdn.test%2Fphoto.jpg&w=800">"#,
            r#"<img src="https://cdn.test/photo.jpg">"#,
        );
        let out = rewrite_html(html, &catalog, &base());
        assert!(!out.contains("proxy-image"));
        assert!(!out.contains("cdn.test"));
        assert_eq!(out.matches("assets/images/ph.jpg").count(), 3);
    }

    #[test]
    fn test_srcset_collapsed_to_local_path() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/static/hero.png", "assets/images/hero.png");
        catalog.register_proxy(
            "https://site.test/_next/image?url=%2Fstatic%2Fhero.png&w=828",
            "/static/hero.png",
        );

        let html = r#"<img srcset="/_next/image?url=%2Fstatic%2Fhero.png&amp;w=640 640w, /_next/image?url=%2Fstatic%2Fhero.png&amp;w=828 828w">"#;
        let out = rewrite_html(html, &catalog, &base());
        assert!(out.contains(r#"srcset="assets/images/hero.png""#));
        assert!(!out.contains("_next/image"));
    }

    #[test]
    fn test_srcset_partial_failure_keeps_syntax() {
        let mut catalog = AssetCatalog::new();
        catalog.register("https://site.test/shop/a-480.jpg");
        downloaded(&mut catalog, "https://site.test/shop/a-800.jpg", "assets/images/a800.jpg");

        let html = r#"<img srcset="a-480.jpg 480w, a-800.jpg 800w">"#;
        let out = rewrite_html(html, &catalog, &base());
        // Only the successful download rewrites; the comma-separated syntax
        // around the failed entry stays valid.
        assert!(out.contains("a-480.jpg 480w"));
        assert!(out.contains("assets/images/a800.jpg 800w"));
    }

    #[test]
    fn test_relative_dot_paths_resolved() {
        let mut catalog = AssetCatalog::new();
        downloaded(&mut catalog, "https://site.test/img/logo.png", "assets/images/logo.png");

        let html = concat!(
            r#"<img src="../img/logo.png">"#,
            r#"<a href='./missing.html'>x</a>"#,
            r#"<div style="background:url(../img/logo.png)"></div>"#,
        );
        let out = rewrite_html(html, &catalog, &base());
        assert!(out.contains(r#"src="assets/images/logo.png""#));
        assert!(out.contains(r#"url('assets/images/logo.png')"#));
        // Unknown relative targets are left untouched.
        assert!(out.contains("./missing.html"));
    }
}
