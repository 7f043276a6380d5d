use select::document::Document;
use select::predicate::{Attr, Name};

use crate::catalog::{AssetCatalog, CapturedPage};
use crate::url_utils::{
    extract_css_urls, extract_proxy_image_url, is_data_url, parse_srcset, resolve_url,
};

/// Scan the captured HTML for every resource reference and build the asset
/// catalog. Pure text/DOM analysis: no network, no retries.
pub fn collect_asset_refs(page: &CapturedPage) -> AssetCatalog {
    let document = Document::from(page.html.as_str());
    let mut catalog = AssetCatalog::new();

    // Image sources and srcset entries get proxy detection; a proxy-shaped
    // URL registers the decoded real URL as the download target instead.
    for img in document.find(Name("img")) {
        if let Some(src) = img.attr("src") {
            register_image_url(&mut catalog, page, src);
        }
    }
    for attr in ["srcset", "imagesrcset"] {
        for el in document.find(Attr(attr, ())) {
            if let Some(srcset) = el.attr(attr) {
                for url in parse_srcset(srcset) {
                    register_image_url(&mut catalog, page, &url);
                }
            }
        }
    }

    for link in document.find(Name("link")) {
        let Some(href) = link.attr("href") else { continue };
        if is_data_url(href) {
            continue;
        }
        let rel = link.attr("rel").unwrap_or("");
        let as_attr = link.attr("as").unwrap_or("");

        let wanted = rel.contains("stylesheet")
            || rel.contains("icon")
            || rel.contains("apple-touch")
            || (rel.contains("preload")
                && matches!(as_attr, "font" | "style" | "script" | "image"));
        if wanted {
            catalog.register(&resolve_url(&page.final_url, href));
        }
    }

    for script in document.find(Name("script")) {
        if let Some(src) = script.attr("src") {
            if !is_data_url(src) {
                catalog.register(&resolve_url(&page.final_url, src));
            }
        }
    }

    for name in ["video", "audio", "source"] {
        for el in document.find(Name(name)) {
            if let Some(src) = el.attr("src") {
                if !is_data_url(src) {
                    catalog.register(&resolve_url(&page.final_url, src));
                }
            }
        }
    }

    // url(...) occurrences inside <style> blocks and inline style attributes.
    // Linked stylesheets' contents are handled later by the CSS post-processor.
    for style in document.find(Name("style")) {
        for url in extract_css_urls(&style.text()) {
            catalog.register(&resolve_url(&page.final_url, &url));
        }
    }
    for el in document.find(Attr("style", ())) {
        if let Some(style) = el.attr("style") {
            for url in extract_css_urls(style) {
                catalog.register(&resolve_url(&page.final_url, &url));
            }
        }
    }

    catalog
}

fn register_image_url(catalog: &mut AssetCatalog, page: &CapturedPage, raw: &str) {
    if raw.is_empty() || is_data_url(raw) {
        return;
    }
    let resolved = resolve_url(&page.final_url, raw);

    if let Some(real) = extract_proxy_image_url(&resolved) {
        catalog.register_proxy(&resolved, &real);
        if real.starts_with("http://") || real.starts_with("https://") {
            catalog.register(&real);
        } else {
            catalog.register(&resolve_url(&page.final_url, &real));
        }
    } else {
        catalog.register(&resolved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn page(html: &str) -> CapturedPage {
        CapturedPage {
            html: html.to_string(),
            final_url: Url::parse("https://site.test/shop/").unwrap(),
        }
    }

    #[test]
    fn test_collects_all_reference_kinds() {
        let captured = page(
            r#"<html><head>
                <link rel="stylesheet" href="/css/main.css">
                <link rel="icon" href="/favicon.ico">
                <link rel="apple-touch-icon" href="/touch.png">
                <link rel="preload" href="/fonts/brand.woff2" as="font">
                <link rel="preload" href="/data.json" as="fetch">
                <script src="/js/app.js"></script>
                <style>.hero { background: url(/img/hero.jpg); }</style>
            </head><body>
                <img src="photo.jpg">
                <div style="background-image: url('/img/tile.png')"></div>
                <video src="/media/intro.mp4"></video>
            </body></html>"#,
        );
        let catalog = collect_asset_refs(&captured);

        for expected in [
            "https://site.test/css/main.css",
            "https://site.test/favicon.ico",
            "https://site.test/touch.png",
            "https://site.test/fonts/brand.woff2",
            "https://site.test/js/app.js",
            "https://site.test/img/hero.jpg",
            "https://site.test/shop/photo.jpg",
            "https://site.test/img/tile.png",
            "https://site.test/media/intro.mp4",
        ] {
            assert!(catalog.contains(expected), "missing {expected}");
        }
        // preload as="fetch" is not an asset kind we capture
        assert!(!catalog.contains("https://site.test/data.json"));
    }

    #[test]
    fn test_srcset_entries_registered_without_descriptors() {
        let captured = page(r#"<img srcset="a-480.jpg 480w, a-800.jpg 800w">"#);
        let catalog = collect_asset_refs(&captured);
        assert!(catalog.contains("https://site.test/shop/a-480.jpg"));
        assert!(catalog.contains("https://site.test/shop/a-800.jpg"));
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_data_urls_never_registered() {
        let captured = page(
            r#"<img src="data:image/gif;base64,R0lGOD">
               <link rel="stylesheet" href="data:text/css,body{}">"#,
        );
        let catalog = collect_asset_refs(&captured);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_proxy_url_registers_real_target() {
        let captured = page(
            r#"<img src="/api/proxy-image?source=https%3A%2F%2Fcdn.test%2Fphoto.jpg">"#,
        );
        let catalog = collect_asset_refs(&captured);

        assert!(catalog.contains("https://cdn.test/photo.jpg"));
        assert!(!catalog.contains("https://site.test/api/proxy-image?source=https%3A%2F%2Fcdn.test%2Fphoto.jpg"));
        let mappings: Vec<_> = catalog.proxy_mappings().collect();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].1, "https://cdn.test/photo.jpg");
    }

    #[test]
    fn test_proxy_with_relative_real_url() {
        let captured = page(r#"<img src="/_next/image?url=%2Fstatic%2Fhero.png&w=828">"#);
        let catalog = collect_asset_refs(&captured);
        assert!(catalog.contains("https://site.test/static/hero.png"));
    }
}
