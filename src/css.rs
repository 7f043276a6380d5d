use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use crate::catalog::AssetCatalog;
use crate::events::EventSink;
use crate::fetch::AssetFetcher;
use crate::url_utils::{extract_css_urls, is_data_url, resolve_url};

/// A downloaded stylesheet awaiting post-processing.
#[derive(Debug, Clone)]
pub struct CssFileRef {
    /// The stylesheet's own URL; CSS-relative references resolve against
    /// this, not the page URL.
    pub url: String,
    /// Path relative to the clone's output directory.
    pub local_path: String,
    pub full_path: PathBuf,
}

/// Re-scan downloaded stylesheets for nested `url(...)` references (fonts,
/// background images) invisible to the HTML scan, fetch the ones not seen
/// yet, and rewrite each token to a path relative to the CSS file itself.
///
/// Best-effort throughout: a failed nested fetch is tallied and skipped, a
/// file that cannot be read or written keeps its original bytes.
///
/// Returns `(downloaded, failed)` counts for the nested fetches.
pub async fn process_css_files(
    files: &[CssFileRef],
    catalog: &mut AssetCatalog,
    fetcher: &AssetFetcher,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> (usize, usize) {
    let mut downloaded = 0;
    let mut failed = 0;

    for file in files {
        if cancel.is_cancelled() {
            break;
        }

        let content = match tokio::fs::read_to_string(&file.full_path).await {
            Ok(content) => content,
            Err(err) => {
                warn!(url = %file.url, %err, "failed to read downloaded stylesheet");
                sink.pipeline(format!("Error processing CSS {}: {err}", file.url));
                continue;
            }
        };

        let base = match Url::parse(&file.url) {
            Ok(base) => base,
            Err(_) => continue,
        };

        let mut updated = content.clone();
        for token in extract_css_urls(&content) {
            if is_data_url(&token) {
                continue;
            }
            let absolute = resolve_url(&base, &token);

            if !catalog.contains(&absolute) {
                match fetcher.download(&absolute, None).await {
                    Ok(asset) => {
                        catalog.mark_downloaded(
                            &absolute,
                            asset.local_path.clone(),
                            asset.content_type,
                            asset.bucket,
                            asset.byte_size,
                        );
                        let relative = relative_local_path(&file.local_path, &asset.local_path);
                        updated = updated.replace(&token, &relative);
                        downloaded += 1;
                    }
                    Err(err) => {
                        warn!(url = %absolute, %err, "nested CSS asset fetch failed");
                        failed += 1;
                    }
                }
            } else if let Some(local) = catalog.local_path(&absolute) {
                let relative = relative_local_path(&file.local_path, local);
                updated = updated.replace(&token, &relative);
            }
        }

        if updated != content {
            if let Err(err) = tokio::fs::write(&file.full_path, &updated).await {
                warn!(url = %file.url, %err, "failed to write rewritten stylesheet");
                sink.pipeline(format!("Error processing CSS {}: {err}", file.url));
            }
        }
    }

    (downloaded, failed)
}

/// On-disk path from one local file's directory to another local file, both
/// given relative to the output directory.
pub fn relative_local_path(from_file: &str, to_file: &str) -> String {
    let from_dir = Path::new(from_file).parent().unwrap_or(Path::new(""));
    match pathdiff::diff_paths(Path::new(to_file), from_dir) {
        Some(diff) => diff.to_string_lossy().replace('\\', "/"),
        None => to_file.to_string(),
    }
}
