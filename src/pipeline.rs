use std::path::PathBuf;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::AssetCatalog;
use crate::css::{self, CssFileRef};
use crate::error::{CloneError, FetchError};
use crate::events::{EventSink, StepKind};
use crate::extract;
use crate::fetch::AssetFetcher;
use crate::render::{self, RenderOptions};
use crate::rewrite;
use crate::static_page;
use crate::url_utils::{normalize_url, safe_folder_name, truncate, AssetBucket};

/// Independent asset downloads per clone run in flight at once. All of them
/// complete (success or failure recorded) before the rewrite stage begins.
const MAX_CONCURRENT_DOWNLOADS: usize = 8;

#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Root under which each clone gets its own `<hostname>_<millis>` folder.
    pub output_root: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            headless: true,
            chrome_path: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a successful clone, returned only after `index.html` has been
/// durably written.
#[derive(Debug, Clone, Serialize)]
pub struct CloneOutcome {
    pub folder_name: String,
    pub output_dir: PathBuf,
    pub assets_downloaded: usize,
    pub assets_failed: usize,
    pub index_path: String,
    pub static_path: String,
}

/// One complete capture-and-rewrite of a single remote page. Holds no state
/// between runs; concurrent cloners never share an output directory.
pub struct PageCloner {
    options: CloneOptions,
    sink: EventSink,
}

impl PageCloner {
    pub fn new(options: CloneOptions, sink: EventSink) -> Self {
        Self { options, sink }
    }

    /// Run the full pipeline. On any fatal error the terminal `error` event
    /// is emitted and no success result is returned; per-asset failures only
    /// show up in the `assets_failed` tally.
    pub async fn clone_page(&self, raw_url: &str) -> Result<CloneOutcome, CloneError> {
        match self.run(raw_url).await {
            Ok(outcome) => {
                self.sink.step(StepKind::Done);
                Ok(outcome)
            }
            Err(err) => {
                self.sink.error(err.to_string());
                self.sink.step(StepKind::Error);
                Err(err)
            }
        }
    }

    async fn run(&self, raw_url: &str) -> Result<CloneOutcome, CloneError> {
        let cancel = &self.options.cancel;
        let sink = &self.sink;

        sink.pipeline("Validating URL...");
        let url = normalize_url(raw_url)?;
        sink.pipeline(format!("Normalized URL: {url}"));

        let folder_name = safe_folder_name(&url);
        let output_dir = self.options.output_root.join(&folder_name);
        let assets_dir = output_dir.join("assets");
        tokio::fs::create_dir_all(&assets_dir).await?;
        sink.pipeline(format!("Output folder: {folder_name}"));

        let render_options = RenderOptions {
            headless: self.options.headless,
            chrome_path: self.options.chrome_path.clone(),
        };
        let rendered = render::render_page(&url, &render_options, sink, cancel).await?;
        let captured = rendered.page;

        sink.step(StepKind::Download);
        sink.pipeline("Parsing HTML and collecting asset URLs...");
        let mut catalog = extract::collect_asset_refs(&captured);
        sink.pipeline(format!("Found {} assets to download", catalog.len()));

        let fetcher = AssetFetcher::new(&assets_dir)?;

        let mut downloaded = 0usize;
        let mut failed = 0usize;
        let mut css_files: Vec<CssFileRef> = Vec::new();
        {
            let fetcher_ref = &fetcher;
            let hints_ref = &rendered.content_type_hints;
            let mut results = futures::stream::iter(catalog.pending_urls())
                .map(|url| async move {
                    if cancel.is_cancelled() {
                        return (url, Err(FetchError::Cancelled));
                    }
                    let hint = hints_ref.get(&url).map(String::as_str);
                    let result = fetcher_ref.download(&url, hint).await;
                    (url, result)
                })
                .buffer_unordered(MAX_CONCURRENT_DOWNLOADS);

            while let Some((url, result)) = results.next().await {
                match result {
                    Ok(asset) => {
                        if asset.bucket == AssetBucket::Css {
                            css_files.push(CssFileRef {
                                url: url.clone(),
                                local_path: asset.local_path.clone(),
                                full_path: asset.full_path.clone(),
                            });
                        }
                        catalog.mark_downloaded(
                            &url,
                            asset.local_path,
                            asset.content_type,
                            asset.bucket,
                            asset.byte_size,
                        );
                        downloaded += 1;
                    }
                    Err(err) => {
                        sink.pipeline(format!(
                            "Failed to download: {}... - {err}",
                            truncate(&url, 60)
                        ));
                        failed += 1;
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(CloneError::Cancelled);
        }
        sink.pipeline(format!("Downloaded {downloaded} assets, {failed} failed"));

        // CSS files commonly reference fonts and images invisible to the
        // HTML scan; sweep them before building the variant table.
        sink.pipeline("Processing CSS files for additional assets...");
        let (css_downloaded, css_failed) =
            css::process_css_files(&css_files, &mut catalog, &fetcher, sink, cancel).await;
        downloaded += css_downloaded;
        failed += css_failed;
        if cancel.is_cancelled() {
            return Err(CloneError::Cancelled);
        }

        sink.step(StepKind::Rewrite);
        sink.pipeline("Rewriting asset references in HTML...");
        let rewritten = rewrite::rewrite_html(&captured.html, &catalog, &captured.final_url);

        sink.step(StepKind::Save);
        sink.pipeline("Saving cloned page...");
        tokio::fs::write(output_dir.join("index.html"), &rewritten).await?;

        let static_html = static_page::build_static_variant(&rewritten);
        tokio::fs::write(output_dir.join("index-static.html"), &static_html).await?;

        info!(
            folder = %folder_name,
            downloaded,
            failed,
            "clone complete"
        );
        sink.pipeline(format!("Clone saved to: {}", output_dir.display()));

        Ok(CloneOutcome {
            folder_name,
            output_dir,
            assets_downloaded: downloaded,
            assets_failed: failed,
            index_path: "index.html".to_string(),
            static_path: "index-static.html".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CloneEvent;

    #[tokio::test]
    async fn test_invalid_url_fails_before_any_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = EventSink::channel();
        let cloner = PageCloner::new(
            CloneOptions {
                output_root: dir.path().to_path_buf(),
                ..Default::default()
            },
            sink,
        );

        let result = cloner.clone_page("ftp://example.com").await;
        assert!(matches!(result, Err(CloneError::InvalidUrl(_))));

        // No output directory was created for the failed run.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // The terminal event sequence is error then step(error).
        let mut saw_error_event = false;
        let mut last_step = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                CloneEvent::Error(_) => saw_error_event = true,
                CloneEvent::Step(step) => last_step = Some(step),
                _ => {}
            }
        }
        assert!(saw_error_event);
        assert_eq!(last_step, Some(StepKind::Error));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let cloner = PageCloner::new(
            CloneOptions {
                output_root: dir.path().to_path_buf(),
                cancel,
                ..Default::default()
            },
            EventSink::discard(),
        );

        // The browser launch may or may not get far on this machine, but a
        // pre-cancelled run must never return success.
        let result = cloner.clone_page("https://example.com").await;
        assert!(result.is_err());
    }
}
