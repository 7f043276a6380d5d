use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::catalog::CapturedPage;
use crate::error::CloneError;
use crate::events::{EventSink, StepKind};
use crate::url_utils::{truncate, DESKTOP_USER_AGENT};

const VIEWPORT_WIDTH: u32 = 1366;
const VIEWPORT_HEIGHT: u32 = 768;
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
const HYDRATION_SETTLE: Duration = Duration::from_secs(2);
const SCROLL_STEP_DELAY: Duration = Duration::from_millis(300);
const MAX_SCROLL_ITERATIONS: u32 = 30;
const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_IDLE_STABLE: Duration = Duration::from_secs(1);
const TRAILING_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub headless: bool,
    /// Explicit Chrome/Chromium executable; auto-detected when `None`.
    pub chrome_path: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
        }
    }
}

/// Output of the render stage: the captured page plus the content types
/// observed per URL while the page loaded, handed to the fetcher as hints.
pub struct RenderedPage {
    pub page: CapturedPage,
    pub content_type_hints: HashMap<String, String>,
}

/// Drive a headless browser through navigate → settle → auto-scroll →
/// network-quiescence → DOM snapshot. The browser is released on every exit
/// path before this returns, so its memory is never held during the
/// download phase.
pub async fn render_page(
    url: &Url,
    options: &RenderOptions,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<RenderedPage, CloneError> {
    if cancel.is_cancelled() {
        return Err(CloneError::Cancelled);
    }
    sink.step(StepKind::Launch);
    sink.pipeline("Launching browser...");

    let mut config = BrowserConfig::builder()
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .no_sandbox()
        .arg("--disable-dev-shm-usage");
    if !options.headless {
        config = config.with_head();
    }
    if let Some(path) = &options.chrome_path {
        config = config.chrome_executable(path.clone());
    }
    let config = config
        .build()
        .map_err(CloneError::BrowserLaunch)?;

    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| CloneError::BrowserLaunch(e.to_string()))?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("browser handler error: {e}");
            }
        }
    });

    let result = drive(&browser, url, sink, cancel).await;

    // Assets are fetched over plain HTTP afterwards, never through the
    // browser, so it is released before any further processing.
    if let Err(e) = browser.close().await {
        debug!("browser close failed: {e}");
    }
    let _ = browser.wait().await;
    handler_task.abort();
    sink.pipeline("Browser closed");

    result
}

async fn drive(
    browser: &Browser,
    url: &Url,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<RenderedPage, CloneError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| CloneError::BrowserLaunch(e.to_string()))?;
    page.set_user_agent(DESKTOP_USER_AGENT)
        .await
        .map_err(|e| CloneError::BrowserLaunch(e.to_string()))?;

    let hints = attach_listeners(&page, sink).await;

    sink.step(StepKind::Navigate);
    sink.pipeline(format!("Navigating to {url}..."));
    match tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url.as_str())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(CloneError::Navigation(e.to_string())),
        Err(_) => {
            return Err(CloneError::Navigation(format!(
                "timed out after {}s",
                NAVIGATION_TIMEOUT.as_secs()
            )))
        }
    }
    wait_for_dom_ready(&page, cancel).await?;

    sink.pipeline("Waiting for initial hydration...");
    sleep_or_cancel(HYDRATION_SETTLE, cancel).await?;

    sink.step(StepKind::Scroll);
    sink.pipeline("Auto-scrolling to load lazy content...");
    auto_scroll(&page, sink, cancel).await?;

    sink.pipeline("Waiting for network idle...");
    if !wait_for_network_idle(&page, cancel).await? {
        sink.pipeline("Network idle timeout - proceeding anyway");
    }
    sleep_or_cancel(TRAILING_SETTLE, cancel).await?;

    sink.step(StepKind::Snapshot);
    sink.pipeline("Capturing rendered HTML...");
    let html = page
        .content()
        .await
        .map_err(|e| CloneError::Navigation(format!("failed to capture DOM: {e}")))?;

    // Redirects may have moved us; all later resolution uses this URL.
    let final_url = match page.url().await {
        Ok(Some(current)) => Url::parse(&current).unwrap_or_else(|_| url.clone()),
        _ => url.clone(),
    };

    let content_type_hints = hints
        .lock()
        .map(|map| map.clone())
        .unwrap_or_default();

    Ok(RenderedPage {
        page: CapturedPage { html, final_url },
        content_type_hints,
    })
}

type HintMap = Arc<Mutex<HashMap<String, String>>>;

/// Forward page console output and network responses to the event sink, and
/// record each response's content type as a download hint.
async fn attach_listeners(page: &Page, sink: &EventSink) -> HintMap {
    let hints: HintMap = Arc::new(Mutex::new(HashMap::new()));

    match page.event_listener::<EventConsoleApiCalled>().await {
        Ok(mut events) => {
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let text = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.value.as_ref())
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(" ");
                    let kind = format!("{:?}", event.r#type).to_lowercase();
                    sink.console(format!("[{kind}] {text}"));
                }
            });
        }
        Err(e) => warn!("could not attach console listener: {e}"),
    }

    match page.event_listener::<EventResponseReceived>().await {
        Ok(mut events) => {
            let sink = sink.clone();
            let hints = Arc::clone(&hints);
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let response = &event.response;
                    sink.network(format!(
                        "[RES] {} {:?}: {}",
                        response.status,
                        event.r#type,
                        truncate(&response.url, 80)
                    ));
                    if let Ok(mut map) = hints.lock() {
                        map.insert(response.url.clone(), response.mime_type.clone());
                    }
                }
            });
        }
        Err(e) => warn!("could not attach network listener: {e}"),
    }

    hints
}

/// Navigation waits for DOM-ready only, not the full load event: long-lived
/// connections (analytics, websockets) would otherwise stall the capture.
async fn wait_for_dom_ready(page: &Page, cancel: &CancellationToken) -> Result<(), CloneError> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if cancel.is_cancelled() {
            return Err(CloneError::Cancelled);
        }
        let state = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .unwrap_or_default();
        if state == "interactive" || state == "complete" {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Scroll down one viewport at a time until `scrollHeight` stops growing or
/// the hard cap is hit, then return to the top. Triggers lazy-loaded content
/// that only mounts on intersection.
///
/// Known limitation: a page whose height legitimately oscillates (a resizing
/// carousel) can terminate this early; the iteration cap is the real safety
/// net against infinite-scroll feeds.
async fn auto_scroll(
    page: &Page,
    sink: &EventSink,
    cancel: &CancellationToken,
) -> Result<(), CloneError> {
    let initial_height = scroll_height(page).await;
    let (iterations, final_height) = run_scroll_loop(
        initial_height,
        move || async move {
            if cancel.is_cancelled() {
                return Err(CloneError::Cancelled);
            }
            if let Err(e) = page.evaluate("window.scrollBy(0, window.innerHeight)").await {
                debug!("scroll step failed: {e}");
                return Ok(None);
            }
            sleep_or_cancel(SCROLL_STEP_DELAY, cancel).await?;
            Ok(Some(scroll_height(page).await))
        },
        sink,
    )
    .await?;

    // Some layouts read the scroll position on unmount/remount.
    if let Err(e) = page.evaluate("window.scrollTo(0, 0)").await {
        debug!("scroll-to-top failed: {e}");
    }
    sink.pipeline(format!(
        "Scroll complete after {iterations} iterations (final height: {final_height}px)"
    ));
    Ok(())
}

/// Height-stabilization loop behind [`auto_scroll`], separated from the
/// browser page. `advance` performs one scroll step and reports the height it
/// observed afterwards; `Ok(None)` stops the loop early (a failed scroll
/// evaluation). Terminates on the first observation equal to the previous one
/// or at the iteration cap, whichever comes first.
async fn run_scroll_loop<F, Fut>(
    initial_height: i64,
    mut advance: F,
    sink: &EventSink,
) -> Result<(u32, i64), CloneError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<i64>, CloneError>>,
{
    let mut previous_height: i64 = 0;
    let mut current_height = initial_height;
    let mut iterations: u32 = 0;

    while previous_height != current_height && iterations < MAX_SCROLL_ITERATIONS {
        previous_height = current_height;
        match advance().await? {
            Some(height) => current_height = height,
            None => break,
        }
        iterations += 1;

        if iterations % 5 == 0 {
            sink.pipeline(format!(
                "Scrolling... (iteration {iterations}, height: {current_height}px)"
            ));
        }
    }
    Ok((iterations, current_height))
}

async fn scroll_height(page: &Page) -> i64 {
    page.evaluate("document.body.scrollHeight")
        .await
        .ok()
        .and_then(|v| v.into_value::<f64>().ok())
        .map(|h| h as i64)
        .unwrap_or(0)
}

/// Best-effort quiescence check: the page's resource-timing entry count must
/// hold still for a second while `readyState` is complete. Returns `false`
/// on expiry, which is not fatal.
async fn wait_for_network_idle(
    page: &Page,
    cancel: &CancellationToken,
) -> Result<bool, CloneError> {
    let deadline = Instant::now() + NETWORK_IDLE_TIMEOUT;
    let probe = "JSON.stringify({count: performance.getEntriesByType('resource').length, \
                 ready: document.readyState === 'complete'})";
    let mut last_count: i64 = -1;
    let mut stable_since = Instant::now();

    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return Err(CloneError::Cancelled);
        }
        let observed = page
            .evaluate(probe)
            .await
            .ok()
            .and_then(|v| v.into_value::<String>().ok())
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok());

        let (count, ready) = match &observed {
            Some(value) => (
                value.get("count").and_then(|c| c.as_i64()).unwrap_or(-1),
                value.get("ready").and_then(|r| r.as_bool()).unwrap_or(false),
            ),
            None => (-1, false),
        };

        if ready && count == last_count {
            if stable_since.elapsed() >= NETWORK_IDLE_STABLE {
                return Ok(true);
            }
        } else {
            stable_since = Instant::now();
        }
        last_count = count;

        sleep_or_cancel(Duration::from_millis(250), cancel).await?;
    }
    Ok(false)
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), CloneError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CloneError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_default_options_are_headless() {
        let options = RenderOptions::default();
        assert!(options.headless);
        assert!(options.chrome_path.is_none());
    }

    #[tokio::test]
    async fn test_scroll_loop_stops_when_height_stabilizes() {
        // Heights observed after each step: grows twice, then holds still.
        let heights = Mutex::new(vec![1500i64, 2200, 2200].into_iter());
        let heights = &heights;

        let (iterations, final_height) = run_scroll_loop(
            768,
            move || async move { Ok(heights.lock().unwrap().next()) },
            &EventSink::discard(),
        )
        .await
        .unwrap();

        // Two growth steps plus the one confirming observation.
        assert_eq!(iterations, 3);
        assert_eq!(final_height, 2200);
    }

    #[tokio::test]
    async fn test_scroll_loop_never_exceeds_iteration_cap() {
        // An infinite-scroll feed: the height grows on every observation.
        let height = AtomicI64::new(1000);
        let height = &height;

        let (iterations, _) = run_scroll_loop(
            768,
            move || async move { Ok(Some(height.fetch_add(500, Ordering::SeqCst))) },
            &EventSink::discard(),
        )
        .await
        .unwrap();

        assert_eq!(iterations, MAX_SCROLL_ITERATIONS);
    }

    #[tokio::test]
    async fn test_scroll_loop_stops_on_failed_step() {
        let (iterations, final_height) =
            run_scroll_loop(768, || async { Ok(None) }, &EventSink::discard())
                .await
                .unwrap();

        assert_eq!(iterations, 0);
        assert_eq!(final_height, 768);
    }

    #[tokio::test]
    async fn test_scroll_loop_propagates_cancellation() {
        let result = run_scroll_loop(
            768,
            || async { Err(CloneError::Cancelled) },
            &EventSink::discard(),
        )
        .await;

        assert!(matches!(result, Err(CloneError::Cancelled)));
    }
}
