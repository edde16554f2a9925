//! Tab-level rendering
//!
//! Drives one tab through navigate (or inject inline HTML), wait for the
//! document body, a short paint settle, and print-to-PDF. Also hosts the
//! browser launcher and the fresh-browser-per-request fallback used when the
//! pool is disabled.

use std::path::Path;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::ChromeError;
use crate::config::PdfConfig;
use crate::params::{RenderParams, Source};

/// Static settle delay after the body appears. A rendering-quality knob, not
/// a correctness device.
const PAINT_SETTLE: Duration = Duration::from_millis(200);

/// Poll interval while waiting for the document body.
const BODY_POLL: Duration = Duration::from_millis(50);

/// Budget for graceful browser teardown before the hard kill.
pub(crate) const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Launch a Chromium process with software rendering forced and a private
/// profile directory, and spawn its DevTools event loop.
pub(crate) async fn launch_browser(
    cfg: &PdfConfig,
    profile_dir: &Path,
) -> Result<(Browser, JoinHandle<()>), ChromeError> {
    let mut builder = BrowserConfig::builder().user_data_dir(profile_dir).args(vec![
        "--disable-gpu",
        "--disable-gpu-compositing",
        "--disable-features=Vulkan,UseSkiaRenderer",
        "--use-gl=swiftshader",
        "--disable-dev-shm-usage",
    ]);
    if !cfg.chrome_path.is_empty() {
        builder = builder.chrome_executable(&cfg.chrome_path);
    }
    if cfg.chrome_no_sandbox {
        builder = builder.no_sandbox();
    }

    let browser_cfg = builder.build().map_err(ChromeError::Launch)?;
    let (browser, mut handler) = Browser::launch(browser_cfg).await?;

    let event_loop = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    Ok((browser, event_loop))
}

/// Render the given params in an existing tab, bounded by `deadline`.
pub(crate) async fn render_in_tab(
    page: &Page,
    params: &RenderParams,
    deadline: Duration,
) -> Result<Vec<u8>, ChromeError> {
    match timeout(deadline, print_pdf(page, params)).await {
        Ok(result) => result,
        Err(_) => Err(ChromeError::RenderTimeout),
    }
}

async fn print_pdf(page: &Page, params: &RenderParams) -> Result<Vec<u8>, ChromeError> {
    match &params.source {
        Source::Url(url) => {
            page.goto(url.as_str()).await?;
            wait_for_body(page).await?;
        }
        Source::Html(html) => {
            page.goto("about:blank").await?;
            page.set_content(html.as_str()).await?;
            wait_for_body(page).await?;
        }
    }

    tokio::time::sleep(PAINT_SETTLE).await;

    let pdf = page.pdf(print_params(params)).await?;
    Ok(pdf)
}

/// Poll until the document body exists. Bounded by the caller's render
/// deadline.
async fn wait_for_body(page: &Page) -> Result<(), ChromeError> {
    loop {
        if page.find_element("body").await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(BODY_POLL).await;
    }
}

fn print_params(params: &RenderParams) -> PrintToPdfParams {
    PrintToPdfParams {
        print_background: Some(true),
        paper_width: Some(params.paper.width),
        paper_height: Some(params.paper.height),
        margin_top: Some(params.margin),
        margin_bottom: Some(params.margin),
        margin_left: Some(params.margin),
        margin_right: Some(params.margin),
        ..Default::default()
    }
}

/// Fallback when the pool is disabled: launch a browser in a private temp
/// profile, render once, and tear everything down on every exit path. Trades
/// throughput for isolation; the pooled path must match its output.
pub(crate) async fn render_with_fresh_browser(
    params: &RenderParams,
    cfg: &PdfConfig,
    deadline: Duration,
) -> Result<Vec<u8>, ChromeError> {
    let profile = tempfile::Builder::new().prefix("chromedata-").tempdir()?;
    let (mut browser, event_loop) = launch_browser(cfg, profile.path()).await?;

    let result = async {
        let page = browser.new_page("about:blank").await?;
        render_in_tab(&page, params, deadline).await
    }
    .await;

    let _ = timeout(TEARDOWN_TIMEOUT, browser.close()).await;
    let _ = timeout(TEARDOWN_TIMEOUT, browser.wait()).await;
    event_loop.abort();
    drop(browser);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PaperSize;

    #[test]
    fn print_params_carry_paper_and_margins() {
        let params = RenderParams {
            source: Source::Html("<html>hello world</html>".to_string()),
            format: "A4".to_string(),
            orientation: String::new(),
            margin: 0.7,
            filename: "output.pdf".to_string(),
            paper: PaperSize::new(8.27, 11.69),
        };

        let print = print_params(&params);
        assert_eq!(print.print_background, Some(true));
        assert_eq!(print.paper_width, Some(8.27));
        assert_eq!(print.paper_height, Some(11.69));
        assert_eq!(print.margin_top, Some(0.7));
        assert_eq!(print.margin_bottom, Some(0.7));
        assert_eq!(print.margin_left, Some(0.7));
        assert_eq!(print.margin_right, Some(0.7));
    }

    #[tokio::test]
    async fn fresh_browser_with_missing_executable_fails_to_launch() {
        let cfg = PdfConfig {
            chrome_path: "/definitely/missing/chrome".to_string(),
            ..PdfConfig::default()
        };
        let params = RenderParams {
            source: Source::Html("<html>hello world</html>".to_string()),
            format: String::new(),
            orientation: String::new(),
            margin: 0.4,
            filename: "output.pdf".to_string(),
            paper: PaperSize::new(8.27, 11.69),
        };

        let err = render_with_fresh_browser(&params, &cfg, Duration::from_secs(1))
            .await
            .expect_err("missing chrome must fail");
        assert!(!matches!(err, ChromeError::RenderTimeout));
    }
}
