//! Chrome adapter over the DevTools protocol (chromiumoxide).
//!
//! Every session launches its own browser process, opens one tab and points
//! Chrome's downloads at the output directory. The engine only needs
//! navigation, element lookup, clicks, the page source and a script that
//! strips modal overlays.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Handler, Page};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use super::{Automation, AutomationError, Document, Element, SessionFactory};

/// Per-command timeout. Navigation can block until the page loads.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Page the tab opens on before the first navigation.
const BLANK_PAGE: &str = "about:blank";

/// Reads tag, text and the attributes used for matching, as one JSON string.
const DESCRIBE_ELEMENT_FN: &str = r"function() {
  const attrs = {};
  for (const name of ['href', 'download', 'id', 'class', 'value', 'type', 'title', 'aria-label']) {
    const value = this.getAttribute(name);
    if (value !== null) { attrs[name] = value; }
  }
  const text = (this.innerText || this.value || '').split(/\s+/).filter(Boolean).join(' ');
  return JSON.stringify({ tag: this.tagName.toLowerCase(), text, attrs });
}";

/// Removes fixed-position, high z-index layers and clicks obvious close
/// buttons. Evaluates to the number of nodes touched.
const DISMISS_OVERLAY_SCRIPT: &str = r"(() => {
  let touched = 0;
  const closers = document.querySelectorAll(
    '[aria-label*=close i], .modal-close, .close, .popup-close, button[class*=dismiss]'
  );
  for (const el of closers) {
    if (el.offsetParent !== null) { try { el.click(); touched++; } catch (e) {} }
  }
  for (const el of Array.from(document.querySelectorAll('body *'))) {
    const style = window.getComputedStyle(el);
    const z = parseInt(style.zIndex, 10);
    if ((style.position === 'fixed' || style.position === 'sticky') && z >= 1000) {
      el.remove();
      touched++;
    }
  }
  if (document.body) { document.body.style.overflow = 'auto'; }
  return touched;
})()";

/// Browser launch options applied to every new session.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Disable image loading to save bandwidth.
    pub block_images: bool,
    /// Directory the browser saves downloads into.
    pub download_dir: PathBuf,
    /// Chrome or Chromium binary; detected when unset.
    pub executable: Option<PathBuf>,
}

impl BrowserOptions {
    /// Headless, image-free options saving into `download_dir`.
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            headless: true,
            block_images: true,
            download_dir: download_dir.into(),
            executable: None,
        }
    }

    /// Extra command-line switches on top of chromiumoxide's defaults.
    fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
        ];
        if self.block_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        args
    }

    fn launch_config(&self) -> Result<BrowserConfig, AutomationError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .request_timeout(COMMAND_TIMEOUT)
            .args(self.launch_args());
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        builder.build().map_err(AutomationError::unavailable)
    }

    /// Lets the browser save files without a prompt into `download_dir`.
    fn download_behavior(&self) -> SetDownloadBehaviorParams {
        let mut params = SetDownloadBehaviorParams::new(SetDownloadBehaviorBehavior::Allow);
        params.download_path = Some(self.download_dir.to_string_lossy().into_owned());
        params
    }
}

/// Launches one Chrome process per session.
#[derive(Debug, Clone)]
pub struct ChromeFactory {
    options: BrowserOptions,
}

impl ChromeFactory {
    /// Creates a factory launching Chrome with `options`.
    #[must_use]
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }

    /// The launch options.
    #[must_use]
    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }
}

#[async_trait]
impl SessionFactory for ChromeFactory {
    #[instrument(skip(self), fields(headless = self.options.headless))]
    async fn create(&self) -> Result<Box<dyn Automation>, AutomationError> {
        let config = self.options.launch_config()?;
        let (mut browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| AutomationError::unavailable(format!("cannot launch Chrome: {e}")))?;
        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let setup = async {
            browser.execute(self.options.download_behavior()).await?;
            browser.new_page(BLANK_PAGE).await
        };
        let page = match setup.await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close) = browser.close().await {
                    debug!(error = %close, "closing half-started browser failed");
                }
                handler_task.abort();
                return Err(AutomationError::unavailable(format!(
                    "cannot prepare Chrome tab: {e}"
                )));
            }
        };
        debug!(download_dir = %self.options.download_dir.display(), "Chrome session started");

        Ok(Box::new(ChromeSession {
            browser,
            page,
            handler_task,
            closed,
            elements: HashMap::new(),
        }))
    }
}

/// Drives the browser's event stream until the connection ends.
fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!(error = %e, "Chrome handler event error");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// Element description produced by [`DESCRIBE_ELEMENT_FN`].
#[derive(Debug, Deserialize)]
struct Described {
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
}

/// A live Chrome process with one tab.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    /// Elements from the last lookup, keyed by backend node id.
    elements: HashMap<String, chromiumoxide::Element>,
}

impl std::fmt::Debug for ChromeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeSession")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("elements", &self.elements.len())
            .finish_non_exhaustive()
    }
}

impl ChromeSession {
    fn ensure_open(&self) -> Result<(), AutomationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AutomationError::invalid_session(
                "browser connection closed",
            ));
        }
        Ok(())
    }

    async fn describe(
        element: &chromiumoxide::Element,
        handle: &str,
    ) -> Result<Element, AutomationError> {
        let returns = element
            .call_js_fn(DESCRIBE_ELEMENT_FN, false)
            .await
            .map_err(map_cdp_error)?;
        let json = returns
            .result
            .value
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AutomationError::command("element description was not a string"))?;
        let described: Described = serde_json::from_str(json)
            .map_err(|e| AutomationError::command(format!("malformed element description: {e}")))?;

        let mut out = Element::new(handle, described.tag).with_text(described.text);
        for (name, value) in described.attrs {
            out = out.with_attr(name, value);
        }
        Ok(out)
    }
}

#[async_trait]
impl Automation for ChromeSession {
    #[instrument(skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), AutomationError> {
        self.ensure_open()?;
        self.elements.clear();
        match self.page.goto(url).await {
            Ok(_) => Ok(()),
            // A URL that serves a file turns into a download and aborts the navigation
            Err(e) if e.to_string().contains("ERR_ABORTED") => {
                debug!("navigation became a download");
                Ok(())
            }
            Err(e) => match map_cdp_error(e) {
                AutomationError::Command { message } => {
                    Err(AutomationError::navigation(url, message))
                }
                other => Err(other),
            },
        }
    }

    async fn find_candidates(
        &mut self,
        selectors: &[&str],
    ) -> Result<Vec<Element>, AutomationError> {
        self.ensure_open()?;
        self.elements.clear();
        let mut candidates = Vec::new();
        for selector in selectors {
            let found = self
                .page
                .find_elements(*selector)
                .await
                .map_err(map_cdp_error)?;
            trace!(selector, count = found.len(), "candidate elements found");
            for element in found {
                let handle = element.backend_node_id.inner().to_string();
                if self.elements.contains_key(&handle) {
                    continue;
                }
                candidates.push(Self::describe(&element, &handle).await?);
                self.elements.insert(handle, element);
            }
        }
        Ok(candidates)
    }

    async fn click(&mut self, element: &Element) -> Result<(), AutomationError> {
        self.ensure_open()?;
        let target = self.elements.get(&element.handle.0).ok_or_else(|| {
            AutomationError::stale(format!("element {} is from an older lookup", element.handle.0))
        })?;
        target.click().await.map_err(map_cdp_error)?;
        Ok(())
    }

    async fn read_dom(&mut self) -> Result<Document, AutomationError> {
        self.ensure_open()?;
        let url = self.page.url().await.map_err(map_cdp_error)?;
        let html = self.page.content().await.map_err(map_cdp_error)?;
        Ok(Document::new(url.unwrap_or_default(), html))
    }

    async fn dismiss_overlay(&mut self) -> Result<bool, AutomationError> {
        self.ensure_open()?;
        let touched: u64 = self
            .page
            .evaluate(DISMISS_OVERLAY_SCRIPT)
            .await
            .map_err(map_cdp_error)?
            .into_value()
            .unwrap_or(0);
        Ok(touched > 0)
    }

    async fn close(&mut self) -> Result<(), AutomationError> {
        self.elements.clear();
        if self.closed.swap(true, Ordering::SeqCst) {
            self.handler_task.abort();
            return Ok(());
        }
        let result = self.browser.close().await.map(|_| ());
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "waiting for Chrome to exit failed");
        }
        self.handler_task.abort();
        result.map_err(map_cdp_error)
    }
}

/// Classifies a DevTools failure by what the engine must do about it.
fn map_cdp_error(error: CdpError) -> AutomationError {
    classify(error.to_string())
}

fn classify(message: String) -> AutomationError {
    let lower = message.to_lowercase();
    if ["no node with given id", "could not find node", "node is detached", "cannot find context"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        AutomationError::stale(message)
    } else if ["target closed", "session closed", "no target with given id", "channel", "websocket"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        AutomationError::invalid_session(message)
    } else if ["not interactable", "box model", "scroll", "not visible"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        AutomationError::not_interactable(message)
    } else {
        AutomationError::command(message)
    }
}
