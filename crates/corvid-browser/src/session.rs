//! Session state and the action pipeline.
//!
//! A [`Session`] owns at most one browser process and one page. Accessors
//! fail loudly when nothing is open instead of conjuring state on demand;
//! pages arrive only through [`Session::create_page`] or an explicit
//! [`Session::set_page`] binding.
//!
//! [`Session::run`] is the shared pipeline every action goes through: take
//! the event subscription, run the action, let the page settle, apply the
//! file chooser policy, then package the result as an [`Envelope`].

use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BrowserError, Result};
use crate::launcher::{LaunchOptions, LaunchedBrowser};
use crate::page::Page;
use crate::snapshot::{self, RefTarget, Snapshot};
use crate::wait;

/// Appended to text results while a file chooser is being held open.
pub const FILE_CHOOSER_ADVISORY: &str =
    "- There is a file chooser visible that requires browser_choose_file to be called";

// ----------------------------------------------------------------------
// Result envelope
// ----------------------------------------------------------------------

/// A finished action result. Text and image are mutually exclusive by
/// construction; no result carries both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Text(String),
    Image { data: String, mime: &'static str },
}

impl Envelope {
    pub fn text(content: impl Into<String>) -> Self {
        Envelope::Text(content.into())
    }

    /// Encode screenshot bytes. Raw captures are PNG, the default capture
    /// path compresses to JPEG.
    pub fn image(bytes: &[u8], raw: bool) -> Self {
        Envelope::Image {
            data: BASE64.encode(bytes),
            mime: if raw { "image/png" } else { "image/jpeg" },
        }
    }
}

/// Join the non-empty sections of a text result with blank lines.
fn assemble_text(status: &str, chooser_visible: bool, document: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !status.is_empty() {
        parts.push(status);
    }
    if chooser_visible {
        parts.push(FILE_CHOOSER_ADVISORY);
    }
    if let Some(document) = document {
        parts.push(document);
    }
    parts.join("\n\n")
}

// ----------------------------------------------------------------------
// Run options
// ----------------------------------------------------------------------

/// How an action's aftermath is handled.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Leading line of the text result.
    pub status: String,
    /// Append a fresh snapshot of the settled page.
    pub capture_snapshot: bool,
    /// Give the page a bounded window to settle before packaging.
    pub wait_for_completion: bool,
    /// Keep a chooser that was already pending when this action started
    /// instead of discarding it afterwards. A chooser the action itself
    /// opens always survives.
    pub preserve_file_chooser: bool,
}

impl RunOptions {
    /// The common shape: wait for the page to settle, then append a
    /// snapshot under the status line.
    pub fn with_snapshot(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            capture_snapshot: true,
            wait_for_completion: true,
            preserve_file_chooser: false,
        }
    }

    /// Status text only, no settling and no snapshot.
    pub fn status_only(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            capture_snapshot: false,
            wait_for_completion: false,
            preserve_file_chooser: false,
        }
    }
}

// ----------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------

struct PageState {
    page: Page,
    /// Backend node id of the input behind an intercepted file chooser.
    /// Single slot: a newly opened chooser replaces a forgotten one.
    pending_chooser: Arc<Mutex<Option<i64>>>,
    chooser_listener: Option<JoinHandle<()>>,
    snapshot: Option<Snapshot>,
    generation: u64,
}

/// At most one browser process and one page, explicitly constructed.
#[derive(Default)]
pub struct Session {
    browser: Option<LaunchedBrowser>,
    page: Option<PageState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a browser, open a blank tab and make it the session's page.
    pub async fn create_page(&mut self, options: &LaunchOptions) -> Result<Page> {
        let browser = LaunchedBrowser::launch(options).await?;
        let ws_url = browser.open_tab("about:blank").await?;
        let page = Page::connect(&ws_url).await?;
        self.set_context(browser);
        self.set_page(page.clone());
        self.ensure_chooser_listener().await?;
        Ok(page)
    }

    /// Bind an already-connected page as the current page. Chooser and
    /// snapshot state start fresh; the chooser listener attaches lazily on
    /// first use, so a page supplied from outside needs no extra setup.
    pub fn set_page(&mut self, page: Page) {
        if let Some(mut old) = self.page.take() {
            if let Some(handle) = old.chooser_listener.take() {
                handle.abort();
            }
        }
        self.page = Some(PageState {
            page,
            pending_chooser: Arc::new(Mutex::new(None)),
            chooser_listener: None,
            snapshot: None,
            generation: 0,
        });
    }

    /// Adopt a launched browser as the session's browsing context.
    pub fn set_context(&mut self, browser: LaunchedBrowser) {
        self.browser = Some(browser);
    }

    pub fn has_page(&self) -> bool {
        self.page.is_some()
    }

    /// The current page, or a loud failure when none is open.
    pub fn existing_page(&self) -> Result<Page> {
        self.state().map(|state| state.page.clone())
    }

    /// The launched browser, or a loud failure when none is running.
    pub fn existing_browser(&self) -> Result<&LaunchedBrowser> {
        self.browser.as_ref().ok_or(BrowserError::NoActiveContext)
    }

    fn state(&self) -> Result<&PageState> {
        self.page.as_ref().ok_or(BrowserError::NoActivePage)
    }

    fn state_mut(&mut self) -> Result<&mut PageState> {
        self.page.as_mut().ok_or(BrowserError::NoActivePage)
    }

    // ------------------------------------------------------------------
    // File chooser arbitration
    // ------------------------------------------------------------------

    /// Install chooser interception once per page. Idempotent; the listener
    /// task records the most recent `Page.fileChooserOpened` into the slot.
    async fn ensure_chooser_listener(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        if state.chooser_listener.is_some() {
            return Ok(());
        }
        let mut events = state.page.connection().subscribe();
        state.page.set_intercept_file_chooser(true).await?;
        let slot = Arc::clone(&state.pending_chooser);
        state.chooser_listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.method == "Page.fileChooserOpened" => {
                        if let Some(backend) =
                            event.params.get("backendNodeId").and_then(Value::as_i64)
                        {
                            debug!(backend, "file chooser intercepted");
                            *slot.lock().await = Some(backend);
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        Ok(())
    }

    pub async fn has_file_chooser(&mut self) -> Result<bool> {
        self.ensure_chooser_listener().await?;
        Ok(self.state()?.pending_chooser.lock().await.is_some())
    }

    /// Feed paths to the input element behind the pending chooser. The
    /// pending entry is consumed only when the protocol call succeeds, so a
    /// failed submission can be retried.
    pub async fn submit_file_chooser(&mut self, files: &[String]) -> Result<()> {
        self.ensure_chooser_listener().await?;
        let state = self.state()?;
        let pending = *state.pending_chooser.lock().await;
        let Some(backend) = pending else {
            return Err(BrowserError::NoFileChooser);
        };
        state.page.set_file_input_files(backend, files).await?;
        *state.pending_chooser.lock().await = None;
        Ok(())
    }

    /// Drop a pending chooser without feeding it anything.
    pub async fn clear_file_chooser(&mut self) -> Result<()> {
        self.ensure_chooser_listener().await?;
        let state = self.state()?;
        *state.pending_chooser.lock().await = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Action pipeline
    // ------------------------------------------------------------------

    /// Run one action against the current page and package its aftermath.
    ///
    /// The event subscription is taken before the action starts so the
    /// settle tracker sees every request the action triggers. Settling is
    /// skipped when the action itself failed. Chooser policy: a chooser
    /// already pending when the action started cannot have been meant for
    /// it and is dropped afterwards (unless preserved), action outcome
    /// notwithstanding; a chooser the action itself opened stays pending.
    pub async fn run<F, Fut>(&mut self, options: RunOptions, action: F) -> Result<Envelope>
    where
        F: FnOnce(Page) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.ensure_chooser_listener().await?;
        let page = self.existing_page()?;
        let dismiss_chooser = !options.preserve_file_chooser && self.has_file_chooser().await?;
        let mut events = page.connection().subscribe();

        let outcome = action(page.clone()).await;
        if outcome.is_ok() && options.wait_for_completion {
            wait::wait_for_completion(&page, &mut events, wait::SETTLE_CEILING).await;
        }
        if dismiss_chooser {
            let _ = self.clear_file_chooser().await;
        }
        outcome?;

        if options.capture_snapshot {
            self.capture_snapshot(&options.status).await
        } else {
            Ok(Envelope::text(options.status))
        }
    }

    /// [`Session::run`] with the default settle-then-snapshot packaging.
    pub async fn run_and_wait<F, Fut>(
        &mut self,
        status: impl Into<String>,
        action: F,
    ) -> Result<Envelope>
    where
        F: FnOnce(Page) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.run(RunOptions::with_snapshot(status), action).await
    }

    /// Submit the pending file chooser, let the page react, and package a
    /// fresh snapshot. On failure the pending entry survives for a retry.
    pub async fn submit_files_and_snapshot(
        &mut self,
        files: &[String],
        status: &str,
    ) -> Result<Envelope> {
        self.ensure_chooser_listener().await?;
        let page = self.existing_page()?;
        let mut events = page.connection().subscribe();
        self.submit_file_chooser(files).await?;
        wait::wait_for_completion(&page, &mut events, wait::SETTLE_CEILING).await;
        self.capture_snapshot(status).await
    }

    // ------------------------------------------------------------------
    // Snapshots and refs
    // ------------------------------------------------------------------

    /// Capture a new snapshot generation and assemble the text envelope.
    /// Every ref from earlier generations goes stale the moment this
    /// succeeds; on failure the previous snapshot stays authoritative.
    pub async fn capture_snapshot(&mut self, status: &str) -> Result<Envelope> {
        let chooser_visible = self.has_file_chooser().await?;
        let state = self.state_mut()?;
        let generation = state.generation + 1;
        let snapshot = snapshot::capture(&state.page, generation).await?;
        let url = state.page.url().await?;
        let title = state.page.title().await?;
        let document = snapshot::format_document(&url, &title, snapshot.text());
        state.generation = generation;
        state.snapshot = Some(snapshot);
        Ok(Envelope::text(assemble_text(
            status,
            chooser_visible,
            Some(&document),
        )))
    }

    /// Resolve a ref against the most recent snapshot. Before any snapshot
    /// exists there is nothing to resolve against, so every framed ref is
    /// reported the same way as one naming a frame that is gone.
    pub fn ref_locator(&self, raw: &str) -> Result<RefTarget> {
        match &self.state()?.snapshot {
            Some(snapshot) => snapshot.resolve(raw),
            None => Err(BrowserError::FrameMissing),
        }
    }

    /// Generation of the most recent snapshot, 0 before the first capture.
    pub fn snapshot_generation(&self) -> u64 {
        self.page.as_ref().map(|state| state.generation).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop the chooser listener and kill the browser process.
    pub async fn close(&mut self) {
        if let Some(mut state) = self.page.take() {
            if let Some(handle) = state.chooser_listener.take() {
                handle.abort();
            }
        }
        if let Some(browser) = self.browser.take() {
            browser.close().await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("has_browser", &self.browser.is_some())
            .field("has_page", &self.page.is_some())
            .finish()
    }
}
