//! Error types for the browser engine.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Errors surfaced by the browser engine.
///
/// Tool layers are expected to turn these into plain text for the caller;
/// the `Display` strings are written to read well in that position.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Websocket connection to the browser could not be established.
    #[error("failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The browser process could not be started or never exposed DevTools.
    #[error("failed to launch browser: {reason}")]
    LaunchFailed { reason: String },

    /// The browser answered a command with a protocol-level error.
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// A command did not receive a reply in time.
    #[error("{method} timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A reply or event did not have the shape the engine expects.
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },

    /// Navigation was rejected by the browser (bad URL, DNS failure, ...).
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// A script evaluated in the page threw.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// The target element cannot receive input (zero size, detached, ...).
    #[error("element is not interactable: {reason}")]
    NotInteractable { reason: String },

    /// No page has been bound to the session.
    #[error("No page open. Use navigate first.")]
    NoActivePage,

    /// No browsing context has been bound to the session.
    #[error("No browser context open. Use navigate first.")]
    NoActiveContext,

    /// A file submission was requested while no chooser is pending.
    #[error("No file chooser visible")]
    NoFileChooser,

    /// A ref addressed a frame index the current snapshot does not have.
    #[error("Frame does not exist. Provide ref from the most current snapshot.")]
    FrameMissing,

    /// A ref was minted by an older snapshot generation.
    #[error("Ref is from a stale snapshot. Provide ref from the most current snapshot.")]
    StaleRef,

    /// A ref string does not parse or is unknown to the current snapshot.
    #[error("invalid ref: {reason}")]
    BadRef { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
