//! Launching a local Chrome/Chromium with a DevTools endpoint.
//!
//! Chrome prints `DevTools listening on ws://...` to stderr once the
//! debugging port is up; the launcher parses that line within a deadline
//! rather than polling the HTTP endpoint. New tabs are opened over the
//! browser-level websocket with `Target.createTarget`, and each page's own
//! websocket URL is derived from the browser URL plus the target id.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::cdp::CdpConnection;
use crate::error::{BrowserError, Result};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Options for spawning a local browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit browser binary; when `None`, well-known locations and
    /// `$PATH` are searched.
    pub binary: Option<PathBuf>,
    pub headless: bool,
    pub window_size: (u32, u32),
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            binary: None,
            headless: true,
            window_size: (1280, 900),
        }
    }
}

/// A running browser process and its browser-level websocket endpoint.
///
/// The child is killed when this handle drops, which also closes every
/// page that belongs to it.
pub struct LaunchedBrowser {
    child: Child,
    ws_url: String,
    connection: CdpConnection,
}

impl LaunchedBrowser {
    /// Spawn the browser and wait for its DevTools endpoint.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let binary = match &options.binary {
            Some(path) => path.clone(),
            None => default_binary()?,
        };

        let mut args: Vec<String> = Vec::new();
        if options.headless {
            args.push("--headless=new".into());
        }
        args.extend(
            [
                "--remote-debugging-port=0",
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-extensions",
                "--disable-background-networking",
                "--disable-sync",
                "--disable-translate",
                "--disable-features=TranslateUI",
                "--metrics-recording-only",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        if options.headless {
            args.push("--disable-gpu".into());
        }
        args.push(format!(
            "--window-size={},{}",
            options.window_size.0, options.window_size.1
        ));
        args.push("about:blank".into());

        debug!(binary = %binary.display(), "spawning browser");
        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed {
                reason: format!("could not spawn {}: {e}", binary.display()),
            })?;

        let stderr = child.stderr.take().ok_or_else(|| BrowserError::LaunchFailed {
            reason: "browser stderr was not captured".into(),
        })?;
        let ws_url = read_devtools_url(stderr, STARTUP_TIMEOUT).await?;
        info!(%ws_url, "browser ready");

        let connection = CdpConnection::connect(&ws_url).await?;
        Ok(Self {
            child,
            ws_url,
            connection,
        })
    }

    /// The browser-level websocket URL (`ws://.../devtools/browser/<id>`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a new tab and return the websocket URL of its page target.
    pub async fn open_tab(&self, url: &str) -> Result<String> {
        let reply = self
            .connection
            .call("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = reply
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "Target.createTarget reply missing targetId".into(),
            })?;
        page_ws_url(&self.ws_url, target_id)
    }

    /// Kill the browser process.
    pub async fn close(mut self) {
        let _ = self.child.kill().await;
    }
}

impl std::fmt::Debug for LaunchedBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedBrowser")
            .field("ws_url", &self.ws_url)
            .finish_non_exhaustive()
    }
}

async fn read_devtools_url(stderr: ChildStderr, limit: Duration) -> Result<String> {
    let deadline = Instant::now() + limit;
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match timeout_at(deadline, lines.next_line()).await {
            Err(_) => {
                return Err(BrowserError::LaunchFailed {
                    reason: format!("no DevTools endpoint announced within {limit:?}"),
                })
            }
            Ok(Err(e)) => {
                return Err(BrowserError::LaunchFailed {
                    reason: format!("reading browser stderr: {e}"),
                })
            }
            Ok(Ok(None)) => {
                return Err(BrowserError::LaunchFailed {
                    reason: "browser exited before announcing a DevTools endpoint".into(),
                })
            }
            Ok(Ok(Some(line))) => {
                if let Some(url) = parse_devtools_line(&line) {
                    return Ok(url);
                }
            }
        }
    }
}

fn parse_devtools_line(line: &str) -> Option<String> {
    const MARKER: &str = "DevTools listening on ";
    let at = line.find(MARKER)?;
    let url = line[at + MARKER.len()..].trim();
    if url.starts_with("ws://") {
        Some(url.to_string())
    } else {
        None
    }
}

/// Derive a page target's websocket URL from the browser-level URL.
fn page_ws_url(browser_ws: &str, target_id: &str) -> Result<String> {
    let at = browser_ws
        .find("/devtools/")
        .ok_or_else(|| BrowserError::Protocol {
            detail: format!("unexpected browser websocket url: {browser_ws}"),
        })?;
    Ok(format!("{}/devtools/page/{target_id}", &browser_ws[..at]))
}

/// Locate a usable Chrome or Chromium binary the same way a launch without
/// an explicit path does.
pub fn find_browser() -> Result<PathBuf> {
    default_binary()
}

fn default_binary() -> Result<PathBuf> {
    for path in well_known_paths() {
        if path.exists() {
            return Ok(path);
        }
    }
    for name in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "chrome",
    ] {
        if let Some(found) = search_path(name) {
            return Ok(found);
        }
    }
    Err(BrowserError::LaunchFailed {
        reason: "no Chrome or Chromium binary found; pass an explicit path".into(),
    })
}

fn well_known_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();

    #[cfg(target_os = "linux")]
    {
        paths.push("/usr/bin/google-chrome".into());
        paths.push("/usr/bin/google-chrome-stable".into());
        paths.push("/usr/bin/chromium".into());
        paths.push("/usr/bin/chromium-browser".into());
        paths.push("/snap/bin/chromium".into());
    }

    #[cfg(target_os = "macos")]
    {
        paths.push("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into());
        paths.push("/Applications/Chromium.app/Contents/MacOS/Chromium".into());
    }

    paths
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devtools_line_parses_url() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            parse_devtools_line(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
    }

    #[test]
    fn devtools_line_tolerates_prefix_noise() {
        let line = "[0824/120000.123:INFO] DevTools listening on ws://127.0.0.1:41001/devtools/browser/xyz";
        assert_eq!(
            parse_devtools_line(line).as_deref(),
            Some("ws://127.0.0.1:41001/devtools/browser/xyz")
        );
    }

    #[test]
    fn unrelated_stderr_lines_are_skipped() {
        assert!(parse_devtools_line("Fontconfig warning: ignoring UTF-8").is_none());
        assert!(parse_devtools_line("DevTools listening on http://nope").is_none());
    }

    #[test]
    fn page_url_derives_from_browser_url() {
        let url = page_ws_url("ws://127.0.0.1:9222/devtools/browser/abc", "TARGET1").unwrap();
        assert_eq!(url, "ws://127.0.0.1:9222/devtools/page/TARGET1");
    }

    #[test]
    fn page_url_rejects_unrecognized_shapes() {
        assert!(page_ws_url("ws://127.0.0.1:9222/other", "T").is_err());
    }

    #[test]
    fn headless_defaults_on() {
        assert!(LaunchOptions::default().headless);
    }
}
