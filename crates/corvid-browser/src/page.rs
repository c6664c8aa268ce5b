//! Page driver: navigation, input, evaluation, capture.
//!
//! All element-level operations address nodes by CDP backend node id, which
//! is stable across the whole target (nested same-process frames included).
//! That is what lets snapshot refs resolve to actionable elements without
//! any per-frame re-querying.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::cdp::{CdpConnection, CdpEvent};
use crate::error::{BrowserError, Result};

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Domains enabled on attach. `Network` must be on from the start so the
/// settle waiter sees request events for actions issued at any later point.
const ENABLED_DOMAINS: &[&str] = &["Page", "Network", "DOM", "Runtime", "Accessibility"];

const FILL_JS: &str = r#"function(value) {
    this.focus();
    if ('value' in this) {
        this.value = value;
    } else if (this.isContentEditable) {
        this.textContent = value;
    } else {
        throw new Error('element does not accept text input');
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const SELECT_JS: &str = r#"function(values) {
    if (this.tagName !== 'SELECT') {
        throw new Error('element is not a <select>');
    }
    const wanted = new Set(values);
    let matched = 0;
    for (const option of this.options) {
        const hit = wanted.has(option.value) || wanted.has(option.label);
        option.selected = hit;
        if (hit) matched += 1;
    }
    if (matched === 0) {
        throw new Error('no options matched the requested values');
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const STATE_JS: &str = r#"function() {
    const style = window.getComputedStyle(this);
    const rect = this.getBoundingClientRect();
    return {
        visible: style.visibility !== 'hidden' && style.display !== 'none'
            && rect.width > 0 && rect.height > 0,
        text: (this.innerText !== undefined ? this.innerText : (this.textContent || '')).trim(),
        enabled: !this.disabled,
        checked: this.checked === true,
    };
}"#;

/// Layered text lookup: headings first, then exact leaf text, then leaf
/// substring, then a test-id escape hatch for catalog-style targets.
const FIND_TEXT_JS: &str = r#"(() => {
    const target = __TARGET__;
    const lower = target.toLowerCase();
    for (const el of document.querySelectorAll('h1, h2, h3, h4, h5, h6, [role="heading"]')) {
        const text = (el.innerText || '').trim();
        if (text.toLowerCase().includes(lower)) return text;
    }
    const leaves = [];
    for (const el of document.querySelectorAll('*')) {
        if (el.children.length === 0) leaves.push(el);
    }
    for (const el of leaves) {
        const text = (el.innerText !== undefined ? el.innerText : (el.textContent || '')).trim();
        if (text === target) return text;
    }
    for (const el of leaves) {
        const text = (el.innerText !== undefined ? el.innerText : (el.textContent || '')).trim();
        if (text.toLowerCase().includes(lower)) return text;
    }
    if (target.includes('product-')) {
        const el = document.querySelector('[data-testid="' + target + '"]');
        if (el) return (el.innerText || el.textContent || '').trim();
    }
    for (const el of document.querySelectorAll('*')) {
        const text = el.textContent || '';
        if (text.toLowerCase().includes(lower)) return text.trim();
    }
    return null;
})()"#;

/// Observable element state used by the assertion tools.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementState {
    pub visible: bool,
    pub text: String,
    pub enabled: bool,
    pub checked: bool,
}

/// A handle to one page target. Cheap to clone; all clones share the
/// underlying connection.
#[derive(Clone)]
pub struct Page {
    cdp: Arc<CdpConnection>,
}

impl Page {
    /// Attach to an already-connected page target and enable the protocol
    /// domains the engine relies on.
    pub async fn attach(cdp: Arc<CdpConnection>) -> Result<Self> {
        for domain in ENABLED_DOMAINS {
            cdp.enable(domain).await?;
        }
        Ok(Self { cdp })
    }

    /// Connect to a page websocket URL and attach.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let cdp = Arc::new(CdpConnection::connect(ws_url).await?);
        Self::attach(cdp).await
    }

    pub fn connection(&self) -> &Arc<CdpConnection> {
        &self.cdp
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Navigate and wait for the new document's load event.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let mut events = self.cdp.subscribe();
        let reply = self.cdp.call("Page.navigate", json!({ "url": url })).await?;
        check_navigate_reply(&reply)?;
        debug!(url, "navigation committed");
        self.wait_for_load(&mut events, PAGE_LOAD_TIMEOUT).await
    }

    pub async fn go_back(&self) -> Result<()> {
        self.history_step(-1).await
    }

    pub async fn go_forward(&self) -> Result<()> {
        self.history_step(1).await
    }

    async fn history_step(&self, delta: i64) -> Result<()> {
        let history = self.cdp.call("Page.getNavigationHistory", json!({})).await?;
        let entry_id = history_entry_at(&history, delta)?;
        let mut events = self.cdp.subscribe();
        self.cdp
            .call("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        self.wait_for_load(&mut events, PAGE_LOAD_TIMEOUT).await
    }

    async fn wait_for_load(
        &self,
        events: &mut broadcast::Receiver<CdpEvent>,
        limit: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + limit;
        loop {
            match timeout_at(deadline, events.recv()).await {
                Err(_) => {
                    return Err(BrowserError::Timeout {
                        method: "Page.loadEventFired".into(),
                        duration: limit,
                    })
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(BrowserError::Protocol {
                        detail: "event stream closed while waiting for load".into(),
                    })
                }
                Ok(Ok(event)) if is_load_milestone(&event.method) => return Ok(()),
                Ok(Ok(_)) => continue,
            }
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate an expression in the main world, awaiting promises and
    /// returning the value by copy.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let reply = self
            .cdp
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        parse_remote_reply(reply)
    }

    pub async fn url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "location.href did not evaluate to a string".into(),
            })
    }

    pub async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "document.title did not evaluate to a string".into(),
            })
    }

    /// Layered text search across the document; `None` when nothing matches.
    pub async fn find_text(&self, target: &str) -> Result<Option<String>> {
        let encoded = serde_json::to_string(target).map_err(|e| BrowserError::Protocol {
            detail: format!("encoding search target: {e}"),
        })?;
        let script = FIND_TEXT_JS.replace("__TARGET__", &encoded);
        let value = self.evaluate(&script).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn call_function_on(
        &self,
        backend_node_id: i64,
        declaration: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let resolved = self
            .cdp
            .call("DOM.resolveNode", json!({ "backendNodeId": backend_node_id }))
            .await?;
        let object_id = resolved
            .pointer("/object/objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "DOM.resolveNode returned no object id".into(),
            })?;
        let arguments: Vec<Value> = args.into_iter().map(|value| json!({ "value": value })).collect();
        let reply = self
            .cdp
            .call(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "arguments": arguments,
                    "returnByValue": true,
                }),
            )
            .await?;
        parse_remote_reply(reply)
    }

    // ------------------------------------------------------------------
    // Element actions
    // ------------------------------------------------------------------

    pub async fn click_backend_node(&self, backend_node_id: i64) -> Result<()> {
        self.scroll_into_view(backend_node_id).await?;
        let (x, y) = self.node_center(backend_node_id).await?;
        self.dispatch_mouse("mouseMoved", x, y, "none", None).await?;
        self.dispatch_mouse("mousePressed", x, y, "left", Some(1)).await?;
        self.dispatch_mouse("mouseReleased", x, y, "left", Some(1)).await?;
        Ok(())
    }

    pub async fn hover_backend_node(&self, backend_node_id: i64) -> Result<()> {
        self.scroll_into_view(backend_node_id).await?;
        let (x, y) = self.node_center(backend_node_id).await?;
        self.dispatch_mouse("mouseMoved", x, y, "none", None).await
    }

    pub async fn drag_backend_node(&self, start: i64, end: i64) -> Result<()> {
        self.scroll_into_view(start).await?;
        let (sx, sy) = self.node_center(start).await?;
        self.dispatch_mouse("mouseMoved", sx, sy, "none", None).await?;
        self.dispatch_mouse("mousePressed", sx, sy, "left", Some(1)).await?;
        let (ex, ey) = self.node_center(end).await?;
        // Midpoint move so drag handlers observe motion with the button down.
        self.dispatch_mouse("mouseMoved", (sx + ex) / 2.0, (sy + ey) / 2.0, "left", None)
            .await?;
        self.dispatch_mouse("mouseMoved", ex, ey, "left", None).await?;
        self.dispatch_mouse("mouseReleased", ex, ey, "left", Some(1)).await
    }

    pub async fn fill_backend_node(&self, backend_node_id: i64, text: &str) -> Result<()> {
        self.scroll_into_view(backend_node_id).await?;
        self.cdp
            .call("DOM.focus", json!({ "backendNodeId": backend_node_id }))
            .await?;
        self.call_function_on(backend_node_id, FILL_JS, vec![Value::String(text.into())])
            .await?;
        Ok(())
    }

    pub async fn select_options_backend_node(
        &self,
        backend_node_id: i64,
        values: &[String],
    ) -> Result<()> {
        self.scroll_into_view(backend_node_id).await?;
        self.call_function_on(backend_node_id, SELECT_JS, vec![json!(values)])
            .await?;
        Ok(())
    }

    pub async fn press_key(&self, key: &str) -> Result<()> {
        let def = key_definition(key);
        self.cdp
            .call("Input.dispatchKeyEvent", build_key_params("keyDown", &def))
            .await?;
        self.cdp
            .call("Input.dispatchKeyEvent", build_key_params("keyUp", &def))
            .await?;
        Ok(())
    }

    pub async fn element_state(&self, backend_node_id: i64) -> Result<ElementState> {
        let value = self.call_function_on(backend_node_id, STATE_JS, Vec::new()).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Protocol {
            detail: format!("unexpected element state shape: {e}"),
        })
    }

    async fn scroll_into_view(&self, backend_node_id: i64) -> Result<()> {
        self.cdp
            .call(
                "DOM.scrollIntoViewIfNeeded",
                json!({ "backendNodeId": backend_node_id }),
            )
            .await?;
        Ok(())
    }

    async fn dispatch_mouse(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: Option<u32>,
    ) -> Result<()> {
        self.cdp
            .call(
                "Input.dispatchMouseEvent",
                build_mouse_params(kind, x, y, button, click_count),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Center of the element's content box in viewport coordinates.
    pub async fn node_center(&self, backend_node_id: i64) -> Result<(f64, f64)> {
        let reply = self
            .cdp
            .call("DOM.getBoxModel", json!({ "backendNodeId": backend_node_id }))
            .await?;
        content_quad_center(&reply)
    }

    /// Content-box area; zero for elements without layout.
    pub async fn node_area(&self, backend_node_id: i64) -> Result<f64> {
        let reply = self
            .cdp
            .call("DOM.getBoxModel", json!({ "backendNodeId": backend_node_id }))
            .await?;
        content_quad_area(&reply)
    }

    // ------------------------------------------------------------------
    // Frames & accessibility
    // ------------------------------------------------------------------

    pub async fn main_frame_id(&self) -> Result<String> {
        let reply = self.cdp.call("Page.getFrameTree", json!({})).await?;
        reply
            .pointer("/frameTree/frame/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol {
                detail: "frame tree missing main frame id".into(),
            })
    }

    /// The frame id an iframe element hosts, when one is attached and
    /// reachable from this target.
    pub async fn content_frame_id(&self, backend_node_id: i64) -> Result<Option<String>> {
        let reply = self
            .cdp
            .call("DOM.describeNode", json!({ "backendNodeId": backend_node_id }))
            .await?;
        Ok(reply
            .pointer("/node/frameId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// The full accessibility tree of one frame; main document when `None`.
    pub async fn full_ax_tree(&self, frame_id: Option<&str>) -> Result<Value> {
        let params = match frame_id {
            Some(id) => json!({ "frameId": id }),
            None => json!({}),
        };
        self.cdp.call("Accessibility.getFullAXTree", params).await
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Screenshot the viewport. PNG when `raw`, otherwise low-quality JPEG.
    pub async fn screenshot(&self, raw: bool) -> Result<Vec<u8>> {
        let reply = self
            .cdp
            .call("Page.captureScreenshot", screenshot_params(raw))
            .await?;
        decode_base64_payload(&reply, "screenshot")
    }

    pub async fn print_to_pdf(&self) -> Result<Vec<u8>> {
        let reply = self.cdp.call("Page.printToPDF", json!({})).await?;
        decode_base64_payload(&reply, "PDF")
    }

    // ------------------------------------------------------------------
    // File chooser plumbing
    // ------------------------------------------------------------------

    pub async fn set_intercept_file_chooser(&self, enabled: bool) -> Result<()> {
        self.cdp
            .call(
                "Page.setInterceptFileChooserDialog",
                json!({ "enabled": enabled }),
            )
            .await?;
        Ok(())
    }

    pub async fn set_file_input_files(
        &self,
        backend_node_id: i64,
        files: &[String],
    ) -> Result<()> {
        self.cdp
            .call(
                "DOM.setFileInputFiles",
                json!({ "files": files, "backendNodeId": backend_node_id }),
            )
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------
// Pure protocol helpers
// ----------------------------------------------------------------------

/// Full loads announce `Page.loadEventFired`; a same-document navigation
/// (fragment-only URL change) never fires load and announces
/// `Page.navigatedWithinDocument` instead.
fn is_load_milestone(method: &str) -> bool {
    matches!(
        method,
        "Page.loadEventFired" | "Page.navigatedWithinDocument"
    )
}

fn check_navigate_reply(reply: &Value) -> Result<()> {
    match reply.get("errorText").and_then(Value::as_str) {
        Some(error) if !error.is_empty() => Err(BrowserError::NavigationFailed {
            reason: error.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Unwrap a `Runtime.evaluate` / `Runtime.callFunctionOn` reply, turning
/// `exceptionDetails` into an error. Only the first line of a thrown
/// error's description is kept; the rest is stack trace.
fn parse_remote_reply(reply: Value) -> Result<Value> {
    if let Some(details) = reply.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .and_then(|d| d.lines().next())
            .map(str::to_string)
            .or_else(|| {
                details
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown exception".to_string());
        return Err(BrowserError::JsException { message });
    }
    Ok(reply
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

fn history_entry_at(history: &Value, delta: i64) -> Result<i64> {
    let current = history
        .get("currentIndex")
        .and_then(Value::as_i64)
        .ok_or_else(|| BrowserError::Protocol {
            detail: "navigation history missing currentIndex".into(),
        })?;
    let entries = history
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| BrowserError::Protocol {
            detail: "navigation history missing entries".into(),
        })?;
    let target = current + delta;
    if target < 0 || target as usize >= entries.len() {
        let direction = if delta < 0 { "previous" } else { "next" };
        return Err(BrowserError::NavigationFailed {
            reason: format!("no {direction} page in history"),
        });
    }
    entries[target as usize]
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| BrowserError::Protocol {
            detail: "history entry missing id".into(),
        })
}

/// Center of the content quad (8 values: four x,y corner pairs).
fn content_quad_center(reply: &Value) -> Result<(f64, f64)> {
    let quad = content_quad(reply)?;
    let (min_x, max_x, min_y, max_y) = quad_bounds(&quad);
    if max_x - min_x <= 0.0 || max_y - min_y <= 0.0 {
        return Err(BrowserError::NotInteractable {
            reason: "element has zero size".into(),
        });
    }
    Ok(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
}

fn content_quad_area(reply: &Value) -> Result<f64> {
    let quad = content_quad(reply)?;
    let (min_x, max_x, min_y, max_y) = quad_bounds(&quad);
    Ok((max_x - min_x).max(0.0) * (max_y - min_y).max(0.0))
}

fn content_quad(reply: &Value) -> Result<Vec<f64>> {
    let values: Vec<f64> = reply
        .pointer("/model/content")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    if values.len() != 8 {
        return Err(BrowserError::Protocol {
            detail: format!("content quad has {} values, expected 8", values.len()),
        });
    }
    Ok(values)
}

fn quad_bounds(quad: &[f64]) -> (f64, f64, f64, f64) {
    let xs = [quad[0], quad[2], quad[4], quad[6]];
    let ys = [quad[1], quad[3], quad[5], quad[7]];
    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min_x, max_x, min_y, max_y)
}

fn build_mouse_params(kind: &str, x: f64, y: f64, button: &str, click_count: Option<u32>) -> Value {
    let mut params = json!({
        "type": kind,
        "x": x,
        "y": y,
        "button": button,
    });
    if let Some(count) = click_count {
        params["clickCount"] = json!(count);
    }
    params
}

fn screenshot_params(raw: bool) -> Value {
    if raw {
        json!({ "format": "png" })
    } else {
        json!({ "format": "jpeg", "quality": 50 })
    }
}

fn decode_base64_payload(reply: &Value, what: &str) -> Result<Vec<u8>> {
    let data = reply
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| BrowserError::Protocol {
            detail: format!("{what} reply missing data"),
        })?;
    BASE64.decode(data).map_err(|e| BrowserError::Protocol {
        detail: format!("{what} payload is not valid base64: {e}"),
    })
}

// ----------------------------------------------------------------------
// Keyboard mapping
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub text: String,
    pub virtual_key_code: i64,
}

/// Map a friendly key name to its CDP key event fields. Unrecognized names
/// pass through as literal text keys.
pub(crate) fn key_definition(name: &str) -> KeyDefinition {
    let (key, code, text, vk): (&str, &str, &str, i64) = match name.to_lowercase().as_str() {
        "enter" | "return" => ("Enter", "Enter", "\r", 13),
        "tab" => ("Tab", "Tab", "\t", 9),
        "escape" | "esc" => ("Escape", "Escape", "", 27),
        "backspace" => ("Backspace", "Backspace", "", 8),
        "delete" => ("Delete", "Delete", "", 46),
        "arrowup" | "up" => ("ArrowUp", "ArrowUp", "", 38),
        "arrowdown" | "down" => ("ArrowDown", "ArrowDown", "", 40),
        "arrowleft" | "left" => ("ArrowLeft", "ArrowLeft", "", 37),
        "arrowright" | "right" => ("ArrowRight", "ArrowRight", "", 39),
        "home" => ("Home", "Home", "", 36),
        "end" => ("End", "End", "", 35),
        "pageup" => ("PageUp", "PageUp", "", 33),
        "pagedown" => ("PageDown", "PageDown", "", 34),
        "space" => (" ", "Space", " ", 32),
        "insert" => ("Insert", "Insert", "", 45),
        "f1" => ("F1", "F1", "", 112),
        "f2" => ("F2", "F2", "", 113),
        "f3" => ("F3", "F3", "", 114),
        "f4" => ("F4", "F4", "", 115),
        "f5" => ("F5", "F5", "", 116),
        "f6" => ("F6", "F6", "", 117),
        "f7" => ("F7", "F7", "", 118),
        "f8" => ("F8", "F8", "", 119),
        "f9" => ("F9", "F9", "", 120),
        "f10" => ("F10", "F10", "", 121),
        "f11" => ("F11", "F11", "", 122),
        "f12" => ("F12", "F12", "", 123),
        _ => (name, name, name, 0),
    };
    KeyDefinition {
        key: key.to_string(),
        code: code.to_string(),
        text: text.to_string(),
        virtual_key_code: vk,
    }
}

fn build_key_params(kind: &str, def: &KeyDefinition) -> Value {
    let mut params = json!({
        "type": kind,
        "key": def.key,
        "code": def.code,
        "windowsVirtualKeyCode": def.virtual_key_code,
    });
    // Text only belongs on key-down, and only for keys that produce input.
    if kind == "keyDown" && !def.text.is_empty() {
        params["text"] = json!(def.text);
        params["unmodifiedText"] = json!(def.text);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- navigation replies -------------------------------------------------

    #[test]
    fn navigate_reply_without_error_passes() {
        let reply = json!({ "frameId": "F1", "loaderId": "L1" });
        assert!(check_navigate_reply(&reply).is_ok());
    }

    #[test]
    fn navigate_reply_with_error_text_fails() {
        let reply = json!({ "frameId": "F1", "errorText": "net::ERR_NAME_NOT_RESOLVED" });
        let err = check_navigate_reply(&reply).unwrap_err();
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn navigate_reply_with_empty_error_text_passes() {
        let reply = json!({ "frameId": "F1", "errorText": "" });
        assert!(check_navigate_reply(&reply).is_ok());
    }

    #[test]
    fn fragment_navigation_counts_as_loaded() {
        assert!(is_load_milestone("Page.loadEventFired"));
        assert!(is_load_milestone("Page.navigatedWithinDocument"));
        assert!(!is_load_milestone("Page.frameNavigated"));
        assert!(!is_load_milestone("Network.loadingFinished"));
    }

    // -- evaluate replies ---------------------------------------------------

    #[test]
    fn evaluate_reply_unwraps_value() {
        let reply = json!({ "result": { "type": "string", "value": "hello" } });
        assert_eq!(parse_remote_reply(reply).unwrap(), json!("hello"));
    }

    #[test]
    fn evaluate_reply_missing_value_is_null() {
        let reply = json!({ "result": { "type": "undefined" } });
        assert!(parse_remote_reply(reply).unwrap().is_null());
    }

    #[test]
    fn evaluate_exception_uses_first_description_line() {
        let reply = json!({
            "result": { "type": "object" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {
                    "description": "Error: boom\n    at <anonymous>:1:7"
                }
            }
        });
        match parse_remote_reply(reply) {
            Err(BrowserError::JsException { message }) => assert_eq!(message, "Error: boom"),
            other => panic!("expected JsException, got {other:?}"),
        }
    }

    #[test]
    fn evaluate_exception_falls_back_to_text() {
        let reply = json!({
            "exceptionDetails": { "text": "Uncaught SyntaxError" }
        });
        match parse_remote_reply(reply) {
            Err(BrowserError::JsException { message }) => {
                assert_eq!(message, "Uncaught SyntaxError")
            }
            other => panic!("expected JsException, got {other:?}"),
        }
    }

    // -- history ------------------------------------------------------------

    fn history_fixture() -> Value {
        json!({
            "currentIndex": 1,
            "entries": [
                { "id": 10, "url": "about:blank" },
                { "id": 11, "url": "https://a.test/" },
                { "id": 12, "url": "https://b.test/" }
            ]
        })
    }

    #[test]
    fn history_back_picks_previous_entry() {
        assert_eq!(history_entry_at(&history_fixture(), -1).unwrap(), 10);
    }

    #[test]
    fn history_forward_picks_next_entry() {
        assert_eq!(history_entry_at(&history_fixture(), 1).unwrap(), 12);
    }

    #[test]
    fn history_back_at_start_fails() {
        let history = json!({ "currentIndex": 0, "entries": [{ "id": 10 }] });
        let err = history_entry_at(&history, -1).unwrap_err();
        assert!(err.to_string().contains("no previous page"));
    }

    #[test]
    fn history_forward_at_end_fails() {
        let history = json!({ "currentIndex": 0, "entries": [{ "id": 10 }] });
        let err = history_entry_at(&history, 1).unwrap_err();
        assert!(err.to_string().contains("no next page"));
    }

    // -- geometry -----------------------------------------------------------

    fn box_model(quad: Value) -> Value {
        json!({ "model": { "content": quad } })
    }

    #[test]
    fn quad_center_is_midpoint() {
        let reply = box_model(json!([10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]));
        let (x, y) = content_quad_center(&reply).unwrap();
        assert_eq!(x, 60.0);
        assert_eq!(y, 40.0);
    }

    #[test]
    fn zero_size_quad_is_not_interactable() {
        let reply = box_model(json!([5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0]));
        match content_quad_center(&reply) {
            Err(BrowserError::NotInteractable { .. }) => {}
            other => panic!("expected NotInteractable, got {other:?}"),
        }
    }

    #[test]
    fn short_quad_is_protocol_error() {
        let reply = box_model(json!([1.0, 2.0, 3.0]));
        assert!(matches!(
            content_quad_center(&reply),
            Err(BrowserError::Protocol { .. })
        ));
    }

    #[test]
    fn quad_area_matches_rectangle() {
        let reply = box_model(json!([0.0, 0.0, 100.0, 0.0, 100.0, 50.0, 0.0, 50.0]));
        assert_eq!(content_quad_area(&reply).unwrap(), 5000.0);
    }

    // -- input params -------------------------------------------------------

    #[test]
    fn mouse_press_params_carry_button_and_count() {
        let params = build_mouse_params("mousePressed", 12.5, 40.0, "left", Some(1));
        assert_eq!(params["type"], "mousePressed");
        assert_eq!(params["x"], 12.5);
        assert_eq!(params["button"], "left");
        assert_eq!(params["clickCount"], 1);
    }

    #[test]
    fn mouse_move_params_omit_click_count() {
        let params = build_mouse_params("mouseMoved", 1.0, 2.0, "none", None);
        assert!(params.get("clickCount").is_none());
        assert_eq!(params["button"], "none");
    }

    #[test]
    fn enter_key_maps_to_carriage_return() {
        let def = key_definition("Enter");
        assert_eq!(def.key, "Enter");
        assert_eq!(def.text, "\r");
        assert_eq!(def.virtual_key_code, 13);
    }

    #[test]
    fn arrow_aliases_map_to_same_key() {
        assert_eq!(key_definition("up"), key_definition("ArrowUp"));
        assert_eq!(key_definition("down"), key_definition("arrowdown"));
    }

    #[test]
    fn function_keys_map_to_virtual_codes() {
        assert_eq!(key_definition("F5").virtual_key_code, 116);
        assert_eq!(key_definition("f12").virtual_key_code, 123);
    }

    #[test]
    fn unknown_key_passes_through_as_text() {
        let def = key_definition("a");
        assert_eq!(def.key, "a");
        assert_eq!(def.text, "a");
        assert_eq!(def.virtual_key_code, 0);
    }

    #[test]
    fn key_down_carries_text_key_up_does_not() {
        let def = key_definition("enter");
        let down = build_key_params("keyDown", &def);
        let up = build_key_params("keyUp", &def);
        assert_eq!(down["text"], "\r");
        assert!(up.get("text").is_none());
    }

    #[test]
    fn escape_key_down_has_no_text() {
        let def = key_definition("escape");
        let down = build_key_params("keyDown", &def);
        assert!(down.get("text").is_none());
    }

    // -- capture params -----------------------------------------------------

    #[test]
    fn raw_screenshot_is_png() {
        let params = screenshot_params(true);
        assert_eq!(params["format"], "png");
        assert!(params.get("quality").is_none());
    }

    #[test]
    fn compressed_screenshot_is_low_quality_jpeg() {
        let params = screenshot_params(false);
        assert_eq!(params["format"], "jpeg");
        assert_eq!(params["quality"], 50);
    }

    #[test]
    fn base64_payload_decodes() {
        let reply = json!({ "data": "aGVsbG8=" });
        assert_eq!(decode_base64_payload(&reply, "screenshot").unwrap(), b"hello");
    }

    #[test]
    fn missing_payload_is_protocol_error() {
        let reply = json!({});
        assert!(matches!(
            decode_base64_payload(&reply, "PDF"),
            Err(BrowserError::Protocol { .. })
        ));
    }
}
