//! Post-action settle tracking.
//!
//! After an action the page is given a bounded window to quiet down before a
//! snapshot is taken. Two regimes: while the document stays put, settling
//! means the network requests started since the action have all finished;
//! once a top-level navigation commits, the old requests are moot and
//! settling means the new document's load event. Pages that never go idle are
//! tolerated: the wait gives up at the ceiling and the snapshot shows
//! whatever state was reached.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::cdp::CdpEvent;
use crate::page::Page;

/// Hard bound on the settle wait. Reaching it is not an error.
pub(crate) const SETTLE_CEILING: Duration = Duration::from_secs(10);

/// Extra beat given to in-page work (rendering, microtasks) after the
/// network quiets down.
const IN_PAGE_GRACE_MS: u64 = 1000;

/// Tracks only activity started after the action began; requests already in
/// flight beforehand never block settling.
#[derive(Debug, Default)]
pub(crate) struct SettleTracker {
    inflight: HashSet<String>,
    navigated: bool,
    loaded: bool,
}

impl SettleTracker {
    pub(crate) fn observe(&mut self, event: &CdpEvent) {
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                // After a navigation commits, the load event is the only
                // milestone; individual requests stop being tracked.
                if !self.navigated {
                    if let Some(id) = request_id(&event.params) {
                        self.inflight.insert(id.to_string());
                    }
                }
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                if let Some(id) = request_id(&event.params) {
                    self.inflight.remove(id);
                }
            }
            "Page.frameNavigated" => {
                if is_top_level(&event.params) {
                    self.navigated = true;
                    self.inflight.clear();
                }
            }
            "Page.loadEventFired" => {
                if self.navigated {
                    self.loaded = true;
                }
            }
            _ => {}
        }
    }

    pub(crate) fn settled(&self) -> bool {
        if self.navigated {
            self.loaded
        } else {
            self.inflight.is_empty()
        }
    }

    fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

fn request_id(params: &Value) -> Option<&str> {
    params.get("requestId").and_then(Value::as_str)
}

/// A `Page.frameNavigated` for a frame without a parent is the main document.
fn is_top_level(params: &Value) -> bool {
    match params.get("frame") {
        Some(frame) => frame.get("parentId").and_then(Value::as_str).is_none(),
        None => false,
    }
}

/// Wait for the page to settle after an action. The receiver must have been
/// subscribed before the action ran so nothing is missed. Never fails; a
/// page that will not go idle simply stops being waited for at the ceiling.
pub(crate) async fn wait_for_completion(
    page: &Page,
    events: &mut broadcast::Receiver<CdpEvent>,
    ceiling: Duration,
) {
    settle_on_events(events, ceiling).await;

    // Scripts often react to the final response; give them one beat.
    let grace = format!("new Promise(resolve => setTimeout(resolve, {IN_PAGE_GRACE_MS}))");
    let _ = page.evaluate(&grace).await;
}

/// The settle race proper: drain what already happened, then keep observing
/// until the tracker reports settled or the ceiling passes, whichever first.
async fn settle_on_events(events: &mut broadcast::Receiver<CdpEvent>, ceiling: Duration) {
    let deadline = Instant::now() + ceiling;
    let mut tracker = SettleTracker::default();

    // Account for everything that happened while the action itself ran.
    loop {
        match events.try_recv() {
            Ok(event) => tracker.observe(&event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    while !tracker.settled() {
        match timeout_at(deadline, events.recv()).await {
            Err(_) => {
                debug!(inflight = tracker.inflight(), "settle ceiling reached");
                break;
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Ok(Ok(event)) => tracker.observe(&event),
        }
    }
}
