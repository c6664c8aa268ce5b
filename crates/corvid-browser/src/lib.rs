//! # corvid-browser
//!
//! Chrome automation engine: one session, ref-addressed snapshots, settled
//! action results.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corvid_browser::{Envelope, LaunchOptions, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> corvid_browser::Result<()> {
//! let mut session = Session::new();
//! session.create_page(&LaunchOptions::default()).await?;
//!
//! session.existing_page()?.navigate("https://example.com").await?;
//!
//! // Snapshot the page; refs like [ref=s1e4] address elements in it.
//! if let Envelope::Text(text) = session.capture_snapshot("").await? {
//!     println!("{text}");
//! }
//! let target = session.ref_locator("s1e4")?;
//! session
//!     .run_and_wait("Clicked", |page| async move {
//!         page.click_backend_node(target.backend_node_id).await
//!     })
//!     .await?;
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cdp;
pub mod error;
pub mod launcher;
pub mod page;
pub mod session;
pub mod snapshot;

mod wait;

pub use error::{BrowserError, Result};
pub use launcher::{LaunchOptions, LaunchedBrowser};
pub use page::{ElementState, Page};
pub use session::{Envelope, RunOptions, Session, FILE_CHOOSER_ADVISORY};
pub use snapshot::{RefTarget, Snapshot};
