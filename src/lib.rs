//! # corvid-tools
//!
//! Snapshot-driven browser automation tools for AI agents, served over MCP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corvid_tools::{tools, LaunchOptions, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> corvid_tools::Result<()> {
//! let mut session = Session::new();
//! session.create_page(&LaunchOptions::default()).await?;
//!
//! // Every tool returns a result envelope, failures included.
//! let opened = tools::navigate(&mut session, "https://example.com").await;
//! println!("{opened:?}");
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod tools;

pub use corvid_browser::{
    BrowserError, Envelope, LaunchOptions, Page, Result, RunOptions, Session,
};
