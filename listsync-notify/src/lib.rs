//! # listsync-notify
//!
//! Renders a [`RunReport`](listsync_engine::RunReport) into a plain-text
//! summary or a webhook card, and posts the card to a chat webhook.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use listsync_engine::RunReport;
//! use listsync_notify::{Renderer, SummaryKind, WebhookNotifier};
//!
//! fn announce(report: &RunReport, url: &str) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(text) = renderer.render(report, SummaryKind::Text) {
//!             println!("{text}");
//!         }
//!         let notifier = WebhookNotifier::new(url);
//!         if let Err(e) = notifier.send(&renderer, report) {
//!             eprintln!("notification failed: {e}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod webhook;

pub use context::SummaryContext;
pub use engine::{Renderer, SummaryKind, TemplateEngine};
pub use error::RenderError;
pub use webhook::WebhookNotifier;
