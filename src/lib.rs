#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]

//! Trust Layer - analysis requests in, Jira-attached PDF reports out
//!
//! This library implements a small backend that forwards a prompt to the
//! Gemini API, renders the analysis text into a paginated PDF, and uploads
//! that PDF as an attachment to a Jira issue with bounded retries. An
//! optional enrichment step pulls a GitHub repository's README and file
//! listing into the prompt first.

/// Request orchestration and background attachment tracking
pub mod api;
/// Configuration loaded once from the environment
pub mod config;
/// Error handling types and upload-retry classification
pub mod error;
/// Gemini generateContent client with typed decoding
pub mod gemini;
/// GitHub README and file-tree fetcher
pub mod github;
/// Jira attachment upload client with bounded retries
pub mod jira;
/// PDF report rendering
pub mod pdf;
/// HTTP surface: router, handlers, shared state
pub mod server;

// Re-export common types
pub use api::{AnalyzeRequest, AnalyzeResponse, AnalyzeService};
pub use config::Config;
pub use error::{Result, TrustLayerError};
pub use server::{create_app, AppState};
