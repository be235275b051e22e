//! Upstream Client: the boundary between this gateway and the real Kiro
//! `generateAssistantResponse` API. One account's credentials in, one
//! assembled or streamed response out — header construction, SSE framing,
//! and error categorization all live here so the rest of the gateway never
//! touches a raw `reqwest::Response`.

pub mod client;
pub mod error;
pub mod fingerprint;

pub use client::{AssembledResponse, DeltaStream, UpstreamClient};
pub use error::{Error, ErrorCategory, Result};
pub use fingerprint::machine_fingerprint;
