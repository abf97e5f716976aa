//! Shared HTTP utilities for streaming providers.

mod client;
mod lines;
mod sse;

pub use client::{AuthConfig, HttpClient};
pub use lines::LineBuffer;
pub use sse::SseParser;
