//! Browser front-end: server-rendered pages plus a small JSON/SSE API.

#[cfg(feature = "http-api")]
pub mod http;
#[cfg(feature = "http-api")]
pub mod templates;
#[cfg(feature = "http-api")]
pub mod web_session;
