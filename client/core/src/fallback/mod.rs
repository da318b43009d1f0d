//! Local-First Request Client
//!
//! Every API call goes to the primary ("local") origin first and, on any
//! failure, is repeated exactly once against the production origin.
//!
//! # Usage
//!
//! ```ignore
//! use mediscan_core::fallback::{FallbackClient, ReqwestTransport, RequestOptions};
//!
//! let transport = ReqwestTransport::new(Duration::from_secs(60))?;
//! let client = FallbackClient::from_config(&config.api, transport);
//! let limit: serde_json::Value = client
//!     .request_json("/api/chat/upload-limit", RequestOptions::get())
//!     .await?;
//! ```

mod client;
mod transport;

pub use client::{FallbackClient, FallbackResponse, RequestOptions};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
