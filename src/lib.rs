//! `ztp-client` is the request orchestration layer of the zero-touch
//! provisioning console API.
//!
//! Every domain service (devices, vendors, IPAM, templates, jobs, ...) is
//! built on [`ApiClient`], which provides:
//! - authenticated execution with session-expiry handling (401 clears the
//!   token and publishes [`UNAUTHORIZED_TOPIC`]),
//! - jittered exponential retry of transport failures, 5xx and 429,
//! - sharing of identical concurrent reads,
//! - an inflight counter for mutations and a bounded call history.
//!
//! State is owned by one [`ClientContext`] created at startup:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::Deserialize;
//! use ztp_client::{ApiClient, ClientContext, ClientOptions, MemoryTokenStore};
//!
//! #[derive(Deserialize)]
//! struct Device {
//!     serial: String,
//! }
//!
//! struct DeviceService {
//!     api: ApiClient,
//! }
//!
//! impl DeviceService {
//!     async fn list(&self) -> ztp_client::Result<Vec<Device>> {
//!         self.api.get("/devices").await
//!     }
//! }
//!
//! # async fn run() -> ztp_client::Result<()> {
//! let ctx = ClientContext::new(
//!     ClientOptions::new("https://ztp.example.net/api"),
//!     Arc::new(MemoryTokenStore::with_token("session-token")),
//! );
//! let devices = DeviceService { api: ApiClient::new(ctx) };
//! for device in devices.list().await? {
//!     println!("{}", device.serial);
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod context;
mod dedup;
mod error;
mod executor;
mod history;
mod inflight;
mod observer;
mod options;
mod retry;
mod signal;
mod wire;

pub use auth::{MemoryTokenStore, TokenStore};
pub use client::{ApiClient, RequestOptions};
pub use context::ClientContext;
pub use error::ApiError;
pub use history::{HistoryEntry, HistoryRecorder};
pub use inflight::InflightTracker;
pub use observer::Subscription;
pub use options::{BaseUrl, BaseUrlResolver, ClientOptions};
pub use signal::{BroadcastBus, SignalBus, UNAUTHORIZED_TOPIC};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ApiError>;
