//! Asterisk REST Interface (ARI) client for Rust
//!
//! This crate provides an async client for ARI: a WebSocket event stream,
//! a serialized HTTP command queue, and a registry that routes events to
//! handlers by type.
//!
//! # Architecture
//!
//! - [`HttpClient`] (Clone + Send): queues commands over one TCP
//!   connection, answered strictly in submission order
//! - [`EventStream`]: the `/ari/events` WebSocket with flat-interval
//!   reconnection
//! - [`EventRegistry`]: event type to handlers, failures isolated per handler
//! - [`AriClient`]: ties the three together for one Stasis application
//!
//! # Examples
//!
//! ## Commands
//!
//! ```rust,no_run
//! use asterisk_ari_tokio::{AriConnectOptions, AriError, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AriError> {
//!     let options = AriConnectOptions::new("localhost", 8088, "asterisk", "asterisk", "attendant");
//!     let client = HttpClient::new(&options);
//!
//!     let response = client.get("/ari/asterisk/info").await?;
//!     println!("{} {}: {}", response.status(), response.reason(), response.body());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! ```rust,no_run
//! use asterisk_ari_tokio::{AriClient, AriConnectOptions, Method};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AriClient::new(AriConnectOptions::default());
//!
//!     let commands = client.commands();
//!     client.on_event("StasisStart", move |event| {
//!         if let Some(id) = event.get_path(&["channel", "id"]).and_then(|v| v.as_str()) {
//!             commands.submit_with(Method::Post, format!("/ari/channels/{}/answer", id), "", |_| {});
//!         }
//!         Ok(())
//!     });
//!
//!     client.connect(Duration::from_secs(5)).await?;
//!     tokio::time::sleep(Duration::from_secs(3600)).await;
//!     client.close();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod method;
pub mod transport;
pub mod websocket;

pub(crate) mod buffer;
pub mod constants;
pub(crate) mod protocol;

pub use client::AriClient;
pub use config::AriConnectOptions;
pub use constants::DEFAULT_ARI_PORT;
pub use dispatch::{DispatchReport, EventHandler, EventRegistry};
pub use error::{AriError, AriResult, HandlerError, HandlerResult};
pub use event::AriEvent;
pub use method::{Method, ParseMethodError};
pub use protocol::HttpResponse;
pub use transport::{HttpClient, ResponseCallback, TransportState};
pub use websocket::{EventStream, StreamState};
