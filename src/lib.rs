//! Asterisk REST Interface (ARI) client for Rust
//!
//! This crate provides an async Rust client for Asterisk's REST Interface,
//! allowing applications to control channels, bridges, playbacks, and the
//! other ARI resources, and to receive the event stream for them.
//!
//! # Architecture
//!
//! The client has two cooperating halves:
//! - an **operation surface** synthesized at connect time from the API
//!   description the server itself publishes — there is no hand-written
//!   binding per endpoint, so the surface always matches the server version;
//! - an **event correlation engine** fed by a persistent WebSocket, which
//!   routes every inbound frame to the single local proxy representing the
//!   affected entity and to any registered listeners.
//!
//! # Examples
//!
//! ## Originate a call
//!
//! ```rust,no_run
//! use asterisk_ari_tokio::{AriClient, AriError, OperationArgs};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AriError> {
//!     let client = AriClient::connect("http://localhost:8088/ari", "asterisk", "secret").await?;
//!
//!     let mut args = OperationArgs::new();
//!     args.insert("endpoint".into(), json!("PJSIP/100"));
//!     args.insert("app".into(), json!("demo"));
//!     let channel = client.request("channels", "originate", args).await?;
//!     println!("Originated: {}", channel);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Event subscription
//!
//! ```rust,no_run
//! use asterisk_ari_tokio::AriClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AriClient::connect("http://localhost:8088/ari", "asterisk", "secret").await?;
//!
//!     let _sub = client.on("StasisStart", |frame, resources| {
//!         if let Some(channel) = resources.first() {
//!             println!("Channel {} entered the application", channel.id());
//!         }
//!         let _ = frame;
//!     });
//!
//!     client.start(&["demo"], false).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod loader;
pub mod operation;
pub mod registry;
pub mod schema;
pub mod transport;

pub use client::AriClient;
pub use connection::{ConnectionConfig, ConnectionStatus};
pub use error::{AriError, AriResult};
pub use event::{Dispatcher, EventFrame, Subscription, WILDCARD};
pub use operation::OperationArgs;
pub use registry::{Proxy, ProxySubscription, Registry, ResourceKind, DUAL_KEY_SEPARATOR};
pub use schema::{
    ApiDescription, ModelSpec, OperationSpec, ParamLocation, ParameterSpec, PropertySpec,
    ResourceGroup,
};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
