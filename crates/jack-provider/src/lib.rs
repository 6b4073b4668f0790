//! Provider SDK for Jack plugins.
//!
//! A plugin is a standalone executable. Its `main` builds a type
//! implementing [`Provider`] and hands it to [`serve`], which performs the
//! startup handshake on stdout and then answers the daemon's RPCs over
//! stdin/stdout. Everything a plugin logs goes to stderr — a single stray
//! byte on stdout corrupts the framed protocol and the daemon will kill
//! the process for it.
//!
//! ```no_run
//! use jack_core::{PluginId, PluginMetadata};
//! use jack_provider::{Provider, ProviderResult, serve};
//!
//! struct Leds;
//!
//! #[async_trait::async_trait]
//! impl Provider for Leds {
//!     fn metadata(&self) -> PluginMetadata {
//!         PluginMetadata::new(PluginId::from_static("leds"), "0.1.0")
//!     }
//!     async fn apply_config(&self, _config: serde_json::Value) -> ProviderResult<()> {
//!         Ok(())
//!     }
//!     async fn validate_config(&self, _config: serde_json::Value) -> ProviderResult<()> {
//!         Ok(())
//!     }
//!     async fn flush(&self) -> ProviderResult<()> {
//!         Ok(())
//!     }
//!     async fn status(&self) -> ProviderResult<serde_json::Value> {
//!         Ok(serde_json::json!({"ok": true}))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> ProviderResult<()> {
//!     serve(Leds).await
//! }
//! ```
//!
//! # The apply rule
//!
//! `apply_config` MUST NOT call other plugins' services. It returns first;
//! deferred initialization (spawned from `apply_config` or
//! [`Provider::init`]) performs service calls through the
//! [`ServiceClient`] once the daemon has moved on. The bus waits for the
//! target's readiness, so a deferred task may simply fire and let the
//! daemon pace it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod client;
pub mod error;
pub mod provider;
pub mod serve;

pub use client::ServiceClient;
pub use error::{ProviderError, ProviderResult};
pub use provider::{Provider, ProviderContext};
pub use serve::{serve, serve_stream};
