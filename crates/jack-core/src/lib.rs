//! Core types for the Jack control plane.
//!
//! Jack drives a Linux network appliance through provider subprocesses: the
//! daemon reads declarative JSON configuration and dispatches each namespace
//! to the plugin that owns it. This crate holds the vocabulary shared by the
//! daemon, the provider SDK, and the CLI:
//!
//! - [`PluginId`]: Stable, human-readable plugin namespace
//! - [`PluginMetadata`]: What a plugin declares about itself at startup
//! - [`CommandRequest`] / [`CommandResponse`]: The unix-socket command contract
//! - [`wire`]: Provider RPC method names, the startup handshake, and
//!   [`ServiceCall`](wire::ServiceCall) for plugin-to-plugin calls
//! - [`paths`]: Well-known filesystem locations (socket, plugin directories)
//!
//! No I/O happens here; everything is plain data.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod command;
pub mod id;
pub mod metadata;
pub mod paths;
pub mod wire;

pub use command::{CommandRequest, CommandResponse, CommandVerb};
pub use id::{InvalidPluginId, PluginId};
pub use metadata::{CliCommandSpec, PluginMetadata, ServiceDescriptor, ServiceMethodSpec};
pub use wire::{MAX_SERVICE_DEPTH, ServiceCall};
