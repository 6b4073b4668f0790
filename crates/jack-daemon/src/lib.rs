//! The Jack daemon: the plugin host core.
//!
//! `jackd` discovers provider subprocesses, verifies their startup
//! handshake, probes their metadata, and registers them in a single
//! [`Registry`]. Configuration flows to plugins in dependency order
//! through the [`Orchestrator`]; plugin-to-plugin calls flow back through
//! the [`ServiceBus`]; the CLI reaches all of it over a unix-socket
//! command channel.
//!
//! # Locking design
//!
//! The registry map sits behind one reader-writer lock held only for
//! lookups and state transitions, never across an RPC. Each plugin has a
//! per-plugin apply mutex; the orchestrator holds it across `ApplyConfig`
//! but inbound service calls from that same plugin are served on the
//! plugin session's reader side, so an apply can never deadlock against
//! the calls its plugin makes afterwards. Providers are forbidden from
//! calling services *during* `ApplyConfig`; the bus's depth guard and the
//! readiness wait cover everything they do after it returns.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod apply;
pub mod bus;
pub mod channel;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod registry;

pub use apply::{ApplyOutcome, Orchestrator, OutcomeKind};
pub use bus::ServiceBus;
pub use channel::CommandServer;
pub use config::{DaemonConfig, Timeouts};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use handle::ProviderHandle;
pub use registry::{PluginRecord, PluginState, Registry};
