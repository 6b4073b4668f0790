//! Framed JSON RPC transport for the Jack control plane.
//!
//! One [`RpcSession`] multiplexes concurrent requests over a single byte
//! stream — in production a plugin subprocess's stdio, in tests a
//! [`tokio::io::duplex`] pair. Each message is framed as a 4-byte
//! big-endian length followed by a UTF-8 JSON body; see [`frame`].
//!
//! Both ends are symmetric: either side may call and either side may
//! serve, which is what lets a provider invoke daemon services while the
//! daemon has a call to that same provider in flight.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod error;
pub mod frame;
pub mod message;
pub mod session;

pub use error::RpcError;
pub use frame::{MAX_FRAME_LEN, read_frame, write_frame};
pub use message::{Direction, RpcMessage};
pub use session::{RpcHandler, RpcSession};
