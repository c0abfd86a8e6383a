//! ferry library
//!
//! Point-to-point file transfer over a length-prefixed frame protocol:
//! a sender streams a file as big-endian length-prefixed chunks closed by a
//! zero-length frame, a receiver writes the chunks out in arrival order, and
//! an optional filename frame up front lets a server pick the destination.

pub mod cli;
pub mod codec;
pub mod error;
pub mod logger;
pub mod naming;
pub mod net;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;

pub use error::{Result, TransferError};
pub use protocol::{FrameLimits, CHUNK_SIZE};
