//! mxlink-core — wire format, frame codec, message envelope and config.
//! Everything here is synchronous; the async transport lives in `mxlink`.

pub mod command;
pub mod config;
pub mod envelope;
pub mod frame;
pub mod wire;


pub use command::{Command, CommandError, COMMAND_MARKER};
pub use config::{EnvelopeConfig, MxlinkConfig, RetryPolicy};
pub use envelope::{EnvelopeError, Opened, Sealed};
pub use frame::{Frame, FrameEncoder, FrameError, Reassembler};
pub use wire::{ChunkHeader, WireError, MAX_CHUNKS, MAX_MESSAGE, MAX_PACKET, MAX_PAYLOAD};
