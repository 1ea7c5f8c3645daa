//! mxlink — reliable message transport over small-packet links.
//!
//! Layers, bottom up:
//!
//! - [`link`]: the packet seam ([`link::LinkAdapter`]) and an in-memory pair.
//! - [`queue`]: one-write-at-a-time transmit queue with retry.
//! - [`endpoint`]: sender and receiver halves tying the queue to the frame
//!   codec and message envelope from `mxlink-core`.

pub mod endpoint;
pub mod link;
pub mod queue;

pub use endpoint::{
    open, Incoming, Message, MessageReceiver, MessageSender, SendError, SendReport,
};
pub use link::{LinkAdapter, LinkError, LinkEvent, MemoryLink};
pub use queue::{QueueClosed, TransmitQueue};
