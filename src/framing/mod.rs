//! Frame splitting and the packet header model.
//!
//! A raw capture is a stream of frames delimited by a sync marker. Each frame is
//! decoded into a [Packet] using a table-driven [FramingProfile] describing where the
//! header fields sit for a particular link path.
mod encode;
mod packet;
mod profile;
mod splitter;

pub use encode::*;
pub use packet::*;
pub use profile::*;
pub use splitter::*;
