pub mod frame;
pub mod types;

pub use frame::{EcnCounts, Frame, RetransmissionCategory};
pub use types::{FrameType, PacketSpaceClass};
