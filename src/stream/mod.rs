pub mod id;
pub mod manager;
pub mod recv;
pub mod send;

pub use id::{Directionality, Side, StreamId};
pub use manager::StreamManager;
pub use recv::{RecvState, RecvStream};
pub use send::{SendState, SendStream};
