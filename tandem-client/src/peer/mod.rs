mod candidate_buffer;
mod connection;
mod handle;
mod manager;
mod status;
mod timers;
mod webrtc_connector;

pub use candidate_buffer::*;
pub use connection::*;
pub use handle::*;
pub use status::*;
pub use timers::*;
pub use webrtc_connector::*;
