mod api;
mod config;
mod error;
mod media;
mod peer;
mod session;
mod signaling;
mod turn_cache;

pub use api::*;
pub use config::*;
pub use error::*;
pub use media::*;
pub use peer::*;
pub use session::*;
pub use signaling::*;
pub use turn_cache::*;
