mod app;
mod call;
mod config;
mod error;
mod http;
mod ice;
mod signaling;

pub use app::*;
pub use call::*;
pub use config::*;
pub use error::*;
pub use ice::*;
pub use signaling::*;
