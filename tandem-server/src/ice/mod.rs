mod credentials;
mod ice_servers;

pub use credentials::*;
pub use ice_servers::*;
