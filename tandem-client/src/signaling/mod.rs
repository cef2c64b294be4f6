mod backoff;
mod client;
mod events;
mod hub;
mod output;

pub use backoff::*;
pub use client::*;
pub use events::*;
pub use hub::*;
pub use output::*;
