mod call;
mod call_command;
mod call_room;
mod call_store;

pub use call::*;
pub use call_command::*;
pub use call_room::*;
pub use call_store::*;
