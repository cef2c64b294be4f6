mod call_state;
mod orchestrator;

pub use call_state::*;
pub use orchestrator::*;
