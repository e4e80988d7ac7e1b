pub mod api;
pub mod memory;
pub mod model;

pub use api::{PollApi, PushChannel};
pub use memory::MemoryPollService;
pub use model::*;
