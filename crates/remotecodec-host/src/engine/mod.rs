//! Session engine: pairs client samples with decoder input slots.

mod actor;
mod handle;
mod sample_queue;
mod slot_pool;
mod types;


pub use handle::SessionEngineHandle;
pub use sample_queue::{QueueError, SampleQueue};
pub use slot_pool::{SlotPool, SlotPoolError};
pub use types::{EngineError, EngineSnapshot, EngineState};

pub(crate) use types::Inbox;
