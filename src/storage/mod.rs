pub mod memory;

pub use memory::{HistoryStats, InMemoryTaskHistory, TaskHistory};
