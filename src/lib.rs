pub mod api;
pub mod browser;
pub mod config;
pub mod engine;
pub mod executors;
pub mod governor;
pub mod parsing;
pub mod providers;
pub mod storage;
pub mod types;

pub use config::Config;
pub use engine::{DispatchError, Dispatcher};
pub use types::*;
