pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, SwitchboardError};
pub use event::EventBus;
pub use types::*;
