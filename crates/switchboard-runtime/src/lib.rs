pub mod dispatch;
pub mod lane;

pub use dispatch::{CallDispatcher, DispatchSummary};
pub use lane::SessionLane;
