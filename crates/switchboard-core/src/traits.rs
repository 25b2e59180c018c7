use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Telephony control plane. Executes directives on a live call.
pub trait CallControl: Send + Sync + 'static {
    /// Execute a directive and report how it went.
    ///
    /// An `Err` is an external failure; the flow converts it into
    /// `Outcome::failure()` and routes through the error edge.
    fn execute(&self, call_id: &CallId, directive: &Directive) -> BoxFuture<'_, Result<Outcome>>;
}

/// Natural-language dialog engine.
///
/// `start_dialog` only opens the exchange. Its conclusion arrives later as an
/// `InboundEvent::DialogTurnComplete` for the same call.
pub trait DialogBridge: Send + Sync + 'static {
    fn start_dialog(&self, call_id: &CallId, request: &DialogRequest) -> BoxFuture<'_, Result<()>>;
}

/// Read-only business-hours oracle injected into the flow.
pub trait BusinessHours: Send + Sync + 'static {
    fn is_open(&self) -> bool;
}

/// Lifecycle hooks, called exactly once each per session.
///
/// `on_end` fires on every termination path, including disconnects and
/// dispatcher shutdown.
pub trait SessionHooks: Send + Sync + 'static {
    fn on_start<'a>(&'a self, session: &'a SessionSummary) -> BoxFuture<'a, ()>;

    fn on_end<'a>(&'a self, session: &'a SessionSummary, reason: &'a EndReason)
        -> BoxFuture<'a, ()>;
}
