use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::types::CallId;
use switchboard_flow::SessionInput;

/// Per-call FIFO queue feeding one session task.
pub struct SessionLane {
    call_id: CallId,
    tx: mpsc::Sender<SessionInput>,
}

impl SessionLane {
    /// Create a new lane and return (lane_handle, receiver).
    pub fn new(call_id: CallId, buffer: usize) -> (Self, mpsc::Receiver<SessionInput>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { call_id, tx }, rx)
    }

    /// Queue an input without waiting. One slow session never blocks routing
    /// for the others.
    pub fn deliver(&self, input: SessionInput) -> Result<()> {
        self.tx.try_send(input).map_err(|e| match e {
            TrySendError::Closed(_) => SwitchboardError::LaneClosed(self.call_id.to_string()),
            TrySendError::Full(_) => SwitchboardError::StaleEvent {
                call_id: self.call_id.to_string(),
                reason: "session lane is full".into(),
            },
        })
    }

    /// Whether the session task has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disconnect() -> SessionInput {
        SessionInput::Disconnect {
            reason: "hangup".into(),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (lane, mut rx) = SessionLane::new(CallId::from_string("c-1"), 4);
        lane.deliver(SessionInput::Dialog {
            intent: "Quit".into(),
            attributes: Default::default(),
            dialog_id: None,
        })
        .unwrap();
        lane.deliver(disconnect()).unwrap();
        assert!(matches!(rx.recv().await, Some(SessionInput::Dialog { .. })));
        assert_eq!(rx.recv().await, Some(disconnect()));
    }

    #[test]
    fn full_lane_rejects() {
        let (lane, _rx) = SessionLane::new(CallId::from_string("c-1"), 1);
        lane.deliver(disconnect()).unwrap();
        let err = lane.deliver(disconnect()).unwrap_err();
        assert!(matches!(err, SwitchboardError::StaleEvent { .. }));
    }

    #[test]
    fn closed_lane_rejects() {
        let (lane, rx) = SessionLane::new(CallId::from_string("c-1"), 1);
        drop(rx);
        assert!(lane.is_closed());
        let err = lane.deliver(disconnect()).unwrap_err();
        assert!(matches!(err, SwitchboardError::LaneClosed(_)));
    }
}
