use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchboard_core::error::SwitchboardError;
use switchboard_core::types::{CallId, FlowEvent, InboundEvent};
use switchboard_flow::{SessionExecutor, SessionInput, SessionReport};

use crate::lane::SessionLane;

/// What the dispatcher did before it stopped.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub sessions_started: usize,
    pub sessions_ended: usize,
    pub stale_events: usize,
    /// Finished session reports, in completion order. Empty unless the
    /// dispatcher was built with `keep_reports()`.
    pub reports: Vec<SessionReport>,
}

impl DispatchSummary {
    pub fn report(&self, call_id: &CallId) -> Option<&SessionReport> {
        self.reports.iter().find(|r| &r.call_id == call_id)
    }
}

/// Routes inbound telephony events to per-call session tasks.
///
/// Each call gets its own task and lane; events for one call are delivered in
/// order and never wait on another call.
pub struct CallDispatcher {
    executor: Arc<SessionExecutor>,
    cancel: CancellationToken,
    lane_buffer: usize,
    keep_reports: bool,
    lanes: HashMap<CallId, SessionLane>,
    sessions: JoinSet<SessionReport>,
    summary: DispatchSummary,
}

impl CallDispatcher {
    pub fn new(executor: Arc<SessionExecutor>, cancel: CancellationToken) -> Self {
        Self {
            executor,
            cancel,
            lane_buffer: 16,
            keep_reports: false,
            lanes: HashMap::new(),
            sessions: JoinSet::new(),
            summary: DispatchSummary::default(),
        }
    }

    /// Set the per-call lane capacity.
    pub fn with_lane_buffer(mut self, lane_buffer: usize) -> Self {
        self.lane_buffer = lane_buffer;
        self
    }

    /// Keep every finished session's report in the summary.
    ///
    /// Reports hold each call's full directive list, so only bounded runs
    /// (simulations, tests) should keep them. Long-running dispatchers read
    /// `FlowEvent::SessionEnded` off the event bus instead.
    pub fn keep_reports(mut self) -> Self {
        self.keep_reports = true;
        self
    }

    /// Dispatch events until cancelled or until the inbound stream closes,
    /// then wait for every session to finish.
    ///
    /// Cancellation ends live sessions with `Shutdown`. A closed stream lets
    /// sessions finish what they are doing; those still waiting on a dialog
    /// end as disconnected.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundEvent>) -> DispatchSummary {
        info!("Call dispatcher running");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Call dispatcher shutting down");
                    break;
                }
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    self.reap(joined);
                }
                event = inbound.recv() => {
                    match event {
                        Some(event) => self.route(event),
                        None => {
                            info!("Inbound event stream closed");
                            break;
                        }
                    }
                }
            }
        }

        // Dropping the lanes closes every session's inbox.
        self.lanes.clear();
        while let Some(joined) = self.sessions.join_next().await {
            self.reap(joined);
        }
        info!(
            sessions = self.summary.sessions_started,
            stale = self.summary.stale_events,
            "Call dispatcher stopped"
        );
        self.summary
    }

    fn route(&mut self, event: InboundEvent) {
        debug!(call_id = %event.call_id(), kind = event.kind(), "Inbound event");
        match event {
            InboundEvent::CallStart {
                call_id,
                channel,
                calling_number,
                locale,
            } => {
                if self.lanes.contains_key(&call_id) {
                    self.stale(&call_id, "call_start", "session already exists");
                    return;
                }
                let ctx = self.executor.flow().new_session(
                    call_id.clone(),
                    channel,
                    calling_number,
                    locale.as_ref(),
                );
                let (lane, rx) = SessionLane::new(call_id.clone(), self.lane_buffer);
                self.lanes.insert(call_id, lane);
                let executor = self.executor.clone();
                let cancel = self.cancel.child_token();
                self.sessions
                    .spawn(async move { executor.run(ctx, rx, cancel).await });
                self.summary.sessions_started += 1;
            }
            InboundEvent::DialogTurnComplete {
                call_id,
                intent_name,
                attributes,
                dialog_id,
            } => {
                let input = SessionInput::Dialog {
                    intent: intent_name,
                    attributes,
                    dialog_id,
                };
                self.deliver(&call_id, "dialog_turn_complete", input);
            }
            InboundEvent::CallEnd { call_id, reason } => {
                self.deliver(&call_id, "call_end", SessionInput::Disconnect { reason });
                // Nothing more will arrive for this call.
                self.lanes.remove(&call_id);
            }
        }
    }

    fn deliver(&mut self, call_id: &CallId, kind: &str, input: SessionInput) {
        let result = match self.lanes.get(call_id) {
            Some(lane) => lane.deliver(input),
            None => {
                self.stale(call_id, kind, "no live session");
                return;
            }
        };
        match result {
            Ok(()) => {}
            Err(SwitchboardError::LaneClosed(_)) => {
                self.lanes.remove(call_id);
                self.stale(call_id, kind, "session already ended");
            }
            Err(e) => self.stale(call_id, kind, &e.to_string()),
        }
    }

    fn reap(&mut self, joined: std::result::Result<SessionReport, JoinError>) {
        match joined {
            Ok(report) => {
                // A newer session may own the id by now; only drop a dead lane.
                if self
                    .lanes
                    .get(&report.call_id)
                    .map_or(false, SessionLane::is_closed)
                {
                    self.lanes.remove(&report.call_id);
                }
                debug!(call_id = %report.call_id, reason = %report.reason, "Session reaped");
                self.summary.sessions_ended += 1;
                if self.keep_reports {
                    self.summary.reports.push(report);
                }
            }
            Err(e) => error!(error = %e, "Session task failed"),
        }
    }

    fn stale(&mut self, call_id: &CallId, kind: &str, reason: &str) {
        warn!(call_id = %call_id, kind, reason, "Ignoring stale event");
        self.summary.stale_events += 1;
        self.executor.event_bus().publish(FlowEvent::StaleEvent {
            call_id: call_id.clone(),
            kind: kind.to_string(),
            reason: reason.to_string(),
        });
    }
}
