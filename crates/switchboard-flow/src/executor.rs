use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::event::EventBus;
use switchboard_core::traits::{CallControl, DialogBridge};
use switchboard_core::types::{
    Attributes, CallId, DialogOutcome, DialogRequest, DialogTurn, Directive, EndReason,
    FlowEvent, Outcome,
};

use crate::flow::FlowDefinition;
use crate::graph::{Action, ActionNode, NodeId};
use crate::session::{SessionContext, SessionState};

/// An event routed to one live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// The dialog engine finished a turn.
    Dialog {
        intent: String,
        attributes: Attributes,
        dialog_id: Option<String>,
    },
    /// The call went away out of band.
    Disconnect { reason: String },
}

impl SessionInput {
    fn kind(&self) -> &'static str {
        match self {
            Self::Dialog { .. } => "dialog_turn_complete",
            Self::Disconnect { .. } => "call_end",
        }
    }
}

/// What happened to a session, returned when its task finishes.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub call_id: CallId,
    pub reason: EndReason,
    pub hops: usize,
    /// Every directive issued, in order, including the last-resort pair.
    pub directives: Vec<Directive>,
}

/// Result of executing one node.
enum Step {
    Outcome(Outcome),
    /// The dialog engine answered the turn this node started.
    Answered(Outcome),
    End(EndReason),
}

/// Walks a `FlowDefinition` for one call at a time.
///
/// One executor is shared by every session; all per-call state lives in the
/// `SessionContext` and locals of `run`.
pub struct SessionExecutor {
    flow: Arc<FlowDefinition>,
    control: Arc<dyn CallControl>,
    bridge: Arc<dyn DialogBridge>,
    event_bus: Arc<EventBus>,
}

impl SessionExecutor {
    pub fn new(
        flow: Arc<FlowDefinition>,
        control: Arc<dyn CallControl>,
        bridge: Arc<dyn DialogBridge>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            flow,
            control,
            bridge,
            event_bus,
        }
    }

    pub fn flow(&self) -> &Arc<FlowDefinition> {
        &self.flow
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Drive a session from call start to termination.
    ///
    /// `on_start` and `on_end` run exactly once each, whatever the exit path.
    /// A panic while walking the flow (a buggy edge function or collaborator)
    /// is contained here and ends the call through the last resort.
    pub async fn run(
        &self,
        mut ctx: SessionContext,
        mut inbox: mpsc::Receiver<SessionInput>,
        cancel: CancellationToken,
    ) -> SessionReport {
        let mut state = SessionState::NotStarted;
        let mut directives = Vec::new();

        info!(
            call_id = %ctx.call_id(),
            channel = %ctx.channel(),
            locale = %ctx.locale(),
            "Session started"
        );
        self.event_bus.publish(FlowEvent::SessionStarted {
            call_id: ctx.call_id().clone(),
            channel: ctx.channel(),
            locale: ctx.locale().clone(),
            timestamp: chrono::Utc::now(),
        });
        self.flow.hooks().on_start(&ctx.summary()).await;
        transition(&mut state, SessionState::Running, ctx.call_id());

        let walked = AssertUnwindSafe(self.walk(
            &mut ctx,
            &mut state,
            &mut inbox,
            &cancel,
            &mut directives,
        ))
        .catch_unwind()
        .await;
        let reason = match walked {
            Ok(reason) => reason,
            Err(panic) => {
                let err = SwitchboardError::GraphConfiguration(format!(
                    "session panicked: {}",
                    panic_message(&*panic)
                ));
                self.last_resort(&ctx, &mut directives, err).await
            }
        };
        transition(&mut state, SessionState::Terminated(reason.clone()), ctx.call_id());

        self.flow.hooks().on_end(&ctx.summary(), &reason).await;
        info!(call_id = %ctx.call_id(), reason = %reason, hops = ctx.hops(), "Session ended");
        self.event_bus.publish(FlowEvent::SessionEnded {
            call_id: ctx.call_id().clone(),
            reason: reason.clone(),
            hops: ctx.hops(),
        });

        SessionReport {
            call_id: ctx.call_id().clone(),
            reason,
            hops: ctx.hops(),
            directives,
        }
    }

    async fn walk(
        &self,
        ctx: &mut SessionContext,
        state: &mut SessionState,
        inbox: &mut mpsc::Receiver<SessionInput>,
        cancel: &CancellationToken,
        directives: &mut Vec<Directive>,
    ) -> EndReason {
        let graph = self.flow.graph();
        let max_hops = self.flow.settings().max_hops;
        let mut current = graph.initial();
        let mut answered = false;

        loop {
            if ctx.hops() >= max_hops {
                let err = SwitchboardError::HopLimitExceeded(max_hops);
                return self.last_resort(ctx, directives, err).await;
            }
            let node = match graph.node(current) {
                Some(node) => node,
                None => {
                    let err = SwitchboardError::GraphConfiguration(format!(
                        "node {} is not part of the flow",
                        current
                    ));
                    return self.last_resort(ctx, directives, err).await;
                }
            };
            ctx.enter(current);
            debug!(
                call_id = %ctx.call_id(),
                node = %current,
                action = %node.action.kind(),
                description = %node.description,
                "Entering node"
            );

            if node.is_terminal() {
                self.finish(ctx, node, directives).await;
                return EndReason::Completed;
            }

            if node.action.is_dialog_turn() && answered {
                if let Some(reason) = self.discard_replays(ctx.call_id(), inbox) {
                    return reason;
                }
            }

            let step = if node.action.is_dialog_turn() {
                self.dialog_turn(ctx, state, node, current, inbox, cancel, directives)
                    .await
            } else {
                self.perform(ctx, node, inbox, cancel, directives).await
            };
            let outcome = match step {
                Step::Outcome(outcome) => outcome,
                Step::Answered(outcome) => {
                    answered = true;
                    outcome
                }
                Step::End(reason) => return reason,
            };

            ctx.merge(outcome.attributes.clone());
            let next = if outcome.succeeded() {
                node.resolve_next(&outcome, ctx)
            } else if current == graph.default_error() {
                Err(SwitchboardError::GraphConfiguration(
                    "default error node failed".into(),
                ))
            } else {
                debug!(call_id = %ctx.call_id(), node = %current, "Routing failure to error edge");
                node.resolve_error(&outcome, ctx, graph.default_error())
            };
            match next {
                Ok(id) => current = id,
                Err(e) => return self.last_resort(ctx, directives, e).await,
            }
        }
    }

    /// Execute a non-dialog, non-terminal node through the call control plane.
    async fn perform(
        &self,
        ctx: &SessionContext,
        node: &ActionNode,
        inbox: &mut mpsc::Receiver<SessionInput>,
        cancel: &CancellationToken,
        directives: &mut Vec<Directive>,
    ) -> Step {
        let directive = match self.directive_for(&node.action, ctx) {
            Ok(directive) => directive,
            Err(e) => {
                warn!(call_id = %ctx.call_id(), node = %node.description, error = %e, "Cannot build directive");
                return Step::Outcome(Outcome::failure());
            }
        };
        self.issue(ctx.call_id(), &directive, directives);

        let call = self.control.execute(ctx.call_id(), &directive);
        match self.race(call, ctx, inbox, cancel).await {
            Ok(Ok(outcome)) => Step::Outcome(outcome),
            Ok(Err(e)) => {
                warn!(
                    call_id = %ctx.call_id(),
                    directive = directive.name(),
                    error = %e,
                    "Call control failed"
                );
                Step::Outcome(Outcome::failure())
            }
            Err(reason) => Step::End(reason),
        }
    }

    /// Hand the caller to the dialog engine and wait for the turn to complete.
    #[allow(clippy::too_many_arguments)]
    async fn dialog_turn(
        &self,
        ctx: &SessionContext,
        state: &mut SessionState,
        node: &ActionNode,
        current: NodeId,
        inbox: &mut mpsc::Receiver<SessionInput>,
        cancel: &CancellationToken,
        directives: &mut Vec<Directive>,
    ) -> Step {
        let dialog_id = format!("{}-{}", current.index(), ctx.hops());
        let request = match dialog_request(&node.action, ctx, dialog_id.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(call_id = %ctx.call_id(), node = %node.description, error = %e, "Cannot build dialog request");
                return Step::Outcome(Outcome::failure());
            }
        };
        self.issue(ctx.call_id(), &request.directive(), directives);

        // Inputs stay queued while the bridge starts; a fast reply is not lost.
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::End(EndReason::Shutdown),
            started = self.bridge.start_dialog(ctx.call_id(), &request) => started,
        };
        if let Err(e) = started {
            warn!(call_id = %ctx.call_id(), error = %e, "Dialog bridge failed");
            return Step::Outcome(Outcome::failure());
        }

        transition(
            state,
            SessionState::AwaitingDialog {
                dialog_id: dialog_id.clone(),
                node: current,
            },
            ctx.call_id(),
        );
        self.event_bus.publish(FlowEvent::DialogSuspended {
            call_id: ctx.call_id().clone(),
            dialog_id: dialog_id.clone(),
        });

        loop {
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Step::End(EndReason::Shutdown),
                input = inbox.recv() => input,
            };
            match input {
                None => return Step::End(stream_closed()),
                Some(SessionInput::Disconnect { reason }) => {
                    return Step::End(EndReason::Disconnected { reason })
                }
                Some(SessionInput::Dialog {
                    dialog_id: Some(ref got),
                    ..
                }) if *got != dialog_id => {
                    self.stale(ctx.call_id(), "dialog_turn_complete", "dialog id does not match");
                }
                Some(SessionInput::Dialog {
                    intent, attributes, ..
                }) => {
                    info!(call_id = %ctx.call_id(), intent = %intent, "Dialog turn complete");
                    self.event_bus.publish(FlowEvent::DialogResumed {
                        call_id: ctx.call_id().clone(),
                        intent: intent.clone(),
                    });
                    transition(state, SessionState::Running, ctx.call_id());
                    let dialog = DialogOutcome { intent, attributes };
                    let outcome = match node.action {
                        Action::StartDialog { .. } => {
                            self.flow.settings().sentinels.outcome_for(dialog)
                        }
                        _ => Outcome {
                            attributes: dialog.attributes,
                            intent: Some(dialog.intent),
                            ..Outcome::success()
                        },
                    };
                    return Step::Answered(outcome);
                }
            }
        }
    }

    /// Drop turn replies queued since the last answered turn.
    ///
    /// Nothing has asked them a question yet: they are replays of a turn the
    /// session already consumed. A queued disconnect still ends the session.
    /// Called before the next dialog directive goes out, so a fast reply to
    /// that turn is never mistaken for a replay.
    fn discard_replays(
        &self,
        call_id: &CallId,
        inbox: &mut mpsc::Receiver<SessionInput>,
    ) -> Option<EndReason> {
        loop {
            match inbox.try_recv() {
                Ok(SessionInput::Disconnect { reason }) => {
                    return Some(EndReason::Disconnected { reason })
                }
                Ok(other) => self.stale(call_id, other.kind(), "reply to an answered dialog turn"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Issue a terminal node's directive. Failures only get logged; the
    /// session ends either way.
    async fn finish(
        &self,
        ctx: &SessionContext,
        node: &ActionNode,
        directives: &mut Vec<Directive>,
    ) {
        let directive = match self.directive_for(&node.action, ctx) {
            Ok(directive) => directive,
            Err(e) => {
                warn!(call_id = %ctx.call_id(), error = %e, "Closing without message");
                Directive::Close { message: None }
            }
        };
        self.issue(ctx.call_id(), &directive, directives);
        if let Err(e) = self.control.execute(ctx.call_id(), &directive).await {
            warn!(call_id = %ctx.call_id(), directive = directive.name(), error = %e, "Terminal directive failed");
        }
    }

    /// Apologize and hang up. Reached on graph errors and runaway loops.
    async fn last_resort(
        &self,
        ctx: &SessionContext,
        directives: &mut Vec<Directive>,
        err: SwitchboardError,
    ) -> EndReason {
        error!(call_id = %ctx.call_id(), error = %err, "Flow cannot continue, ending call");
        let apology = Directive::Speak {
            text: self.flow.settings().error_message.clone(),
        };
        for directive in [apology, Directive::Hangup] {
            self.issue(ctx.call_id(), &directive, directives);
            if let Err(e) = self.control.execute(ctx.call_id(), &directive).await {
                warn!(call_id = %ctx.call_id(), directive = directive.name(), error = %e, "Last-resort directive failed");
            }
        }
        EndReason::GraphError {
            message: err.to_string(),
        }
    }

    /// Build the outbound directive for a non-dialog action.
    fn directive_for(&self, action: &Action, ctx: &SessionContext) -> Result<Directive> {
        let directive = match action {
            Action::PlayPrompt { prompt } => Directive::PlayPrompt {
                key: prompt.render(ctx, self.flow.hours())?,
            },
            Action::Speak { text } => Directive::Speak {
                text: text.render(ctx)?,
            },
            Action::Bridge { ringback } => {
                let attribute = &self.flow.settings().transfer_attribute;
                let destination = ctx
                    .attribute(attribute)
                    .filter(|d| !d.trim().is_empty())
                    .ok_or_else(|| SwitchboardError::MissingDestination(attribute.clone()))?;
                let target = self.flow.transfer().decide(destination);
                info!(
                    call_id = %ctx.call_id(),
                    target = %target.target,
                    transport = %target.transport,
                    "Transferring call"
                );
                Directive::Bridge {
                    target: target.target,
                    transport: target.transport,
                    ringback: ringback.clone(),
                }
            }
            Action::Close { message } => Directive::Close {
                message: message.as_ref().map(|m| m.render(ctx)).transpose()?,
            },
            Action::Hangup => Directive::Hangup,
            Action::StartDialog { .. } | Action::ElicitSlot { .. } | Action::Confirm { .. } => {
                return Err(SwitchboardError::GraphConfiguration(format!(
                    "{} is a dialog turn, not a call control directive",
                    action.kind()
                )))
            }
        };
        Ok(directive)
    }

    fn issue(&self, call_id: &CallId, directive: &Directive, directives: &mut Vec<Directive>) {
        debug!(call_id = %call_id, directive = directive.name(), "Issuing directive");
        directives.push(directive.clone());
        self.event_bus.publish(FlowEvent::DirectiveIssued {
            call_id: call_id.clone(),
            directive: directive.clone(),
        });
    }

    fn stale(&self, call_id: &CallId, kind: &str, reason: &str) {
        warn!(call_id = %call_id, kind, reason, "Ignoring stale event");
        self.event_bus.publish(FlowEvent::StaleEvent {
            call_id: call_id.clone(),
            kind: kind.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Await an external call while still honoring disconnects and shutdown.
    /// A finished call wins over queued input. Dialog events arriving
    /// meanwhile belong to no active dialog. A closed inbox lets the call
    /// finish; the session ends at its next dialog turn.
    async fn race<T>(
        &self,
        mut call: BoxFuture<'_, Result<T>>,
        ctx: &SessionContext,
        inbox: &mut mpsc::Receiver<SessionInput>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Result<T>, EndReason> {
        let mut open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EndReason::Shutdown),
                result = &mut call => return Ok(result),
                input = inbox.recv(), if open => match input {
                    None => open = false,
                    Some(SessionInput::Disconnect { reason }) => {
                        return Err(EndReason::Disconnected { reason })
                    }
                    Some(other) => self.stale(ctx.call_id(), other.kind(), "no dialog in progress"),
                },
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn stream_closed() -> EndReason {
    EndReason::Disconnected {
        reason: "event stream closed".to_string(),
    }
}

fn transition(state: &mut SessionState, next: SessionState, call_id: &CallId) {
    debug!(call_id = %call_id, from = state.name(), to = next.name(), "Session state");
    *state = next;
}

/// Build the request for a dialog-turn action. The locale defaults to the
/// session's own.
fn dialog_request(
    action: &Action,
    ctx: &SessionContext,
    dialog_id: String,
) -> Result<DialogRequest> {
    let (prompt, locale, turn) = match action {
        Action::StartDialog { prompt, locale } => (
            prompt.render(ctx)?,
            locale.clone().unwrap_or_else(|| ctx.locale().clone()),
            DialogTurn::Start,
        ),
        Action::ElicitSlot { slot, prompt } => (
            prompt.render(ctx)?,
            ctx.locale().clone(),
            DialogTurn::ElicitSlot { slot: slot.clone() },
        ),
        Action::Confirm { prompt } => (prompt.render(ctx)?, ctx.locale().clone(), DialogTurn::Confirm),
        other => {
            return Err(SwitchboardError::GraphConfiguration(format!(
                "{} is not a dialog turn",
                other.kind()
            )))
        }
    };
    Ok(DialogRequest {
        dialog_id,
        prompt,
        locale,
        turn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::IntentSentinels;
    use crate::flow::FlowSettings;
    use crate::graph::{FlowBuilder, PromptSource, TextSource};
    use crate::hours::StaticHours;
    use crate::locale::{LocaleSelector, LocaleVariant};
    use crate::transfer::TransferPolicy;
    use std::collections::HashMap;
    use switchboard_core::types::{Channel, LocaleTag, Transport};
    use switchboard_test_utils::{MockPlatform, RecordingHooks};
    use tokio::sync::broadcast;

    const MAIN: &str = "+15551234567";

    fn locales() -> LocaleSelector {
        let mut variants = HashMap::new();
        let mut en = LocaleVariant::new(LocaleTag::from("en-US"), "How can we help?");
        en.phrases.insert("goodbye".into(), "Goodbye".into());
        variants.insert(en.tag.clone(), en);
        LocaleSelector::new(variants, LocaleTag::from("en-US")).unwrap()
    }

    fn settings(max_hops: usize) -> FlowSettings {
        FlowSettings {
            max_hops,
            sentinels: IntentSentinels::default(),
            error_message: "Sorry".into(),
            transfer_attribute: "transferNumber".into(),
        }
    }

    struct Harness {
        executor: SessionExecutor,
        platform: Arc<MockPlatform>,
        hooks: Arc<RecordingHooks>,
    }

    fn harness(graph: crate::graph::Graph, max_hops: usize, platform: MockPlatform) -> Harness {
        let hooks = Arc::new(RecordingHooks::new());
        let flow = FlowDefinition::new(
            graph,
            locales(),
            TransferPolicy::new(MAIN, "arn:trunk:1"),
            Arc::new(StaticHours(true)),
            hooks.clone(),
            settings(max_hops),
        )
        .unwrap();
        let platform = Arc::new(platform);
        let executor = SessionExecutor::new(
            Arc::new(flow),
            platform.clone(),
            platform.clone(),
            Arc::new(EventBus::default()),
        );
        Harness {
            executor,
            platform,
            hooks,
        }
    }

    fn session(h: &Harness) -> SessionContext {
        h.executor
            .flow()
            .new_session(CallId::from_string("c-1"), Channel::Chime, "+15550001111", None)
    }

    /// dialog → Transfer → bridge → hangup; anything else → error → hangup.
    fn dialog_graph() -> crate::graph::Graph {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let error = b.add(ActionNode::speak(TextSource::Literal("Sorry".into())).then(hangup));
        let bridge = b.add(ActionNode::new(Action::Bridge { ringback: None }).then(hangup));
        let goodbye = b.add(ActionNode::speak(TextSource::Phrase("goodbye".into())).then(hangup));
        let dialog = b.add(
            ActionNode::new(Action::StartDialog {
                prompt: TextSource::Literal("How can we help?".into()),
                locale: None,
            })
            .then_with(vec![bridge, goodbye], move |outcome, _| {
                match outcome.intent.as_deref() {
                    Some("Transfer") => Some(bridge),
                    Some("Quit") => Some(goodbye),
                    _ => None,
                }
            }),
        );
        b.build(dialog, error).unwrap()
    }

    fn turn(intent: &str, attributes: &[(&str, &str)]) -> SessionInput {
        SessionInput::Dialog {
            intent: intent.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dialog_id: None,
        }
    }

    #[tokio::test]
    async fn linear_flow_completes() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let speak = b.add(ActionNode::speak(TextSource::Literal("Hello".into())).then(hangup));
        let play = b.add(ActionNode::play(PromptSource::Key("welcome.wav".into())).then(speak));
        let h = harness(b.build(play, hangup).unwrap(), 64, MockPlatform::new());

        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(report.hops, 3);
        assert_eq!(
            report.directives,
            vec![
                Directive::PlayPrompt { key: "welcome.wav".into() },
                Directive::Speak { text: "Hello".into() },
                Directive::Hangup,
            ]
        );
        assert_eq!(h.platform.directives().len(), 3);
        assert_eq!(h.hooks.starts(), 1);
        assert_eq!(h.hooks.ends(), 1);
    }

    #[tokio::test]
    async fn transfer_intent_bridges_over_trunk() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(turn("Transfer", &[("transferNumber", MAIN)])).await.unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert!(report.directives.contains(&Directive::Bridge {
            target: "arn:trunk:1".into(),
            transport: Transport::PrivateTrunk,
            ringback: None,
        }));
        assert_eq!(h.platform.dialogs().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_intent_takes_error_path() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(turn("CheckOrder", &[])).await.unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(
            &report.directives[1..],
            &[Directive::Speak { text: "Sorry".into() }, Directive::Hangup]
        );
    }

    #[tokio::test]
    async fn missing_destination_routes_to_error() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(turn("Transfer", &[])).await.unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert!(!report
            .directives
            .iter()
            .any(|d| matches!(d, Directive::Bridge { .. })));
        assert_eq!(
            report.directives.last(),
            Some(&Directive::Hangup),
        );
        assert!(report.directives.contains(&Directive::Speak { text: "Sorry".into() }));
    }

    #[tokio::test]
    async fn control_failure_routes_to_error_edge() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let error = b.add(ActionNode::speak(TextSource::Literal("Sorry".into())).then(hangup));
        let fallback = b.add(ActionNode::speak(TextSource::Literal("Fallback".into())).then(hangup));
        let play = b.add(
            ActionNode::play(PromptSource::Key("broken.wav".into()))
                .then(hangup)
                .on_error(fallback),
        );
        let h = harness(
            b.build(play, error).unwrap(),
            64,
            MockPlatform::new().fail_on("play_prompt"),
        );
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(report.directives[1], Directive::Speak { text: "Fallback".into() });
    }

    #[tokio::test]
    async fn failing_default_error_node_uses_last_resort() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let error = b.add(ActionNode::speak(TextSource::Phrase("missing".into())).then(hangup));
        let play = b.add(ActionNode::play(PromptSource::Asset("missing".into())).then(hangup));
        let h = harness(b.build(play, error).unwrap(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert!(matches!(report.reason, EndReason::GraphError { .. }));
        assert_eq!(
            report.directives,
            vec![Directive::Speak { text: "Sorry".into() }, Directive::Hangup]
        );
        assert_eq!(h.hooks.ends(), 1);
    }

    #[tokio::test]
    async fn dynamic_edge_yielding_nothing_is_graph_error() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let a = b.add(ActionNode::speak(TextSource::Literal("a".into())).then_with(
            vec![hangup],
            move |outcome, _| outcome.intent.as_ref().map(|_| hangup),
        ));
        let h = harness(b.build(a, hangup).unwrap(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert!(matches!(report.reason, EndReason::GraphError { .. }));
        assert_eq!(
            report.directives,
            vec![
                Directive::Speak { text: "a".into() },
                Directive::Speak { text: "Sorry".into() },
                Directive::Hangup,
            ]
        );
    }

    #[tokio::test]
    async fn hop_limit_ends_dynamic_loop() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let spin = b.reserve();
        b.define(
            spin,
            ActionNode::speak(TextSource::Literal("again".into()))
                .then_with(vec![spin, hangup], move |_, _| Some(spin)),
        )
        .unwrap();
        let h = harness(b.build(spin, hangup).unwrap(), 5, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert!(matches!(report.reason, EndReason::GraphError { .. }));
        assert_eq!(report.hops, 5);
        assert_eq!(report.directives.len(), 7);
    }

    #[tokio::test]
    async fn disconnect_while_awaiting_dialog() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(SessionInput::Disconnect { reason: "caller hung up".into() })
            .await
            .unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(
            report.reason,
            EndReason::Disconnected { reason: "caller hung up".into() }
        );
        assert_eq!(h.hooks.ends(), 1);
        assert_eq!(h.hooks.last_reason(), Some(report.reason.clone()));
    }

    #[tokio::test]
    async fn mismatched_dialog_id_is_ignored() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let mut events = h.executor.event_bus().subscribe();
        let (tx, rx) = mpsc::channel(4);
        tx.send(SessionInput::Dialog {
            intent: "Transfer".into(),
            attributes: Attributes::new(),
            dialog_id: Some("stale".into()),
        })
        .await
        .unwrap();
        tx.send(turn("Quit", &[])).await.unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert!(report.directives.contains(&Directive::Speak { text: "Goodbye".into() }));
        let mut stale = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, FlowEvent::StaleEvent { .. }) {
                stale += 1;
            }
        }
        assert_eq!(stale, 1);
    }

    #[tokio::test]
    async fn bridge_failure_is_external_failure() {
        let h = harness(
            dialog_graph(),
            64,
            MockPlatform::new().fail_dialogs(),
        );
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;
        assert_eq!(report.reason, EndReason::Completed);
        assert!(report.directives.contains(&Directive::Speak { text: "Sorry".into() }));
    }

    #[tokio::test]
    async fn cancellation_ends_with_shutdown() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = h.executor.run(session(&h), rx, cancel).await;
        assert_eq!(report.reason, EndReason::Shutdown);
        assert_eq!(h.hooks.starts(), 1);
        assert_eq!(h.hooks.ends(), 1);
    }

    #[tokio::test]
    async fn closed_inbox_is_disconnect() {
        let h = harness(dialog_graph(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;
        assert_eq!(report.reason, stream_closed());
    }

    #[tokio::test]
    async fn closed_inbox_does_not_cut_call_control() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let speak = b.add(ActionNode::speak(TextSource::Literal("Hello".into())).then(hangup));
        let h = harness(b.build(speak, hangup).unwrap(), 64, MockPlatform::new());
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;
        assert_eq!(report.reason, EndReason::Completed);
    }

    fn start_dialog() -> ActionNode {
        ActionNode::new(Action::StartDialog {
            prompt: TextSource::Literal("How can we help?".into()),
            locale: None,
        })
    }

    fn confirm(prompt: &str) -> ActionNode {
        ActionNode::new(Action::Confirm {
            prompt: TextSource::Literal(prompt.into()),
        })
    }

    fn stale_count(events: &mut broadcast::Receiver<FlowEvent>) -> usize {
        let mut stale = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, FlowEvent::StaleEvent { .. }) {
                stale += 1;
            }
        }
        stale
    }

    /// Send each reply once the session is suspended on a dialog.
    async fn answer_each(
        events: &mut broadcast::Receiver<FlowEvent>,
        tx: mpsc::Sender<SessionInput>,
        replies: Vec<SessionInput>,
    ) {
        for reply in replies {
            loop {
                if let FlowEvent::DialogSuspended { .. } = events.recv().await.unwrap() {
                    break;
                }
            }
            tx.send(reply).await.unwrap();
        }
    }

    #[tokio::test]
    async fn replayed_reply_does_not_answer_later_turn() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let sure = b.add(confirm("sure?").then(hangup));
        let ok = b.add(ActionNode::speak(TextSource::Literal("ok".into())).then(sure));
        let dialog = b.add(start_dialog().then(ok));
        let h = harness(b.build(dialog, hangup).unwrap(), 64, MockPlatform::new());
        let mut events = h.executor.event_bus().subscribe();

        let (tx, rx) = mpsc::channel(4);
        tx.send(turn("Quit", &[("k", "first")])).await.unwrap();
        tx.send(turn("Quit", &[("k", "replayed")])).await.unwrap();
        drop(tx);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, stream_closed());
        assert_eq!(
            report.directives,
            vec![
                Directive::StartDialog {
                    prompt: "How can we help?".into(),
                    locale: LocaleTag::from("en-US"),
                },
                Directive::Speak { text: "ok".into() },
                Directive::Confirm { prompt: "sure?".into() },
            ]
        );
        assert_eq!(h.platform.dialogs().len(), 2);
        assert_eq!(stale_count(&mut events), 1);
        assert_eq!(h.hooks.ends(), 1);
    }

    #[tokio::test]
    async fn queued_disconnect_ends_before_next_turn() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let sure = b.add(confirm("sure?").then(hangup));
        let dialog = b.add(start_dialog().then(sure));
        let h = harness(b.build(dialog, hangup).unwrap(), 64, MockPlatform::new());

        let (tx, rx) = mpsc::channel(4);
        tx.send(turn("Quit", &[])).await.unwrap();
        tx.send(turn("Quit", &[])).await.unwrap();
        tx.send(SessionInput::Disconnect { reason: "caller hung up".into() })
            .await
            .unwrap();
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(
            report.reason,
            EndReason::Disconnected { reason: "caller hung up".into() }
        );
        assert_eq!(h.platform.dialogs().len(), 1);
    }

    #[tokio::test]
    async fn elicit_slot_and_confirm_feed_the_session() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let readback = b.add(
            ActionNode::speak(TextSource::Attribute("orderNumber".into())).then(hangup),
        );
        let sure = b.add(confirm("Is that right?").then(readback));
        let slot = b.add(
            ActionNode::new(Action::ElicitSlot {
                slot: "orderNumber".into(),
                prompt: TextSource::Literal("What is your order number?".into()),
            })
            .then(sure),
        );
        let dialog = b.add(start_dialog().then(slot));
        let h = harness(b.build(dialog, hangup).unwrap(), 64, MockPlatform::new());
        let mut events = h.executor.event_bus().subscribe();

        let (tx, rx) = mpsc::channel(4);
        let replies = vec![
            turn("Quit", &[]),
            turn("ProvideOrder", &[("orderNumber", "A-1042")]),
            turn("Yes", &[]),
        ];
        let (report, _) = tokio::join!(
            h.executor.run(session(&h), rx, CancellationToken::new()),
            answer_each(&mut events, tx, replies),
        );

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(report.hops, 5);
        assert_eq!(
            &report.directives[1..],
            &[
                Directive::ElicitSlot {
                    slot: "orderNumber".into(),
                    prompt: "What is your order number?".into(),
                },
                Directive::Confirm { prompt: "Is that right?".into() },
                Directive::Speak { text: "A-1042".into() },
                Directive::Hangup,
            ]
        );
        let turns: Vec<DialogTurn> = h
            .platform
            .dialogs()
            .into_iter()
            .map(|(_, request)| request.turn)
            .collect();
        assert_eq!(
            turns,
            vec![
                DialogTurn::Start,
                DialogTurn::ElicitSlot { slot: "orderNumber".into() },
                DialogTurn::Confirm,
            ]
        );
    }

    #[tokio::test]
    async fn close_with_message() {
        let mut b = FlowBuilder::new();
        let close = b.add(ActionNode::new(Action::Close {
            message: Some(TextSource::Literal("Thanks, bye".into())),
        }));
        let hello = b.add(ActionNode::speak(TextSource::Literal("Hello".into())).then(close));
        let h = harness(b.build(hello, close).unwrap(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(
            report.directives.last(),
            Some(&Directive::Close { message: Some("Thanks, bye".into()) })
        );
        assert_eq!(h.hooks.ends(), 1);
    }

    #[tokio::test]
    async fn close_without_message() {
        let mut b = FlowBuilder::new();
        let close = b.add(ActionNode::new(Action::Close { message: None }));
        let h = harness(b.build(close, close).unwrap(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        assert_eq!(report.reason, EndReason::Completed);
        assert_eq!(report.directives, vec![Directive::Close { message: None }]);
        assert_eq!(
            h.platform.directives_for(&CallId::from_string("c-1")),
            vec![Directive::Close { message: None }]
        );
    }

    #[tokio::test]
    async fn panicking_edge_still_ends_session() {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let a = b.add(
            ActionNode::speak(TextSource::Literal("a".into()))
                .then_with(vec![hangup], |_, _| -> Option<NodeId> { panic!("edge bug") }),
        );
        let h = harness(b.build(a, hangup).unwrap(), 64, MockPlatform::new());
        let (_tx, rx) = mpsc::channel(4);
        let report = h.executor.run(session(&h), rx, CancellationToken::new()).await;

        match &report.reason {
            EndReason::GraphError { message } => assert!(message.contains("edge bug")),
            other => panic!("expected graph error, got {other:?}"),
        }
        assert_eq!(
            report.directives,
            vec![
                Directive::Speak { text: "a".into() },
                Directive::Speak { text: "Sorry".into() },
                Directive::Hangup,
            ]
        );
        assert_eq!(h.hooks.starts(), 1);
        assert_eq!(h.hooks.ends(), 1);
    }
}
