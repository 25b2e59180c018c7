use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session attributes exchanged with the dialog engine and the platform.
pub type Attributes = HashMap<String, String>;

/// Unique call identifier, assigned by the telephony control plane.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A BCP-47 style locale tag such as `en-US`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleTag(pub String);

impl LocaleTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocaleTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for LocaleTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The platform a session arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Chime,
    Connect,
    Sms,
    Facebook,
    Console,
}

impl Channel {
    /// Voice channels carry audio; the rest are text-only.
    pub fn is_voice(&self) -> bool {
        matches!(self, Self::Chime | Self::Connect)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chime => "chime",
            Self::Connect => "connect",
            Self::Sms => "sms",
            Self::Facebook => "facebook",
            Self::Console => "console",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of executing a node, consumed by edge resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            attributes: Attributes::new(),
            intent: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: OutcomeStatus::Failure,
            attributes: Attributes::new(),
            intent: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Conclusion of an external dialog exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogOutcome {
    pub intent: String,
    pub attributes: Attributes,
}

/// Call-bridging transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    PrivateTrunk,
    PublicNetwork,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateTrunk => f.write_str("private_trunk"),
            Self::PublicNetwork => f.write_str("public_network"),
        }
    }
}

/// Where a transfer goes and over what transport. Computed per decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    pub target: String,
    pub transport: Transport,
}

/// Which kind of dialog turn is being handed to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum DialogTurn {
    Start,
    ElicitSlot { slot: String },
    Confirm,
}

/// A request to hand the caller to the dialog engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogRequest {
    pub dialog_id: String,
    pub prompt: String,
    pub locale: LocaleTag,
    pub turn: DialogTurn,
}

impl DialogRequest {
    /// The outbound directive announcing this dialog turn.
    pub fn directive(&self) -> Directive {
        match &self.turn {
            DialogTurn::Start => Directive::StartDialog {
                prompt: self.prompt.clone(),
                locale: self.locale.clone(),
            },
            DialogTurn::ElicitSlot { slot } => Directive::ElicitSlot {
                slot: slot.clone(),
                prompt: self.prompt.clone(),
            },
            DialogTurn::Confirm => Directive::Confirm {
                prompt: self.prompt.clone(),
            },
        }
    }
}

/// Outbound instruction for the telephony platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    PlayPrompt {
        key: String,
    },
    Speak {
        text: String,
    },
    StartDialog {
        prompt: String,
        locale: LocaleTag,
    },
    Bridge {
        target: String,
        transport: Transport,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ringback: Option<String>,
    },
    ElicitSlot {
        slot: String,
        prompt: String,
    },
    Confirm {
        prompt: String,
    },
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Hangup,
}

impl Directive {
    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayPrompt { .. } => "play_prompt",
            Self::Speak { .. } => "speak",
            Self::StartDialog { .. } => "start_dialog",
            Self::Bridge { .. } => "bridge",
            Self::ElicitSlot { .. } => "elicit_slot",
            Self::Confirm { .. } => "confirm",
            Self::Close { .. } => "close",
            Self::Hangup => "hangup",
        }
    }
}

/// Inbound event from the telephony control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    CallStart {
        call_id: CallId,
        channel: Channel,
        calling_number: String,
        #[serde(default)]
        locale: Option<LocaleTag>,
    },
    DialogTurnComplete {
        call_id: CallId,
        intent_name: String,
        #[serde(default)]
        attributes: Attributes,
        #[serde(default)]
        dialog_id: Option<String>,
    },
    CallEnd {
        call_id: CallId,
        reason: String,
    },
}

impl InboundEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::CallStart { call_id, .. }
            | Self::DialogTurnComplete { call_id, .. }
            | Self::CallEnd { call_id, .. } => call_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallStart { .. } => "call_start",
            Self::DialogTurnComplete { .. } => "dialog_turn_complete",
            Self::CallEnd { .. } => "call_end",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// A terminal node was reached.
    Completed,
    /// The caller or platform disconnected out of band.
    Disconnected { reason: String },
    /// The graph could not be resolved; the last-resort apology was played.
    GraphError { message: String },
    /// The dispatcher was shut down while the call was live.
    Shutdown,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Disconnected { reason } => write!(f, "disconnected: {}", reason),
            Self::GraphError { message } => write!(f, "graph error: {}", message),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Read-only view of a session handed to lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub call_id: CallId,
    pub channel: Channel,
    pub calling_number: String,
    pub locale: LocaleTag,
    pub attributes: Attributes,
    pub hops: usize,
    pub started_at: DateTime<Utc>,
}

/// Flow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A session was created for a new call.
    SessionStarted {
        call_id: CallId,
        channel: Channel,
        locale: LocaleTag,
        timestamp: DateTime<Utc>,
    },
    /// A directive was sent to the platform or dialog bridge.
    DirectiveIssued { call_id: CallId, directive: Directive },
    /// The session handed control to the dialog engine.
    DialogSuspended { call_id: CallId, dialog_id: String },
    /// The dialog engine returned control.
    DialogResumed { call_id: CallId, intent: String },
    /// An inbound event was ignored.
    StaleEvent { call_id: CallId, kind: String, reason: String },
    /// The session terminated.
    SessionEnded {
        call_id: CallId,
        reason: EndReason,
        hops: usize,
    },
}
