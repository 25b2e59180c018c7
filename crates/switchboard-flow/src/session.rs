use std::sync::Arc;

use chrono::{DateTime, Utc};

use switchboard_core::types::{
    Attributes, CallId, Channel, EndReason, LocaleTag, SessionSummary,
};

use crate::graph::NodeId;
use crate::locale::LocaleVariant;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    /// Suspended on a dialog turn until a matching turn-complete event arrives.
    AwaitingDialog { dialog_id: String, node: NodeId },
    Terminated(EndReason),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::AwaitingDialog { .. } => "awaiting_dialog",
            Self::Terminated(_) => "terminated",
        }
    }
}

/// Per-call mutable state, owned by the session's executor.
#[derive(Debug, Clone)]
pub struct SessionContext {
    call_id: CallId,
    channel: Channel,
    calling_number: String,
    variant: Arc<LocaleVariant>,
    attributes: Attributes,
    current: Option<NodeId>,
    hops: usize,
    started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(
        call_id: CallId,
        channel: Channel,
        calling_number: impl Into<String>,
        variant: Arc<LocaleVariant>,
    ) -> Self {
        Self {
            call_id,
            channel,
            calling_number: calling_number.into(),
            variant,
            attributes: Attributes::new(),
            current: None,
            hops: 0,
            started_at: Utc::now(),
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn calling_number(&self) -> &str {
        &self.calling_number
    }

    pub fn locale(&self) -> &LocaleTag {
        &self.variant.tag
    }

    /// The locale variant chosen at session start.
    pub fn variant(&self) -> &LocaleVariant {
        &self.variant
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    pub fn hops(&self) -> usize {
        self.hops
    }

    /// Merge attributes, last write wins per key.
    pub fn merge(&mut self, attributes: Attributes) {
        self.attributes.extend(attributes);
    }

    /// Move to a node, counting the hop.
    pub(crate) fn enter(&mut self, node: NodeId) {
        self.current = Some(node);
        self.hops += 1;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            call_id: self.call_id.clone(),
            channel: self.channel,
            calling_number: self.calling_number.clone(),
            locale: self.variant.tag.clone(),
            attributes: self.attributes.clone(),
            hops: self.hops,
            started_at: self.started_at,
        }
    }
}
