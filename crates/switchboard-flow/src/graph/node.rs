use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::traits::BusinessHours;
use switchboard_core::types::{LocaleTag, Outcome};

use super::edge::{Edge, EdgeFn};
use crate::session::SessionContext;

/// Index of a node inside its flow's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a prompt key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// A fixed prompt key, the same in every locale.
    Key(String),
    /// A logical asset looked up in the session's locale table.
    Asset(String),
    /// Chosen by the injected business-hours collaborator at execution time.
    BusinessHours { open: String, closed: String },
}

impl PromptSource {
    pub fn render(&self, ctx: &SessionContext, hours: &dyn BusinessHours) -> Result<String> {
        match self {
            Self::Key(key) => Ok(key.clone()),
            Self::Asset(name) => ctx.variant().asset(name).map(str::to_string).ok_or_else(|| {
                SwitchboardError::MissingAsset {
                    asset: name.clone(),
                    locale: ctx.locale().to_string(),
                }
            }),
            Self::BusinessHours { open, closed } => {
                if hours.is_open() {
                    Ok(open.clone())
                } else {
                    Ok(closed.clone())
                }
            }
        }
    }
}

/// Where spoken text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSource {
    Literal(String),
    /// A phrase looked up in the session's locale table.
    Phrase(String),
    /// A session attribute, typically set by the dialog engine.
    Attribute(String),
}

impl TextSource {
    pub fn render(&self, ctx: &SessionContext) -> Result<String> {
        match self {
            Self::Literal(text) => Ok(text.clone()),
            Self::Phrase(name) => ctx.variant().phrase(name).map(str::to_string).ok_or_else(|| {
                SwitchboardError::MissingAsset {
                    asset: name.clone(),
                    locale: ctx.locale().to_string(),
                }
            }),
            Self::Attribute(key) => ctx
                .attribute(key)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| SwitchboardError::MissingAsset {
                    asset: format!("attribute:{}", key),
                    locale: ctx.locale().to_string(),
                }),
        }
    }
}

/// The closed set of control actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PlayPrompt { prompt: PromptSource },
    Speak { text: TextSource },
    /// Hand the caller to the dialog engine. `locale: None` uses the session locale.
    StartDialog {
        prompt: TextSource,
        locale: Option<LocaleTag>,
    },
    /// Bridge the call to the destination held in the transfer attribute.
    Bridge { ringback: Option<String> },
    ElicitSlot { slot: String, prompt: TextSource },
    Confirm { prompt: TextSource },
    Close { message: Option<TextSource> },
    Hangup,
}

/// Discriminant of `Action`, for logs and validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    PlayPrompt,
    Speak,
    StartDialog,
    Bridge,
    ElicitSlot,
    Confirm,
    Close,
    Hangup,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PlayPrompt => "play_prompt",
            Self::Speak => "speak",
            Self::StartDialog => "start_dialog",
            Self::Bridge => "bridge",
            Self::ElicitSlot => "elicit_slot",
            Self::Confirm => "confirm",
            Self::Close => "close",
            Self::Hangup => "hangup",
        };
        f.write_str(s)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::PlayPrompt { .. } => ActionKind::PlayPrompt,
            Self::Speak { .. } => ActionKind::Speak,
            Self::StartDialog { .. } => ActionKind::StartDialog,
            Self::Bridge { .. } => ActionKind::Bridge,
            Self::ElicitSlot { .. } => ActionKind::ElicitSlot,
            Self::Confirm { .. } => ActionKind::Confirm,
            Self::Close { .. } => ActionKind::Close,
            Self::Hangup => ActionKind::Hangup,
        }
    }

    /// Terminal actions end the session and carry no edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Hangup | Self::Close { .. })
    }

    /// Dialog turns suspend the session until the dialog engine reports back.
    pub fn is_dialog_turn(&self) -> bool {
        matches!(
            self,
            Self::StartDialog { .. } | Self::ElicitSlot { .. } | Self::Confirm { .. }
        )
    }
}

/// One step of a call flow.
///
/// Nodes are stateless: resolving an edge never mutates the node, so the same
/// node may route differently on each visit.
#[derive(Debug, Clone)]
pub struct ActionNode {
    pub action: Action,
    pub description: String,
    pub(crate) next: Option<Edge>,
    pub(crate) error: Option<Edge>,
}

impl ActionNode {
    pub fn new(action: Action) -> Self {
        let description = action.kind().to_string();
        Self {
            action,
            description,
            next: None,
            error: None,
        }
    }

    pub fn play(prompt: PromptSource) -> Self {
        Self::new(Action::PlayPrompt { prompt })
    }

    pub fn speak(text: TextSource) -> Self {
        Self::new(Action::Speak { text })
    }

    pub fn hangup() -> Self {
        Self::new(Action::Hangup)
    }

    /// Set the diagnostic description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Static next edge. Replaces any previous next edge.
    pub fn then(mut self, next: NodeId) -> Self {
        self.next = Some(Edge::Static(next));
        self
    }

    /// Dynamic next edge choosing among `targets`. Replaces any previous next edge.
    pub fn then_with<F>(mut self, targets: Vec<NodeId>, f: F) -> Self
    where
        F: Fn(&Outcome, &SessionContext) -> Option<NodeId> + Send + Sync + 'static,
    {
        self.next = Some(Edge::dynamic(targets, f));
        self
    }

    /// Static error edge.
    pub fn on_error(mut self, error: NodeId) -> Self {
        self.error = Some(Edge::Static(error));
        self
    }

    /// Dynamic error edge choosing among `targets`.
    pub fn on_error_with<F>(mut self, targets: Vec<NodeId>, f: F) -> Self
    where
        F: Fn(&Outcome, &SessionContext) -> Option<NodeId> + Send + Sync + 'static,
    {
        self.error = Some(Edge::dynamic(targets, f));
        self
    }

    /// Use an already-built edge function (shared between nodes) as the next edge.
    pub fn then_shared(mut self, targets: Vec<NodeId>, f: EdgeFn) -> Self {
        self.next = Some(Edge::Dynamic { targets, f });
        self
    }

    /// Use an already-built edge function as the error edge.
    pub fn on_error_shared(mut self, targets: Vec<NodeId>, f: EdgeFn) -> Self {
        self.error = Some(Edge::Dynamic { targets, f });
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.action.is_terminal()
    }

    pub fn next_edge(&self) -> Option<&Edge> {
        self.next.as_ref()
    }

    pub fn error_edge(&self) -> Option<&Edge> {
        self.error.as_ref()
    }

    /// Resolve the successor after a successful execution.
    pub fn resolve_next(&self, outcome: &Outcome, ctx: &SessionContext) -> Result<NodeId> {
        if self.is_terminal() {
            return Err(SwitchboardError::GraphConfiguration(format!(
                "terminal node '{}' has no successor",
                self.description
            )));
        }
        match &self.next {
            Some(edge) => edge.resolve(outcome, ctx).ok_or_else(|| {
                SwitchboardError::GraphConfiguration(format!(
                    "next edge of '{}' resolved to no declared node",
                    self.description
                ))
            }),
            None => Err(SwitchboardError::GraphConfiguration(format!(
                "node '{}' has no next edge",
                self.description
            ))),
        }
    }

    /// Resolve the successor after a failed execution, falling back to the
    /// flow's default error node when the node declares no error edge.
    pub fn resolve_error(
        &self,
        outcome: &Outcome,
        ctx: &SessionContext,
        default_error: NodeId,
    ) -> Result<NodeId> {
        match &self.error {
            Some(edge) => edge.resolve(outcome, ctx).ok_or_else(|| {
                SwitchboardError::GraphConfiguration(format!(
                    "error edge of '{}' resolved to no declared node",
                    self.description
                ))
            }),
            None => Ok(default_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::LocaleVariant;
    use crate::session::SessionContext;
    use std::sync::Arc;
    use switchboard_core::types::{CallId, Channel};

    fn ctx() -> SessionContext {
        let mut variant = LocaleVariant::new(LocaleTag::from("en-US"), "How can we help?");
        variant.phrases.insert("goodbye".into(), "Bye now".into());
        variant.assets.insert("goodbye".into(), "goodbye-en-US.wav".into());
        SessionContext::new(
            CallId::from_string("c-1"),
            Channel::Chime,
            "+15550001111",
            Arc::new(variant),
        )
    }

    #[test]
    fn static_next_resolves() {
        let node = ActionNode::speak(TextSource::Literal("hi".into())).then(NodeId(4));
        assert_eq!(node.resolve_next(&Outcome::success(), &ctx()).unwrap(), NodeId(4));
    }

    #[test]
    fn dynamic_next_follows_outcome() {
        let node = ActionNode::speak(TextSource::Literal("hi".into())).then_with(
            vec![NodeId(1), NodeId(2)],
            |outcome, _| match outcome.intent.as_deref() {
                Some("Quit") => Some(NodeId(1)),
                _ => Some(NodeId(2)),
            },
        );
        let c = ctx();
        assert_eq!(
            node.resolve_next(&Outcome::success().with_intent("Quit"), &c).unwrap(),
            NodeId(1)
        );
        // Same node, different outcome, different route.
        assert_eq!(node.resolve_next(&Outcome::success(), &c).unwrap(), NodeId(2));
    }

    #[test]
    fn missing_next_is_graph_error() {
        let node = ActionNode::speak(TextSource::Literal("hi".into()));
        let err = node.resolve_next(&Outcome::success(), &ctx()).unwrap_err();
        assert!(matches!(err, SwitchboardError::GraphConfiguration(_)));
    }

    #[test]
    fn terminal_has_no_successor() {
        let node = ActionNode::hangup();
        assert!(node.resolve_next(&Outcome::success(), &ctx()).is_err());
    }

    #[test]
    fn error_falls_back_to_default() {
        let node = ActionNode::speak(TextSource::Literal("hi".into())).then(NodeId(1));
        assert_eq!(
            node.resolve_error(&Outcome::failure(), &ctx(), NodeId(9)).unwrap(),
            NodeId(9)
        );
        let node = node.on_error(NodeId(3));
        assert_eq!(
            node.resolve_error(&Outcome::failure(), &ctx(), NodeId(9)).unwrap(),
            NodeId(3)
        );
    }

    #[test]
    fn text_sources_render_from_locale_and_attributes() {
        let mut c = ctx();
        assert_eq!(TextSource::Phrase("goodbye".into()).render(&c).unwrap(), "Bye now");
        assert!(TextSource::Attribute("botResponse".into()).render(&c).is_err());
        c.merge(
            [("botResponse".to_string(), "Connecting you now".to_string())]
                .into_iter()
                .collect(),
        );
        assert_eq!(
            TextSource::Attribute("botResponse".into()).render(&c).unwrap(),
            "Connecting you now"
        );
    }

    #[test]
    fn prompt_sources_render() {
        struct Closed;
        impl BusinessHours for Closed {
            fn is_open(&self) -> bool {
                false
            }
        }
        let c = ctx();
        let hours = PromptSource::BusinessHours {
            open: "open.wav".into(),
            closed: "closed.wav".into(),
        };
        assert_eq!(hours.render(&c, &Closed).unwrap(), "closed.wav");
        assert_eq!(
            PromptSource::Asset("goodbye".into()).render(&c, &Closed).unwrap(),
            "goodbye-en-US.wav"
        );
        let err = PromptSource::Asset("welcome".into()).render(&c, &Closed).unwrap_err();
        assert!(err.is_external());
    }

    #[test]
    fn kinds_and_terminals() {
        assert!(Action::Hangup.is_terminal());
        assert!(Action::Close { message: None }.is_terminal());
        assert!(!Action::Bridge { ringback: None }.is_terminal());
        assert!(Action::Confirm {
            prompt: TextSource::Literal("ok?".into())
        }
        .is_dialog_turn());
        assert_eq!(ActionNode::hangup().description, "hangup");
    }
}
