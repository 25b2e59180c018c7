use std::sync::Arc;

use tracing::info;

use switchboard_core::config::AppConfig;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::traits::{BusinessHours, SessionHooks};
use switchboard_core::types::{CallId, Channel, LocaleTag};

use crate::dialog::IntentSentinels;
use crate::graph::Graph;
use crate::locale::LocaleSelector;
use crate::session::SessionContext;
use crate::transfer::TransferPolicy;

/// Knobs the executor reads on every session.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub max_hops: usize,
    pub sentinels: IntentSentinels,
    /// Spoken by the last-resort path before hanging up.
    pub error_message: String,
    /// Session attribute holding the transfer destination.
    pub transfer_attribute: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            max_hops: 64,
            sentinels: IntentSentinels::default(),
            error_message: "A system error has occurred, please call back and try again"
                .to_string(),
            transfer_attribute: "transferNumber".to_string(),
        }
    }
}

impl FlowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_hops: config.flow.max_hops,
            sentinels: IntentSentinels::from_config(&config.flow),
            error_message: config.flow.error_message.clone(),
            transfer_attribute: config.telephony.transfer_attribute.clone(),
        }
    }
}

/// The immutable root of a call flow, shared by every session.
pub struct FlowDefinition {
    graph: Graph,
    locales: LocaleSelector,
    transfer: TransferPolicy,
    hours: Arc<dyn BusinessHours>,
    hooks: Arc<dyn SessionHooks>,
    settings: FlowSettings,
}

impl FlowDefinition {
    /// Assemble a flow. Every locale's dialog entry must be a node of `graph`.
    pub fn new(
        graph: Graph,
        locales: LocaleSelector,
        transfer: TransferPolicy,
        hours: Arc<dyn BusinessHours>,
        hooks: Arc<dyn SessionHooks>,
        settings: FlowSettings,
    ) -> Result<Self> {
        for variant in locales.variants() {
            if let Some(entry) = variant.dialog_entry {
                if !graph.contains(entry) {
                    return Err(SwitchboardError::GraphConfiguration(format!(
                        "locale {} enters its dialog at unknown node {}",
                        variant.tag, entry
                    )));
                }
            }
        }
        if settings.max_hops == 0 {
            return Err(SwitchboardError::GraphConfiguration(
                "max_hops must be positive".into(),
            ));
        }
        info!(
            nodes = graph.len(),
            locales = locales.tags().len(),
            initial = %graph.initial(),
            "Flow definition built"
        );
        Ok(Self {
            graph,
            locales,
            transfer,
            hours,
            hooks,
            settings,
        })
    }

    /// Create the context for a new call, fixing its locale for the session.
    pub fn new_session(
        &self,
        call_id: CallId,
        channel: Channel,
        calling_number: impl Into<String>,
        locale: Option<&LocaleTag>,
    ) -> SessionContext {
        let variant = self.locales.select(locale);
        SessionContext::new(call_id, channel, calling_number, variant)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn locales(&self) -> &LocaleSelector {
        &self.locales
    }

    pub fn transfer(&self) -> &TransferPolicy {
        &self.transfer
    }

    pub fn hours(&self) -> &dyn BusinessHours {
        self.hours.as_ref()
    }

    pub fn hooks(&self) -> &dyn SessionHooks {
        self.hooks.as_ref()
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }
}

impl std::fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("nodes", &self.graph.len())
            .field("locales", &self.locales.tags())
            .field("transfer", &self.transfer)
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ActionNode, FlowBuilder, TextSource};
    use crate::hours::StaticHours;
    use crate::locale::LocaleVariant;
    use std::collections::HashMap;
    use switchboard_core::hooks::NoHooks;

    fn selector() -> LocaleSelector {
        let mut variants = HashMap::new();
        for tag in ["en-US", "es-US"] {
            let v = LocaleVariant::new(LocaleTag::from(tag), "prompt");
            variants.insert(v.tag.clone(), v);
        }
        LocaleSelector::new(variants, LocaleTag::from("en-US")).unwrap()
    }

    fn graph() -> Graph {
        let mut b = FlowBuilder::new();
        let hangup = b.add(ActionNode::hangup());
        let speak = b.add(ActionNode::speak(TextSource::Literal("hi".into())).then(hangup));
        b.build(speak, hangup).unwrap()
    }

    #[test]
    fn new_session_selects_locale() {
        let flow = FlowDefinition::new(
            graph(),
            selector(),
            TransferPolicy::new("+15551234567", "PSTN"),
            Arc::new(StaticHours(true)),
            Arc::new(NoHooks),
            FlowSettings::default(),
        )
        .unwrap();
        let ctx = flow.new_session(
            CallId::from_string("c-1"),
            Channel::Sms,
            "+15550001111",
            Some(&LocaleTag::from("es-US")),
        );
        assert_eq!(ctx.locale().as_str(), "es-US");
        let ctx = flow.new_session(CallId::from_string("c-2"), Channel::Sms, "+1", None);
        assert_eq!(ctx.locale().as_str(), "en-US");
    }

    #[test]
    fn dangling_locale_entry_rejected() {
        let mut locales = selector();
        locales
            .bind_entry(&LocaleTag::from("es-US"), crate::graph::NodeId(40))
            .unwrap();
        let err = FlowDefinition::new(
            graph(),
            locales,
            TransferPolicy::new("+15551234567", "PSTN"),
            Arc::new(StaticHours(true)),
            Arc::new(NoHooks),
            FlowSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SwitchboardError::GraphConfiguration(_)));
    }
}
