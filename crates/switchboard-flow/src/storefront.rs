//! The reference storefront call flow.
//!
//! ```text
//! [welcome] → open/closed prompt → dialog (per locale)
//!                                    ├─ Transfer → [bot response] → bridge → hangup
//!                                    ├─ Quit     → goodbye → hangup
//!                                    └─ other    → apology → hangup
//! ```

use std::sync::Arc;

use switchboard_core::config::AppConfig;
use switchboard_core::error::Result;
use switchboard_core::traits::{BusinessHours, SessionHooks};
use switchboard_core::types::Outcome;

use crate::dialog::{DialogIntent, IntentSentinels};
use crate::flow::{FlowDefinition, FlowSettings};
use crate::graph::{
    Action, ActionNode, EdgeFn, FlowBuilder, NodeId, PromptSource, TextSource,
};
use crate::locale::LocaleSelector;
use crate::session::SessionContext;
use crate::transfer::TransferPolicy;

/// Build the storefront flow from configuration.
pub fn storefront_flow(
    config: &AppConfig,
    hours: Arc<dyn BusinessHours>,
    hooks: Arc<dyn SessionHooks>,
) -> Result<FlowDefinition> {
    let mut locales =
        LocaleSelector::from_config(&config.locales, config.flow.default_locale.clone())?;
    let mut b = FlowBuilder::new();

    let hangup = b.add(ActionNode::hangup());
    let apology = b.add(
        ActionNode::speak(TextSource::Literal(config.flow.error_message.clone()))
            .describe("apology")
            .then(hangup),
    );
    let goodbye = b.add(
        ActionNode::speak(TextSource::Phrase("goodbye".into()))
            .describe("goodbye")
            .then(hangup),
    );
    let bridge = b.add(
        ActionNode::new(Action::Bridge {
            ringback: config.telephony.ringback_key.clone(),
        })
        .describe("transfer")
        .then(hangup),
    );
    let bot_attribute = config.flow.bot_response_attribute.clone();
    let bot_response = b.add(
        ActionNode::speak(TextSource::Attribute(bot_attribute.clone()))
            .describe("bot response")
            .then(bridge)
            .on_error(bridge),
    );

    // One router shared by every locale's dialog.
    let sentinels = IntentSentinels::from_config(&config.flow);
    let router: EdgeFn = Arc::new(move |outcome: &Outcome, ctx: &SessionContext| -> Option<NodeId> {
        let intent = outcome.intent.as_deref()?;
        match sentinels.classify(intent) {
            DialogIntent::Transfer => match ctx.attribute(&bot_attribute) {
                Some(text) if !text.trim().is_empty() => Some(bot_response),
                _ => Some(bridge),
            },
            DialogIntent::Quit => Some(goodbye),
            DialogIntent::Unrecognized(_) => None,
        }
    });
    let router_targets = vec![bot_response, bridge, goodbye];

    let mut entries = Vec::new();
    for tag in locales.tags() {
        let prompt = locales
            .get(&tag)
            .map(|v| v.dialog_prompt.clone())
            .unwrap_or_default();
        let dialog = b.add(
            ActionNode::new(Action::StartDialog {
                prompt: TextSource::Literal(prompt),
                locale: Some(tag.clone()),
            })
            .describe(format!("dialog {}", tag))
            .then_shared(router_targets.clone(), router.clone()),
        );
        locales.bind_entry(&tag, dialog)?;
        entries.push(dialog);
    }

    // Whatever happens to the hours prompt, the caller still reaches the dialog.
    let enter_dialog: EdgeFn =
        Arc::new(|_: &Outcome, ctx: &SessionContext| ctx.variant().dialog_entry);
    let open_closed = b.add(
        ActionNode::play(PromptSource::BusinessHours {
            open: config.flow.open_prompt.clone(),
            closed: config.flow.closed_prompt.clone(),
        })
        .describe("business hours")
        .then_shared(entries.clone(), enter_dialog.clone())
        .on_error_shared(entries, enter_dialog),
    );

    let initial = match &config.flow.welcome_prompt {
        Some(key) => b.add(
            ActionNode::play(PromptSource::Key(key.clone()))
                .describe("welcome")
                .then(open_closed)
                .on_error(open_closed),
        ),
        None => open_closed,
    };

    let graph = b.build(initial, apology)?;
    FlowDefinition::new(
        graph,
        locales,
        TransferPolicy::from_config(&config.telephony),
        hours,
        hooks,
        FlowSettings::from_config(config),
    )
}
