use switchboard_core::config::FlowConfig;
use switchboard_core::types::{DialogOutcome, Outcome};

/// What a completed dialog turn means to the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogIntent {
    Transfer,
    Quit,
    /// Any other intent. Always routed through the error edge.
    Unrecognized(String),
}

/// The two intent names that carry meaning for the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSentinels {
    pub transfer: String,
    pub quit: String,
}

impl Default for IntentSentinels {
    fn default() -> Self {
        Self {
            transfer: "Transfer".to_string(),
            quit: "Quit".to_string(),
        }
    }
}

impl IntentSentinels {
    pub fn from_config(config: &FlowConfig) -> Self {
        Self {
            transfer: config.transfer_intent.clone(),
            quit: config.quit_intent.clone(),
        }
    }

    /// Intent names are matched exactly.
    pub fn classify(&self, intent: &str) -> DialogIntent {
        if intent == self.transfer {
            DialogIntent::Transfer
        } else if intent == self.quit {
            DialogIntent::Quit
        } else {
            DialogIntent::Unrecognized(intent.to_string())
        }
    }

    /// Turn the conclusion of a `StartDialog` exchange into an outcome.
    ///
    /// Sentinels succeed and carry the intent for the router; anything else
    /// fails so the node's error edge takes it.
    pub fn outcome_for(&self, dialog: DialogOutcome) -> Outcome {
        let status = match self.classify(&dialog.intent) {
            DialogIntent::Transfer | DialogIntent::Quit => Outcome::success(),
            DialogIntent::Unrecognized(_) => Outcome::failure(),
        };
        Outcome {
            attributes: dialog.attributes,
            intent: Some(dialog.intent),
            ..status
        }
    }
}
