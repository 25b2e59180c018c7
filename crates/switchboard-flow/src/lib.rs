pub mod dialog;
pub mod executor;
pub mod flow;
pub mod graph;
pub mod hours;
pub mod locale;
pub mod session;
pub mod storefront;
pub mod transfer;

pub use dialog::{DialogIntent, IntentSentinels};
pub use executor::{SessionExecutor, SessionInput, SessionReport};
pub use flow::{FlowDefinition, FlowSettings};
pub use graph::{Action, ActionNode, FlowBuilder, Graph, NodeId, PromptSource, TextSource};
pub use hours::{hours_from_config, ScheduleHours, StaticHours};
pub use locale::{LocaleSelector, LocaleVariant};
pub use session::{SessionContext, SessionState};
pub use storefront::storefront_flow;
pub use transfer::{TransferPolicy, TrunkRoute};
