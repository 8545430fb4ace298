pub mod condition;
pub mod enrollment;
pub mod event;
pub mod flow;
pub mod node;
pub mod user;
pub mod validation;

pub use condition::{ConditionGroup, ConditionLogic, ConditionOperator, ConditionRule};
pub use enrollment::{EnrollmentGuard, EnrollmentStatus, FlowEnrollment};
pub use event::{BatchIngestReport, EventSnapshot, IngestOutcome, StoredEvent};
pub use flow::{
    FlowDefinition, FlowEdge, FlowMetrics, FlowSettings, FlowStatus, HANDLE_NO, HANDLE_TIMEOUT,
    HANDLE_YES,
};
pub use node::{
    ActionConfig, ActionKind, DelayConfig, ExitConfig, FlowNode, GotoConfig, NodeConfig,
    NodePosition, NodeType, SplitConfig, SplitVariant, TriggerConfig, TriggerKind,
    variant_handle,
};
pub use user::UserProfile;
pub use validation::{ValidationIssue, ValidationSeverity};
