pub mod classifier;
pub mod path_guard;
pub mod policy;

pub use classifier::{
    Arguments, Classification, Decision, DenyReason, ProposedCall, RiskClassifier, RiskTier,
    ToolCall,
};
pub use path_guard::{expand_home, PathGuard};
pub use policy::{Escalation, PolicyError, RiskPolicy, ToolRule};
