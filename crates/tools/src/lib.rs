pub mod audit;
pub mod dispatcher;
pub mod error;
pub mod observation;
pub mod registry;
pub mod tools;

pub use audit::{AuditEntry, AuditLog};
pub use dispatcher::{PendingObservation, ToolDispatcher};
pub use error::{AuditError, DispatchError, ToolError};
pub use observation::Observation;
pub use registry::ToolRegistry;
pub use tools::Tool;
