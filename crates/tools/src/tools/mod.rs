pub mod base;
pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod service_check;
pub mod shell_exec;

pub use base::Tool;
pub use file_list::FileListTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use service_check::ServiceCheckTool;
pub use shell_exec::ShellExecTool;

use crate::registry::ToolRegistry;
use std::sync::Arc;

pub fn register_builtins(registry: &mut ToolRegistry) {
    registry
        .register(Arc::new(FileReadTool))
        .register(Arc::new(FileListTool))
        .register(Arc::new(FileWriteTool))
        .register(Arc::new(ShellExecTool::default()))
        .register(Arc::new(ServiceCheckTool::default()));
}
