use crate::audit::AuditLog;
use crate::error::DispatchError;
use crate::observation::Observation;
use crate::registry::ToolRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};
use vigil_policy::{Decision, ToolCall};

/// Executes approved calls and records every call, approved or denied, to the
/// audit log.
///
/// Each call is queued onto a FIFO lane the moment it is submitted. Execution
/// and the audit write for call `n` complete before call `n + 1` starts, and the
/// work keeps running even if the caller stops waiting for it.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    audit: Arc<AuditLog>,
    lane: Arc<Lane>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, audit: Arc<AuditLog>) -> Self {
        Self {
            registry,
            audit,
            lane: Arc::new(Lane::new()),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Must be called from within a Tokio runtime.
    pub fn dispatch(
        &self,
        call: ToolCall,
        limit: Duration,
    ) -> Result<PendingObservation, DispatchError> {
        if !call.is_approved() {
            return Err(DispatchError::NotApproved {
                tool: call.tool_name().to_string(),
            });
        }
        Ok(self.submit(call, Some(limit)))
    }

    /// Records a denied call without executing it.
    pub fn deny(&self, call: ToolCall) -> Result<PendingObservation, DispatchError> {
        if call.is_approved() {
            return Err(DispatchError::NotDenied {
                tool: call.tool_name().to_string(),
            });
        }
        Ok(self.submit(call, None))
    }

    fn submit(&self, call: ToolCall, limit: Option<Duration>) -> PendingObservation {
        let ticket = self.lane.ticket();
        let this = self.clone();
        let tool = call.tool_name().to_string();

        let handle = tokio::spawn(async move {
            let _turn = this.lane.enter(ticket).await;

            let observation = match (call.decision(), limit) {
                (Decision::Approved, Some(limit)) => this.execute(&call, limit).await,
                (Decision::Denied(reason), _) => {
                    warn!(tool = %call.tool_name(), %reason, "Tool call denied");
                    Observation::Denied(reason.to_string())
                }
                (Decision::Approved, None) => {
                    Observation::Failure("approved call submitted without a time limit".to_string())
                }
            };

            this.audit.record(&call, &observation)?;
            Ok::<_, DispatchError>(observation)
        });

        PendingObservation { tool, handle }
    }

    async fn execute(&self, call: &ToolCall, limit: Duration) -> Observation {
        let Some(tool) = self.registry.get(call.tool_name()) else {
            return Observation::Failure(format!("tool '{}' is not registered", call.tool_name()));
        };

        info!(tool = %call.tool_name(), tier = %call.risk_tier(), "Dispatching tool");

        let arguments = call.arguments().clone();
        let mut handle = tokio::spawn(async move { tool.execute(arguments).await });

        match timeout(limit, &mut handle).await {
            Ok(Ok(Ok(text))) => Observation::Success(text),
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.tool_name(), error = %e, "Tool failed");
                Observation::Failure(e.to_string())
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(tool = %call.tool_name(), "Tool execution panicked");
                Observation::Failure("tool panicked during execution".to_string())
            }
            Ok(Err(_)) => Observation::Failure("tool execution was cancelled".to_string()),
            Err(_) => {
                let timeout_ms = limit.as_millis() as u64;
                warn!(tool = %call.tool_name(), timeout_ms, "Tool timed out");
                handle.abort();
                Observation::Timeout(timeout_ms)
            }
        }
    }
}

/// A submitted call. Dropping this does not cancel the call.
pub struct PendingObservation {
    tool: String,
    handle: JoinHandle<Result<Observation, DispatchError>>,
}

impl PendingObservation {
    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub async fn wait(self) -> Result<Observation, DispatchError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Lane(e.to_string())),
        }
    }
}

// Ticket lane: tickets are issued synchronously at submission, served in order.
struct Lane {
    issued: AtomicU64,
    serving: watch::Sender<u64>,
}

struct Turn {
    lane: Arc<Lane>,
}

impl Lane {
    fn new() -> Self {
        let (serving, _) = watch::channel(0);
        Self {
            issued: AtomicU64::new(0),
            serving,
        }
    }

    fn ticket(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst)
    }

    async fn enter(self: &Arc<Self>, ticket: u64) -> Turn {
        let mut rx = self.serving.subscribe();
        let _ = rx.wait_for(|serving| *serving == ticket).await;
        Turn {
            lane: Arc::clone(self),
        }
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.lane.serving.send_modify(|serving| *serving += 1);
    }
}
