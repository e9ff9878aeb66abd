use crate::orchestrator::Orchestrator;
use crate::types::{ActionRecord, ReasoningStep, TaskVerification, Verdict};
use tracing::{info, warn};
use vigil_policy::{ProposedCall, RiskTier};
use vigil_tasks::{matches_cycle, TrackedTask, VerifyProbe};
use vigil_tools::Observation;

impl Orchestrator {
    /// Checks tracked tasks this cycle refers to. A task without a probe is
    /// completed as-is; a failed probe marks it unverified and says so in the answer.
    pub(crate) async fn verify_tasks(
        &mut self,
        input: &str,
        mut answer: String,
        steps: &mut Vec<ReasoningStep>,
    ) -> (String, Vec<TaskVerification>) {
        let Some(tracker) = self.tasks.clone() else {
            return (answer, Vec::new());
        };

        let tasks = match tracker.in_progress().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Could not read tracked tasks");
                return (answer, Vec::new());
            }
        };

        let mut verifications = Vec::new();
        for task in tasks.into_iter().filter(|t| matches_cycle(&t.title, input)) {
            let verdict = match &task.verify {
                Some(probe) => self.run_probe(&task, probe, steps).await,
                None => Verdict::Unchecked,
            };

            let recorded = match &verdict {
                Verdict::Verified | Verdict::Unchecked => tracker.mark_completed(&task.id).await,
                Verdict::Unverified(reason) => {
                    answer.push_str(&format!("\n\n[unverified: {}: {}]", task.title, reason));
                    tracker.mark_unverified(&task.id, reason).await
                }
            };
            if let Err(e) = recorded {
                warn!(task = %task.id, error = %e, "Could not update tracked task");
            }

            info!(task = %task.id, ?verdict, "Task checked");
            verifications.push(TaskVerification {
                task_id: task.id,
                title: task.title,
                verdict,
            });
        }

        (answer, verifications)
    }

    async fn run_probe(
        &self,
        task: &TrackedTask,
        probe: &VerifyProbe,
        steps: &mut Vec<ReasoningStep>,
    ) -> Verdict {
        let call = self
            .classifier
            .classify(ProposedCall::new(&probe.tool, probe.arguments.clone()));
        let action = ActionRecord::from(&call);

        let pending = if !call.is_approved() {
            self.dispatcher.deny(call)
        } else if call.risk_tier() != RiskTier::Low {
            steps.push(ReasoningStep {
                thought: format!("Verifying task '{}'", task.title),
                action: Some(action),
                observation: None,
            });
            return Verdict::Unverified(format!(
                "verification probe '{}' is not a low-risk call",
                probe.tool
            ));
        } else {
            self.dispatcher.dispatch(call, self.config.tool_timeout)
        };

        let observation = match pending {
            Ok(pending) => pending.wait().await,
            Err(e) => Err(e),
        };

        let verdict = match &observation {
            Ok(Observation::Success(text)) => match &probe.expect {
                Some(expected) if !text.contains(expected.as_str()) => Verdict::Unverified(format!(
                    "'{}' output does not contain '{}'",
                    probe.tool, expected
                )),
                _ => Verdict::Verified,
            },
            Ok(other) => Verdict::Unverified(other.as_text()),
            Err(e) => Verdict::Unverified(e.to_string()),
        };

        steps.push(ReasoningStep {
            thought: format!("Verifying task '{}'", task.title),
            action: Some(action),
            observation: observation.ok(),
        });
        verdict
    }
}
