use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ProvisionError, Result};
use crate::scheduler::{MemberPhase, MemberStatus, Scheduler};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone)]
pub struct Ready {
    /// Final snapshot, every member running, in scheduler order.
    pub members: Vec<MemberStatus>,
    /// Number of status queries issued, including the successful one.
    pub rounds: u32,
}

/// Polls a scheduler until a workload's members are all running.
///
/// A round counts as ready only when the snapshot holds exactly the expected
/// number of members and all of them are running. A `Failed` member ends the
/// wait immediately. The wait is bounded by `timeout` and can be cancelled;
/// neither touches the workload itself.
pub struct ReadinessPoller {
    scheduler: Arc<dyn Scheduler>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReadinessPoller {
    pub fn new(scheduler: Arc<dyn Scheduler>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            scheduler,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            timeout,
        }
    }

    pub async fn wait_until_ready(
        &self,
        label: &str,
        expected_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Ready> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut snapshot: Vec<MemberStatus> = Vec::new();
        let mut rounds = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(cancelled(label, snapshot));
                }
                _ = time::sleep_until(deadline) => {
                    return Err(timed_out(label, started, snapshot));
                }
                _ = ticker.tick() => {}
            }

            let statuses = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(cancelled(label, snapshot));
                }
                _ = time::sleep_until(deadline) => {
                    return Err(timed_out(label, started, snapshot));
                }
                result = self.scheduler.member_statuses(label) => result?,
            };
            rounds += 1;
            snapshot = statuses;

            tracing::debug!(
                label,
                round = rounds,
                observed = snapshot.len(),
                expected = expected_count,
                members = ?snapshot.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Readiness poll"
            );

            if let Some(failed) = snapshot.iter().find(|m| m.phase == MemberPhase::Failed) {
                tracing::warn!(label, member = %failed.name, round = rounds, "Member failed");
                return Err(ProvisionError::MemberFailed {
                    label: label.to_string(),
                    member: failed.name.clone(),
                    snapshot,
                });
            }

            if is_complete(&snapshot, expected_count) {
                tracing::info!(
                    label,
                    members = snapshot.len(),
                    rounds,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "All members running"
                );
                return Ok(Ready {
                    members: snapshot,
                    rounds,
                });
            }
        }
    }
}

/// Ready means a non-empty snapshot of exactly `expected_count` members, all
/// running. A partial view during scheduler propagation is not ready.
pub fn is_complete(snapshot: &[MemberStatus], expected_count: usize) -> bool {
    !snapshot.is_empty()
        && snapshot.len() == expected_count
        && snapshot.iter().all(MemberStatus::is_running)
}

fn cancelled(label: &str, snapshot: Vec<MemberStatus>) -> ProvisionError {
    tracing::info!(label, "Readiness wait cancelled, workload left in place");
    ProvisionError::Cancelled {
        label: label.to_string(),
        snapshot,
    }
}

fn timed_out(label: &str, started: Instant, snapshot: Vec<MemberStatus>) -> ProvisionError {
    let waited = started.elapsed();
    tracing::warn!(
        label,
        waited_ms = waited.as_millis() as u64,
        observed = snapshot.len(),
        "Readiness wait timed out"
    );
    ProvisionError::ReadinessTimeout {
        label: label.to_string(),
        waited,
        snapshot,
    }
}
