mod execute;
mod plan;
mod push;

pub use execute::{
    apply_pull_plan, apply_push_plan, AppliedUpdate, ExecuteError, PullResult, PushResult,
};
pub use plan::{build_pull_plan, PlanError, PullAction, PullContext, PullDecision, PullPlan, PullReason};
pub use push::{build_push_plan, PushCandidate, PushConflict, PushContext, PushKind, PushPlan};

use crate::remote::{last_change_within, GitTimeTable, RemoteTimeOracle, RepoRef};
use crate::utils::remote_profile_path;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Look up a profile's remote time, consulting `table` before the oracle.
///
/// Resolved times are recorded in `table`.
async fn resolve_remote_time(
    oracle: &dyn RemoteTimeOracle,
    repo: &RepoRef,
    timeout: Duration,
    file_name: &str,
    table: &mut GitTimeTable,
) -> Option<DateTime<Utc>> {
    if let Some(time) = table.get(file_name) {
        return Some(*time);
    }

    let time = last_change_within(oracle, repo, &remote_profile_path(file_name), timeout).await;
    if let Some(time) = time {
        table.insert(file_name.to_string(), time);
    }
    time
}
