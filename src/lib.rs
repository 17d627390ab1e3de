pub mod backup;
pub mod config;
pub mod reconciliation;
pub mod remote;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use backup::BackupManager;
pub use config::{read_config, read_ignore_list, write_config, IgnoreList, SessionConfig, SyncConfig};
pub use reconciliation::{
    apply_pull_plan, apply_push_plan, build_pull_plan, build_push_plan, PullAction, PullContext,
    PullDecision, PullPlan, PullReason, PullResult, PushContext, PushKind, PushPlan, PushResult,
};
pub use remote::{
    FetchedProfiles, GitHubClient, GitTimeTable, RemoteError, RemoteFetcher, RemoteStore, RemoteTimeOracle,
    RemoteWriter, RepoRef,
};
pub use session::{NoopSession, ProcessLauncher, SessionError, SessionOutcome, SessionRunner};
pub use snapshot::{capture_snapshot, Snapshot};
pub use sync::{PullSummary, PushSummary, SyncError, SyncOrchestrator, SyncPhase, SyncReport};
pub use utils::ContentDigest;
