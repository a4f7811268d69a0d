pub mod cache;
pub mod comparator;
pub mod conflict;
pub mod engine;
pub mod planner;
pub mod scanner;

pub use cache::FolderCache;
pub use comparator::{compare, is_modified, Comparison, ComparisonSummary, Modification, ModificationReason};
pub use conflict::{unique_name, ConflictPolicy, ConflictResolver, Resolution};
pub use engine::{
    CopiedFile, ExecutionResult, FolderRecord, ItemError, ReplicationExecutor, ReplicationOptions,
    ReplicationReport, ReplicationStatus,
};
pub use planner::{build_plan, summarize_plan, ActionKind, PlanSummary, SyncAction};
pub use scanner::{ScanConfig, TreeEnumerator};
