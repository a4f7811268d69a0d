//! 同步计划生成
//!
//! 把比较结果转换为有序动作列表：创建时文件夹先于文件，删除时文件先于文件夹。
//! 计划只用于展示，执行器自行按"先文件夹、后文件"两阶段执行

use super::comparator::{Comparison, ModificationReason};
use crate::storage::Entry;
use serde::Serialize;

/// 文件夹创建/更新
pub const PRIORITY_FOLDER_WRITE: u8 = 1;
/// 文件创建/更新/删除
pub const PRIORITY_FILE: u8 = 2;
/// 文件夹删除
pub const PRIORITY_FOLDER_DELETE: u8 = 3;

/// 动作内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Create {
        entry: Entry,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        source_entry: Entry,
        dest_entry: Entry,
        reasons: Vec<ModificationReason>,
    },
    Delete {
        entry: Entry,
    },
}

/// 一个计划动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub priority: u8,
}

impl SyncAction {
    /// 决定排序的条目（更新取源侧）
    pub fn entry(&self) -> &Entry {
        match &self.kind {
            ActionKind::Create { entry } | ActionKind::Delete { entry } => entry,
            ActionKind::Update { source_entry, .. } => source_entry,
        }
    }

    pub fn path(&self) -> &str {
        &self.entry().path
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.kind, ActionKind::Delete { .. })
    }
}

fn write_priority(entry: &Entry) -> u8 {
    if entry.is_folder {
        PRIORITY_FOLDER_WRITE
    } else {
        PRIORITY_FILE
    }
}

fn delete_priority(entry: &Entry) -> u8 {
    if entry.is_folder {
        PRIORITY_FOLDER_DELETE
    } else {
        PRIORITY_FILE
    }
}

/// 生成同步计划（按优先级升序，同优先级保持输入顺序）
pub fn build_plan(comparison: &Comparison) -> Vec<SyncAction> {
    let creates = comparison.additions.iter().map(|entry| SyncAction {
        priority: write_priority(entry),
        kind: ActionKind::Create {
            entry: entry.clone(),
        },
    });

    let updates = comparison.modifications.iter().map(|m| SyncAction {
        priority: write_priority(&m.source),
        kind: ActionKind::Update {
            source_entry: m.source.clone(),
            dest_entry: m.destination.clone(),
            reasons: m.reasons.clone(),
        },
    });

    let deletes = comparison.deletions.iter().map(|entry| SyncAction {
        priority: delete_priority(entry),
        kind: ActionKind::Delete {
            entry: entry.clone(),
        },
    });

    let mut plan: Vec<SyncAction> = creates.chain(updates).chain(deletes).collect();
    // sort_by_key 是稳定排序
    plan.sort_by_key(|a| a.priority);
    plan
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub folder_creates: usize,
    pub file_creates: usize,
    pub updates: usize,
    pub file_deletes: usize,
    pub folder_deletes: usize,
    pub transfer_bytes: u64,
}

impl PlanSummary {
    pub fn total_actions(&self) -> usize {
        self.folder_creates + self.file_creates + self.updates + self.file_deletes + self.folder_deletes
    }
}

pub fn summarize_plan(plan: &[SyncAction]) -> PlanSummary {
    let mut summary = PlanSummary::default();

    for action in plan {
        match &action.kind {
            ActionKind::Create { entry } if entry.is_folder => summary.folder_creates += 1,
            ActionKind::Create { entry } => {
                summary.file_creates += 1;
                summary.transfer_bytes += entry.size;
            }
            ActionKind::Update { source_entry, .. } => {
                summary.updates += 1;
                if !source_entry.is_folder {
                    summary.transfer_bytes += source_entry.size;
                }
            }
            ActionKind::Delete { entry } if entry.is_folder => summary.folder_deletes += 1,
            ActionKind::Delete { .. } => summary.file_deletes += 1,
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::compare;
    use chrono::{TimeZone, Utc};

    fn entry(path: &str, is_folder: bool, size: u64, secs: i64) -> Entry {
        Entry {
            id: format!("id-{}", path),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            is_folder,
            size,
            modified_time: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            content_hash: None,
        }
    }

    #[test]
    fn test_folder_then_file_create() {
        let src = vec![entry("X", true, 0, 0), entry("X/f", false, 4, 0)];
        let plan = build_plan(&compare(&src, &[], false));

        assert_eq!(plan.len(), 2);
        assert!(matches!(&plan[0].kind, ActionKind::Create { entry } if entry.path == "X"));
        assert_eq!(plan[0].priority, PRIORITY_FOLDER_WRITE);
        assert!(matches!(&plan[1].kind, ActionKind::Create { entry } if entry.path == "X/f"));
        assert_eq!(plan[1].priority, PRIORITY_FILE);
    }

    #[test]
    fn test_file_deletes_before_folder_deletes() {
        let dst = vec![
            entry("old", true, 0, 0),
            entry("old/sub", true, 0, 0),
            entry("old/sub/a", false, 1, 0),
            entry("old/b", false, 1, 0),
        ];
        let plan = build_plan(&compare(&[], &dst, false));
        let order: Vec<_> = plan.iter().map(|a| a.path()).collect();
        assert_eq!(order, vec!["old/sub/a", "old/b", "old", "old/sub"]);
        assert!(plan.iter().all(SyncAction::is_delete));
    }

    #[test]
    fn test_plan_sorted_and_stable() {
        let src = vec![
            entry("b", true, 0, 0),
            entry("b/1", false, 1, 0),
            entry("a", true, 0, 0),
            entry("a/1", false, 1, 0),
            entry("changed", false, 5, 9),
        ];
        let dst = vec![entry("changed", false, 5, 1), entry("gone", true, 0, 0), entry("gone.txt", false, 1, 0)];
        let plan = build_plan(&compare(&src, &dst, false));

        assert!(plan.windows(2).all(|w| w[0].priority <= w[1].priority));
        let order: Vec<_> = plan.iter().map(|a| a.path()).collect();
        assert_eq!(order, vec!["b", "a", "b/1", "a/1", "changed", "gone.txt", "gone"]);

        let summary = summarize_plan(&plan);
        assert_eq!(summary.folder_creates, 2);
        assert_eq!(summary.file_creates, 2);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.file_deletes, 1);
        assert_eq!(summary.folder_deletes, 1);
        assert_eq!(summary.total_actions(), plan.len());
        assert_eq!(summary.transfer_bytes, 7);
    }

    /// 执行器的两阶段顺序（先所有文件夹、再所有文件）与计划优先级一致
    #[test]
    fn test_two_phase_order_matches_priorities() {
        let src = vec![
            entry("p", true, 0, 0),
            entry("p/q", true, 0, 0),
            entry("p/q/f", false, 1, 0),
            entry("p/g", false, 1, 0),
            entry("root.txt", false, 1, 0),
        ];
        let plan = build_plan(&compare(&src, &[], false));
        let writes: Vec<_> = plan.iter().filter(|a| !a.is_delete()).collect();

        let folders_phase: Vec<_> = src.iter().filter(|e| e.is_folder).map(|e| e.path.as_str()).collect();
        let files_phase: Vec<_> = src.iter().filter(|e| !e.is_folder).map(|e| e.path.as_str()).collect();

        let last_folder = writes.iter().rposition(|a| a.entry().is_folder).unwrap();
        let first_file = writes.iter().position(|a| !a.entry().is_folder).unwrap();
        assert!(last_folder < first_file);

        let planned: Vec<_> = writes.iter().map(|a| a.path()).collect();
        assert_eq!(&planned[..folders_phase.len()], folders_phase.as_slice());
        assert_eq!(&planned[folders_phase.len()..], files_phase.as_slice());
        for action in &writes {
            let expected = if action.entry().is_folder { PRIORITY_FOLDER_WRITE } else { PRIORITY_FILE };
            assert_eq!(action.priority, expected);
        }
    }

    #[test]
    fn test_action_serializes_tagged() {
        let plan = build_plan(&compare(&[entry("a", false, 1, 0)], &[], false));
        let json = serde_json::to_value(&plan[0]).unwrap();
        assert_eq!(json["action"], "create");
        assert_eq!(json["priority"], 2);
        assert_eq!(json["entry"]["path"], "a");
    }
}
