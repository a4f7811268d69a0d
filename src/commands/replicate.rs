//! 复制命令

use crate::core::{ConflictPolicy, ReplicationExecutor, ReplicationOptions, ReplicationReport};
use crate::storage::RemoteStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 复制请求，未设置的字段使用基础配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicateRequest {
    pub source_root: String,
    pub dest_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_structure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<ConflictPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<String>>,
}

impl ReplicateRequest {
    pub fn new(source_root: &str, dest_root: &str) -> Self {
        Self {
            source_root: source_root.to_string(),
            dest_root: dest_root.to_string(),
            ..Default::default()
        }
    }

    /// 在基础配置上应用请求中的覆盖项
    pub fn apply(&self, base: ReplicationOptions) -> ReplicationOptions {
        ReplicationOptions {
            recursive: self.recursive.unwrap_or(base.recursive),
            preserve_structure: self.preserve_structure.unwrap_or(base.preserve_structure),
            conflict_policy: self.conflict_policy.unwrap_or(base.conflict_policy),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            deadline: self
                .deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(base.deadline),
            inter_batch_pause: base.inter_batch_pause,
            file_ids: self
                .file_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect())
                .or(base.file_ids),
        }
    }
}

/// 执行一次复制，始终返回报告
pub async fn replicate(
    store: &dyn RemoteStore,
    request: &ReplicateRequest,
    base: ReplicationOptions,
) -> ReplicationReport {
    let options = request.apply(base);
    ReplicationExecutor::new(store, options)
        .replicate(&request.source_root, &request.dest_root)
        .await
}
