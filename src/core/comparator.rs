use crate::storage::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 判定为已修改的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationReason {
    /// 源的修改时间严格晚于目标
    NewerModificationTime,
    /// 大小不同
    DifferentSize,
    /// 校验和不同（仅深度比较）
    DifferentContent,
}

impl std::fmt::Display for ModificationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModificationReason::NewerModificationTime => write!(f, "newer_modification_time"),
            ModificationReason::DifferentSize => write!(f, "different_size"),
            ModificationReason::DifferentContent => write!(f, "different_content"),
        }
    }
}

/// 两边都存在且被判定为已修改的条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub source: Entry,
    pub destination: Entry,
    pub reasons: Vec<ModificationReason>,
}

/// 比较结果，四个分组按路径划分两边路径的并集
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub additions: Vec<Entry>,
    pub modifications: Vec<Modification>,
    pub deletions: Vec<Entry>,
    pub unchanged: Vec<Entry>,
}

impl Comparison {
    pub fn has_changes(&self) -> bool {
        !(self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty())
    }

    pub fn summary(&self) -> ComparisonSummary {
        let addition_bytes: u64 = self.additions.iter().map(|e| e.size).sum();
        let modification_bytes: u64 = self.modifications.iter().map(|m| m.source.size).sum();
        ComparisonSummary {
            addition_count: self.additions.len(),
            modification_count: self.modifications.len(),
            deletion_count: self.deletions.len(),
            unchanged_count: self.unchanged.len(),
            transfer_bytes: addition_bytes + modification_bytes,
        }
    }
}

/// 比较统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub addition_count: usize,
    pub modification_count: usize,
    pub deletion_count: usize,
    pub unchanged_count: usize,
    /// 新增与修改需要传输的字节数
    pub transfer_bytes: u64,
}

impl ComparisonSummary {
    pub fn total_entries(&self) -> usize {
        self.addition_count + self.modification_count + self.deletion_count + self.unchanged_count
    }
}

/// 修改判定
///
/// 各项检查相互独立并累加：时间更早不会抵消大小或内容不同
pub fn is_modified(src: &Entry, dst: &Entry, deep_compare: bool) -> Vec<ModificationReason> {
    let mut reasons = Vec::new();

    if src.modified_time > dst.modified_time {
        reasons.push(ModificationReason::NewerModificationTime);
    }

    if src.size != dst.size {
        reasons.push(ModificationReason::DifferentSize);
    }

    if deep_compare {
        if let (Some(src_hash), Some(dst_hash)) = (&src.content_hash, &dst.content_hash) {
            if !src_hash.is_empty() && !dst_hash.is_empty() && src_hash != dst_hash {
                reasons.push(ModificationReason::DifferentContent);
            }
        }
    }

    reasons
}

/// 按路径建立索引，路径重复时后出现的条目生效，返回保留条目的下标
fn index_by_path(entries: &[Entry]) -> HashMap<&str, usize> {
    let mut map = HashMap::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        map.insert(entry.path.as_str(), i);
    }
    map
}

/// 比较两棵树的扁平条目列表
///
/// 线性复杂度；输出分组保持输入顺序（删除按目标顺序）
pub fn compare(source: &[Entry], dest: &[Entry], deep_compare: bool) -> Comparison {
    let source_index = index_by_path(source);
    let dest_index = index_by_path(dest);
    let mut comparison = Comparison::default();

    for (i, src) in source.iter().enumerate() {
        if source_index.get(src.path.as_str()) != Some(&i) {
            debug!("路径重复，忽略较早的源条目: {} ({})", src.path, src.id);
            continue;
        }

        match dest_index.get(src.path.as_str()) {
            None => comparison.additions.push(src.clone()),
            Some(&j) => {
                let dst = &dest[j];
                let reasons = is_modified(src, dst, deep_compare);
                if reasons.is_empty() {
                    comparison.unchanged.push(src.clone());
                } else {
                    debug!("已修改: {} {:?}", src.path, reasons);
                    comparison.modifications.push(Modification {
                        source: src.clone(),
                        destination: dst.clone(),
                        reasons,
                    });
                }
            }
        }
    }

    for (j, dst) in dest.iter().enumerate() {
        if dest_index.get(dst.path.as_str()) != Some(&j) {
            continue;
        }
        if !source_index.contains_key(dst.path.as_str()) {
            comparison.deletions.push(dst.clone());
        }
    }

    debug!(
        "比较完成: 新增 {}, 修改 {}, 删除 {}, 未变 {}",
        comparison.additions.len(),
        comparison.modifications.len(),
        comparison.deletions.len(),
        comparison.unchanged.len()
    );

    comparison
}
