//! 比较与计划命令（只读）

use crate::core::{
    build_plan, compare, summarize_plan, Comparison, ComparisonSummary, PlanSummary, ScanConfig,
    SyncAction, TreeEnumerator,
};
use crate::error::SyncResult;
use crate::storage::RemoteStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 比较请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub source_root: String,
    pub dest_root: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default)]
    pub deep_compare: bool,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

impl CompareRequest {
    pub fn new(source_root: &str, dest_root: &str) -> Self {
        Self {
            source_root: source_root.to_string(),
            dest_root: dest_root.to_string(),
            recursive: true,
            ..Default::default()
        }
    }
}

/// 比较响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub success: bool,
    pub message: String,
    pub summary: Option<ComparisonSummary>,
    pub comparison: Option<Comparison>,
}

/// 计划响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub success: bool,
    pub message: String,
    pub summary: Option<PlanSummary>,
    pub actions: Vec<SyncAction>,
}

/// 枚举两棵树并比较，任何一侧枚举失败都使整个比较失败
pub async fn compare_trees(
    store: &dyn RemoteStore,
    source_root: &str,
    dest_root: &str,
    recursive: bool,
    deep_compare: bool,
) -> SyncResult<Comparison> {
    compare_trees_with(store, &ScanConfig::default(), source_root, dest_root, recursive, deep_compare)
        .await
}

/// 带枚举配置（排除规则等）的比较
pub async fn compare_trees_with(
    store: &dyn RemoteStore,
    scan: &ScanConfig,
    source_root: &str,
    dest_root: &str,
    recursive: bool,
    deep_compare: bool,
) -> SyncResult<Comparison> {
    let enumerator = TreeEnumerator::with_config(store, scan.clone());
    let source = enumerator.enumerate(source_root, recursive).await?;
    let dest = enumerator.enumerate(dest_root, recursive).await?;
    Ok(compare(&source, &dest, deep_compare))
}

/// 由比较结果生成同步计划（无副作用）
pub fn build_sync_plan(comparison: &Comparison) -> Vec<SyncAction> {
    build_plan(comparison)
}

async fn run_compare(store: &dyn RemoteStore, request: &CompareRequest) -> SyncResult<Comparison> {
    let scan = ScanConfig {
        exclude_patterns: request.exclude_patterns.clone(),
        ..Default::default()
    };
    compare_trees_with(
        store,
        &scan,
        &request.source_root,
        &request.dest_root,
        request.recursive,
        request.deep_compare,
    )
    .await
}

/// 比较两棵树，错误转换为失败响应
pub async fn analyze(store: &dyn RemoteStore, request: &CompareRequest) -> CompareResponse {
    match run_compare(store, request).await {
        Ok(comparison) => {
            let summary = comparison.summary();
            let message = format!(
                "新增 {}, 修改 {}, 删除 {}, 未变 {}",
                summary.addition_count,
                summary.modification_count,
                summary.deletion_count,
                summary.unchanged_count
            );
            info!("比较完成: {}", message);
            CompareResponse {
                success: true,
                message,
                summary: Some(summary),
                comparison: Some(comparison),
            }
        }
        Err(e) => {
            warn!("比较失败: {}", e);
            CompareResponse {
                success: false,
                message: e.to_string(),
                summary: None,
                comparison: None,
            }
        }
    }
}

/// 比较并生成计划，错误转换为失败响应
pub async fn plan(store: &dyn RemoteStore, request: &CompareRequest) -> PlanResponse {
    match run_compare(store, request).await {
        Ok(comparison) => {
            let actions = build_sync_plan(&comparison);
            let summary = summarize_plan(&actions);
            let message = format!(
                "共 {} 个动作, 需传输 {} 字节",
                summary.total_actions(),
                summary.transfer_bytes
            );
            info!("计划生成完成: {}", message);
            PlanResponse {
                success: true,
                message,
                summary: Some(summary),
                actions,
            }
        }
        Err(e) => {
            warn!("生成计划失败: {}", e);
            PlanResponse {
                success: false,
                message: e.to_string(),
                summary: None,
                actions: Vec::new(),
            }
        }
    }
}
