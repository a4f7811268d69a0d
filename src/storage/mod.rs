pub mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use local::LocalStore;
pub use memory::{MemoryStore, MemoryStoreStats};

// ============ 公共常量 ============

/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// 远程树中的一个节点（文件或文件夹）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// 后端不透明 ID
    pub id: String,
    pub name: String,
    /// 相对遍历根的路径（`/` 分隔），由枚举器计算
    pub path: String,
    pub is_folder: bool,
    /// 字节数，文件夹为 0
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    /// 内容校验和，仅文件且后端提供时存在
    pub content_hash: Option<String>,
}

impl Entry {
    /// 文件扩展名（不含点），没有时返回 None
    pub fn extension(&self) -> Option<&str> {
        split_extension(&self.name).1
    }
}

/// 按最后一个点拆分文件名，隐藏文件（如 `.env`）视为无扩展名
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

/// 条目类型过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    Any,
    FoldersOnly,
    FilesOnly,
}

/// 列表查询条件（"某文件夹的子项" 由 `list_children` 的参数表达）
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub kind: KindFilter,
    /// 是否包含回收站中的条目
    pub include_trashed: bool,
    /// 仅返回这些名称的条目（批量存在性查询）
    pub names: Option<HashSet<String>>,
}

impl ListQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn folders() -> Self {
        Self {
            kind: KindFilter::FoldersOnly,
            ..Default::default()
        }
    }

    pub fn files() -> Self {
        Self {
            kind: KindFilter::FilesOnly,
            ..Default::default()
        }
    }

    pub fn named<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// 判断条目是否满足条件（`trashed` 由后端提供）
    pub fn matches(&self, entry: &Entry, trashed: bool) -> bool {
        if trashed && !self.include_trashed {
            return false;
        }
        let kind_ok = match self.kind {
            KindFilter::Any => true,
            KindFilter::FoldersOnly => entry.is_folder,
            KindFilter::FilesOnly => !entry.is_folder,
        };
        kind_ok
            && self
                .names
                .as_ref()
                .map_or(true, |names| names.contains(&entry.name))
    }
}

/// 一页列表结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<Entry>,
    pub next_page_token: Option<String>,
    /// 后端无法读取而跳过的子项名称
    pub skipped: Vec<String>,
}

/// 完整列表，附带被跳过的子项
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<Entry>,
    pub skipped: Vec<String>,
}

/// 存储后端错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("条目不存在: {id}")]
    NotFound { id: String },

    #[error("{op} 被拒绝: {message}")]
    Rejected { op: String, message: String },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(id: &str) -> Self {
        StoreError::NotFound { id: id.to_string() }
    }

    pub fn rejected(op: &str, message: impl Into<String>) -> Self {
        StoreError::Rejected {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 远程存储抽象接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 分页列出文件夹的直接子项
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        query: &ListQuery,
    ) -> StoreResult<ListPage>;

    /// 获取单个条目的元数据
    async fn get_entry(&self, entry_id: &str) -> StoreResult<Entry>;

    /// 在父文件夹下创建文件夹
    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<Entry>;

    /// 复制文件到目标文件夹，使用新名称
    async fn copy_entry(
        &self,
        source_id: &str,
        new_name: &str,
        dest_parent_id: &str,
    ) -> StoreResult<Entry>;

    /// 删除条目
    async fn delete_entry(&self, entry_id: &str) -> StoreResult<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 跟随 continuation token 拉取全部分页，跳过的子项只记录警告
pub async fn list_all(
    store: &dyn RemoteStore,
    folder_id: &str,
    query: &ListQuery,
) -> StoreResult<Vec<Entry>> {
    let listing = list_all_with_skipped(store, folder_id, query).await?;
    for name in &listing.skipped {
        warn!("{} 中的子项无法读取，已跳过: {}", folder_id, name);
    }
    Ok(listing.entries)
}

/// 跟随 continuation token 拉取全部分页，并收集后端跳过的子项
pub async fn list_all_with_skipped(
    store: &dyn RemoteStore,
    folder_id: &str,
    query: &ListQuery,
) -> StoreResult<Listing> {
    let mut listing = Listing::default();
    let mut page_token: Option<String> = None;

    loop {
        let page = store
            .list_children(folder_id, page_token.as_deref(), query)
            .await?;
        listing.entries.extend(page.entries);
        listing.skipped.extend(page.skipped);

        match page.next_page_token {
            Some(token) if Some(&token) != page_token.as_ref() => page_token = Some(token),
            Some(token) => {
                return Err(StoreError::rejected(
                    "list",
                    format!("分页令牌未推进: {}", token),
                ))
            }
            None => break,
        }
    }

    Ok(listing)
}

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Local,
    Memory,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub typ: StoreType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

/// 根据配置创建存储实例
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let page_size = config.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    match config.typ {
        StoreType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local store requires path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(Arc::new(LocalStore::new(path)?.with_page_size(page_size)) as Arc<dyn RemoteStore>)
        }
        StoreType::Memory => {
            tracing::info!("初始化内存存储");
            Ok(Arc::new(MemoryStore::new("memory").with_page_size(page_size)) as Arc<dyn RemoteStore>)
        }
    }
}
