use crate::config::ReplicationConfig;
use crate::core::cache::FolderCache;
use crate::core::conflict::{ConflictPolicy, ConflictResolver, Resolution};
use crate::error::{SyncError, SyncResult};
use crate::storage::{list_all, list_all_with_skipped, Entry, ListQuery, RemoteStore, StoreError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 每批文件数上限
pub const MAX_BATCH_SIZE: usize = 100;
/// 同时进行的复制数上限
pub const MAX_CONCURRENCY: usize = 20;

/// 复制配置
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// 是否处理子文件夹
    pub recursive: bool,
    /// 是否在目标中重建文件夹结构（否则所有文件平铺到目标根目录）
    pub preserve_structure: bool,
    pub conflict_policy: ConflictPolicy,
    /// 每批处理的文件数
    pub batch_size: usize,
    /// 最大并发复制数
    pub max_concurrency: usize,
    /// 整次运行的时间上限
    pub deadline: Duration,
    /// 批次之间的停顿，降低后端限流压力
    pub inter_batch_pause: Duration,
    /// 仅复制这些文件 ID
    pub file_ids: Option<HashSet<String>>,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            preserve_structure: true,
            conflict_policy: ConflictPolicy::Rename,
            batch_size: 10,
            max_concurrency: 5,
            deadline: Duration::from_secs(300),
            inter_batch_pause: Duration::from_millis(100),
            file_ids: None,
        }
    }
}

impl ReplicationOptions {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            recursive: config.recursive,
            preserve_structure: config.preserve_structure,
            conflict_policy: config.conflict_policy,
            batch_size: config.batch_size,
            max_concurrency: config.max_concurrency,
            deadline: Duration::from_secs(config.deadline_secs),
            inter_batch_pause: Duration::from_millis(config.inter_batch_pause_ms),
            file_ids: None,
        }
    }

    /// 把批大小和并发数限制在允许范围内
    pub fn normalized(mut self) -> Self {
        let batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        if batch_size != self.batch_size {
            warn!("批大小 {} 超出范围，调整为 {}", self.batch_size, batch_size);
            self.batch_size = batch_size;
        }
        let max_concurrency = self.max_concurrency.clamp(1, MAX_CONCURRENCY);
        if max_concurrency != self.max_concurrency {
            warn!("并发数 {} 超出范围，调整为 {}", self.max_concurrency, max_concurrency);
            self.max_concurrency = max_concurrency;
        }
        self
    }
}

/// 文件夹骨架中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub source_id: String,
    pub dest_id: String,
    pub name: String,
    pub path: String,
    /// 本次运行新建（否则复用了目标中已有的文件夹）
    pub created: bool,
}

/// 已复制的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopiedFile {
    pub source_id: String,
    pub dest_id: String,
    pub name: String,
    pub dest_name: String,
    pub path: String,
    /// 替换了目标中的同名文件
    pub replaced: bool,
}

/// 单项失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub item: String,
    pub path: String,
    pub kind: String,
    pub message: String,
}

impl ItemError {
    pub fn new(item: &str, path: &str, err: &SyncError) -> Self {
        Self {
            item: item.to_string(),
            path: path.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// 运行期间累积的结果，只属于一次运行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub folders_created: usize,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub folders: Vec<FolderRecord>,
    pub copied_files: Vec<CopiedFile>,
    pub skipped_files: Vec<String>,
    pub errors: Vec<ItemError>,
}

impl ExecutionResult {
    fn record_error(&mut self, item: &str, path: &str, err: SyncError) {
        warn!("{} 失败: {}", display_path(path), err);
        self.errors.push(ItemError::new(item, path, &err));
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Completed,
    CompletedWithErrors,
    TimedOut,
    Failed,
}

/// 复制报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationReport {
    pub success: bool,
    pub timed_out: bool,
    pub status: ReplicationStatus,
    pub summary: String,
    /// 中止运行的错误（超时、配置或根目录不可用）
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: ExecutionResult,
}

/// 截止时间，只在阶段边界检查
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn check(&self, phase: &str) -> SyncResult<()> {
        let elapsed = self.elapsed();
        if elapsed > self.limit {
            error!("{}: 已超过截止时间 ({}ms)", phase, elapsed.as_millis());
            return Err(SyncError::Timeout {
                elapsed,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<根目录>"
    } else {
        path
    }
}

/// 复制执行器
///
/// 先按源结构在目标中建立文件夹骨架，再逐个文件夹分批并发复制文件
pub struct ReplicationExecutor<'a> {
    store: &'a dyn RemoteStore,
    options: ReplicationOptions,
}

impl<'a> ReplicationExecutor<'a> {
    pub fn new(store: &'a dyn RemoteStore, options: ReplicationOptions) -> Self {
        Self {
            store,
            options: options.normalized(),
        }
    }

    pub fn options(&self) -> &ReplicationOptions {
        &self.options
    }

    /// 运行一次复制，总是返回结构化报告
    pub async fn replicate(&self, source_root: &str, dest_root: &str) -> ReplicationReport {
        let started_at = Utc::now();
        let deadline = Deadline::start(self.options.deadline);
        let mut result = ExecutionResult::default();

        info!(
            "开始复制: {} -> {} (policy={}, batch={}, concurrency={})",
            source_root,
            dest_root,
            self.options.conflict_policy,
            self.options.batch_size,
            self.options.max_concurrency
        );

        let outcome = self
            .run(source_root, dest_root, &deadline, &mut result)
            .await;

        let duration_ms = deadline.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            Ok(()) if result.errors.is_empty() => (ReplicationStatus::Completed, None),
            Ok(()) => (ReplicationStatus::CompletedWithErrors, None),
            Err(e) if e.is_timeout() => (ReplicationStatus::TimedOut, Some(e.to_string())),
            Err(e) => (ReplicationStatus::Failed, Some(e.to_string())),
        };
        let summary = summarize(status, &result, error.as_deref());

        info!("{}", summary);

        ReplicationReport {
            success: status == ReplicationStatus::Completed,
            timed_out: status == ReplicationStatus::TimedOut,
            status,
            summary,
            error,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            result,
        }
    }

    async fn run(
        &self,
        source_root: &str,
        dest_root: &str,
        deadline: &Deadline,
        result: &mut ExecutionResult,
    ) -> SyncResult<()> {
        self.check_roots(source_root, dest_root).await?;

        let mut pairs = Vec::new();
        if self.options.recursive {
            deadline.check("创建文件夹前")?;
            pairs = if self.options.preserve_structure {
                let mut cache = FolderCache::new();
                self.replicate_folders(source_root, dest_root, &mut cache, result)
                    .await
            } else {
                self.discover_folders(source_root, dest_root, result).await
            };
            deadline.check("文件夹创建完成")?;
            info!(
                "文件夹阶段完成: {} 个文件夹, 新建 {}",
                pairs.len(),
                result.folders_created
            );
        }

        deadline.check("复制根目录文件前")?;
        self.replicate_files(source_root, dest_root, "", result)
            .await;

        for pair in &pairs {
            deadline.check(&format!("复制 {} 前", pair.path))?;
            self.replicate_files(&pair.source_id, &pair.dest_id, &pair.path, result)
                .await;
        }

        Ok(())
    }

    /// 校验根目录参数并确认两边都是可访问的文件夹
    async fn check_roots(&self, source_root: &str, dest_root: &str) -> SyncResult<()> {
        if source_root.trim().is_empty() || dest_root.trim().is_empty() {
            return Err(SyncError::Configuration(
                "必须同时指定源文件夹和目标文件夹".to_string(),
            ));
        }
        if source_root == dest_root {
            return Err(SyncError::Configuration(
                "源文件夹和目标文件夹不能相同".to_string(),
            ));
        }

        for id in [source_root, dest_root] {
            let entry = self.store.get_entry(id).await.map_err(|e| match e {
                StoreError::NotFound { id: missing } => SyncError::NotFound(missing),
                other => SyncError::remote("读取", id, other),
            })?;
            if !entry.is_folder {
                return Err(SyncError::Configuration(format!(
                    "{} ({}) 不是文件夹",
                    entry.name, id
                )));
            }
        }
        Ok(())
    }

    /// 第一阶段：在目标中重建文件夹结构
    ///
    /// 先查缓存，再复用目标父文件夹下的同名文件夹，最后才创建
    async fn replicate_folders(
        &self,
        source_root: &str,
        dest_root: &str,
        cache: &mut FolderCache,
        result: &mut ExecutionResult,
    ) -> Vec<FolderRecord> {
        let mut records = Vec::new();
        let mut stack = vec![(
            source_root.to_string(),
            dest_root.to_string(),
            String::new(),
        )];

        while let Some((source_id, dest_id, parent_path)) = stack.pop() {
            let subfolders = match list_all(self.store, &source_id, &ListQuery::folders()).await {
                Ok(folders) => folders,
                Err(e) => {
                    result.record_error(
                        display_path(&parent_path),
                        &parent_path,
                        SyncError::enumeration(&source_id, e),
                    );
                    continue;
                }
            };
            let subfolders: Vec<Entry> = subfolders
                .into_iter()
                .filter(|f| f.id != dest_root)
                .collect();
            if subfolders.is_empty() {
                continue;
            }

            // 一次查询目标父文件夹下的同名文件夹
            let names: HashSet<&str> = subfolders.iter().map(|f| f.name.as_str()).collect();
            match list_all(self.store, &dest_id, &ListQuery::folders().named(names)).await {
                Ok(existing) => {
                    for folder in existing {
                        cache.remember_existing(&dest_id, &folder.name, &folder.id);
                    }
                }
                Err(e) => {
                    result.record_error(
                        display_path(&parent_path),
                        &parent_path,
                        SyncError::enumeration(&dest_id, e),
                    );
                    continue;
                }
            }

            let mut children = Vec::new();
            for folder in subfolders {
                let path = join_path(&parent_path, &folder.name);

                if let Some(mapped) = cache.get(&folder.id) {
                    debug!("文件夹已处理，跳过: {} -> {}", path, mapped);
                    continue;
                }

                let (mapped_id, created) = match cache.lookup_name(&dest_id, &folder.name) {
                    Some(existing) => (existing.to_string(), false),
                    None => match self.store.create_folder(&folder.name, &dest_id).await {
                        Ok(entry) => {
                            debug!("创建文件夹: {}", path);
                            result.folders_created += 1;
                            (entry.id, true)
                        }
                        Err(e) => {
                            result.record_error(
                                &folder.name,
                                &path,
                                SyncError::remote("创建文件夹", &path, e),
                            );
                            continue;
                        }
                    },
                };
                cache.insert(&folder.id, &dest_id, &folder.name, &mapped_id);

                let record = FolderRecord {
                    source_id: folder.id.clone(),
                    dest_id: mapped_id.clone(),
                    name: folder.name.clone(),
                    path: path.clone(),
                    created,
                };
                result.folders.push(record.clone());
                records.push(record);
                children.push((folder.id, mapped_id, path));
            }

            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }

        records
    }

    /// 不保留结构时，只发现源文件夹，全部映射到目标根目录
    async fn discover_folders(
        &self,
        source_root: &str,
        dest_root: &str,
        result: &mut ExecutionResult,
    ) -> Vec<FolderRecord> {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(source_root.to_string(), String::new())];

        while let Some((source_id, parent_path)) = stack.pop() {
            let subfolders = match list_all(self.store, &source_id, &ListQuery::folders()).await {
                Ok(folders) => folders,
                Err(e) => {
                    result.record_error(
                        display_path(&parent_path),
                        &parent_path,
                        SyncError::enumeration(&source_id, e),
                    );
                    continue;
                }
            };

            for folder in subfolders.into_iter().rev() {
                if folder.id == dest_root || !visited.insert(folder.id.clone()) {
                    continue;
                }
                let path = join_path(&parent_path, &folder.name);
                records.push(FolderRecord {
                    source_id: folder.id.clone(),
                    dest_id: dest_root.to_string(),
                    name: folder.name,
                    path: path.clone(),
                    created: false,
                });
                stack.push((folder.id, path));
            }
        }

        records
    }

    /// 第二阶段：复制一个文件夹的直接文件
    async fn replicate_files(
        &self,
        source_folder: &str,
        dest_folder: &str,
        folder_path: &str,
        result: &mut ExecutionResult,
    ) {
        let listing = list_all_with_skipped(self.store, source_folder, &ListQuery::files()).await;
        let files = match listing {
            Ok(listing) => {
                // 指定了文件 ID 时，只关心被选中的文件
                let skipped = match self.options.file_ids {
                    Some(_) => Vec::new(),
                    None => listing.skipped,
                };
                for name in skipped {
                    let path = join_path(folder_path, &name);
                    let err = StoreError::rejected("list", format!("无法读取子项: {}", name));
                    result.record_error(&name, &path, SyncError::enumeration(source_folder, err));
                }
                listing.entries
            }
            Err(e) => {
                result.record_error(
                    display_path(folder_path),
                    folder_path,
                    SyncError::enumeration(source_folder, e),
                );
                return;
            }
        };

        let files: Vec<Entry> = match &self.options.file_ids {
            Some(allowed) => files.into_iter().filter(|f| allowed.contains(&f.id)).collect(),
            None => files,
        };
        if files.is_empty() {
            return;
        }

        // 一次批量查询目标中已存在的同名文件
        let names: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        let existing = match list_all(self.store, dest_folder, &ListQuery::files().named(names)).await {
            Ok(entries) => {
                let mut map = HashMap::new();
                for entry in entries {
                    map.entry(entry.name).or_insert(entry.id);
                }
                map
            }
            Err(e) => {
                result.record_error(
                    display_path(folder_path),
                    folder_path,
                    SyncError::enumeration(dest_folder, e),
                );
                return;
            }
        };

        info!(
            "复制 {}: {} 个文件, 目标已有 {} 个同名",
            display_path(folder_path),
            files.len(),
            existing.len()
        );

        let mut resolver = ConflictResolver::new(self.options.conflict_policy, existing);
        let semaphore = Semaphore::new(self.options.max_concurrency);
        let total_chunks = files.len().div_ceil(self.options.batch_size);

        for (index, chunk) in files.chunks(self.options.batch_size).enumerate() {
            if index > 0 && !self.options.inter_batch_pause.is_zero() {
                tokio::time::sleep(self.options.inter_batch_pause).await;
            }

            let now = Utc::now();
            let mut tasks = Vec::new();
            for file in chunk {
                let path = join_path(folder_path, &file.name);
                match resolver.resolve(&file.name, now) {
                    Resolution::Skip => {
                        debug!("目标已存在，跳过: {}", path);
                        result.files_skipped += 1;
                        result.skipped_files.push(path);
                    }
                    Resolution::Copy { name } => {
                        tasks.push(self.copy_file(&semaphore, file, name, None, dest_folder, path));
                    }
                    Resolution::Replace { existing_id, name } => {
                        tasks.push(self.copy_file(
                            &semaphore,
                            file,
                            name,
                            Some(existing_id),
                            dest_folder,
                            path,
                        ));
                    }
                }
            }

            // 本批全部结束后才进入下一批
            for outcome in join_all(tasks).await {
                match outcome {
                    Ok(copied) => {
                        resolver.record(&copied.dest_name, &copied.dest_id);
                        result.files_copied += 1;
                        result.copied_files.push(copied);
                    }
                    Err(e) => {
                        warn!("复制失败: {} - {}", e.path, e.message);
                        result.errors.push(e);
                    }
                }
            }

            debug!(
                "{}: 第 {}/{} 批完成, 累计复制 {}",
                display_path(folder_path),
                index + 1,
                total_chunks,
                result.files_copied
            );
        }
    }

    /// 复制单个文件，失败只影响这一项
    async fn copy_file(
        &self,
        semaphore: &Semaphore,
        file: &Entry,
        dest_name: String,
        replace: Option<String>,
        dest_folder: &str,
        path: String,
    ) -> Result<CopiedFile, ItemError> {
        let _permit = semaphore.acquire().await.map_err(|e| ItemError {
            item: file.name.clone(),
            path: path.clone(),
            kind: "remote".to_string(),
            message: e.to_string(),
        })?;

        if let Some(existing_id) = &replace {
            self.store
                .delete_entry(existing_id)
                .await
                .map_err(|e| ItemError::new(&file.name, &path, &SyncError::remote("删除", &path, e)))?;
        }

        let copied = self
            .store
            .copy_entry(&file.id, &dest_name, dest_folder)
            .await
            .map_err(|e| ItemError::new(&file.name, &path, &SyncError::remote("复制", &path, e)))?;

        if dest_name != file.name {
            debug!("已复制: {} -> {}", path, dest_name);
        }

        Ok(CopiedFile {
            source_id: file.id.clone(),
            dest_id: copied.id,
            name: file.name.clone(),
            dest_name,
            path,
            replaced: replace.is_some(),
        })
    }
}

fn summarize(status: ReplicationStatus, result: &ExecutionResult, error: Option<&str>) -> String {
    let stats = format!(
        "复制 {} 个文件, 新建 {} 个文件夹, 跳过 {} 个, 失败 {} 个",
        result.files_copied,
        result.folders_created,
        result.files_skipped,
        result.errors.len()
    );
    match status {
        ReplicationStatus::Completed => format!("复制完成: {}", stats),
        ReplicationStatus::CompletedWithErrors => format!("复制完成（部分失败）: {}", stats),
        ReplicationStatus::TimedOut => format!("复制超时，已保留部分结果: {}", stats),
        ReplicationStatus::Failed => {
            format!("复制失败: {} ({})", error.unwrap_or("未知错误"), stats)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_options_clamped() {
        let options = ReplicationOptions {
            batch_size: 0,
            max_concurrency: 500,
            ..Default::default()
        }
        .normalized();
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.max_concurrency, MAX_CONCURRENCY);

        let options = ReplicationOptions {
            batch_size: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(options.batch_size, MAX_BATCH_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_check() {
        let deadline = Deadline::start(Duration::from_secs(5));
        assert!(deadline.check("start").is_ok());
        tokio::time::advance(Duration::from_secs(6)).await;
        let err = deadline.check("later").unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_options_from_config() {
        let config = ReplicationConfig {
            deadline_secs: 7,
            inter_batch_pause_ms: 0,
            preserve_structure: false,
            ..Default::default()
        };
        let options = ReplicationOptions::from_config(&config);
        assert_eq!(options.deadline, Duration::from_secs(7));
        assert!(options.inter_batch_pause.is_zero());
        assert!(!options.preserve_structure);
        assert_eq!(options.batch_size, 10);
        assert!(options.file_ids.is_none());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
        assert_eq!(display_path(""), "<根目录>");
    }

    #[tokio::test]
    async fn test_configuration_errors_reported() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let executor = ReplicationExecutor::new(&store, ReplicationOptions::default());

        let report = executor.replicate(&root, &root).await;
        assert_eq!(report.status, ReplicationStatus::Failed);
        assert!(!report.success);
        assert!(report.error.unwrap().contains("不能相同"));

        let report = executor.replicate("", &root).await;
        assert_eq!(report.status, ReplicationStatus::Failed);

        let report = executor.replicate(&root, "missing").await;
        assert_eq!(report.status, ReplicationStatus::Failed);
        assert!(report.error.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_file_root_rejected() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let file = store.add_file(&root, "a.txt", 1, Utc::now(), None);
        let dest = store.create_root("dest");

        let report = ReplicationExecutor::new(&store, ReplicationOptions::default())
            .replicate(&file, &dest)
            .await;
        assert_eq!(report.status, ReplicationStatus::Failed);
        assert_eq!(store.stats().copy_calls, 0);
    }
}
