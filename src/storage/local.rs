use super::{Entry, KindFilter, ListPage, ListQuery, RemoteStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// 根目录 ID
pub const ROOT_ID: &str = "/";

/// 计算哈希时的读取块大小
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// 把本地目录当作远程存储
///
/// 条目 ID 是以 `/` 开头的相对路径，分页令牌是排序后列表的偏移量
pub struct LocalStore {
    base_path: PathBuf,
    name: String,
    page_size: usize,
}

impl LocalStore {
    pub fn new(path: &str) -> StoreResult<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", path);
        Ok(Self {
            base_path,
            name,
            page_size: super::DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn resolve_path(&self, id: &str) -> StoreResult<PathBuf> {
        let relative = id.trim_start_matches('/');
        if relative.split('/').any(|seg| seg == "..") {
            return Err(StoreError::rejected("resolve", format!("非法路径: {}", id)));
        }
        if relative.is_empty() {
            Ok(self.base_path.clone())
        } else {
            Ok(self.base_path.join(relative))
        }
    }

    /// 子项 ID
    fn child_id(parent_id: &str, name: &str) -> String {
        if parent_id == ROOT_ID || parent_id.is_empty() {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent_id.trim_end_matches('/'), name)
        }
    }

    fn check_name(op: &str, name: &str) -> StoreResult<()> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(StoreError::rejected(op, format!("非法名称: {:?}", name)));
        }
        Ok(())
    }

    /// 由元数据构造条目，不读取文件内容
    fn entry_from_metadata(id: String, name: String, metadata: &Metadata) -> StoreResult<Entry> {
        let modified_time: DateTime<Utc> = metadata.modified()?.into();
        let is_folder = metadata.is_dir();
        Ok(Entry {
            id,
            path: name.clone(),
            name,
            is_folder,
            size: if is_folder { 0 } else { metadata.len() },
            modified_time,
            content_hash: None,
        })
    }

    async fn load_entry(id: String, path: &Path) -> StoreResult<Entry> {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(&id))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() && !metadata.is_file() {
            return Err(StoreError::rejected("read", format!("{} 不是普通文件", id)));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let mut entry = Self::entry_from_metadata(id, name, &metadata)?;
        if !entry.is_folder {
            entry.content_hash = Some(hash_file(path).await?);
        }
        Ok(entry)
    }
}

/// 流式计算文件的 BLAKE3 哈希，不把整个文件读入内存
async fn hash_file(path: &Path) -> StoreResult<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        query: &ListQuery,
    ) -> StoreResult<ListPage> {
        let dir = self.resolve_path(folder_id)?;
        if !dir.is_dir() {
            return Err(StoreError::not_found(folder_id));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::rejected("list", format!("无效分页令牌: {}", token)))?,
            None => 0,
        };

        let mut skipped = Vec::new();
        let mut names = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            match item.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    let lossy_name = raw.to_string_lossy().into_owned();
                    warn!("{} 中的名称不是合法 UTF-8，已跳过: {}", folder_id, lossy_name);
                    skipped.push(lossy_name);
                }
            }
        }
        names.sort();

        // 只按元数据过滤，不读取内容
        let mut matching = Vec::new();
        for name in names {
            if query.names.as_ref().is_some_and(|wanted| !wanted.contains(&name)) {
                continue;
            }
            let path = dir.join(&name);
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("无法读取 {}/{}，已跳过: {}", folder_id, name, e);
                    skipped.push(name);
                    continue;
                }
            };
            if !metadata.is_dir() && !metadata.is_file() {
                warn!("{}/{} 不是普通文件，已跳过", folder_id, name);
                skipped.push(name);
                continue;
            }
            let entry = Self::entry_from_metadata(Self::child_id(folder_id, &name), name, &metadata)?;
            if query.matches(&entry, false) {
                matching.push((entry, path));
            }
        }

        let end = offset.saturating_add(self.page_size).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        let mut entries = Vec::new();
        if offset < end {
            for (mut entry, path) in matching.drain(offset..end) {
                if !entry.is_folder {
                    match hash_file(&path).await {
                        Ok(hash) => entry.content_hash = Some(hash),
                        Err(e) => warn!("无法计算 {} 的哈希: {}", entry.id, e),
                    }
                }
                entries.push(entry);
            }
        }

        // 跳过的子项只在完整列表的首页报告一次
        let report_skipped =
            offset == 0 && query.names.is_none() && query.kind != KindFilter::FoldersOnly;
        if !report_skipped {
            skipped.clear();
        }

        Ok(ListPage {
            entries,
            next_page_token,
            skipped,
        })
    }

    async fn get_entry(&self, entry_id: &str) -> StoreResult<Entry> {
        let path = self.resolve_path(entry_id)?;
        Self::load_entry(entry_id.to_string(), &path).await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<Entry> {
        Self::check_name("create", name)?;
        let id = Self::child_id(parent_id, name);
        let path = self.resolve_path(&id)?;

        if !self.resolve_path(parent_id)?.is_dir() {
            return Err(StoreError::not_found(parent_id));
        }
        if path.exists() {
            return Err(StoreError::rejected("create", format!("{} 已存在", id)));
        }

        fs::create_dir(&path).await?;
        Self::load_entry(id, &path).await
    }

    async fn copy_entry(
        &self,
        source_id: &str,
        new_name: &str,
        dest_parent_id: &str,
    ) -> StoreResult<Entry> {
        Self::check_name("copy", new_name)?;
        let from = self.resolve_path(source_id)?;
        if !from.exists() {
            return Err(StoreError::not_found(source_id));
        }
        if from.is_dir() {
            return Err(StoreError::rejected("copy", "不支持复制文件夹"));
        }
        if !self.resolve_path(dest_parent_id)?.is_dir() {
            return Err(StoreError::not_found(dest_parent_id));
        }

        let id = Self::child_id(dest_parent_id, new_name);
        let to = self.resolve_path(&id)?;
        fs::copy(&from, &to).await?;
        Self::load_entry(id, &to).await
    }

    async fn delete_entry(&self, entry_id: &str) -> StoreResult<()> {
        let path = self.resolve_path(entry_id)?;
        if path == self.base_path {
            return Err(StoreError::rejected("delete", "不能删除存储根目录"));
        }

        match fs::metadata(&path).await {
            Ok(m) if m.is_dir() => fs::remove_dir_all(&path).await?,
            Ok(_) => fs::remove_file(&path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(entry_id))
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
