//! 内存存储后端
//!
//! 进程内的远程树实现，支持分页、模拟延迟和故障注入，
//! 用于测试以及 `--memory` 参数检查

use super::{Entry, ListPage, ListQuery, RemoteStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Node {
    entry: Entry,
    parent: Option<String>,
    /// 额外的父文件夹，模拟一个条目同时挂在多个父节点下
    linked_parents: Vec<String>,
    trashed: bool,
}

impl Node {
    fn is_child_of(&self, folder_id: &str) -> bool {
        self.parent.as_deref() == Some(folder_id)
            || self.linked_parents.iter().any(|p| p == folder_id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    /// 插入顺序，保证列表结果稳定
    order: Vec<String>,
    fail_copy_names: HashSet<String>,
    fail_list_folders: HashSet<String>,
    fail_create_names: HashSet<String>,
    fail_delete_ids: HashSet<String>,
}

/// 调用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub list_calls: usize,
    pub create_calls: usize,
    pub copy_calls: usize,
    pub delete_calls: usize,
    /// 观测到的最大同时进行中的复制数
    pub max_concurrent_copies: usize,
}

pub struct MemoryStore {
    name: String,
    page_size: usize,
    latency: Duration,
    inner: Mutex<Inner>,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    copies_in_flight: AtomicUsize,
    max_concurrent_copies: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("memory:{}", name),
            page_size: super::DEFAULT_PAGE_SIZE,
            latency: Duration::ZERO,
            inner: Mutex::new(Inner::default()),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            copies_in_flight: AtomicUsize::new(0),
            max_concurrent_copies: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 每次远程调用前的模拟延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // 锁只在同步代码段内持有，中毒时继续使用内部数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, parent: Option<&str>, entry: Entry) -> String {
        let id = entry.id.clone();
        let mut inner = self.lock();
        inner.order.push(id.clone());
        inner.nodes.insert(
            id.clone(),
            Node {
                entry,
                parent: parent.map(str::to_string),
                linked_parents: Vec::new(),
                trashed: false,
            },
        );
        id
    }

    fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// 创建一个没有父节点的根文件夹
    pub fn create_root(&self, name: &str) -> String {
        self.insert(None, folder_entry(Self::new_id(), name, Utc::now()))
    }

    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        self.insert(
            Some(parent_id),
            folder_entry(Self::new_id(), name, Utc::now()),
        )
    }

    pub fn add_file(
        &self,
        parent_id: &str,
        name: &str,
        size: u64,
        modified_time: DateTime<Utc>,
        content_hash: Option<&str>,
    ) -> String {
        let entry = Entry {
            id: Self::new_id(),
            name: name.to_string(),
            path: name.to_string(),
            is_folder: false,
            size,
            modified_time,
            content_hash: content_hash.map(str::to_string),
        };
        self.insert(Some(parent_id), entry)
    }

    /// 移入回收站（默认查询不再返回）
    pub fn trash(&self, id: &str) {
        if let Some(node) = self.lock().nodes.get_mut(id) {
            node.trashed = true;
        }
    }

    /// 源文件名为 `name` 的复制请求将失败
    pub fn fail_copy_of(&self, name: &str) {
        self.lock().fail_copy_names.insert(name.to_string());
    }

    /// 列出该文件夹的请求将失败
    pub fn fail_listing_of(&self, folder_id: &str) {
        self.lock().fail_list_folders.insert(folder_id.to_string());
    }

    /// 创建该名称文件夹的请求将失败
    pub fn fail_create_of(&self, name: &str) {
        self.lock().fail_create_names.insert(name.to_string());
    }

    /// 删除该 ID 条目的请求将失败
    pub fn fail_delete_of(&self, id: &str) {
        self.lock().fail_delete_ids.insert(id.to_string());
    }

    /// 把已有条目再挂到另一个父文件夹下
    pub fn link(&self, id: &str, extra_parent_id: &str) {
        if let Some(node) = self.lock().nodes.get_mut(id) {
            node.linked_parents.push(extra_parent_id.to_string());
        }
    }

    /// 文件夹下未删除子项的名称（按插入顺序）
    pub fn child_names(&self, folder_id: &str) -> Vec<String> {
        self.children_of(folder_id)
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    pub fn find_child(&self, folder_id: &str, name: &str) -> Option<Entry> {
        self.children_of(folder_id)
            .into_iter()
            .find(|e| e.name == name)
    }

    fn children_of(&self, folder_id: &str) -> Vec<Entry> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id))
            .filter(|n| !n.trashed && n.is_child_of(folder_id))
            .map(|n| n.entry.clone())
            .collect()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            list_calls: self.list_calls.load(Ordering::SeqCst),
            create_calls: self.create_calls.load(Ordering::SeqCst),
            copy_calls: self.copy_calls.load(Ordering::SeqCst),
            delete_calls: self.delete_calls.load(Ordering::SeqCst),
            max_concurrent_copies: self.max_concurrent_copies.load(Ordering::SeqCst),
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn folder(&self, inner: &Inner, id: &str) -> StoreResult<()> {
        match inner.nodes.get(id) {
            Some(node) if node.entry.is_folder && !node.trashed => Ok(()),
            Some(_) => Err(StoreError::rejected("list", format!("{} 不是文件夹", id))),
            None => Err(StoreError::not_found(id)),
        }
    }
}

fn folder_entry(id: String, name: &str, modified_time: DateTime<Utc>) -> Entry {
    Entry {
        id,
        name: name.to_string(),
        path: name.to_string(),
        is_folder: true,
        size: 0,
        modified_time,
        content_hash: None,
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        query: &ListQuery,
    ) -> StoreResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let inner = self.lock();
        if inner.fail_list_folders.contains(folder_id) {
            return Err(StoreError::rejected("list", format!("无法列出 {}", folder_id)));
        }
        self.folder(&inner, folder_id)?;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::rejected("list", format!("无效分页令牌: {}", token)))?,
            None => 0,
        };

        let matching: Vec<Entry> = inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id))
            .filter(|n| n.is_child_of(folder_id))
            .filter(|n| query.matches(&n.entry, n.trashed))
            .map(|n| n.entry.clone())
            .collect();

        let end = offset.saturating_add(self.page_size).min(matching.len());
        let entries = matching.get(offset..end).map(<[Entry]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            entries,
            next_page_token,
            skipped: Vec::new(),
        })
    }

    async fn get_entry(&self, entry_id: &str) -> StoreResult<Entry> {
        self.simulate_latency().await;
        self.lock()
            .nodes
            .get(entry_id)
            .filter(|n| !n.trashed)
            .map(|n| n.entry.clone())
            .ok_or_else(|| StoreError::not_found(entry_id))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> StoreResult<Entry> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        {
            let inner = self.lock();
            if inner.fail_create_names.contains(name) {
                return Err(StoreError::rejected("create", format!("权限不足: {}", name)));
            }
            self.folder(&inner, parent_id)?;
        }

        let entry = folder_entry(Self::new_id(), name, Utc::now());
        self.insert(Some(parent_id), entry.clone());
        Ok(entry)
    }

    async fn copy_entry(
        &self,
        source_id: &str,
        new_name: &str,
        dest_parent_id: &str,
    ) -> StoreResult<Entry> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.copies_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_copies.fetch_max(in_flight, Ordering::SeqCst);

        self.simulate_latency().await;
        let result = self.copy_now(source_id, new_name, dest_parent_id);

        self.copies_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_entry(&self, entry_id: &str) -> StoreResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut inner = self.lock();
        if inner.fail_delete_ids.contains(entry_id) {
            return Err(StoreError::rejected("delete", format!("后端拒绝删除 {}", entry_id)));
        }
        if inner.nodes.remove(entry_id).is_none() {
            return Err(StoreError::not_found(entry_id));
        }
        inner.order.retain(|id| id != entry_id);

        // 连同后代一起删除
        let mut orphans = vec![entry_id.to_string()];
        while let Some(parent) = orphans.pop() {
            let children: Vec<String> = inner
                .nodes
                .iter()
                .filter(|(_, n)| n.parent.as_deref() == Some(parent.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            for child in children {
                inner.nodes.remove(&child);
                inner.order.retain(|id| id != &child);
                orphans.push(child);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MemoryStore {
    fn copy_now(&self, source_id: &str, new_name: &str, dest_parent_id: &str) -> StoreResult<Entry> {
        let source = {
            let inner = self.lock();
            let node = inner
                .nodes
                .get(source_id)
                .filter(|n| !n.trashed)
                .ok_or_else(|| StoreError::not_found(source_id))?;
            if node.entry.is_folder {
                return Err(StoreError::rejected("copy", "不支持复制文件夹"));
            }
            if inner.fail_copy_names.contains(&node.entry.name) {
                return Err(StoreError::rejected(
                    "copy",
                    format!("后端拒绝复制 {}", node.entry.name),
                ));
            }
            self.folder(&inner, dest_parent_id)?;
            node.entry.clone()
        };

        let entry = Entry {
            id: Self::new_id(),
            name: new_name.to_string(),
            path: new_name.to_string(),
            ..source
        };
        self.insert(Some(dest_parent_id), entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_and_delete() {
        let store = MemoryStore::new("t");
        let src = store.create_root("src");
        let dst = store.create_root("dst");
        let file = store.add_file(&src, "a.txt", 3, Utc::now(), Some("h1"));

        let copied = store.copy_entry(&file, "b.txt", &dst).await.unwrap();
        assert_eq!(copied.name, "b.txt");
        assert_eq!(copied.content_hash.as_deref(), Some("h1"));
        assert_eq!(store.child_names(&dst), vec!["b.txt"]);

        store.delete_entry(&copied.id).await.unwrap();
        assert!(store.child_names(&dst).is_empty());
        assert!(matches!(
            store.delete_entry(&copied.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_trashed_entries_hidden_by_default() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let kept = store.add_file(&root, "keep", 1, Utc::now(), None);
        let gone = store.add_file(&root, "gone", 1, Utc::now(), None);
        store.trash(&gone);

        let page = store
            .list_children(&root, None, &ListQuery::all())
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id, kept);

        let query = ListQuery {
            include_trashed: true,
            ..Default::default()
        };
        let page = store.list_children(&root, None, &query).await.unwrap();
        assert_eq!(page.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let file = store.add_file(&root, "bad.bin", 1, Utc::now(), None);
        store.fail_copy_of("bad.bin");
        store.fail_listing_of(&root);

        store.fail_delete_of(&file);

        assert!(store.copy_entry(&file, "x", &root).await.is_err());
        assert!(store.delete_entry(&file).await.is_err());
        assert!(store.get_entry(&file).await.is_ok());
        assert!(store.list_children(&root, None, &ListQuery::all()).await.is_err());
        assert!(matches!(
            store.get_entry("missing").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_page_token_past_end() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        store.add_file(&root, "a", 1, Utc::now(), None);

        let token = usize::MAX.to_string();
        let page = store
            .list_children(&root, Some(&token), &ListQuery::all())
            .await
            .unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_linked_entry_listed_under_both_parents() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let a = store.add_folder(&root, "a");
        let b = store.add_folder(&root, "b");
        let shared = store.add_folder(&a, "shared");
        store.link(&shared, &b);

        assert_eq!(store.child_names(&a), vec!["shared"]);
        assert_eq!(store.child_names(&b), vec!["shared"]);
    }
}
