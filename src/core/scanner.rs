use crate::error::{SyncError, SyncResult};
use crate::storage::{Entry, ListQuery, RemoteStore};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

/// 枚举配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob patterns，匹配相对路径）
    pub exclude_patterns: Vec<String>,
    /// 是否包含回收站中的条目
    pub include_trashed: bool,
}

/// 远程树枚举器
///
/// 按文件夹分页列出子项，计算相对路径，输出时所有文件夹排在所有文件之前
pub struct TreeEnumerator<'a> {
    store: &'a dyn RemoteStore,
    config: ScanConfig,
    excludes: Vec<Regex>,
}

impl<'a> TreeEnumerator<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self::with_config(store, ScanConfig::default())
    }

    pub fn with_config(store: &'a dyn RemoteStore, config: ScanConfig) -> Self {
        let excludes = config
            .exclude_patterns
            .iter()
            .filter_map(|p| compile_pattern(p))
            .collect();
        Self {
            store,
            config,
            excludes,
        }
    }

    /// 检查路径是否应该被排除
    fn should_exclude(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.excludes.iter().any(|re| re.is_match(&path))
    }

    /// 枚举 `root_folder_id` 下的条目
    ///
    /// 每次调用都重新请求后端。任何一次分页请求失败都会中止并返回
    /// 带失败文件夹 ID 的 `SyncError::Enumeration`
    pub async fn enumerate(&self, root_folder_id: &str, recursive: bool) -> SyncResult<Vec<Entry>> {
        info!(
            "开始枚举: {} 文件夹 {} (recursive={})",
            self.store.name(),
            root_folder_id,
            recursive
        );

        let mut folders = Vec::new();
        let mut files = Vec::new();
        let mut seen_paths = HashSet::new();
        let query = ListQuery {
            include_trashed: self.config.include_trashed,
            ..ListQuery::all()
        };

        // 先序遍历：出栈时输出文件夹，再展开它的子项
        let mut stack: Vec<(String, String, Option<Entry>)> =
            vec![(root_folder_id.to_string(), String::new(), None)];

        while let Some((folder_id, folder_path, folder)) = stack.pop() {
            if let Some(folder) = folder {
                debug!("进入文件夹: {}", folder_path);
                folders.push(folder);
                if !recursive {
                    continue;
                }
            }

            let children = crate::storage::list_all(self.store, &folder_id, &query)
                .await
                .map_err(|e| SyncError::enumeration(&folder_id, e))?;

            let mut subfolders = Vec::new();
            for mut child in children {
                let path = unique_path(&mut seen_paths, &folder_path, &child);
                if self.should_exclude(&path) {
                    debug!("排除: {}", path);
                    continue;
                }
                child.path = path;

                if child.is_folder {
                    subfolders.push(child);
                } else {
                    files.push(child);
                }
            }

            // 逆序入栈，使兄弟文件夹按列表顺序出栈
            for folder in subfolders.into_iter().rev() {
                stack.push((folder.id.clone(), folder.path.clone(), Some(folder)));
            }
        }

        info!("枚举完成: {} 个文件夹, {} 个文件", folders.len(), files.len());

        let mut entries = folders;
        entries.extend(files);
        Ok(entries)
    }
}

/// 拼接路径；同一次枚举中路径重复时，给后出现的条目加 `~id` 后缀
fn unique_path(seen: &mut HashSet<String>, parent: &str, entry: &Entry) -> String {
    let join = |name: &str| {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent, name)
        }
    };

    let path = join(&entry.name);
    if seen.insert(path.clone()) {
        return path;
    }

    let disambiguated = join(&format!("{}~{}", entry.name, entry.id));
    debug!("路径冲突: {} -> {}", path, disambiguated);
    seen.insert(disambiguated.clone());
    disambiguated
}

/// glob 模式转换为正则：`**` 匹配任意层级，`*` 不跨越 `/`
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let pattern = pattern.to_lowercase();
    let mut regex = String::from("^(?:.*/)?");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_folders_before_files() {
        let store = MemoryStore::new("t").with_page_size(1);
        let root = store.create_root("root");
        store.add_file(&root, "top.txt", 1, Utc::now(), None);
        let a = store.add_folder(&root, "a");
        store.add_file(&a, "inner.txt", 1, Utc::now(), None);
        let a1 = store.add_folder(&a, "a1");
        store.add_file(&a1, "deep.txt", 1, Utc::now(), None);
        store.add_folder(&root, "b");

        let entries = TreeEnumerator::new(&store).enumerate(&root, true).await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(&paths[..3], &["a", "a/a1", "b"]);
        let mut files = paths[3..].to_vec();
        files.sort();
        assert_eq!(files, vec!["a/a1/deep.txt", "a/inner.txt", "top.txt"]);
        assert!(entries[..3].iter().all(|e| e.is_folder));
    }

    #[tokio::test]
    async fn test_non_recursive_lists_direct_children() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let sub = store.add_folder(&root, "sub");
        store.add_file(&sub, "hidden.txt", 1, Utc::now(), None);
        store.add_file(&root, "f.txt", 1, Utc::now(), None);

        let entries = TreeEnumerator::new(&store).enumerate(&root, false).await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["sub", "f.txt"]);
    }

    #[tokio::test]
    async fn test_empty_and_folder_only_trees() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let scanner = TreeEnumerator::new(&store);
        assert!(scanner.enumerate(&root, true).await.unwrap().is_empty());

        let x = store.add_folder(&root, "x");
        store.add_folder(&x, "y");
        let entries = scanner.enumerate(&root, true).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_folder));
    }

    #[tokio::test]
    async fn test_duplicate_sibling_names_disambiguated() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let first = store.add_folder(&root, "X");
        let second = store.add_folder(&root, "X");
        store.add_file(&second, "f", 1, Utc::now(), None);

        let entries = TreeEnumerator::new(&store).enumerate(&root, true).await.unwrap();
        let paths: HashSet<_> = entries.iter().map(|e| e.path.clone()).collect();

        assert_eq!(paths.len(), entries.len());
        assert!(paths.contains("X"));
        assert!(paths.contains(&format!("X~{}", second)));
        assert!(paths.contains(&format!("X~{}/f", second)));
        assert_eq!(entries.iter().find(|e| e.path == "X").unwrap().id, first);
    }

    #[tokio::test]
    async fn test_listing_failure_reports_folder() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let broken = store.add_folder(&root, "broken");
        store.fail_listing_of(&broken);

        let err = TreeEnumerator::new(&store)
            .enumerate(&root, true)
            .await
            .unwrap_err();
        match err {
            SyncError::Enumeration { folder_id, .. } => assert_eq!(folder_id, broken),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exclude_patterns_prune_subtree() {
        let store = MemoryStore::new("t");
        let root = store.create_root("root");
        let git = store.add_folder(&root, ".git");
        store.add_file(&git, "HEAD", 1, Utc::now(), None);
        store.add_file(&root, "notes.tmp", 1, Utc::now(), None);
        store.add_file(&root, "keep.md", 1, Utc::now(), None);

        let config = ScanConfig {
            exclude_patterns: vec![".git".to_string(), "*.tmp".to_string()],
            ..Default::default()
        };
        let entries = TreeEnumerator::with_config(&store, config)
            .enumerate(&root, true)
            .await
            .unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["keep.md"]);
    }

    #[test]
    fn test_compile_pattern() {
        let re = compile_pattern("node_modules/**").unwrap();
        assert!(re.is_match("node_modules/a/b.js"));
        assert!(re.is_match("web/node_modules/x"));
        let re = compile_pattern("*.tmp").unwrap();
        assert!(re.is_match("a/b/c.tmp"));
        assert!(!re.is_match("c.tmpx"));
    }
}
