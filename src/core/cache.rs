//! 文件夹映射缓存
//!
//! 源文件夹 ID -> 目标文件夹 ID，单次运行内有效，避免重复创建文件夹

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct FolderCache {
    by_source: HashMap<String, String>,
    /// (目标父 ID, 名称) -> 目标 ID，覆盖目标中已存在但未对应源的文件夹
    by_dest_name: HashMap<(String, String), String>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已映射的目标文件夹
    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.by_source.get(source_id).map(String::as_str)
    }

    /// 目标父文件夹下指定名称的文件夹
    pub fn lookup_name(&self, dest_parent_id: &str, name: &str) -> Option<&str> {
        self.by_dest_name
            .get(&(dest_parent_id.to_string(), name.to_string()))
            .map(String::as_str)
    }

    /// 登记目标父文件夹下已存在的文件夹（同名保留第一个）
    pub fn remember_existing(&mut self, dest_parent_id: &str, name: &str, dest_id: &str) {
        self.by_dest_name
            .entry((dest_parent_id.to_string(), name.to_string()))
            .or_insert_with(|| dest_id.to_string());
    }

    pub fn insert(&mut self, source_id: &str, dest_parent_id: &str, name: &str, dest_id: &str) {
        self.by_source
            .insert(source_id.to_string(), dest_id.to_string());
        self.remember_existing(dest_parent_id, name, dest_id);
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}
