//! 应用配置模块

use crate::core::ConflictPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 覆盖配置目录的环境变量
pub const CONFIG_DIR_ENV: &str = "TREESYNC_CONFIG_DIR";

const CONFIG_FILE: &str = "config.json";

/// 复制配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfig {
    /// 每批文件数（1-100）
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 最大并发复制数（1-20）
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// 运行时间上限（秒）
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// 批次间停顿（毫秒）
    #[serde(default = "default_inter_batch_pause_ms")]
    pub inter_batch_pause_ms: u64,
    #[serde(default = "default_true")]
    pub preserve_structure: bool,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrency() -> usize {
    5
}

fn default_deadline_secs() -> u64 {
    300 // 5 分钟
}

fn default_inter_batch_pause_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            conflict_policy: ConflictPolicy::default(),
            deadline_secs: default_deadline_secs(),
            inter_batch_pause_ms: default_inter_batch_pause_ms(),
            preserve_structure: default_true(),
            recursive: default_true(),
        }
    }
}

impl ReplicationConfig {
    /// 从配置文件加载复制配置
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "replication").unwrap_or_default()
    }

    /// 保存复制配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "replication", self)
    }
}

/// 读取 config.json 中的一个小节，文件不存在或格式错误时返回 None
pub fn load_section<T: DeserializeOwned>(config_dir: &Path, section: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    let value = config.get(section)?.clone();
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!("配置小节 {} 格式错误，使用默认值: {}", section, e);
            None
        }
    }
}

/// 更新 config.json 中的一个小节，保留其他小节
pub fn save_section<T: Serialize>(config_dir: &Path, section: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[section] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}

/// 配置目录：环境变量优先，其次平台配置目录
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    crate::dirs::config_dir()
        .map(|p| p.join("treesync"))
        .unwrap_or_else(|| PathBuf::from(".treesync"))
}
