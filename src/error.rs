//! 错误类型

use crate::storage::StoreError;
use std::time::Duration;
use thiserror::Error;

/// 同步引擎错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 列举某个子树失败
    #[error("列举文件夹 {folder_id} 失败: {source}")]
    Enumeration {
        folder_id: String,
        #[source]
        source: StoreError,
    },

    /// 远程操作失败（创建、复制、删除）
    #[error("{op} {target} 失败: {source}")]
    Remote {
        op: &'static str,
        target: String,
        #[source]
        source: StoreError,
    },

    /// 超过运行截止时间
    #[error("已超时: 运行 {}ms, 上限 {}ms", elapsed.as_millis(), limit.as_millis())]
    Timeout { elapsed: Duration, limit: Duration },

    /// 参数缺失或冲突
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 条目不存在或不可访问
    #[error("条目不存在: {0}")]
    NotFound(String),
}

impl SyncError {
    pub fn enumeration(folder_id: &str, source: StoreError) -> Self {
        SyncError::Enumeration {
            folder_id: folder_id.to_string(),
            source,
        }
    }

    pub fn remote(op: &'static str, target: &str, source: StoreError) -> Self {
        SyncError::Remote {
            op,
            target: target.to_string(),
            source,
        }
    }

    /// 错误分类标签，写入 `ItemError::kind`
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Enumeration { .. } => "enumeration",
            SyncError::Remote { .. } => "remote",
            SyncError::Timeout { .. } => "timeout",
            SyncError::Configuration(_) => "configuration",
            SyncError::NotFound(_) => "not_found",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let err = SyncError::enumeration("f1", StoreError::not_found("f1"));
        assert_eq!(err.kind(), "enumeration");
        assert!(err.to_string().contains("f1"));

        let err = SyncError::Timeout {
            elapsed: Duration::from_millis(1500),
            limit: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "已超时: 运行 1500ms, 上限 1000ms");
    }

    #[test]
    fn test_remote_error_keeps_source() {
        let err = SyncError::remote(
            "复制",
            "a.txt",
            StoreError::rejected("copy", "quota exceeded"),
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("copy 被拒绝: quota exceeded"));
    }
}
