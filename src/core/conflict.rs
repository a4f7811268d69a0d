use crate::storage::split_extension;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 目标文件夹中已有同名文件时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// 跳过，不复制
    Skip,
    /// 插入时间标记生成新名称
    #[default]
    Rename,
    /// 先删除已有文件，再以原名复制
    Replace,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Skip => write!(f, "skip"),
            ConflictPolicy::Rename => write!(f, "rename"),
            ConflictPolicy::Replace => write!(f, "replace"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "rename" => Ok(ConflictPolicy::Rename),
            "replace" => Ok(ConflictPolicy::Replace),
            other => Err(format!("未知的冲突策略: {}", other)),
        }
    }
}

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 不冲突或已改名，直接以该名称复制
    Copy { name: String },
    /// 跳过
    Skip,
    /// 删除已有文件后以原名复制
    Replace { existing_id: String, name: String },
}

/// 冲突解决器
///
/// 持有目标文件夹中已存在的名称（名称 -> ID），每次决策后更新，
/// 保证同一批内后续文件也能看到本次运行产生的名称
#[derive(Debug)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    existing: HashMap<String, String>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy, existing: HashMap<String, String>) -> Self {
        Self { policy, existing }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.existing.contains_key(name)
    }

    /// 决定文件如何复制，`now` 用作改名的时间标记
    pub fn resolve(&mut self, name: &str, now: DateTime<Utc>) -> Resolution {
        let Some(existing_id) = self.existing.get(name).cloned() else {
            self.reserve(name);
            return Resolution::Copy {
                name: name.to_string(),
            };
        };

        match self.policy {
            ConflictPolicy::Skip => Resolution::Skip,
            // 空 ID 表示名称被本次运行占用、尚未落地，不能替换
            ConflictPolicy::Replace if !existing_id.is_empty() => {
                self.existing.insert(name.to_string(), String::new());
                Resolution::Replace {
                    existing_id,
                    name: name.to_string(),
                }
            }
            ConflictPolicy::Rename | ConflictPolicy::Replace => {
                let renamed = unique_name(name, now, |candidate| self.is_taken(candidate));
                self.reserve(&renamed);
                Resolution::Copy { name: renamed }
            }
        }
    }

    /// 记录复制成功后的真实 ID
    pub fn record(&mut self, name: &str, id: &str) {
        self.existing.insert(name.to_string(), id.to_string());
    }

    fn reserve(&mut self, name: &str) {
        self.existing.entry(name.to_string()).or_default();
    }
}

/// 在扩展名前插入时间标记生成新名称，仍冲突时追加序号
///
/// `report.pdf` -> `report_1700000000123.pdf`，没有扩展名时直接追加
pub fn unique_name(name: &str, now: DateTime<Utc>, is_taken: impl Fn(&str) -> bool) -> String {
    let (stem, ext) = split_extension(name);
    let token = now.timestamp_millis();

    let build = |suffix: String| match ext {
        Some(ext) => format!("{}_{}{}.{}", stem, token, suffix, ext),
        None => format!("{}_{}{}", stem, token, suffix),
    };

    let mut candidate = build(String::new());
    let mut counter = 1u32;
    while is_taken(&candidate) || candidate == name {
        candidate = build(format!("_{}", counter));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    fn existing(names: &[&str]) -> HashMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), format!("id-{}", n)))
            .collect()
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("skip".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Skip));
        assert_eq!("REPLACE".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Replace));
        assert!("merge".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::Rename.to_string(), "rename");
    }

    #[test]
    fn test_unique_name_keeps_extension() {
        let name = unique_name("report.pdf", now(), |_| false);
        assert_eq!(name, "report_1700000000123.pdf");
        assert_eq!(unique_name("Makefile", now(), |_| false), "Makefile_1700000000123");
    }

    #[test]
    fn test_unique_name_avoids_taken_names() {
        let taken = ["a_1700000000123.txt", "a_1700000000123_1.txt"];
        let name = unique_name("a.txt", now(), |c| taken.contains(&c));
        assert_eq!(name, "a_1700000000123_2.txt");
    }

    #[test]
    fn test_resolve_without_conflict() {
        let mut resolver = ConflictResolver::new(ConflictPolicy::Skip, existing(&[]));
        assert_eq!(
            resolver.resolve("new.txt", now()),
            Resolution::Copy {
                name: "new.txt".to_string()
            }
        );
        // 同名第二个文件会看到第一个
        assert_eq!(resolver.resolve("new.txt", now()), Resolution::Skip);
    }

    #[test]
    fn test_resolve_policies() {
        let mut skip = ConflictResolver::new(ConflictPolicy::Skip, existing(&["a.txt"]));
        assert_eq!(skip.resolve("a.txt", now()), Resolution::Skip);

        let mut replace = ConflictResolver::new(ConflictPolicy::Replace, existing(&["a.txt"]));
        assert_eq!(
            replace.resolve("a.txt", now()),
            Resolution::Replace {
                existing_id: "id-a.txt".to_string(),
                name: "a.txt".to_string()
            }
        );

        // 第二个同名文件不会再删除刚替换的文件
        match replace.resolve("a.txt", now()) {
            Resolution::Copy { name } => assert_ne!(name, "a.txt"),
            other => panic!("unexpected resolution: {other:?}"),
        }

        let mut rename = ConflictResolver::new(ConflictPolicy::Rename, existing(&["a.txt"]));
        let first = rename.resolve("a.txt", now());
        let second = rename.resolve("a.txt", now());
        assert_ne!(first, second);
        for resolution in [first, second] {
            match resolution {
                Resolution::Copy { name } => {
                    assert!(name.ends_with(".txt"));
                    assert_ne!(name, "a.txt");
                }
                other => panic!("unexpected resolution: {other:?}"),
            }
        }
    }
}
