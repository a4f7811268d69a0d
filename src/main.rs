use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use treesync_lib::commands::compare::{self, CompareRequest};
use treesync_lib::commands::replicate::{self, ReplicateRequest};
use treesync_lib::config::{self, ReplicationConfig};
use treesync_lib::logging::{init_logging, LogConfig};
use treesync_lib::storage::{open_store, RemoteStore, StoreConfig, StoreType};
use treesync_lib::{ConflictPolicy, ReplicationOptions};

#[derive(Debug, Parser)]
#[command(name = "treesync", version, about = "比较并复制远程目录树")]
struct Cli {
    /// 本地存储根目录，条目 ID 为相对它的 `/` 开头路径
    #[arg(long, global = true, default_value = ".")]
    root: String,

    /// 使用空的内存存储，只能检查参数和输出格式（没有任何根文件夹）
    #[arg(long, global = true)]
    memory: bool,

    /// 配置目录（默认 $TREESYNC_CONFIG_DIR 或平台配置目录）
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// 详细日志（-v debug，-vv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 比较两棵树
    Compare(TreeArgs),
    /// 比较并输出有序同步计划
    Plan(TreeArgs),
    /// 把源文件夹复制到目标文件夹
    Replicate(ReplicateArgs),
}

#[derive(Debug, Args)]
struct TreeArgs {
    source: String,
    dest: String,
    /// 只比较直接子项
    #[arg(long)]
    no_recursive: bool,
    /// 同时比较内容校验和
    #[arg(long)]
    deep: bool,
    /// 排除规则，可重复
    #[arg(long = "exclude")]
    exclude: Vec<String>,
}

#[derive(Debug, Args)]
struct ReplicateArgs {
    source: String,
    dest: String,
    /// 冲突策略：skip / rename / replace
    #[arg(long)]
    policy: Option<ConflictPolicy>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    deadline_secs: Option<u64>,
    /// 不复制子文件夹
    #[arg(long)]
    no_recursive: bool,
    /// 所有文件平铺到目标根目录
    #[arg(long)]
    flatten: bool,
    /// 只复制这些文件 ID，可重复
    #[arg(long = "file-id")]
    file_ids: Vec<String>,
}

impl TreeArgs {
    fn request(&self) -> CompareRequest {
        CompareRequest {
            recursive: !self.no_recursive,
            deep_compare: self.deep,
            exclude_patterns: self.exclude.clone(),
            ..CompareRequest::new(&self.source, &self.dest)
        }
    }
}

impl ReplicateArgs {
    fn request(&self) -> ReplicateRequest {
        ReplicateRequest {
            recursive: self.no_recursive.then_some(false),
            preserve_structure: self.flatten.then_some(false),
            conflict_policy: self.policy,
            batch_size: self.batch_size,
            max_concurrency: self.concurrency,
            deadline_secs: self.deadline_secs,
            file_ids: (!self.file_ids.is_empty()).then(|| self.file_ids.clone()),
            ..ReplicateRequest::new(&self.source, &self.dest)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.clone().unwrap_or_else(config::config_dir);

    let mut log_config = LogConfig::load(&config_dir);
    match cli.verbose {
        0 => {}
        1 => log_config.level = "debug".to_string(),
        _ => log_config.level = "trace".to_string(),
    }
    let _guard = init_logging(&log_config);

    let store_config = if cli.memory {
        StoreConfig {
            typ: StoreType::Memory,
            path: None,
            page_size: None,
        }
    } else {
        StoreConfig {
            typ: StoreType::Local,
            path: Some(cli.root.clone()),
            page_size: None,
        }
    };
    let store: Arc<dyn RemoteStore> = open_store(&store_config)?;

    let success = match &cli.command {
        Command::Compare(args) => {
            let response = compare::analyze(store.as_ref(), &args.request()).await;
            print_json(&response)?;
            response.success
        }
        Command::Plan(args) => {
            let response = compare::plan(store.as_ref(), &args.request()).await;
            print_json(&response)?;
            response.success
        }
        Command::Replicate(args) => {
            let base = ReplicationOptions::from_config(&ReplicationConfig::load(&config_dir));
            let report = replicate::replicate(store.as_ref(), &args.request(), base).await;
            print_json(&report)?;
            report.success
        }
    };

    Ok(exit_code(success))
}
