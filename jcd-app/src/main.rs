use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use jcd_config::{AppConfig, ConfigError};
use jcd_frontend::cli::CliOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "jcd")]
#[command(about = "解码 JCD 场景文件并输出摘要与文本导出", long_about = None)]
struct Cli {
    /// 配置文件路径，缺省时按 JCD_CONFIG 与 ./config/default.toml 查找
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 覆盖已存在的输出文件
    #[arg(long)]
    overwrite: bool,

    /// 不打印实体摘要
    #[arg(short, long)]
    quiet: bool,

    /// 输入 JCD 文件
    input: PathBuf,

    /// 文本导出路径
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_configuration(cli.config);
    init_logging(&config);
    info!("启动 JCD 解码工具");

    let options = CliOptions {
        input: cli.input,
        output: cli.output,
        overwrite: cli.overwrite,
        quiet: cli.quiet,
    };
    match jcd_frontend::run_cli(&options, &config) {
        Ok(report) => {
            info!(
                entities = report.entity_count,
                warnings = report.warning_count,
                "解码完成"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "解码失败");
            eprintln!("错误: {err}");
            if let Some(offset) = err.offset() {
                eprintln!("字节偏移: {offset}");
            }
            ExitCode::FAILURE
        }
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
