pub mod cli;
pub mod dump;
pub mod errors;
pub mod loader;
pub mod resource_locator;
pub mod summary;

use cli::{CliOptions, CliReport};
use errors::FrontendError;
use jcd_config::AppConfig;
use tracing::info;

/// 以命令行模式解码一个 JCD 文件。
pub fn run_cli(options: &CliOptions, config: &AppConfig) -> Result<CliReport, FrontendError> {
    info!(input = %options.input.display(), "启动 JCD 命令行前端");
    cli::run(options, config)
}
