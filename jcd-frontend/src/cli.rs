use std::path::PathBuf;

use glam::Vec3;
use jcd_config::AppConfig;
use jcd_engine::command::{CommandBus, CommandContext, CommandRequest};
use tracing::{info, warn};

use crate::dump::{DumpOptions, DumpOutcome, write_text_dump};
use crate::errors::FrontendError;
use crate::loader::load_scene;
use crate::summary::{EntitySummary, OverallSummary};

/// 命令行参数解析后的运行选项。
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    /// 与配置中的 `output.overwrite` 取或。
    pub overwrite: bool,
    /// 不向标准输出打印摘要。
    pub quiet: bool,
}

/// 一次 CLI 运行的结果，便于调用方与测试检查。
#[derive(Debug)]
pub struct CliReport {
    pub source: PathBuf,
    pub entity_count: usize,
    pub warning_count: usize,
    pub summary: OverallSummary,
    pub viewport_center: Vec3,
    pub dump: Option<DumpOutcome>,
}

/// 加载输入文件，打印实体摘要，并按需写出文本导出。
pub fn run(options: &CliOptions, config: &AppConfig) -> Result<CliReport, FrontendError> {
    let loaded = load_scene(&options.input, config)?;
    let mut scene = loaded.scene;

    if !options.quiet {
        println!("已加载 {}", loaded.path.display());
        for warning in &loaded.warnings {
            eprintln!("警告: {warning}");
        }
        for (id, scene_entity) in scene.document().entities() {
            println!("实体 #{} 摘要:", id.get());
            print!("{}", EntitySummary(scene_entity));
        }
    }

    let summary = OverallSummary::collect(scene.document().entities().map(|(_, entity)| entity));
    info!(
        entities = scene.document().len(),
        control_points = summary.total_control_points,
        materials = summary.materials.len(),
        "JCD 文档统计"
    );
    if !options.quiet {
        print!("{summary}");
    }

    let command_bus = CommandBus::new();
    let mut context = CommandContext { scene: &mut scene };
    if let Err(err) =
        dispatch_cli_command(&command_bus, "focus_selection", &mut context, options.quiet)
    {
        warn!("CLI 命令执行失败: {err}");
    }
    let viewport = scene.viewport();
    if !options.quiet {
        println!(
            "视口中心=({:.2}, {:.2}, {:.2}), 缩放={:.3}",
            viewport.center.x, viewport.center.y, viewport.center.z, viewport.zoom
        );
    }
    let viewport_center = viewport.center;

    let dump = match &options.output {
        Some(path) => {
            let dump_options = DumpOptions {
                precision: config.output.precision,
                overwrite: options.overwrite || config.output.overwrite,
            };
            let outcome = write_text_dump(path, scene.document(), dump_options)?;
            if !options.quiet {
                match &outcome {
                    DumpOutcome::Written { path, entities } => {
                        println!("已写出 {entities} 个实体的文本导出: {}", path.display());
                    }
                    DumpOutcome::SkippedExisting(path) => {
                        println!("输出文件 {} 已存在，使用 --overwrite 覆盖", path.display());
                    }
                    DumpOutcome::Empty => println!("文档为空，未生成文本导出"),
                }
            }
            Some(outcome)
        }
        None => None,
    };

    Ok(CliReport {
        source: loaded.path,
        entity_count: scene.document().len(),
        warning_count: loaded.warnings.len(),
        summary,
        viewport_center,
        dump,
    })
}

fn dispatch_cli_command(
    bus: &CommandBus,
    name: &str,
    context: &mut CommandContext<'_>,
    quiet: bool,
) -> Result<(), String> {
    let response = bus.dispatch(&CommandRequest::new(name), context);
    if response.success {
        if let Some(message) = response.message.filter(|_| !quiet) {
            println!("[命令] {message}");
        }
        Ok(())
    } else {
        Err(response.message.unwrap_or_else(|| "未知错误".to_string()))
    }
}
