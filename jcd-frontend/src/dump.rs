use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use glam::{Vec3, Vec4};
use jcd_core::document::{Document, Entity, SceneEntity};
use jcd_core::geometry::{Bounds3D, matrix_to_row_major};
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::summary::EntitySummary;

/// 文本导出的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpOutcome {
    Written { path: PathBuf, entities: usize },
    /// 目标已存在且未开启覆盖，文件保持原样。
    SkippedExisting(PathBuf),
    /// 文档没有实体，不生成文件。
    Empty,
}

#[derive(Debug, Clone, Copy)]
pub struct DumpOptions {
    pub precision: usize,
    pub overwrite: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            precision: 4,
            overwrite: false,
        }
    }
}

/// 将文档渲染为纯文本：每个实体一段，包含摘要、矩阵、点与包围盒。
pub fn render_text_dump(document: &Document, precision: usize) -> String {
    let mut out = String::new();
    for (id, scene_entity) in document.entities() {
        let _ = writeln!(out, "实体 #{}", id.get());
        let _ = write!(out, "{}", EntitySummary(scene_entity));
        render_entity_body(&mut out, scene_entity, precision);
        out.push('\n');
    }
    out
}

fn render_entity_body(out: &mut String, scene_entity: &SceneEntity, precision: usize) {
    if !scene_entity.transforms().is_empty() {
        let _ = writeln!(out, "  继承矩阵:");
        for (index, matrix) in scene_entity.transforms().iter().enumerate() {
            let rows = matrix_to_row_major(matrix);
            let _ = writeln!(out, "    [{index}]");
            for row in rows.chunks(4) {
                let _ = writeln!(out, "      {}", join_floats(row, precision));
            }
        }
    }

    match &scene_entity.entity {
        Entity::Curve(curve) => render_vec4_points(out, &curve.points, precision),
        Entity::Surface(surface) => render_vec4_points(out, &surface.points, precision),
        Entity::QuadType(quad) => {
            render_vec4_points(out, &quad.points, precision);
            let _ = writeln!(out, "  索引:");
            for index in &quad.indices {
                let _ = writeln!(out, "    {} {} {} {}", index.x, index.y, index.z, index.w);
            }
        }
        Entity::FontSurface(font) => {
            for (index, outline) in font.outlines().into_iter().enumerate() {
                let _ = writeln!(out, "  轮廓 {index}:");
                for point in outline {
                    let _ = writeln!(out, "    {}", format_vec3(*point, precision));
                }
            }
        }
        Entity::Diamond(diamond) => {
            let _ = writeln!(
                out,
                "  位置: {}",
                format_vec3(diamond.position(), precision)
            );
        }
        Entity::GuideLine(line) => {
            let _ = writeln!(out, "  位置: {}", format_vec3(line.position(), precision));
            let _ = writeln!(out, "  方向: {}", format_vec3(line.direction(), precision));
        }
        Entity::Boolean(boolean) => {
            let _ = writeln!(out, "  布尔树:");
            for line in boolean.print_tree().lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
    }

    if let Some(bounds) = scene_entity.transformed_bounds() {
        let _ = writeln!(out, "  包围盒: {}", format_bounds(&bounds, precision));
    }
}

fn render_vec4_points(out: &mut String, points: &[Vec4], precision: usize) {
    let _ = writeln!(out, "  控制点:");
    for point in points {
        let _ = writeln!(out, "    {}", join_floats(&point.to_array(), precision));
    }
}

fn join_floats(values: &[f32], precision: usize) -> String {
    values
        .iter()
        .map(|value| format!("{value:.precision$}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_vec3(value: Vec3, precision: usize) -> String {
    format!("({})", join_floats(&value.to_array(), precision).replace(' ', ", "))
}

fn format_bounds(bounds: &Bounds3D, precision: usize) -> String {
    format!(
        "{} - {}",
        format_vec3(bounds.min(), precision),
        format_vec3(bounds.max(), precision)
    )
}

/// 写出文本导出；必要时创建父目录。
pub fn write_text_dump(
    path: &Path,
    document: &Document,
    options: DumpOptions,
) -> Result<DumpOutcome, FrontendError> {
    if document.is_empty() {
        warn!(path = %path.display(), "文档为空，跳过文本导出");
        return Ok(DumpOutcome::Empty);
    }
    if path.exists() && !options.overwrite {
        warn!(path = %path.display(), "输出文件已存在，未开启覆盖，跳过写入");
        return Ok(DumpOutcome::SkippedExisting(path.to_path_buf()));
    }

    let output_error = |source| FrontendError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(output_error)?;
    }
    fs::write(path, render_text_dump(document, options.precision)).map_err(output_error)?;

    info!(path = %path.display(), entities = document.len(), "文本导出完成");
    Ok(DumpOutcome::Written {
        path: path.to_path_buf(),
        entities: document.len(),
    })
}
