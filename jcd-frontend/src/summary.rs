use std::collections::BTreeSet;
use std::fmt;

use jcd_core::document::{Entity, SceneEntity, SurfaceType};

/// 单个实体的摘要，`Display` 输出为缩进的多行文本。
pub struct EntitySummary<'a>(pub &'a SceneEntity);

impl fmt::Display for EntitySummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scene_entity = self.0;
        writeln!(f, "  类型: {}", scene_entity.surface_type().name())?;
        writeln!(f, "  隐藏: {}", scene_entity.is_hidden())?;
        if !scene_entity.transforms().is_empty() {
            writeln!(f, "  矩阵数量: {}", scene_entity.transforms().len())?;
        }
        if let Some(material) = scene_entity.entity.material() {
            writeln!(f, "  材质: {material}")?;
        }
        let point_count = scene_entity.entity.control_point_count();
        if point_count > 0 {
            writeln!(f, "  点数量: {point_count}")?;
        }

        match &scene_entity.entity {
            Entity::Curve(curve) => {
                writeln!(f, "  环数量: {}", curve.ring_count)?;
                writeln!(f, "  每环点数: {}", curve.points_per_ring)?;
                writeln!(f, "  曲线类型: {}", curve.curve_type.name())?;
            }
            Entity::Surface(surface) => {
                writeln!(f, "  环数量: {}", surface.ring_count)?;
                writeln!(f, "  每环点数: {}", surface.points_per_ring)?;
                writeln!(f, "  曲线类型: {}", surface.curve_type.name())?;
            }
            Entity::Diamond(diamond) => {
                writeln!(f, "  钻石类型: {}", diamond.diamond_type.name())?;
            }
            Entity::FontSurface(font) => {
                writeln!(f, "  轮廓数量: {}", font.outline_count())?;
                writeln!(
                    f,
                    "  前景/背景: {}/{}",
                    font.foreground.name(),
                    font.background.name()
                )?;
            }
            Entity::QuadType(quad) => {
                writeln!(f, "  四边形数量: {}", quad.indices.len())?;
            }
            Entity::GuideLine(_) => {}
            Entity::Boolean(boolean) => {
                writeln!(f, "  布尔类型: {}", boolean.bool_type.name())?;
                writeln!(f, "  子曲面类型: {}", boolean.nested_type.name())?;
                writeln!(f, "  原始曲面数: {}", boolean.primitive_count())?;
                writeln!(f, "  布尔运算数: {}", boolean.boolean_op_count())?;
                if boolean.truncated {
                    writeln!(f, "  未闭合分组: 是")?;
                }
            }
        }
        Ok(())
    }
}

/// 文档级统计：类型分布、控制点总数与材质集合。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverallSummary {
    pub type_counts: Vec<(SurfaceType, usize)>,
    pub total_control_points: usize,
    pub materials: BTreeSet<String>,
}

impl OverallSummary {
    /// 布尔实体的材质取自其所有原始曲面。
    pub fn collect<'a, I>(entities: I) -> Self
    where
        I: IntoIterator<Item = &'a SceneEntity>,
    {
        let mut counts = vec![0usize; SurfaceType::ALL.len()];
        let mut summary = Self::default();
        for scene_entity in entities {
            if let Some(slot) = SurfaceType::ALL
                .iter()
                .position(|kind| *kind == scene_entity.surface_type())
            {
                counts[slot] += 1;
            }
            summary.total_control_points += scene_entity.entity.control_point_count();
            collect_materials(&scene_entity.entity, &mut summary.materials);
        }
        summary.type_counts = SurfaceType::ALL
            .iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(kind, count)| (*kind, count))
            .collect();
        summary
    }
}

fn collect_materials(entity: &Entity, materials: &mut BTreeSet<String>) {
    match entity {
        Entity::Boolean(boolean) => {
            if let Some(root) = boolean.root() {
                for primitive in boolean.dag.primitives_under(root) {
                    collect_materials(&primitive.entity, materials);
                }
            }
        }
        other => {
            if let Some(material) = other.material().filter(|name| !name.is_empty()) {
                materials.insert(material.to_string());
            }
        }
    }
}

impl fmt::Display for OverallSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "类型分布:")?;
        for (kind, count) in &self.type_counts {
            writeln!(f, "  {}: {count}", kind.name())?;
        }
        writeln!(f, "总控制点数: {}", self.total_control_points)?;
        if !self.materials.is_empty() {
            writeln!(f, "材质种类: {}", self.materials.len())?;
            for material in &self.materials {
                writeln!(f, "  - {material}")?;
            }
        }
        Ok(())
    }
}
