//! JCD 编码器，与 `reader`/`codec` 一一对应，主要用于回写与测试夹具。

use std::io::Write;

use glam::{IVec4, Mat4, Vec3, Vec4};
use jcd_core::dag::{CsgNode, NodeId};
use jcd_core::document::{
    BoolSurface, BoolType, Curve, Diamond, Entity, FontSurface, GuideLine, JCD_MAGIC, META_LEN,
    QuadType, SceneEntity, Surface, SurfaceType,
};
use jcd_core::geometry::{compose_chain, matrix_to_row_major};

use crate::reader::MATRIX_GAP_LEN;
use crate::{FLAG_CLOSE_GROUP, FLAG_END, FLAG_START, IoError};

pub struct JcdWriter<W> {
    inner: W,
}

impl<W: Write> JcdWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(bytes)
    }

    pub fn write_u8(&mut self, value: u8) -> std::io::Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> std::io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> std::io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> std::io::Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_string(&mut self, value: &str) -> std::io::Result<()> {
        self.write_u32(length_prefix(value.len())?)?;
        self.write_bytes(value.as_bytes())
    }

    pub fn write_point_block_f32(&mut self, points: &[Vec4]) -> std::io::Result<()> {
        self.write_u32(length_prefix(points.len())?)?;
        for point in points {
            for lane in point.to_array() {
                self.write_f32(lane)?;
            }
        }
        Ok(())
    }

    pub fn write_point_block_i32(&mut self, points: &[IVec4]) -> std::io::Result<()> {
        self.write_u32(length_prefix(points.len())?)?;
        for point in points {
            for lane in point.to_array() {
                self.write_i32(lane)?;
            }
        }
        Ok(())
    }

    pub fn write_points3(&mut self, points: &[Vec3]) -> std::io::Result<()> {
        for point in points {
            for lane in point.to_array() {
                self.write_f32(lane)?;
            }
        }
        Ok(())
    }

    pub fn write_matrix(&mut self, matrix: &Mat4) -> std::io::Result<()> {
        for value in matrix_to_row_major(matrix) {
            self.write_f32(value)?;
        }
        Ok(())
    }

    /// 除最后一个矩阵外，每个矩阵后写入 4 字节零间隔。
    pub fn write_matrices(&mut self, matrices: &[Mat4]) -> std::io::Result<()> {
        for (index, matrix) in matrices.iter().enumerate() {
            self.write_matrix(matrix)?;
            if index + 1 != matrices.len() {
                self.write_bytes(&[0u8; MATRIX_GAP_LEN])?;
            }
        }
        Ok(())
    }

    pub fn write_header(&mut self) -> std::io::Result<()> {
        self.write_bytes(JCD_MAGIC)
    }

    /// 写入 `:`、元信息与实体内容；布尔实体会展开成完整的分组序列。
    pub fn write_record(&mut self, entity: &SceneEntity) -> Result<(), IoError> {
        self.write_u8(FLAG_START)?;
        self.write_bytes(&entity.encoded_meta())?;
        self.write_entity_body(&entity.entity, entity.transforms())
    }

    /// 头部矩阵加类型载荷，不含元信息。
    pub fn write_entity_body(&mut self, entity: &Entity, transforms: &[Mat4]) -> Result<(), IoError> {
        let matrices = header_matrices(entity.surface_type(), transforms);
        match entity {
            Entity::Curve(curve) => {
                self.write_matrices(&matrices)?;
                self.write_curve(curve)?;
            }
            Entity::Surface(surface) => {
                self.write_matrices(&matrices)?;
                self.write_surface(surface)?;
            }
            Entity::Diamond(diamond) => {
                self.write_matrices(&matrices)?;
                self.write_diamond(diamond)?;
            }
            Entity::FontSurface(font) => {
                self.write_matrices(&matrices)?;
                self.write_font_surface(font)?;
            }
            Entity::GuideLine(line) => {
                self.write_matrices(&matrices)?;
                self.write_guide_line(line)?;
            }
            Entity::QuadType(quad) => {
                self.write_matrices(&matrices)?;
                self.write_quad_type(quad)?;
            }
            Entity::Boolean(boolean) => self.write_boolean(boolean, &matrices)?,
        }
        Ok(())
    }

    pub fn write_document<'a, I>(&mut self, entities: I) -> Result<(), IoError>
    where
        I: IntoIterator<Item = &'a SceneEntity>,
    {
        self.write_header()?;
        for entity in entities {
            self.write_record(entity)?;
        }
        self.write_u8(FLAG_END)?;
        Ok(())
    }

    fn write_curve(&mut self, curve: &Curve) -> std::io::Result<()> {
        self.write_string(&curve.material)?;
        self.write_point_block_f32(&curve.points)?;
        self.write_u32(curve.ring_count)?;
        self.write_u32(curve.points_per_ring)?;
        self.write_u8(curve.curve_type.raw())?;
        self.write_bytes(&curve.reserved)
    }

    fn write_surface(&mut self, surface: &Surface) -> Result<(), IoError> {
        if surface.reserved.len() != crate::codec::SURFACE_RESERVED_LEN {
            return Err(IoError::InvalidDocument(format!(
                "曲面保留区应为 {} 字节，实际 {} 字节",
                crate::codec::SURFACE_RESERVED_LEN,
                surface.reserved.len()
            )));
        }
        self.write_string(&surface.material)?;
        self.write_point_block_f32(&surface.points)?;
        self.write_u32(surface.ring_count)?;
        self.write_u32(surface.points_per_ring)?;
        self.write_u8(surface.curve_type.raw())?;
        self.write_bytes(&surface.reserved)?;
        Ok(())
    }

    fn write_diamond(&mut self, diamond: &Diamond) -> std::io::Result<()> {
        self.write_string(&diamond.material)?;
        self.write_matrix(&diamond.shape)?;
        self.write_u8(diamond.diamond_type.raw())?;
        self.write_bytes(&diamond.reserved)
    }

    fn write_font_surface(&mut self, font: &FontSurface) -> Result<(), IoError> {
        let declared: usize = font.outlines.iter().map(|span| span.point_count as usize).sum();
        if declared != font.points.len() {
            return Err(IoError::InvalidDocument(format!(
                "字体轮廓声明 {declared} 个点，实际 {} 个",
                font.points.len()
            )));
        }
        self.write_string(&font.material)?;
        self.write_matrix(&font.shape)?;
        self.write_u32(length_prefix(font.outlines.len())?)?;
        for value in font.aux {
            self.write_u32(value)?;
        }
        self.write_u32(font.foreground.raw())?;
        self.write_u32(font.background.raw())?;
        self.write_f32(font.thickness)?;
        self.write_f32(font.radius)?;
        for span in &font.outlines {
            self.write_u32(span.point_count)?;
            self.write_bytes(&span.reserved)?;
        }
        self.write_points3(&font.points)?;
        Ok(())
    }

    fn write_guide_line(&mut self, line: &GuideLine) -> std::io::Result<()> {
        self.write_matrix(&line.shape)?;
        self.write_bytes(&line.reserved)?;
        for value in line.aux {
            self.write_u32(value)?;
        }
        Ok(())
    }

    fn write_quad_type(&mut self, quad: &QuadType) -> std::io::Result<()> {
        self.write_string(&quad.material)?;
        self.write_point_block_f32(&quad.points)?;
        self.write_point_block_i32(&quad.indices)
    }

    fn write_boolean(&mut self, boolean: &BoolSurface, matrices: &[Mat4]) -> Result<(), IoError> {
        let root = boolean
            .root()
            .ok_or_else(|| IoError::InvalidDocument("布尔实体缺少根节点".to_string()))?;
        let mut group = group_of(boolean, root)?;
        if group.op != boolean.bool_type {
            // 单子节点的外层分组在 DAG 中折叠为其子节点本身。
            group = Group {
                op: boolean.bool_type,
                items: vec![Item::Group(group)],
            };
        }
        self.write_group(
            &group,
            matrices,
            boolean.reserved_head,
            boolean.reserved_tail,
        )
    }

    /// 布尔头部 + 首个子项（嵌套载荷），随后是其余子项记录与 `%`。
    fn write_group(
        &mut self,
        group: &Group<'_>,
        matrices: &[Mat4],
        reserved_head: [u8; 2],
        reserved_tail: [u8; 7],
    ) -> Result<(), IoError> {
        let Some((first, rest)) = group.items.split_first() else {
            return Err(IoError::InvalidDocument("布尔分组没有子节点".to_string()));
        };
        self.write_matrices(matrices)?;
        self.write_u8(group.op.raw())?;
        self.write_bytes(&reserved_head)?;
        self.write_u8(first.surface_type().tag())?;
        self.write_bytes(&reserved_tail)?;
        match first {
            Item::Leaf(entity) => self.write_entity_body(&entity.entity, entity.transforms())?,
            Item::Group(nested) => self.write_nested_group(nested)?,
        }
        for item in rest {
            self.write_u8(FLAG_START)?;
            match item {
                Item::Leaf(entity) => {
                    self.write_bytes(&entity.encoded_meta())?;
                    self.write_entity_body(&entity.entity, entity.transforms())?;
                }
                Item::Group(nested) => {
                    let mut meta = [0u8; META_LEN];
                    meta[0] = SurfaceType::BoolSurface.tag();
                    self.write_bytes(&meta)?;
                    self.write_nested_group(nested)?;
                }
            }
        }
        self.write_u8(FLAG_CLOSE_GROUP)?;
        Ok(())
    }

    /// 嵌套分组的矩阵在解码时会被丢弃，写入单位矩阵占位。
    fn write_nested_group(&mut self, group: &Group<'_>) -> Result<(), IoError> {
        let matrices = [Mat4::IDENTITY; 3];
        self.write_group(group, &matrices, [0; 2], [0; 7])
    }
}

pub fn encode_document(entities: &[SceneEntity]) -> Result<Vec<u8>, IoError> {
    encode_entities(entities)
}

pub fn encode_entities<'a, I>(entities: I) -> Result<Vec<u8>, IoError>
where
    I: IntoIterator<Item = &'a SceneEntity>,
{
    let mut writer = JcdWriter::new(Vec::new());
    writer.write_document(entities)?;
    Ok(writer.into_inner())
}

fn length_prefix(len: usize) -> std::io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("长度 {len} 超出 u32 范围"),
        )
    })
}

/// 将继承矩阵调整为该类型头部要求的数量：不足补单位矩阵，
/// 多出的外层矩阵合并进最后一个槽位。
fn header_matrices(surface_type: SurfaceType, transforms: &[Mat4]) -> Vec<Mat4> {
    let count = surface_type.base_matrix_count();
    if transforms.len() <= count {
        let mut matrices = transforms.to_vec();
        matrices.resize(count, Mat4::IDENTITY);
        return matrices;
    }
    let (kept, outer) = transforms.split_at(count - 1);
    let mut matrices = kept.to_vec();
    matrices.push(compose_chain(None, outer));
    matrices
}

/// DAG 的分组视图：同一运算符的左链展平成一个分组。
struct Group<'a> {
    op: BoolType,
    items: Vec<Item<'a>>,
}

enum Item<'a> {
    Leaf(&'a SceneEntity),
    Group(Group<'a>),
}

impl Item<'_> {
    fn surface_type(&self) -> SurfaceType {
        match self {
            Item::Leaf(entity) => entity.surface_type(),
            Item::Group(_) => SurfaceType::BoolSurface,
        }
    }
}

fn group_of(boolean: &BoolSurface, id: NodeId) -> Result<Group<'_>, IoError> {
    match node(boolean, id)? {
        CsgNode::BooleanOp { op, left, right } => {
            let mut items = Vec::new();
            flatten_left(boolean, *left, *op, &mut items)?;
            items.push(item_of(boolean, *right)?);
            Ok(Group { op: *op, items })
        }
        CsgNode::Primitive(entity) => Ok(Group {
            op: boolean.bool_type,
            items: vec![Item::Leaf(&**entity)],
        }),
        CsgNode::Group(_) => Err(unsupported_group(id)),
    }
}

/// 沿左链向下收集同一运算符的右子项，最左端的节点作为首个子项。
fn flatten_left<'a>(
    boolean: &'a BoolSurface,
    id: NodeId,
    op: BoolType,
    items: &mut Vec<Item<'a>>,
) -> Result<(), IoError> {
    let mut rights = Vec::new();
    let mut current = id;
    while let CsgNode::BooleanOp {
        op: inner,
        left,
        right,
    } = node(boolean, current)?
    {
        if *inner != op {
            break;
        }
        rights.push(*right);
        current = *left;
    }
    items.push(item_of(boolean, current)?);
    for right in rights.into_iter().rev() {
        items.push(item_of(boolean, right)?);
    }
    Ok(())
}

fn item_of(boolean: &BoolSurface, id: NodeId) -> Result<Item<'_>, IoError> {
    match node(boolean, id)? {
        CsgNode::Primitive(entity) => Ok(Item::Leaf(&**entity)),
        CsgNode::BooleanOp { .. } => group_of(boolean, id).map(Item::Group),
        CsgNode::Group(_) => Err(unsupported_group(id)),
    }
}

fn node(boolean: &BoolSurface, id: NodeId) -> Result<&CsgNode, IoError> {
    boolean
        .dag
        .get(id)
        .ok_or_else(|| IoError::InvalidDocument(format!("布尔 DAG 中不存在节点 #{}", id.get())))
}

fn unsupported_group(id: NodeId) -> IoError {
    IoError::UnsupportedFeature(format!("曲面组节点 #{} 无法写入 JCD 数据流", id.get()))
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use jcd_core::document::{CurveType, DiamondType};

    use super::*;

    fn curve_entity(x: f32) -> SceneEntity {
        SceneEntity::new(
            Entity::Curve(Curve {
                material: "Gold".into(),
                points: vec![Vec4::new(x, 0.0, 0.0, 1.0)],
                ring_count: 1,
                points_per_ring: 1,
                curve_type: CurveType::Open,
                reserved: [0; 9],
            }),
            vec![Mat4::IDENTITY; 2],
        )
    }

    #[test]
    fn header_matrices_pad_and_compose() {
        let a = Mat4::from_translation(Vec3::X);
        let b = Mat4::from_scale(Vec3::splat(2.0));
        let c = Mat4::from_rotation_z(0.25);

        assert_eq!(
            header_matrices(SurfaceType::Curve, &[a]),
            vec![a, Mat4::IDENTITY]
        );
        let merged = header_matrices(SurfaceType::GuideLine, &[a, b, c]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].abs_diff_eq(c * b * a, 1e-6));
        assert_eq!(header_matrices(SurfaceType::Diamond, &[a, b, c]), vec![a, c * b]);
    }

    #[test]
    fn document_starts_with_magic_and_ends_with_end_flag() {
        let diamond = SceneEntity::new(
            Entity::Diamond(Diamond {
                material: "Diamond".into(),
                shape: Mat4::IDENTITY,
                diamond_type: DiamondType::Pear,
                reserved: [0; 3],
            }),
            vec![Mat4::IDENTITY; 2],
        );
        let bytes = encode_document(&[diamond]).unwrap();
        assert_eq!(&bytes[..16], JCD_MAGIC);
        assert_eq!(bytes[16], FLAG_START);
        assert_eq!(bytes[17], SurfaceType::Diamond.tag());
        assert_eq!(bytes.last(), Some(&FLAG_END));
    }

    #[test]
    fn group_nodes_cannot_be_encoded() {
        let mut boolean = BoolSurface::new(BoolType::Union, [0; 2], SurfaceType::Curve, [0; 7]);
        let a = boolean.dag.add_primitive(curve_entity(0.0));
        let b = boolean.dag.add_primitive(curve_entity(1.0));
        let group = boolean.dag.add_group(vec![a, b]);
        let root = boolean.dag.add_boolean(BoolType::Union, group, a);
        boolean.set_root(root);
        let entity = SceneEntity::new(Entity::Boolean(boolean), vec![Mat4::IDENTITY; 3]);

        let err = encode_document(&[entity]).unwrap_err();
        assert!(matches!(err, IoError::UnsupportedFeature(_)));
    }

    #[test]
    fn same_operator_left_spine_becomes_one_group() {
        let mut boolean = BoolSurface::new(BoolType::Union, [0; 2], SurfaceType::Curve, [0; 7]);
        let a = boolean.dag.add_primitive(curve_entity(0.0));
        let b = boolean.dag.add_primitive(curve_entity(1.0));
        let c = boolean.dag.add_primitive(curve_entity(2.0));
        let ab = boolean.dag.add_boolean(BoolType::Union, a, b);
        let root = boolean.dag.add_boolean(BoolType::Union, ab, c);
        boolean.set_root(root);

        let group = group_of(&boolean, root).unwrap();
        assert_eq!(group.op, BoolType::Union);
        assert_eq!(group.items.len(), 3);
        assert!(group.items.iter().all(|item| matches!(item, Item::Leaf(_))));
    }

    #[test]
    fn surface_with_short_reserved_block_is_rejected() {
        let surface = SceneEntity::new(
            Entity::Surface(Surface {
                material: String::new(),
                points: Vec::new(),
                ring_count: 0,
                points_per_ring: 0,
                curve_type: CurveType::Open,
                reserved: vec![0; 3],
            }),
            vec![Mat4::IDENTITY; 2],
        );
        assert!(matches!(
            encode_document(&[surface]),
            Err(IoError::InvalidDocument(_))
        ));
    }
}
