use std::io::Read;

use glam::Mat4;
use jcd_core::document::{
    BlockType, BoolType, Curve, CurveType, Diamond, DiamondType, Entity, FontSurface, GuideLine,
    META_LEN, OutlineSpan, QuadType, Surface, SurfaceType,
};
use tracing::trace;

use crate::reader::PrimitiveReader;
use crate::{DecodeError, DecodeOptions};

pub const SURFACE_RESERVED_LEN: usize = 49;

/// 记录元信息：第 0 字节为类型标记，第 4 字节 bit 1 为隐藏标志，其余保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub raw: [u8; META_LEN],
    pub surface_type: SurfaceType,
    pub hidden: bool,
}

/// 一条记录（或嵌套在布尔头部之后）的类型相关载荷。
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    /// 非布尔实体及其头部矩阵。
    Concrete { matrices: Vec<Mat4>, entity: Entity },
    Boolean(BoolHeader),
}

impl EntityPayload {
    pub fn surface_type(&self) -> SurfaceType {
        match self {
            EntityPayload::Concrete { entity, .. } => entity.surface_type(),
            EntityPayload::Boolean(_) => SurfaceType::BoolSurface,
        }
    }
}

/// 布尔记录头部；`nested` 为紧随其后的子载荷，可能再次是布尔头部。
#[derive(Debug, Clone, PartialEq)]
pub struct BoolHeader {
    pub matrices: Vec<Mat4>,
    pub bool_type: BoolType,
    pub reserved_head: [u8; 2],
    pub nested_type: SurfaceType,
    pub reserved_tail: [u8; 7],
    pub nested: Box<EntityPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub meta: RecordMeta,
    pub payload: EntityPayload,
}

/// 解码 `:` 之后的一条完整记录（元信息 + 矩阵 + 载荷）。
///
/// 未知类型标记会中止整个解析：之后的游标位置已不可信。
pub fn decode_record<R: Read>(
    reader: &mut PrimitiveReader<R>,
    options: &DecodeOptions,
) -> Result<(SurfaceType, Record), DecodeError> {
    let meta_offset = reader.offset();
    let raw = reader.read_array::<META_LEN>("record meta")?;
    let surface_type = SurfaceType::from_tag(raw[0]).ok_or(DecodeError::UnknownEntityType {
        offset: meta_offset,
        tag: raw[0],
    })?;
    let meta = RecordMeta {
        raw,
        surface_type,
        hidden: raw[4] & 0b10 == 0b10,
    };
    let payload = decode_payload(reader, surface_type, 0, options)?;
    trace!(
        offset = meta_offset,
        surface_type = surface_type.name(),
        hidden = meta.hidden,
        "decoded record"
    );
    Ok((surface_type, Record { meta, payload }))
}

/// 按类型读取矩阵与载荷。`depth` 为已经穿过的布尔头部层数。
pub fn decode_payload<R: Read>(
    reader: &mut PrimitiveReader<R>,
    surface_type: SurfaceType,
    depth: usize,
    options: &DecodeOptions,
) -> Result<EntityPayload, DecodeError> {
    let matrices = reader.read_matrices(surface_type.base_matrix_count(), "base matrices")?;
    let entity = match surface_type {
        SurfaceType::Curve => Entity::Curve(read_curve(reader)?),
        SurfaceType::Surface => Entity::Surface(read_surface(reader)?),
        SurfaceType::Diamond => Entity::Diamond(read_diamond(reader)?),
        SurfaceType::FontSurface => Entity::FontSurface(read_font_surface(reader)?),
        SurfaceType::GuideLine => Entity::GuideLine(read_guide_line(reader)?),
        SurfaceType::QuadType => Entity::QuadType(read_quad_type(reader)?),
        SurfaceType::BoolSurface => {
            return read_bool_header(reader, matrices, depth, options).map(EntityPayload::Boolean);
        }
    };
    Ok(EntityPayload::Concrete { matrices, entity })
}

fn read_bool_header<R: Read>(
    reader: &mut PrimitiveReader<R>,
    matrices: Vec<Mat4>,
    depth: usize,
    options: &DecodeOptions,
) -> Result<BoolHeader, DecodeError> {
    let offset = reader.offset();
    if depth >= options.max_nesting_depth {
        return Err(DecodeError::NestingTooDeep {
            offset,
            limit: options.max_nesting_depth,
        });
    }
    let raw_type = reader.read_u8("bool type")?;
    let bool_type = BoolType::from_raw(raw_type).ok_or(DecodeError::UnknownEnumValue {
        offset,
        field: "bool type",
        value: raw_type.into(),
    })?;
    let reserved_head = reader.read_array("bool reserved")?;
    let tag_offset = reader.offset();
    let tag = reader.read_u8("nested surface type")?;
    let nested_type = SurfaceType::from_tag(tag).ok_or(DecodeError::UnknownEntityType {
        offset: tag_offset,
        tag,
    })?;
    let reserved_tail = reader.read_array("bool reserved")?;
    let nested = decode_payload(reader, nested_type, depth + 1, options)?;
    Ok(BoolHeader {
        matrices,
        bool_type,
        reserved_head,
        nested_type,
        reserved_tail,
        nested: Box::new(nested),
    })
}

struct RingLayout {
    material: String,
    points: Vec<glam::Vec4>,
    ring_count: u32,
    points_per_ring: u32,
    curve_type: CurveType,
}

/// 曲线与曲面共享的前半段：材质、控制点、环布局与曲线类型。
fn read_ring_layout<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<RingLayout, DecodeError> {
    let material = reader.read_string("material")?;
    let points = reader.read_point_block_f32("control points")?;
    let layout_offset = reader.offset();
    let ring_count = reader.read_u32("ring count")?;
    let points_per_ring = reader.read_u32("points per ring")?;
    if ring_count > 0
        && points_per_ring > 0
        && u64::from(ring_count) * u64::from(points_per_ring) != points.len() as u64
    {
        return Err(DecodeError::RingLayoutMismatch {
            offset: layout_offset,
            ring_count,
            points_per_ring,
            points: points.len(),
        });
    }
    let curve_type = read_enum(reader, "curve type", |raw| CurveType::from_raw(raw))?;
    Ok(RingLayout {
        material,
        points,
        ring_count,
        points_per_ring,
        curve_type,
    })
}

fn read_curve<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<Curve, DecodeError> {
    let layout = read_ring_layout(reader)?;
    let reserved = reader.read_array("curve reserved")?;
    Ok(Curve {
        material: layout.material,
        points: layout.points,
        ring_count: layout.ring_count,
        points_per_ring: layout.points_per_ring,
        curve_type: layout.curve_type,
        reserved,
    })
}

fn read_surface<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<Surface, DecodeError> {
    let layout = read_ring_layout(reader)?;
    let reserved = reader.read_vec(SURFACE_RESERVED_LEN, "surface reserved")?;
    Ok(Surface {
        material: layout.material,
        points: layout.points,
        ring_count: layout.ring_count,
        points_per_ring: layout.points_per_ring,
        curve_type: layout.curve_type,
        reserved,
    })
}

fn read_diamond<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<Diamond, DecodeError> {
    let material = reader.read_string("material")?;
    let shape = reader.read_matrix("diamond shape")?;
    let diamond_type = read_enum(reader, "diamond type", DiamondType::from_raw)?;
    let reserved = reader.read_array("diamond reserved")?;
    Ok(Diamond {
        material,
        shape,
        diamond_type,
        reserved,
    })
}

fn read_font_surface<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<FontSurface, DecodeError> {
    let material = reader.read_string("material")?;
    let shape = reader.read_matrix("font shape")?;
    let outline_count = reader.read_u32("outline count")?;
    let aux = [
        reader.read_u32("font aux")?,
        reader.read_u32("font aux")?,
        reader.read_u32("font aux")?,
    ];
    let foreground = read_block_type(reader, "foreground block type")?;
    let background = read_block_type(reader, "background block type")?;
    let thickness = reader.read_f32("thickness")?;
    let radius = reader.read_f32("radius")?;

    let mut outlines = Vec::with_capacity((outline_count as usize).min(1024));
    let mut total_points: usize = 0;
    for _ in 0..outline_count {
        let point_count = reader.read_u32("outline point count")?;
        let reserved = reader.read_array("outline reserved")?;
        total_points = total_points.saturating_add(point_count as usize);
        outlines.push(OutlineSpan {
            point_count,
            reserved,
        });
    }
    let points = reader.read_points3(total_points, "outline points")?;
    Ok(FontSurface {
        material,
        shape,
        aux,
        foreground,
        background,
        thickness,
        radius,
        outlines,
        points,
    })
}

fn read_guide_line<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<GuideLine, DecodeError> {
    let shape = reader.read_matrix("guide line shape")?;
    let reserved = reader.read_array("guide line reserved")?;
    let aux = [reader.read_u32("guide line aux")?, reader.read_u32("guide line aux")?];
    Ok(GuideLine {
        shape,
        reserved,
        aux,
    })
}

fn read_quad_type<R: Read>(reader: &mut PrimitiveReader<R>) -> Result<QuadType, DecodeError> {
    let material = reader.read_string("material")?;
    let points = reader.read_point_block_f32("quad vertices")?;
    let indices = reader.read_point_block_i32("quad indices")?;
    Ok(QuadType {
        material,
        points,
        indices,
    })
}

fn read_enum<R: Read, T>(
    reader: &mut PrimitiveReader<R>,
    field: &'static str,
    parse: impl FnOnce(u8) -> Option<T>,
) -> Result<T, DecodeError> {
    let offset = reader.offset();
    let raw = reader.read_u8(field)?;
    parse(raw).ok_or(DecodeError::UnknownEnumValue {
        offset,
        field,
        value: raw.into(),
    })
}

fn read_block_type<R: Read>(
    reader: &mut PrimitiveReader<R>,
    field: &'static str,
) -> Result<BlockType, DecodeError> {
    let offset = reader.offset();
    let raw = reader.read_u32(field)?;
    BlockType::from_raw(raw).ok_or(DecodeError::UnknownEnumValue {
        offset,
        field,
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use glam::{IVec4, Vec3, Vec4};
    use jcd_core::document::SceneEntity;

    use super::*;
    use crate::writer::JcdWriter;

    fn meta_for(surface_type: SurfaceType, hidden: bool) -> [u8; META_LEN] {
        let mut meta = [0u8; META_LEN];
        meta[0] = surface_type.tag();
        if hidden {
            meta[4] = 0b10;
        }
        meta
    }

    fn encode_record(entity: &SceneEntity) -> Vec<u8> {
        let mut writer = JcdWriter::new(Vec::new());
        writer.write_bytes(&entity.encoded_meta()).unwrap();
        writer
            .write_entity_body(&entity.entity, entity.transforms())
            .unwrap();
        writer.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<(SurfaceType, Record), DecodeError> {
        let mut reader = PrimitiveReader::from_bytes(bytes);
        let decoded = decode_record(&mut reader, &DecodeOptions::default())?;
        assert_eq!(reader.offset(), bytes.len() as u64, "record must consume all bytes");
        Ok(decoded)
    }

    fn identity(count: usize) -> Vec<Mat4> {
        vec![Mat4::IDENTITY; count]
    }

    #[test]
    fn decodes_each_concrete_variant() {
        let entities = vec![
            Entity::Curve(Curve {
                material: "Gold".into(),
                points: vec![Vec4::new(0.0, 0.0, 0.0, 1.0); 3],
                ring_count: 1,
                points_per_ring: 3,
                curve_type: CurveType::Closed,
                reserved: [9; 9],
            }),
            Entity::Surface(Surface {
                material: "Platinum".into(),
                points: vec![Vec4::ONE; 4],
                ring_count: 2,
                points_per_ring: 2,
                curve_type: CurveType::Open,
                reserved: (0..49).collect(),
            }),
            Entity::Diamond(Diamond {
                material: "Diamond".into(),
                shape: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
                diamond_type: DiamondType::Heart,
                reserved: [1, 2, 3],
            }),
            Entity::FontSurface(FontSurface {
                material: "Silver".into(),
                shape: Mat4::from_scale(Vec3::splat(0.5)),
                aux: [7, 8, 9],
                foreground: BlockType::Round,
                background: BlockType::Cut,
                thickness: 0.8,
                radius: 0.1,
                outlines: vec![
                    OutlineSpan { point_count: 2, reserved: [0xaa; 4] },
                    OutlineSpan { point_count: 1, reserved: [0; 4] },
                ],
                points: vec![Vec3::X, Vec3::Y, Vec3::Z],
            }),
            Entity::GuideLine(GuideLine {
                shape: Mat4::from_rotation_x(0.5),
                reserved: [4, 3, 2, 1],
                aux: [11, 12],
            }),
            Entity::QuadType(QuadType {
                material: "Wax".into(),
                points: vec![Vec4::ZERO, Vec4::X, Vec4::Y, Vec4::ONE],
                indices: vec![IVec4::new(0, 1, 3, 2)],
            }),
        ];

        for entity in entities {
            let surface_type = entity.surface_type();
            let matrices = identity(surface_type.base_matrix_count());
            let scene = SceneEntity::with_meta(entity.clone(), matrices.clone(), meta_for(surface_type, true));
            let (decoded_type, record) = decode(&encode_record(&scene)).expect("decode record");
            assert_eq!(decoded_type, surface_type);
            assert!(record.meta.hidden);
            assert_eq!(record.payload, EntityPayload::Concrete { matrices, entity });
        }
    }

    #[test]
    fn unknown_surface_tag_is_rejected() {
        let mut bytes = vec![250u8, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0u8; 64]);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownEntityType { tag: 250, offset: 0 }
        ));
    }

    #[test]
    fn ring_layout_must_match_point_count() {
        let curve = Entity::Curve(Curve {
            material: String::new(),
            points: vec![Vec4::ZERO; 4],
            ring_count: 2,
            points_per_ring: 3,
            curve_type: CurveType::Open,
            reserved: [0; 9],
        });
        let scene = SceneEntity::new(curve, identity(2));
        let err = decode(&encode_record(&scene)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::RingLayoutMismatch {
                ring_count: 2,
                points_per_ring: 3,
                points: 4,
                ..
            }
        ));
    }

    #[test]
    fn unknown_diamond_type_is_rejected() {
        let diamond = Entity::Diamond(Diamond {
            material: String::new(),
            shape: Mat4::IDENTITY,
            diamond_type: DiamondType::Round,
            reserved: [0; 3],
        });
        let mut bytes = encode_record(&SceneEntity::new(diamond, identity(2)));
        // 元信息 8 + 矩阵 2×64+4 + 空材质 4 + 形状矩阵 64 之后是钻石类型字节
        let type_offset = 8 + 132 + 4 + 64;
        bytes[type_offset] = 5;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownEnumValue {
                field: "diamond type",
                value: 5,
                ..
            }
        ));
    }

    #[test]
    fn nested_bool_headers_are_bounded() {
        // 三层布尔头部嵌套一条曲线
        let mut writer = JcdWriter::new(Vec::new());
        writer.write_bytes(&meta_for(SurfaceType::BoolSurface, false)).unwrap();
        for _ in 0..3 {
            writer.write_matrices(&identity(3)).unwrap();
            writer.write_u8(BoolType::Union.raw()).unwrap();
            writer.write_bytes(&[0; 2]).unwrap();
            writer.write_u8(SurfaceType::BoolSurface.tag()).unwrap();
            writer.write_bytes(&[0; 7]).unwrap();
        }
        let bytes = writer.into_inner();

        let mut reader = PrimitiveReader::from_bytes(&bytes);
        let options = DecodeOptions {
            max_nesting_depth: 2,
        };
        let err = decode_record(&mut reader, &options).unwrap_err();
        assert!(matches!(err, DecodeError::NestingTooDeep { limit: 2, .. }));
    }

    #[test]
    fn bool_header_wraps_nested_payload() {
        let curve = Curve {
            material: "Gold".into(),
            points: vec![Vec4::ONE],
            ring_count: 1,
            points_per_ring: 1,
            curve_type: CurveType::Open,
            reserved: [0; 9],
        };
        let mut writer = JcdWriter::new(Vec::new());
        writer.write_bytes(&meta_for(SurfaceType::BoolSurface, false)).unwrap();
        writer.write_matrices(&identity(3)).unwrap();
        writer.write_u8(BoolType::Difference.raw()).unwrap();
        writer.write_bytes(&[5, 6]).unwrap();
        writer.write_u8(SurfaceType::Curve.tag()).unwrap();
        writer.write_bytes(&[1; 7]).unwrap();
        writer
            .write_entity_body(&Entity::Curve(curve.clone()), &identity(2))
            .unwrap();
        let bytes = writer.into_inner();

        let (surface_type, record) = decode(&bytes).expect("decode bool");
        assert_eq!(surface_type, SurfaceType::BoolSurface);
        let EntityPayload::Boolean(header) = record.payload else {
            panic!("expected bool header");
        };
        assert_eq!(header.bool_type, BoolType::Difference);
        assert_eq!(header.reserved_head, [5, 6]);
        assert_eq!(header.reserved_tail, [1; 7]);
        assert_eq!(header.nested_type, SurfaceType::Curve);
        assert_eq!(header.matrices.len(), 3);
        assert_eq!(
            *header.nested,
            EntityPayload::Concrete {
                matrices: identity(2),
                entity: Entity::Curve(curve),
            }
        );
    }
}
