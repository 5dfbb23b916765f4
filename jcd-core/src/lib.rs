pub mod dag;

pub mod geometry {
    use glam::{Mat4, Vec3, Vec4};
    use serde::{Deserialize, Serialize};

    /// 将文件中按行主序存放的 16 个 float32 转换为 `Mat4`（列向量约定，平移位于第 4 列）。
    #[inline]
    pub fn matrix_from_row_major(values: [f32; 16]) -> Mat4 {
        Mat4::from_cols_array(&values).transpose()
    }

    /// `matrix_from_row_major` 的逆操作，供编码器写回文件。
    #[inline]
    pub fn matrix_to_row_major(matrix: &Mat4) -> [f32; 16] {
        matrix.transpose().to_cols_array()
    }

    /// 矩阵平移分量（第 4 列的前三项）。
    #[inline]
    pub fn translation_of(matrix: &Mat4) -> Vec3 {
        matrix.w_axis.truncate()
    }

    #[inline]
    pub fn homogeneous(point: Vec3) -> Vec4 {
        point.extend(1.0)
    }

    /// 按 JCD 约定对齐次点应用变换链：先应用实体自身的形状矩阵，
    /// 再依列表顺序左乘继承矩阵（越靠后的矩阵越“外层”）。
    ///
    /// 逐个矩阵相乘，不预先合并。
    pub fn apply_chain(points: &[Vec4], shape: Option<&Mat4>, chain: &[Mat4]) -> Vec<Vec3> {
        points
            .iter()
            .map(|point| {
                let mut current = *point;
                if let Some(shape) = shape {
                    current = *shape * current;
                }
                for matrix in chain {
                    current = *matrix * current;
                }
                current.truncate()
            })
            .collect()
    }

    /// 合并后的单个矩阵 `Mₙ · … · M₁ · S`。
    pub fn compose_chain(shape: Option<&Mat4>, chain: &[Mat4]) -> Mat4 {
        let mut result = shape.copied().unwrap_or(Mat4::IDENTITY);
        for matrix in chain {
            result = *matrix * result;
        }
        result
    }

    /// 三维轴对齐包围盒，用于估算实体与场景范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds3D {
        min: Vec3,
        max: Vec3,
    }

    impl Bounds3D {
        #[inline]
        pub fn new(min: Vec3, max: Vec3) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Vec3::splat(f32::INFINITY),
                max: Vec3::splat(f32::NEG_INFINITY),
            }
        }

        /// 由点集构造包围盒，点集为空时返回 `None`。
        pub fn from_points<I>(points: I) -> Option<Self>
        where
            I: IntoIterator<Item = Vec3>,
        {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
        }

        #[inline]
        pub fn min(&self) -> Vec3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Vec3 {
            self.max
        }

        pub fn include_point(&mut self, point: Vec3) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = self.min.min(point);
            self.max = self.max.max(point);
        }

        pub fn include_bounds(&mut self, other: &Bounds3D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        #[inline]
        pub fn center(&self) -> Vec3 {
            debug_assert!(!self.is_empty());
            (self.min + self.max) * 0.5
        }

        #[inline]
        pub fn size(&self) -> Vec3 {
            if self.is_empty() {
                Vec3::ZERO
            } else {
                self.max - self.min
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn row_major_conversion_places_translation_in_last_column() {
            let values = [
                1.0, 0.0, 0.0, 5.0, //
                0.0, 1.0, 0.0, 6.0, //
                0.0, 0.0, 1.0, 7.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            let matrix = matrix_from_row_major(values);
            assert_eq!(translation_of(&matrix), Vec3::new(5.0, 6.0, 7.0));
            assert_eq!(matrix_to_row_major(&matrix), values);

            let moved = matrix * Vec4::new(1.0, 1.0, 1.0, 1.0);
            assert_eq!(moved, Vec4::new(6.0, 7.0, 8.0, 1.0));
        }

        #[test]
        fn chain_applies_shape_then_inherited_in_order() {
            let shape = Mat4::from_scale(Vec3::splat(2.0));
            let first = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
            let second = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
            let point = Vec4::new(1.0, 0.0, 0.0, 1.0);

            let result = apply_chain(&[point], Some(&shape), &[first, second]);
            let expected = (second * (first * (shape * point))).truncate();
            assert_eq!(result, vec![expected]);
            // (2,0,0) -> (3,0,0) -> 旋转 90° 后约为 (0,3,0)
            assert!((result[0] - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);

            let swapped = apply_chain(&[point], Some(&shape), &[second, first]);
            assert!((swapped[0] - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
        }

        #[test]
        fn composed_matrix_matches_sequential_application() {
            let shape = Mat4::from_translation(Vec3::new(0.0, 0.0, 4.0));
            let chain = [
                Mat4::from_scale(Vec3::new(1.0, 2.0, 3.0)),
                Mat4::from_translation(Vec3::new(-1.0, 0.0, 0.0)),
            ];
            let composed = compose_chain(Some(&shape), &chain);
            let point = Vec4::new(1.0, 1.0, 1.0, 1.0);
            let sequential = apply_chain(&[point], Some(&shape), &chain)[0];
            assert!(((composed * point).truncate() - sequential).length() < 1e-5);
            assert_eq!(compose_chain(None, &[]), Mat4::IDENTITY);
        }

        #[test]
        fn bounds_accumulate_points() {
            assert!(Bounds3D::from_points(Vec::new()).is_none());

            let bounds = Bounds3D::from_points([
                Vec3::new(1.0, -2.0, 0.5),
                Vec3::new(-1.0, 4.0, 0.0),
                Vec3::new(0.0, 0.0, 3.0),
            ])
            .expect("bounds");
            assert_eq!(bounds.min(), Vec3::new(-1.0, -2.0, 0.0));
            assert_eq!(bounds.max(), Vec3::new(1.0, 4.0, 3.0));
            assert_eq!(bounds.center(), Vec3::new(0.0, 1.0, 1.5));
            assert_eq!(bounds.size(), Vec3::new(2.0, 6.0, 3.0));

            let mut merged = Bounds3D::empty();
            merged.include_bounds(&Bounds3D::empty());
            assert!(merged.is_empty());
            merged.include_bounds(&bounds);
            assert_eq!(merged, bounds);
        }
    }
}

pub mod document {
    use glam::{IVec4, Mat4, Vec3, Vec4};
    use serde::{Deserialize, Serialize};

    use crate::dag::{CsgDag, NodeId};
    use crate::geometry::{self, Bounds3D};

    /// 文件魔数，所有 JCD 文件以此 16 字节 ASCII 开头。
    pub const JCD_MAGIC: &[u8; 16] = b"SILKIDEASIGN0100";

    /// 记录元信息字节数（类型标记 + 隐藏标志 + 保留字节）。
    pub const META_LEN: usize = 8;

    const HIDDEN_BIT: u8 = 0b10;

    /// 记录的曲面类型标记（元信息第 0 字节）。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum SurfaceType {
        Curve,
        Surface,
        QuadType,
        FontSurface,
        BoolSurface,
        GuideLine,
        Diamond,
    }

    impl SurfaceType {
        pub const ALL: [SurfaceType; 7] = [
            SurfaceType::Curve,
            SurfaceType::Surface,
            SurfaceType::QuadType,
            SurfaceType::FontSurface,
            SurfaceType::BoolSurface,
            SurfaceType::GuideLine,
            SurfaceType::Diamond,
        ];

        pub fn from_tag(tag: u8) -> Option<Self> {
            match tag {
                2 => Some(Self::Curve),
                3 => Some(Self::Surface),
                4 => Some(Self::QuadType),
                5 => Some(Self::FontSurface),
                32 => Some(Self::BoolSurface),
                90 => Some(Self::GuideLine),
                99 => Some(Self::Diamond),
                _ => None,
            }
        }

        #[inline]
        pub fn tag(self) -> u8 {
            match self {
                Self::Curve => 2,
                Self::Surface => 3,
                Self::QuadType => 4,
                Self::FontSurface => 5,
                Self::BoolSurface => 32,
                Self::GuideLine => 90,
                Self::Diamond => 99,
            }
        }

        /// 记录头部紧随的继承矩阵数量。
        #[inline]
        pub fn base_matrix_count(self) -> usize {
            match self {
                Self::BoolSurface => 3,
                Self::GuideLine => 1,
                _ => 2,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::Curve => "CURVE",
                Self::Surface => "SURFACE",
                Self::QuadType => "QUAD_TYPE",
                Self::FontSurface => "FONT_SURFACE",
                Self::BoolSurface => "BOOL_SURFACE",
                Self::GuideLine => "GUIDE_LINE",
                Self::Diamond => "DIAMOND",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum CurveType {
        Open,
        Closed,
    }

    impl CurveType {
        pub fn from_raw(raw: u8) -> Option<Self> {
            match raw {
                0 => Some(Self::Open),
                1 => Some(Self::Closed),
                _ => None,
            }
        }

        #[inline]
        pub fn raw(self) -> u8 {
            match self {
                Self::Open => 0,
                Self::Closed => 1,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::Open => "open",
                Self::Closed => "closed",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DiamondType {
        Round,
        Marquise,
        Pear,
        Heart,
        Octagon,
        Square,
        Triangle,
    }

    impl DiamondType {
        pub fn from_raw(raw: u8) -> Option<Self> {
            match raw {
                0 => Some(Self::Round),
                1 => Some(Self::Marquise),
                2 => Some(Self::Pear),
                3 => Some(Self::Heart),
                4 => Some(Self::Octagon),
                8 => Some(Self::Square),
                9 => Some(Self::Triangle),
                _ => None,
            }
        }

        #[inline]
        pub fn raw(self) -> u8 {
            match self {
                Self::Round => 0,
                Self::Marquise => 1,
                Self::Pear => 2,
                Self::Heart => 3,
                Self::Octagon => 4,
                Self::Square => 8,
                Self::Triangle => 9,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::Round => "round",
                Self::Marquise => "marquise",
                Self::Pear => "pear",
                Self::Heart => "heart",
                Self::Octagon => "octagon",
                Self::Square => "square",
                Self::Triangle => "triangle",
            }
        }
    }

    /// 字体面片前景/背景的倒角形式。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum BlockType {
        Angle,
        Round,
        Cut,
    }

    impl BlockType {
        pub fn from_raw(raw: u32) -> Option<Self> {
            match raw {
                0 => Some(Self::Angle),
                1 => Some(Self::Round),
                2 => Some(Self::Cut),
                _ => None,
            }
        }

        #[inline]
        pub fn raw(self) -> u32 {
            match self {
                Self::Angle => 0,
                Self::Round => 1,
                Self::Cut => 2,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::Angle => "angle",
                Self::Round => "round",
                Self::Cut => "cut",
            }
        }
    }

    /// 布尔运算类型。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum BoolType {
        Union,
        Intersect,
        Difference,
    }

    impl BoolType {
        pub fn from_raw(raw: u8) -> Option<Self> {
            match raw {
                2 => Some(Self::Union),
                3 => Some(Self::Intersect),
                4 => Some(Self::Difference),
                _ => None,
            }
        }

        #[inline]
        pub fn raw(self) -> u8 {
            match self {
                Self::Union => 2,
                Self::Intersect => 3,
                Self::Difference => 4,
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::Union => "union",
                Self::Intersect => "intersect",
                Self::Difference => "difference",
            }
        }
    }

    /// 曲线：齐次控制点按环存放，`ring_count × points_per_ring` 等于点数。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Curve {
        pub material: String,
        pub points: Vec<Vec4>,
        pub ring_count: u32,
        pub points_per_ring: u32,
        pub curve_type: CurveType,
        pub reserved: [u8; 9],
    }

    impl Curve {
        #[inline]
        pub fn is_closed(&self) -> bool {
            self.curve_type == CurveType::Closed
        }

        pub fn ring(&self, index: usize) -> Option<&[Vec4]> {
            ring_slice(&self.points, self.ring_count, self.points_per_ring, index)
        }

        pub fn rings(&self) -> Vec<&[Vec4]> {
            if self.points_per_ring == 0 {
                return Vec::new();
            }
            (0..self.ring_count as usize)
                .filter_map(|index| self.ring(index))
                .collect()
        }
    }

    /// 曲面：控制点网格（U 方向 `ring_count` 条，V 方向每条 `points_per_ring` 个点）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Surface {
        pub material: String,
        pub points: Vec<Vec4>,
        pub ring_count: u32,
        pub points_per_ring: u32,
        pub curve_type: CurveType,
        /// 49 字节保留区，语义未知，原样保存以便回写。
        pub reserved: Vec<u8>,
    }

    impl Surface {
        /// 扫掠路径是否闭合，取自记录中的曲线类型字节。
        #[inline]
        pub fn is_path_closed(&self) -> bool {
            self.curve_type == CurveType::Closed
        }

        /// 截面是否闭合：每个环的首尾控制点重合。
        pub fn is_cross_section_closed(&self) -> bool {
            let rings = self.rings();
            !rings.is_empty()
                && rings.iter().all(|ring| match (ring.first(), ring.last()) {
                    (Some(first), Some(last)) if ring.len() > 1 => {
                        (first.truncate() - last.truncate()).length_squared() <= f32::EPSILON
                    }
                    _ => false,
                })
        }

        pub fn ring(&self, index: usize) -> Option<&[Vec4]> {
            ring_slice(&self.points, self.ring_count, self.points_per_ring, index)
        }

        pub fn rings(&self) -> Vec<&[Vec4]> {
            if self.points_per_ring == 0 {
                return Vec::new();
            }
            (0..self.ring_count as usize)
                .filter_map(|index| self.ring(index))
                .collect()
        }

        /// 固定 U 索引得到的控制点行。
        pub fn grid_u(&self, u: usize) -> Option<Vec<Vec4>> {
            if !self.has_complete_grid() {
                return None;
            }
            self.ring(u).map(<[Vec4]>::to_vec)
        }

        /// 固定 V 索引得到的控制点列。
        pub fn grid_v(&self, v: usize) -> Option<Vec<Vec4>> {
            if !self.has_complete_grid() || v >= self.points_per_ring as usize {
                return None;
            }
            let stride = self.points_per_ring as usize;
            Some(
                (0..self.ring_count as usize)
                    .map(|u| self.points[u * stride + v])
                    .collect(),
            )
        }

        fn has_complete_grid(&self) -> bool {
            self.ring_count > 0
                && self.points_per_ring > 0
                && (self.ring_count as usize) * (self.points_per_ring as usize)
                    == self.points.len()
        }
    }

    fn ring_slice(
        points: &[Vec4],
        ring_count: u32,
        points_per_ring: u32,
        index: usize,
    ) -> Option<&[Vec4]> {
        if index >= ring_count as usize || points_per_ring == 0 {
            return None;
        }
        let start = index * points_per_ring as usize;
        let end = start + points_per_ring as usize;
        points.get(start..end)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Diamond {
        pub material: String,
        pub shape: Mat4,
        pub diamond_type: DiamondType,
        pub reserved: [u8; 3],
    }

    impl Diamond {
        /// 钻石中心，即形状矩阵的平移列。
        #[inline]
        pub fn position(&self) -> Vec3 {
            geometry::translation_of(&self.shape)
        }
    }

    /// 字体面片中单个轮廓的头部（点数 + 4 个保留字节）。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OutlineSpan {
        pub point_count: u32,
        pub reserved: [u8; 4],
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct FontSurface {
        pub material: String,
        pub shape: Mat4,
        pub aux: [u32; 3],
        pub foreground: BlockType,
        pub background: BlockType,
        pub thickness: f32,
        pub radius: f32,
        pub outlines: Vec<OutlineSpan>,
        /// 所有轮廓点依次展平存放。
        pub points: Vec<Vec3>,
    }

    impl FontSurface {
        #[inline]
        pub fn outline_count(&self) -> usize {
            self.outlines.len()
        }

        pub fn outline(&self, index: usize) -> Option<&[Vec3]> {
            let span = self.outlines.get(index)?;
            let start: usize = self.outlines[..index]
                .iter()
                .map(|span| span.point_count as usize)
                .sum();
            self.points.get(start..start + span.point_count as usize)
        }

        pub fn outlines(&self) -> Vec<&[Vec3]> {
            (0..self.outlines.len())
                .filter_map(|index| self.outline(index))
                .collect()
        }
    }

    /// 辅助线：只有一个继承矩阵，自身形状矩阵描述位置与朝向。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct GuideLine {
        pub shape: Mat4,
        pub reserved: [u8; 4],
        pub aux: [u32; 2],
    }

    impl GuideLine {
        #[inline]
        pub fn position(&self) -> Vec3 {
            geometry::translation_of(&self.shape)
        }

        /// 形状矩阵的 Z 轴方向，退化时回退到 +Z。
        pub fn direction(&self) -> Vec3 {
            let axis = self.shape.z_axis.truncate();
            if axis.length_squared() > f32::EPSILON {
                axis.normalize()
            } else {
                Vec3::Z
            }
        }
    }

    /// 四边形面片：齐次顶点与四元索引。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct QuadType {
        pub material: String,
        pub points: Vec<Vec4>,
        pub indices: Vec<IVec4>,
    }

    impl QuadType {
        /// 返回指定四边形的四个顶点，索引越界时返回 `None`。
        pub fn quad(&self, index: usize) -> Option<[Vec4; 4]> {
            let indices = self.indices.get(index)?;
            let mut corners = [Vec4::ZERO; 4];
            for (slot, raw) in corners.iter_mut().zip(indices.to_array()) {
                let vertex = usize::try_from(raw).ok()?;
                *slot = *self.points.get(vertex)?;
            }
            Some(corners)
        }

        pub fn quads(&self) -> Vec<[Vec4; 4]> {
            (0..self.indices.len())
                .filter_map(|index| self.quad(index))
                .collect()
        }

        /// 每个四边形的单位法向（由前三个顶点求得），无效四边形为零向量。
        pub fn normals(&self) -> Vec<Vec3> {
            (0..self.indices.len())
                .map(|index| match self.quad(index) {
                    Some(corners) => {
                        let edge_a = corners[1].truncate() - corners[0].truncate();
                        let edge_b = corners[2].truncate() - corners[0].truncate();
                        edge_a.cross(edge_b).normalize_or_zero()
                    }
                    None => Vec3::ZERO,
                })
                .collect()
        }
    }

    /// 布尔曲面：每个顶层布尔记录拥有独立的 DAG。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BoolSurface {
        pub bool_type: BoolType,
        pub reserved_head: [u8; 2],
        pub nested_type: SurfaceType,
        pub reserved_tail: [u8; 7],
        pub dag: CsgDag,
        root: Option<NodeId>,
        /// 文件结束时仍有未闭合分组，DAG 由残留帧折叠得到。
        pub truncated: bool,
    }

    impl BoolSurface {
        pub fn new(
            bool_type: BoolType,
            reserved_head: [u8; 2],
            nested_type: SurfaceType,
            reserved_tail: [u8; 7],
        ) -> Self {
            Self {
                bool_type,
                reserved_head,
                nested_type,
                reserved_tail,
                dag: CsgDag::new(),
                root: None,
                truncated: false,
            }
        }

        #[inline]
        pub fn root(&self) -> Option<NodeId> {
            self.root
        }

        /// 设置根节点。根节点只允许设置一次，重复设置返回 `false` 且不修改。
        pub fn set_root(&mut self, root: NodeId) -> bool {
            if self.root.is_some() {
                return false;
            }
            self.root = Some(root);
            true
        }

        /// 从根节点可达的原始曲面数量。
        pub fn primitive_count(&self) -> usize {
            self.root
                .map(|root| self.dag.primitives_under(root).len())
                .unwrap_or(0)
        }

        /// 从根节点可达的布尔运算节点数量。
        pub fn boolean_op_count(&self) -> usize {
            self.root
                .map(|root| self.dag.boolean_ops_under(root))
                .unwrap_or(0)
        }

        pub fn print_tree(&self) -> String {
            match self.root {
                Some(root) => self.dag.render_tree(root),
                None => String::from("<empty>\n"),
            }
        }

        /// 所有原始曲面的变换后点集（各自的继承矩阵已应用）。
        pub fn primitive_points(&self) -> Vec<Vec3> {
            let Some(root) = self.root else {
                return Vec::new();
            };
            self.dag
                .primitives_under(root)
                .into_iter()
                .flat_map(SceneEntity::transformed_points)
                .collect()
        }

        pub fn combined_bounds(&self) -> Option<Bounds3D> {
            Bounds3D::from_points(self.primitive_points())
        }
    }

    /// JCD 实体的封闭集合，一个变体对应一种记录类型。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Entity {
        Curve(Curve),
        Surface(Surface),
        Diamond(Diamond),
        FontSurface(FontSurface),
        GuideLine(GuideLine),
        QuadType(QuadType),
        Boolean(BoolSurface),
    }

    impl Entity {
        pub fn surface_type(&self) -> SurfaceType {
            match self {
                Entity::Curve(_) => SurfaceType::Curve,
                Entity::Surface(_) => SurfaceType::Surface,
                Entity::Diamond(_) => SurfaceType::Diamond,
                Entity::FontSurface(_) => SurfaceType::FontSurface,
                Entity::GuideLine(_) => SurfaceType::GuideLine,
                Entity::QuadType(_) => SurfaceType::QuadType,
                Entity::Boolean(_) => SurfaceType::BoolSurface,
            }
        }

        pub fn material(&self) -> Option<&str> {
            match self {
                Entity::Curve(curve) => Some(&curve.material),
                Entity::Surface(surface) => Some(&surface.material),
                Entity::Diamond(diamond) => Some(&diamond.material),
                Entity::FontSurface(font) => Some(&font.material),
                Entity::QuadType(quad) => Some(&quad.material),
                Entity::GuideLine(_) | Entity::Boolean(_) => None,
            }
        }

        /// 实体自带的形状矩阵（钻石、字体面片、辅助线）。
        pub fn shape_matrix(&self) -> Option<&Mat4> {
            match self {
                Entity::Diamond(diamond) => Some(&diamond.shape),
                Entity::FontSurface(font) => Some(&font.shape),
                Entity::GuideLine(line) => Some(&line.shape),
                _ => None,
            }
        }

        /// 原始控制点数量，布尔曲面统计其所有原始曲面。
        pub fn control_point_count(&self) -> usize {
            match self {
                Entity::Curve(curve) => curve.points.len(),
                Entity::Surface(surface) => surface.points.len(),
                Entity::FontSurface(font) => font.points.len(),
                Entity::QuadType(quad) => quad.points.len(),
                Entity::Diamond(_) | Entity::GuideLine(_) => 0,
                Entity::Boolean(boolean) => boolean
                    .root()
                    .map(|root| {
                        boolean
                            .dag
                            .primitives_under(root)
                            .iter()
                            .map(|primitive| primitive.entity.control_point_count())
                            .sum()
                    })
                    .unwrap_or(0),
            }
        }

        /// 形状矩阵作用之前的齐次点。
        fn model_points(&self) -> Vec<Vec4> {
            match self {
                Entity::Curve(curve) => curve.points.clone(),
                Entity::Surface(surface) => surface.points.clone(),
                Entity::QuadType(quad) => quad.points.clone(),
                Entity::FontSurface(font) => {
                    font.points.iter().copied().map(geometry::homogeneous).collect()
                }
                Entity::Diamond(_) | Entity::GuideLine(_) => vec![Vec4::W],
                Entity::Boolean(boolean) => boolean
                    .primitive_points()
                    .into_iter()
                    .map(geometry::homogeneous)
                    .collect(),
            }
        }

        /// 实体局部坐标下的点：控制点原样返回，钻石与辅助线取形状矩阵的平移列。
        pub fn local_points(&self) -> Vec<Vec3> {
            match self {
                Entity::Diamond(diamond) => vec![diamond.position()],
                Entity::GuideLine(line) => vec![line.position()],
                Entity::FontSurface(font) => font.points.clone(),
                Entity::Boolean(boolean) => boolean.primitive_points(),
                other => other.model_points().iter().map(|p| p.truncate()).collect(),
            }
        }
    }

    /// 场景中的一个实体：记录元信息、继承的变换链与具体几何。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SceneEntity {
        pub meta: [u8; META_LEN],
        hidden: bool,
        transforms: Vec<Mat4>,
        pub entity: Entity,
    }

    impl SceneEntity {
        /// 以记录头部读出的矩阵作为初始继承变换链。
        pub fn new(entity: Entity, transforms: Vec<Mat4>) -> Self {
            let mut meta = [0u8; META_LEN];
            meta[0] = entity.surface_type().tag();
            Self {
                meta,
                hidden: false,
                transforms,
                entity,
            }
        }

        /// 使用文件中的原始元信息构造，隐藏标志取自第 4 字节的 bit 1。
        pub fn with_meta(entity: Entity, transforms: Vec<Mat4>, meta: [u8; META_LEN]) -> Self {
            Self {
                hidden: meta[4] & HIDDEN_BIT == HIDDEN_BIT,
                meta,
                transforms,
                entity,
            }
        }

        #[inline]
        pub fn surface_type(&self) -> SurfaceType {
            self.entity.surface_type()
        }

        #[inline]
        pub fn is_hidden(&self) -> bool {
            self.hidden
        }

        pub fn hide(&mut self) {
            self.hidden = true;
        }

        pub fn show(&mut self) {
            self.hidden = false;
        }

        /// 写回文件时使用的元信息：类型标记与隐藏位同步为当前状态。
        pub fn encoded_meta(&self) -> [u8; META_LEN] {
            let mut meta = self.meta;
            meta[0] = self.surface_type().tag();
            if self.hidden {
                meta[4] |= HIDDEN_BIT;
            } else {
                meta[4] &= !HIDDEN_BIT;
            }
            meta
        }

        #[inline]
        pub fn transforms(&self) -> &[Mat4] {
            &self.transforms
        }

        /// 追加一个外层变换。变换链只允许追加。
        pub fn push_transform(&mut self, matrix: Mat4) {
            self.transforms.push(matrix);
        }

        #[inline]
        pub fn local_points(&self) -> Vec<Vec3> {
            self.entity.local_points()
        }

        pub fn transformed_points(&self) -> Vec<Vec3> {
            geometry::apply_chain(
                &self.entity.model_points(),
                self.entity.shape_matrix(),
                &self.transforms,
            )
        }

        pub fn composed_matrix(&self) -> Mat4 {
            geometry::compose_chain(self.entity.shape_matrix(), &self.transforms)
        }

        pub fn bounds(&self) -> Option<Bounds3D> {
            Bounds3D::from_points(self.local_points())
        }

        pub fn transformed_bounds(&self) -> Option<Bounds3D> {
            Bounds3D::from_points(self.transformed_points())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 解码完成的实体集合，按文件顺序编号。
    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Document {
        entities: Vec<(EntityId, SceneEntity)>,
        next_entity_id: u64,
    }

    impl Document {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_entities<I>(entities: I) -> Self
        where
            I: IntoIterator<Item = SceneEntity>,
        {
            let mut document = Self::new();
            for entity in entities {
                document.add_entity(entity);
            }
            document
        }

        pub fn add_entity(&mut self, entity: SceneEntity) -> EntityId {
            let id = self.next_id();
            self.entities.push((id, entity));
            id
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.entities.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.entities.is_empty()
        }

        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, SceneEntity)> {
            self.entities.iter()
        }

        pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut (EntityId, SceneEntity)> {
            self.entities.iter_mut()
        }

        pub fn entity(&self, id: EntityId) -> Option<&SceneEntity> {
            self.entities
                .iter()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut SceneEntity> {
            self.entities
                .iter_mut()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        #[inline]
        pub fn entity_bounds(&self, id: EntityId) -> Option<Bounds3D> {
            self.entity(id).and_then(SceneEntity::transformed_bounds)
        }

        /// 所有实体变换后范围的并集。
        pub fn bounds(&self) -> Option<Bounds3D> {
            let mut bounds = Bounds3D::empty();
            let mut has = false;
            for (_, entity) in &self.entities {
                if let Some(entity_bounds) = entity.transformed_bounds() {
                    bounds.include_bounds(&entity_bounds);
                    has = true;
                }
            }
            if has { Some(bounds) } else { None }
        }

        pub fn into_entities(self) -> Vec<SceneEntity> {
            self.entities.into_iter().map(|(_, entity)| entity).collect()
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::f32::consts::FRAC_PI_2;

        fn sample_curve() -> Curve {
            Curve {
                material: "Gold".to_string(),
                points: vec![
                    Vec4::new(0.0, 0.0, 0.0, 1.0),
                    Vec4::new(1.0, 0.0, 0.0, 1.0),
                    Vec4::new(1.0, 1.0, 0.0, 1.0),
                    Vec4::new(0.0, 1.0, 2.0, 1.0),
                ],
                ring_count: 2,
                points_per_ring: 2,
                curve_type: CurveType::Open,
                reserved: [0; 9],
            }
        }

        #[test]
        fn surface_type_tags_round_trip() {
            for surface_type in SurfaceType::ALL {
                assert_eq!(SurfaceType::from_tag(surface_type.tag()), Some(surface_type));
            }
            assert_eq!(SurfaceType::from_tag(250), None);
            assert_eq!(SurfaceType::BoolSurface.base_matrix_count(), 3);
            assert_eq!(SurfaceType::GuideLine.base_matrix_count(), 1);
            assert_eq!(SurfaceType::Diamond.base_matrix_count(), 2);
        }

        #[test]
        fn enum_codes_follow_file_values() {
            assert_eq!(DiamondType::from_raw(8), Some(DiamondType::Square));
            assert_eq!(DiamondType::from_raw(5), None);
            assert_eq!(BoolType::from_raw(4), Some(BoolType::Difference));
            assert_eq!(BoolType::from_raw(1), None);
            assert_eq!(BlockType::from_raw(2), Some(BlockType::Cut));
            assert_eq!(CurveType::from_raw(1), Some(CurveType::Closed));
        }

        #[test]
        fn hidden_flag_comes_from_meta_bit() {
            let mut meta = [0u8; META_LEN];
            meta[0] = SurfaceType::Curve.tag();
            meta[4] = 0b0000_0010;
            let mut entity = SceneEntity::with_meta(Entity::Curve(sample_curve()), vec![], meta);
            assert!(entity.is_hidden());

            entity.show();
            assert!(!entity.is_hidden());
            assert_eq!(entity.encoded_meta()[4], 0);

            meta[4] = 0b0000_0001;
            let visible = SceneEntity::with_meta(Entity::Curve(sample_curve()), vec![], meta);
            assert!(!visible.is_hidden());
        }

        #[test]
        fn curve_rings_split_points() {
            let curve = sample_curve();
            let rings = curve.rings();
            assert_eq!(rings.len(), 2);
            assert_eq!(rings[1][0], Vec4::new(1.0, 1.0, 0.0, 1.0));
            assert!(curve.ring(2).is_none());
        }

        #[test]
        fn zero_points_per_ring_yields_no_rings() {
            let curve = Curve {
                ring_count: u32::MAX,
                points_per_ring: 0,
                ..sample_curve()
            };
            assert!(curve.rings().is_empty());
            assert!(curve.ring(0).is_none());

            let surface = Surface {
                material: curve.material.clone(),
                points: curve.points.clone(),
                ring_count: u32::MAX,
                points_per_ring: 0,
                curve_type: CurveType::Open,
                reserved: vec![0; 49],
            };
            assert!(surface.rings().is_empty());
            assert!(!surface.is_cross_section_closed());
        }

        #[test]
        fn surface_grid_accessors() {
            let curve = sample_curve();
            let surface = Surface {
                material: curve.material.clone(),
                points: curve.points.clone(),
                ring_count: 2,
                points_per_ring: 2,
                curve_type: CurveType::Closed,
                reserved: vec![0; 49],
            };
            assert!(surface.is_path_closed());
            assert!(!surface.is_cross_section_closed());
            let column = surface.grid_v(1).expect("v column");
            assert_eq!(column, vec![curve.points[1], curve.points[3]]);
            assert!(surface.grid_v(2).is_none());
            assert_eq!(surface.grid_u(0).expect("u row"), curve.points[..2].to_vec());
        }

        #[test]
        fn diamond_points_come_from_shape_translation() {
            let shape = Mat4::from_translation(Vec3::new(3.0, 4.0, 5.0));
            let diamond = Diamond {
                material: "Diamond".to_string(),
                shape,
                diamond_type: DiamondType::Round,
                reserved: [0; 3],
            };
            let inherited = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
            let entity = SceneEntity::new(Entity::Diamond(diamond), vec![inherited]);
            assert_eq!(entity.local_points(), vec![Vec3::new(3.0, 4.0, 5.0)]);
            assert_eq!(entity.transformed_points(), vec![Vec3::new(4.0, 4.0, 5.0)]);
        }

        #[test]
        fn font_surface_transform_order_is_shape_then_inherited() {
            let shape = Mat4::from_scale(Vec3::splat(2.0));
            let first = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
            let second = Mat4::from_rotation_z(FRAC_PI_2);
            let font = FontSurface {
                material: "Silver".to_string(),
                shape,
                aux: [0; 3],
                foreground: BlockType::Angle,
                background: BlockType::Round,
                thickness: 1.0,
                radius: 0.5,
                outlines: vec![
                    OutlineSpan { point_count: 1, reserved: [0; 4] },
                    OutlineSpan { point_count: 2, reserved: [0; 4] },
                ],
                points: vec![Vec3::X, Vec3::Y, Vec3::Z],
            };
            assert_eq!(font.outline(1), Some(&[Vec3::Y, Vec3::Z][..]));
            assert!(font.outline(2).is_none());

            let mut entity = SceneEntity::new(Entity::FontSurface(font), vec![first]);
            entity.push_transform(second);
            let p = Vec4::new(1.0, 0.0, 0.0, 1.0);
            let expected = (second * (first * (shape * p))).truncate();
            assert_eq!(entity.transformed_points()[0], expected);
            assert_eq!(entity.transforms().len(), 2);
        }

        #[test]
        fn quad_normals_and_invalid_indices() {
            let quad = QuadType {
                material: String::new(),
                points: vec![
                    Vec4::new(0.0, 0.0, 0.0, 1.0),
                    Vec4::new(1.0, 0.0, 0.0, 1.0),
                    Vec4::new(1.0, 1.0, 0.0, 1.0),
                    Vec4::new(0.0, 1.0, 0.0, 1.0),
                ],
                indices: vec![IVec4::new(0, 1, 2, 3), IVec4::new(0, 1, 2, 9)],
            };
            assert_eq!(quad.quads().len(), 1);
            assert!(quad.quad(1).is_none());
            let normals = quad.normals();
            assert_eq!(normals[0], Vec3::Z);
            assert_eq!(normals[1], Vec3::ZERO);
        }

        #[test]
        fn guide_line_direction_defaults_to_z() {
            let line = GuideLine {
                shape: Mat4::ZERO,
                reserved: [0; 4],
                aux: [0, 0],
            };
            assert_eq!(line.direction(), Vec3::Z);
        }

        #[test]
        fn document_assigns_sequential_ids_and_bounds() {
            let mut document = Document::new();
            let first = document.add_entity(SceneEntity::new(Entity::Curve(sample_curve()), vec![]));
            let second = document.add_entity(SceneEntity::new(
                Entity::Curve(sample_curve()),
                vec![Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))],
            ));
            assert_eq!(first.get(), 0);
            assert_eq!(second.get(), 1);
            assert_eq!(document.len(), 2);

            let bounds = document.bounds().expect("bounds");
            assert_eq!(bounds.min(), Vec3::ZERO);
            assert_eq!(bounds.max(), Vec3::new(11.0, 1.0, 2.0));
            assert!(document.entity(EntityId::new(7)).is_none());
        }
    }
}
