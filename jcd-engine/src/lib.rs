pub mod command;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("entity with id {0} not found")]
        EntityNotFound(u64),
        #[error("invalid command argument: {0}")]
        InvalidArgument(String),
    }
}

pub mod scene {
    use std::collections::HashSet;

    use glam::{Mat4, Vec3};
    use jcd_core::document::{Document, EntityId, SceneEntity};
    use jcd_core::geometry::Bounds3D;
    use tracing::debug;

    use crate::errors::EngineError;

    const DEFAULT_ZOOM: f32 = 1.0;
    const MIN_ZOOM: f32 = 0.01;
    const MAX_ZOOM: f32 = 1_000.0;

    /// 记录视口状态（观察中心与缩放）。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct ViewportState {
        pub center: Vec3,
        pub zoom: f32,
    }

    impl ViewportState {
        #[inline]
        fn clamp_zoom(value: f32) -> f32 {
            value.clamp(MIN_ZOOM, MAX_ZOOM)
        }
    }

    impl Default for ViewportState {
        fn default() -> Self {
            Self {
                center: Vec3::ZERO,
                zoom: DEFAULT_ZOOM,
            }
        }
    }

    /// 引擎层负责维护解码得到的 `Document` 和运行时状态（选中集、视口）。
    #[derive(Debug)]
    pub struct Scene {
        document: Document,
        selected: HashSet<EntityId>,
        viewport: ViewportState,
    }

    impl Scene {
        pub fn new() -> Self {
            Self {
                document: Document::new(),
                selected: HashSet::new(),
                viewport: ViewportState::default(),
            }
        }

        pub fn with_document(document: Document) -> Self {
            let mut scene = Self::new();
            scene.load_document(document);
            scene
        }

        /// 替换当前文档并重置运行时状态，视口中心移到文档范围中心。
        pub fn load_document(&mut self, document: Document) {
            self.document = document;
            self.selected.clear();
            self.viewport = ViewportState::default();

            if let Some(bounds) = self.document.bounds() {
                self.viewport.center = bounds.center();
            }
            debug!(entities = self.document.len(), "场景已载入文档");
        }

        #[inline]
        pub fn selection_len(&self) -> usize {
            self.selected.len()
        }

        #[inline]
        pub fn is_selected(&self, id: EntityId) -> bool {
            self.selected.contains(&id)
        }

        /// 选中指定实体。若实体不存在则返回错误。
        pub fn select(&mut self, id: EntityId) -> Result<(), EngineError> {
            self.ensure_exists(id)?;
            self.selected.insert(id);
            Ok(())
        }

        /// 取消选中指定实体，返回之前是否处于选中状态。
        pub fn deselect(&mut self, id: EntityId) -> bool {
            self.selected.remove(&id)
        }

        /// 切换实体选中状态，返回切换后的状态。
        pub fn toggle_selection(&mut self, id: EntityId) -> Result<bool, EngineError> {
            self.ensure_exists(id)?;
            if !self.selected.insert(id) {
                self.selected.remove(&id);
                Ok(false)
            } else {
                Ok(true)
            }
        }

        #[inline]
        pub fn clear_selection(&mut self) {
            self.selected.clear();
        }

        #[inline]
        pub fn selection(&self) -> impl Iterator<Item = EntityId> + '_ {
            self.selected.iter().copied()
        }

        /// 当前选中实体变换后的包围盒。
        pub fn selection_bounds(&self) -> Option<Bounds3D> {
            let mut bounds = Bounds3D::empty();
            for id in &self.selected {
                if let Some(entity_bounds) = self.document.entity_bounds(*id) {
                    bounds.include_bounds(&entity_bounds);
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        /// 隐藏指定实体，返回之前是否可见。
        pub fn hide(&mut self, id: EntityId) -> Result<bool, EngineError> {
            let entity = self.entity_mut(id)?;
            let was_visible = !entity.is_hidden();
            entity.hide();
            Ok(was_visible)
        }

        pub fn show(&mut self, id: EntityId) -> Result<bool, EngineError> {
            let entity = self.entity_mut(id)?;
            let was_hidden = entity.is_hidden();
            entity.show();
            Ok(was_hidden)
        }

        /// 隐藏全部选中实体，返回新隐藏的数量。
        pub fn hide_selection(&mut self) -> usize {
            let ids: Vec<EntityId> = self.selected.iter().copied().collect();
            ids.into_iter()
                .filter(|id| matches!(self.hide(*id), Ok(true)))
                .count()
        }

        /// 显示全部实体，返回之前处于隐藏状态的数量。
        pub fn show_all(&mut self) -> usize {
            let mut count = 0;
            for (_, entity) in self.document.entities_mut() {
                if entity.is_hidden() {
                    entity.show();
                    count += 1;
                }
            }
            count
        }

        pub fn visible_entities(&self) -> impl Iterator<Item = (EntityId, &SceneEntity)> + '_ {
            self.document
                .entities()
                .filter(|(_, entity)| !entity.is_hidden())
                .map(|(id, entity)| (*id, entity))
        }

        /// 可见实体变换后范围的并集。
        pub fn visible_bounds(&self) -> Option<Bounds3D> {
            let mut bounds = Bounds3D::empty();
            for (_, entity) in self.visible_entities() {
                if let Some(entity_bounds) = entity.transformed_bounds() {
                    bounds.include_bounds(&entity_bounds);
                }
            }
            if bounds.is_empty() { None } else { Some(bounds) }
        }

        /// 为每个选中实体追加一个平移变换（外层），返回受影响的实体数量。
        pub fn translate_selection(&mut self, offset: Vec3) -> usize {
            let matrix = Mat4::from_translation(offset);
            let mut count = 0;
            for (id, entity) in self.document.entities_mut() {
                if self.selected.contains(id) {
                    entity.push_transform(matrix);
                    count += 1;
                }
            }
            debug!(count, ?offset, "已平移选中实体");
            count
        }

        #[inline]
        pub fn viewport(&self) -> ViewportState {
            self.viewport
        }

        #[inline]
        pub fn reset_viewport(&mut self) {
            self.viewport = ViewportState::default();
        }

        #[inline]
        pub fn set_viewport_center(&mut self, center: Vec3) {
            self.viewport.center = center;
        }

        pub fn pan_viewport(&mut self, delta: Vec3) {
            self.viewport.center += delta;
        }

        /// 设置缩放倍数（自动限制在合法范围内）。
        pub fn set_viewport_zoom(&mut self, zoom: f32) {
            self.viewport.zoom = ViewportState::clamp_zoom(zoom);
        }

        pub fn scale_viewport_zoom(&mut self, factor: f32) {
            let current = self.viewport.zoom;
            let target = if factor.is_finite() {
                current * factor
            } else {
                current
            };
            self.set_viewport_zoom(target);
        }

        /// 聚焦当前选中实体，若为空则退化到整个文档范围。
        pub fn focus_on_selection(&mut self) {
            let target = self.selection_bounds().or_else(|| self.document.bounds());
            if let Some(bounds) = target {
                self.viewport.center = bounds.center();
            }
        }

        #[inline]
        pub fn document(&self) -> &Document {
            &self.document
        }

        #[inline]
        pub fn document_mut(&mut self) -> &mut Document {
            &mut self.document
        }

        pub fn entity(&self, id: EntityId) -> Option<&SceneEntity> {
            self.document.entity(id)
        }

        fn entity_mut(&mut self, id: EntityId) -> Result<&mut SceneEntity, EngineError> {
            self.document
                .entity_mut(id)
                .ok_or(EngineError::EntityNotFound(id.get()))
        }

        fn ensure_exists(&self, id: EntityId) -> Result<(), EngineError> {
            if self.document.entity(id).is_none() {
                return Err(EngineError::EntityNotFound(id.get()));
            }
            Ok(())
        }
    }

    impl Default for Scene {
        fn default() -> Self {
            Self::new()
        }
    }

    #[cfg(test)]
    pub(crate) mod tests {
        use glam::Vec4;
        use jcd_core::document::{Curve, CurveType, Diamond, DiamondType, Entity};

        use super::*;

        /// 两条曲线与一颗钻石：曲线范围 (0,0,0)-(2,1,0) 与 (10,0,0)-(12,1,0)，钻石位于 (5,5,5)。
        pub(crate) fn sample_scene() -> (Scene, [EntityId; 3]) {
            let curve = |x: f32| {
                SceneEntity::new(
                    Entity::Curve(Curve {
                        material: "Gold".to_string(),
                        points: vec![Vec4::new(x, 0.0, 0.0, 1.0), Vec4::new(x + 2.0, 1.0, 0.0, 1.0)],
                        ring_count: 1,
                        points_per_ring: 2,
                        curve_type: CurveType::Open,
                        reserved: [0; 9],
                    }),
                    vec![Mat4::IDENTITY; 2],
                )
            };
            let diamond = SceneEntity::new(
                Entity::Diamond(Diamond {
                    material: "Diamond".to_string(),
                    shape: Mat4::from_translation(Vec3::splat(5.0)),
                    diamond_type: DiamondType::Round,
                    reserved: [0; 3],
                }),
                vec![Mat4::IDENTITY; 2],
            );

            let mut document = Document::new();
            let ids = [
                document.add_entity(curve(0.0)),
                document.add_entity(curve(10.0)),
                document.add_entity(diamond),
            ];
            (Scene::with_document(document), ids)
        }

        #[test]
        fn selection_operations_work() {
            let (mut scene, [first, _, diamond]) = sample_scene();

            assert_eq!(scene.selection_len(), 0);
            scene.select(diamond).expect("select diamond");
            assert!(scene.is_selected(diamond));

            // toggle should remove when already selected
            assert!(!scene.toggle_selection(diamond).expect("toggle existing"));
            assert!(scene.toggle_selection(first).expect("toggle new"));
            assert!(scene.deselect(first));
            assert!(!scene.deselect(first));
            assert_eq!(scene.selection_len(), 0);

            let err = scene.select(EntityId::new(9_999)).unwrap_err();
            assert!(matches!(err, EngineError::EntityNotFound(9_999)));
        }

        #[test]
        fn load_document_recenters_viewport() {
            let (scene, _) = sample_scene();
            let viewport = scene.viewport();
            assert_eq!(viewport.zoom, 1.0);
            assert_eq!(viewport.center, Vec3::new(6.0, 2.5, 2.5));
        }

        #[test]
        fn focus_on_selection_uses_transformed_bounds() {
            let (mut scene, [first, second, _]) = sample_scene();
            scene.select(first).unwrap();
            scene.select(second).unwrap();
            scene.focus_on_selection();
            assert_eq!(scene.viewport().center, Vec3::new(6.0, 0.5, 0.0));

            scene.clear_selection();
            scene.set_viewport_center(Vec3::splat(100.0));
            scene.focus_on_selection();
            assert_eq!(scene.viewport().center, Vec3::new(6.0, 2.5, 2.5));
        }

        #[test]
        fn hidden_entities_leave_visible_set() {
            let (mut scene, [first, _, diamond]) = sample_scene();
            assert!(scene.hide(diamond).unwrap());
            assert!(!scene.hide(diamond).unwrap());
            assert_eq!(scene.visible_entities().count(), 2);

            let bounds = scene.visible_bounds().expect("visible bounds");
            assert_eq!(bounds.max(), Vec3::new(12.0, 1.0, 0.0));

            scene.select(first).unwrap();
            assert_eq!(scene.hide_selection(), 1);
            assert_eq!(scene.visible_entities().count(), 1);

            assert_eq!(scene.show_all(), 2);
            assert_eq!(scene.visible_entities().count(), 3);
            assert!(matches!(
                scene.show(EntityId::new(42)),
                Err(EngineError::EntityNotFound(42))
            ));
        }

        #[test]
        fn translation_is_appended_as_outer_transform() {
            let (mut scene, [first, second, _]) = sample_scene();
            scene.select(second).unwrap();
            assert_eq!(scene.translate_selection(Vec3::new(0.0, 0.0, 3.0)), 1);

            let moved = scene.entity(second).unwrap();
            assert_eq!(moved.transforms().len(), 3);
            assert_eq!(moved.transformed_points()[0], Vec3::new(10.0, 0.0, 3.0));
            assert_eq!(scene.entity(first).unwrap().transforms().len(), 2);
        }

        #[test]
        fn viewport_zoom_is_clamped() {
            let mut scene = Scene::new();
            scene.set_viewport_zoom(0.0001);
            assert_eq!(scene.viewport().zoom, MIN_ZOOM);
            scene.set_viewport_zoom(10_000.0);
            assert_eq!(scene.viewport().zoom, MAX_ZOOM);

            scene.set_viewport_zoom(2.0);
            scene.scale_viewport_zoom(0.5);
            assert_eq!(scene.viewport().zoom, 1.0);
            scene.scale_viewport_zoom(f32::NAN);
            assert_eq!(scene.viewport().zoom, 1.0);

            scene.pan_viewport(Vec3::new(1.0, 2.0, 3.0));
            assert_eq!(scene.viewport().center, Vec3::new(1.0, 2.0, 3.0));
            scene.reset_viewport();
            assert_eq!(scene.viewport(), ViewportState::default());
        }
    }
}
