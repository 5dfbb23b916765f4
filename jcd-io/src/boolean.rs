//! 由扁平记录流重建布尔运算 DAG 的状态机。
//!
//! 布尔记录的头部可以直接嵌套另一个布尔头部，每层压入一个帧；
//! `%` 弹出栈顶帧并按出现顺序从左到右折叠其子节点。

use glam::Mat4;
use jcd_core::dag::NodeId;
use jcd_core::document::{BoolSurface, BoolType, Entity, META_LEN, SceneEntity};
use tracing::{debug, warn};

use crate::codec::{BoolHeader, EntityPayload, Record};
use crate::{DecodeError, DecodeOptions, DecodeWarning};

#[derive(Debug)]
struct Frame {
    op: BoolType,
    children: Vec<NodeId>,
}

/// 正在构建的顶层布尔实体。
#[derive(Debug)]
struct Building {
    surface: BoolSurface,
    meta: [u8; META_LEN],
    matrices: Vec<Mat4>,
    frames: Vec<Frame>,
}

impl Building {
    /// 构建状态下栈至少有一个帧，栈空时实体已经完成。
    fn add_primitive(&mut self, entity: SceneEntity) {
        let id = self.surface.dag.add_primitive(entity);
        if let Some(frame) = self.frames.last_mut() {
            frame.children.push(id);
        }
    }

    /// 左折叠：`((c0 op c1) op c2) ...`。
    fn fold(&mut self, op: BoolType, children: Vec<NodeId>) -> Option<NodeId> {
        let mut iter = children.into_iter();
        let mut acc = iter.next()?;
        for child in iter {
            acc = self.surface.dag.add_boolean(op, acc, child);
        }
        Some(acc)
    }

    fn into_entity(self) -> SceneEntity {
        SceneEntity::with_meta(Entity::Boolean(self.surface), self.matrices, self.meta)
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Building(Box<Building>),
}

#[derive(Debug)]
pub struct BooleanReconstructor {
    state: State,
    max_depth: usize,
    warnings: Vec<DecodeWarning>,
}

impl BooleanReconstructor {
    pub fn new(options: &DecodeOptions) -> Self {
        Self {
            state: State::Idle,
            max_depth: options.max_nesting_depth,
            warnings: Vec::new(),
        }
    }

    #[inline]
    pub fn is_building(&self) -> bool {
        matches!(self.state, State::Building(_))
    }

    /// 当前打开的分组层数。
    pub fn open_groups(&self) -> usize {
        match &self.state {
            State::Idle => 0,
            State::Building(building) => building.frames.len(),
        }
    }

    /// 处理一条 `:` 记录；空闲状态下的非布尔记录直接作为完成的实体返回。
    pub fn on_record(&mut self, record: Record, offset: u64) -> Result<Option<SceneEntity>, DecodeError> {
        let Record { meta, payload } = record;
        match payload {
            EntityPayload::Concrete { matrices, entity } => match &mut self.state {
                State::Idle => Ok(Some(SceneEntity::with_meta(entity, matrices, meta.raw))),
                State::Building(building) => {
                    building.add_primitive(SceneEntity::with_meta(entity, matrices, meta.raw));
                    Ok(None)
                }
            },
            EntityPayload::Boolean(header) => {
                if let State::Idle = self.state {
                    let surface = BoolSurface::new(
                        header.bool_type,
                        header.reserved_head,
                        header.nested_type,
                        header.reserved_tail,
                    );
                    debug!(offset, op = header.bool_type.name(), "开始布尔实体");
                    self.state = State::Building(Box::new(Building {
                        surface,
                        meta: meta.raw,
                        matrices: header.matrices.clone(),
                        frames: Vec::new(),
                    }));
                } else {
                    debug!(
                        offset,
                        matrices = header.matrices.len(),
                        "嵌套布尔记录的矩阵不参与重建，已丢弃"
                    );
                }
                self.descend(header, offset)?;
                Ok(None)
            }
        }
    }

    /// 沿直接嵌套的布尔头部逐层压栈，最内层的具体实体成为栈顶帧的第一个子节点。
    fn descend(&mut self, mut header: BoolHeader, offset: u64) -> Result<(), DecodeError> {
        let max_depth = self.max_depth;
        let State::Building(building) = &mut self.state else {
            return Ok(());
        };
        loop {
            if building.frames.len() >= max_depth {
                return Err(DecodeError::NestingTooDeep {
                    offset,
                    limit: max_depth,
                });
            }
            building.frames.push(Frame {
                op: header.bool_type,
                children: Vec::new(),
            });
            match *header.nested {
                EntityPayload::Boolean(nested) => header = nested,
                EntityPayload::Concrete { matrices, entity } => {
                    building.add_primitive(SceneEntity::new(entity, matrices));
                    return Ok(());
                }
            }
        }
    }

    /// 处理 `%`：弹出栈顶帧并折叠；最外层分组闭合时返回完成的布尔实体。
    pub fn on_close_group(&mut self, offset: u64) -> Result<Option<SceneEntity>, DecodeError> {
        let State::Building(building) = &mut self.state else {
            warn!(offset, "布尔分组之外出现关闭标志，已忽略");
            self.warnings.push(DecodeWarning::StrayCloseGroup { offset });
            return Ok(None);
        };
        let Some(frame) = building.frames.pop() else {
            return Err(DecodeError::EmptyGroup { offset });
        };
        let child_count = frame.children.len();
        let Some(acc) = building.fold(frame.op, frame.children) else {
            return Err(DecodeError::EmptyGroup { offset });
        };
        debug!(
            offset,
            op = frame.op.name(),
            children = child_count,
            depth = building.frames.len(),
            "布尔分组已闭合"
        );

        if let Some(parent) = building.frames.last_mut() {
            parent.children.push(acc);
            return Ok(None);
        }

        let State::Building(mut building) = std::mem::replace(&mut self.state, State::Idle) else {
            return Ok(None);
        };
        building.surface.set_root(acc);
        Ok(Some(building.into_entity()))
    }

    /// 数据流结束。仍在构建时把所有残留帧当作已闭合处理（空帧跳过），
    /// 输出标记为 `truncated` 的实体并记录警告。
    pub fn finish(&mut self, offset: u64) -> Option<SceneEntity> {
        let State::Building(mut building) = std::mem::replace(&mut self.state, State::Idle) else {
            return None;
        };
        let open_groups = building.frames.len();
        let mut carried: Option<NodeId> = None;
        while let Some(mut frame) = building.frames.pop() {
            frame.children.extend(carried);
            if let Some(acc) = building.fold(frame.op, frame.children) {
                carried = Some(acc);
            }
        }

        warn!(offset, open_groups, "数据流结束时仍有未闭合的布尔分组");
        self.warnings.push(DecodeWarning::TruncatedBooleanGroup {
            offset,
            open_groups,
        });

        let root = carried?;
        building.surface.set_root(root);
        building.surface.truncated = true;
        Some(building.into_entity())
    }

    pub fn warnings(&self) -> &[DecodeWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<DecodeWarning> {
        self.warnings
    }
}
