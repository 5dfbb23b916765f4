//! 布尔曲面的 CSG 有向无环图。
//!
//! 节点存放在按 ID 索引的数组中，ID 只在所属 DAG 内唯一且单调递增；
//! 节点创建后不再修改。

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::document::{BoolType, SceneEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CsgNode {
    /// 叶子：一个具体实体。
    Primitive(Box<SceneEntity>),
    /// 视为一个整体的曲面组。
    Group(Vec<NodeId>),
    BooleanOp {
        op: BoolType,
        left: NodeId,
        right: NodeId,
    },
}

impl CsgNode {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            CsgNode::Primitive(_) => Vec::new(),
            CsgNode::Group(items) => items.clone(),
            CsgNode::BooleanOp { left, right, .. } => vec![*left, *right],
        }
    }

    fn label(&self, id: NodeId) -> String {
        match self {
            CsgNode::Primitive(entity) => {
                format!("Primitive #{} ({})", id.get(), entity.surface_type().name())
            }
            CsgNode::Group(items) => {
                let ids: Vec<String> = items.iter().map(|item| item.get().to_string()).collect();
                format!("Group #{} [{}]", id.get(), ids.join(", "))
            }
            CsgNode::BooleanOp { op, left, right } => format!(
                "BooleanOp #{} {} ({}, {})",
                id.get(),
                op.name(),
                left.get(),
                right.get()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsgDag {
    nodes: Vec<CsgNode>,
}

impl CsgDag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_primitive(&mut self, entity: SceneEntity) -> NodeId {
        self.push(CsgNode::Primitive(Box::new(entity)))
    }

    pub fn add_group(&mut self, items: Vec<NodeId>) -> NodeId {
        self.push(CsgNode::Group(items))
    }

    pub fn add_boolean(&mut self, op: BoolType, left: NodeId, right: NodeId) -> NodeId {
        self.push(CsgNode::BooleanOp { op, left, right })
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&CsgNode> {
        self.nodes.get(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &CsgNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    /// 从 `root` 出发按深度优先（左子先行）收集可达节点，每个节点只出现一次。
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.get(id) else {
                continue;
            };
            order.push(id);
            for child in node.children().into_iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// 可达的原始曲面，按从左到右的叶子顺序返回。
    pub fn primitives_under(&self, root: NodeId) -> Vec<&SceneEntity> {
        self.reachable(root)
            .into_iter()
            .filter_map(|id| match self.get(id) {
                Some(CsgNode::Primitive(entity)) => Some(entity.as_ref()),
                _ => None,
            })
            .collect()
    }

    pub fn boolean_ops_under(&self, root: NodeId) -> usize {
        self.reachable(root)
            .into_iter()
            .filter(|id| matches!(self.get(*id), Some(CsgNode::BooleanOp { .. })))
            .count()
    }

    /// 以缩进文本渲染依赖树，重复访问的节点标记为 `(revisited)`。
    /// 使用显式栈遍历，左折叠形成的长链不受调用栈深度限制。
    pub fn render_tree(&self, root: NodeId) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let indent = tree_indent(depth);
            if !visited.insert(id) {
                let _ = writeln!(out, "{indent}{} (revisited)", id.get());
                continue;
            }
            match self.get(id) {
                Some(node) => {
                    let _ = writeln!(out, "{indent}{}", node.label(id));
                    for child in node.children().into_iter().rev() {
                        stack.push((child, depth + 1));
                    }
                }
                None => {
                    let _ = writeln!(out, "{indent}{} (missing)", id.get());
                }
            }
        }
        out
    }

    fn push(&mut self, node: CsgNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

/// 超过该层级后缩进不再增加，行首改为标注实际层级。
const MAX_INDENT_DEPTH: usize = 32;

fn tree_indent(depth: usize) -> String {
    if depth <= MAX_INDENT_DEPTH {
        "    ".repeat(depth)
    } else {
        format!("{}[{depth}] ", "    ".repeat(MAX_INDENT_DEPTH))
    }
}
