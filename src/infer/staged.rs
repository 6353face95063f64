//! The staged tree: an arena of nodes, each tagged with its current type.

use crate::types::Type;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

#[derive(Debug)]
pub(crate) enum Staged {
    Scalar(Value),
    Sequence(Vec<NodeId>),
    /// An empty sequence.
    Empty,
    Record(Vec<(String, NodeId)>),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) value: Staged,
    /// How the node will be written at commit. Rewritten on promotion.
    pub(crate) tag: Type,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub(crate) fn push(&mut self, value: Staged, tag: Type) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { value, tag });
        id
    }

    pub(crate) fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Re-tag the subtree at `root` under `ty`, returning how many nodes
    /// changed. Subtrees already tagged `ty` are skipped. Iterative, so deep
    /// trees do not grow the call stack.
    pub(crate) fn retag(&mut self, root: NodeId, ty: &Type) -> usize {
        let mut changed = 0;
        let mut stack = vec![(root, ty.clone())];
        while let Some((id, ty)) = stack.pop() {
            let node = &mut self.nodes[id.0 as usize];
            if node.tag == ty {
                continue;
            }
            changed += 1;
            match (&node.value, &ty) {
                (Staged::Sequence(children), Type::FixedArray(elem, _) | Type::VariableArray(elem)) => {
                    stack.extend(children.iter().map(|&c| (c, elem.as_ref().clone())));
                }
                (Staged::Record(fields), Type::Struct(types)) => {
                    stack.extend(
                        fields
                            .iter()
                            .zip(types)
                            .map(|((_, c), (_, t))| (*c, t.clone())),
                    );
                }
                _ => {}
            }
            node.tag = ty;
        }
        changed
    }
}
