//! Single-pass array construction from dynamically typed, nested input.
//!
//! The builder walks the input exactly once. Every element is staged into an
//! arena together with a type tag, and each nesting level keeps a running
//! element type. When an element forces the running type to widen, the
//! siblings staged before it are re-tagged in place: nothing is re-read from
//! the source. Once the source is exhausted the final type is known, a
//! single buffer is allocated, and the staged tree is copied into it.

mod staged;
#[cfg(test)]
mod tests;

use crate::array::scalar::write_slot;
use crate::array::{layout, Array, ErrorMode};
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::types::{promote_with, PromoteOptions, Type};
use crate::value::Value;

use staged::{Arena, NodeId, Staged};

/// Builder input: a value tree, a lazily produced sequence, or a record of
/// items.
pub enum Item<'a> {
    Value(Value),
    Seq(Box<dyn Iterator<Item = Item<'a>> + 'a>),
    Record(Vec<(String, Item<'a>)>),
}

impl<'a> Item<'a> {
    /// A lazily consumed sequence.
    pub fn seq<I>(items: I) -> Item<'a>
    where
        I: IntoIterator<Item = Item<'a>>,
        I::IntoIter: 'a,
    {
        Item::Seq(Box::new(items.into_iter()))
    }
}

impl From<Value> for Item<'_> {
    fn from(value: Value) -> Self {
        Item::Value(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferOptions {
    /// Element type given to dimensions that never saw an element.
    pub empty_dtype: Type,
    pub allow_broadcast: bool,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            empty_dtype: Type::int(32),
            allow_broadcast: false,
        }
    }
}

/// Counters from one build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Leaf values staged.
    pub elements: usize,
    /// Times a level's running type widened after it already had elements.
    pub promotions: usize,
    /// Staged nodes whose tag was rewritten.
    pub retagged: usize,
}

pub struct IncrementalBuilder {
    options: InferOptions,
    arena: Arena,
    report: BuildReport,
    path: Vec<usize>,
}

impl IncrementalBuilder {
    pub fn new(options: InferOptions) -> Self {
        Self {
            options,
            arena: Arena::default(),
            report: BuildReport::default(),
            path: Vec::new(),
        }
    }

    /// Consume `source` and commit it to a new array. The builder is spent
    /// either way; on error nothing is allocated.
    pub fn build(mut self, source: Item<'_>) -> Result<(Array, BuildReport), Diagnostic> {
        let (root, ty) = self.stage(source)?;
        let final_ty = ty.resolve_unknown(&self.options.empty_dtype);
        self.report.retagged += self.arena.retag(root, &final_ty);

        let mut bytes = vec![0u8; final_ty.data_size()];
        self.write_node(&mut bytes, 0, root)?;
        Ok((Array::from_parts(final_ty, bytes), self.report))
    }

    fn stage(&mut self, item: Item<'_>) -> Result<(NodeId, Type), Diagnostic> {
        match item {
            Item::Value(Value::List(items)) => self.stage_seq(items.into_iter().map(Item::Value)),
            Item::Value(Value::Record(fields)) => self.stage_record(
                fields
                    .into_iter()
                    .map(|(name, v)| (name, Item::Value(v)))
                    .collect(),
            ),
            Item::Value(leaf) => {
                let ty = leaf.leaf_type().map_err(|e| self.locate(e))?;
                self.report.elements += 1;
                Ok((self.arena.push(Staged::Scalar(leaf), ty.clone()), ty))
            }
            Item::Seq(iter) => self.stage_seq(iter),
            Item::Record(fields) => self.stage_record(fields),
        }
    }

    fn stage_seq<'a>(&mut self, items: impl Iterator<Item = Item<'a>>) -> Result<(NodeId, Type), Diagnostic> {
        let opts = PromoteOptions {
            allow_broadcast: self.options.allow_broadcast,
        };
        let mut running = Type::Unknown;
        let mut children: Vec<NodeId> = Vec::new();

        for (i, item) in items.enumerate() {
            self.path.push(i);
            let (child, child_ty) = self.stage(item)?;
            let promoted = promote_with(&running, &child_ty, opts).map_err(|e| self.locate(e))?;
            if promoted != running {
                if !children.is_empty() {
                    self.report.promotions += 1;
                    for &sibling in &children {
                        self.report.retagged += self.arena.retag(sibling, &promoted);
                    }
                }
                running = promoted;
            }
            if child_ty != running {
                self.report.retagged += self.arena.retag(child, &running);
            }
            children.push(child);
            self.path.pop();
        }

        if children.is_empty() {
            let ty = Type::fixed(Type::Unknown, 0);
            return Ok((self.arena.push(Staged::Empty, ty.clone()), ty));
        }
        let ty = Type::fixed(running, children.len());
        Ok((self.arena.push(Staged::Sequence(children), ty.clone()), ty))
    }

    fn stage_record(&mut self, fields: Vec<(String, Item<'_>)>) -> Result<(NodeId, Type), Diagnostic> {
        let mut staged: Vec<(String, NodeId)> = Vec::with_capacity(fields.len());
        let mut types: Vec<(String, Type)> = Vec::with_capacity(fields.len());
        for (name, item) in fields {
            if staged.iter().any(|(existing, _)| *existing == name) {
                return Err(self.locate(Diagnostic::error(
                    ErrorCode::UnsupportedValue,
                    format!("record has duplicate field '{}'", name),
                )));
            }
            let (child, ty) = self.stage(item)?;
            types.push((name.clone(), ty));
            staged.push((name, child));
        }
        let ty = Type::Struct(types);
        Ok((self.arena.push(Staged::Record(staged), ty.clone()), ty))
    }

    /// Copy the staged subtree at `id` into `bytes` at `at`, following the
    /// node tags. Ragged blocks and strings are appended to `bytes`.
    fn write_node(&self, bytes: &mut Vec<u8>, at: usize, id: NodeId) -> Result<(), Diagnostic> {
        let node = self.arena.get(id);
        match (&node.value, &node.tag) {
            (Staged::Scalar(value), ty) => {
                layout::write_value_alloc(bytes, at, ty, value, ErrorMode::default())
            }
            (Staged::Sequence(children), Type::FixedArray(elem, _)) => {
                let size = elem.data_size();
                for (i, &child) in children.iter().enumerate() {
                    self.write_node(bytes, at + i * size, child)?;
                }
                Ok(())
            }
            (Staged::Sequence(children), Type::VariableArray(elem)) => {
                let size = elem.data_size();
                let offset = bytes.len();
                bytes.resize(offset + children.len() * size, 0);
                write_slot(bytes, at, offset, children.len())?;
                for (i, &child) in children.iter().enumerate() {
                    self.write_node(bytes, offset + i * size, child)?;
                }
                Ok(())
            }
            (Staged::Empty, Type::FixedArray(..)) => Ok(()),
            (Staged::Empty, Type::VariableArray(_)) => {
                let offset = bytes.len();
                write_slot(bytes, at, offset, 0)
            }
            (Staged::Record(fields), Type::Struct(types)) => {
                let mut offset = at;
                for ((_, child), (_, ty)) in fields.iter().zip(types) {
                    self.write_node(bytes, offset, *child)?;
                    offset += ty.data_size();
                }
                Ok(())
            }
            (_, tag) => Err(Diagnostic::error(
                ErrorCode::TypeMismatch,
                format!("staged node cannot be written as `{}`", tag),
            )),
        }
    }

    fn locate(&self, err: Diagnostic) -> Diagnostic {
        if self.path.is_empty() {
            return err;
        }
        let path: Vec<String> = self.path.iter().map(|i| i.to_string()).collect();
        err.with_note(format!("at [{}]", path.join("][")))
    }
}

/// Build an array from `source` with the given options.
pub fn build_array(source: Item<'_>, options: &InferOptions) -> Result<(Array, BuildReport), Diagnostic> {
    IncrementalBuilder::new(options.clone()).build(source)
}

/// Build an array from a value tree with default options.
pub fn array_from_value(value: Value) -> Result<Array, Diagnostic> {
    build_array(Item::Value(value), &InferOptions::default()).map(|(array, _)| array)
}
