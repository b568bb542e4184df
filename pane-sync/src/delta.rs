//! Retain / insert / delete operations over a plain-text stream.
//!
//! Wire format (Quill delta JSON):
//! ```text
//! {"ops":[{"retain":5},{"insert":"abc"},{"delete":2}]}
//! ```
//!
//! Lengths count Unicode scalar values, the same unit the authority uses when
//! it measures document content.

use serde::{Deserialize, Serialize};

/// Capability the sync core needs from an operation library.
///
/// [`Delta`] is the bundled implementation; the change buffer and reconciler
/// only go through this trait.
pub trait Operation: Clone + Default + PartialEq {
    /// Apply `other` after `self`.
    fn compose(&self, other: &Self) -> Self;

    /// Rebase `other` so it applies after `self`.
    ///
    /// When `priority` is true, inserts in `self` win position ties.
    fn transform(&self, other: &Self, priority: bool) -> Self;

    /// True when applying the operation leaves any document unchanged.
    fn is_noop(&self) -> bool;

    /// Concatenation of every inserted text run.
    fn inserted_text(&self) -> String;
}

/// A single delta primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOp", into = "RawOp")]
pub enum Op {
    Insert(String),
    Retain(usize),
    Delete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Retain,
    Delete,
}

impl Op {
    /// Length in characters.
    pub fn len(&self) -> usize {
        match self {
            Op::Insert(text) => text.chars().count(),
            Op::Retain(n) | Op::Delete(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> OpKind {
        match self {
            Op::Insert(_) => OpKind::Insert,
            Op::Retain(_) => OpKind::Retain,
            Op::Delete(_) => OpKind::Delete,
        }
    }
}

/// Errors decoding an operation from its JSON form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("operation must carry exactly one of insert, retain or delete")]
    AmbiguousOp,
}

/// JSON shape of one op. Formatting attributes are accepted and dropped.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retain: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<usize>,
    #[serde(default, skip_serializing)]
    #[allow(dead_code)]
    attributes: Option<serde_json::Value>,
}

impl TryFrom<RawOp> for Op {
    type Error = DeltaError;

    fn try_from(raw: RawOp) -> Result<Self, Self::Error> {
        match (raw.insert, raw.retain, raw.delete) {
            (Some(text), None, None) => Ok(Op::Insert(text)),
            (None, Some(n), None) => Ok(Op::Retain(n)),
            (None, None, Some(n)) => Ok(Op::Delete(n)),
            _ => Err(DeltaError::AmbiguousOp),
        }
    }
}

impl From<Op> for RawOp {
    fn from(op: Op) -> Self {
        match op {
            Op::Insert(text) => RawOp { insert: Some(text), ..RawOp::default() },
            Op::Retain(n) => RawOp { retain: Some(n), ..RawOp::default() },
            Op::Delete(n) => RawOp { delete: Some(n), ..RawOp::default() },
        }
    }
}

/// An ordered list of ops describing one text mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    ops: Vec<Op>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// A delta inserting `text` into an empty document.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new().insert(text)
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(Op::Insert(text.into()));
        self
    }

    pub fn retain(mut self, length: usize) -> Self {
        self.push(Op::Retain(length));
        self
    }

    pub fn delete(mut self, length: usize) -> Self {
        self.push(Op::Delete(length));
        self
    }

    /// Drop a trailing retain, which never changes the result.
    pub fn chop(mut self) -> Self {
        if matches!(self.ops.last(), Some(Op::Retain(_))) {
            self.ops.pop();
        }
        self
    }

    /// Plain text of a document delta (one made of inserts only).
    pub fn text(&self) -> String {
        self.inserted_text()
    }

    /// Apply this delta to `text` and return the result.
    pub fn apply_to_text(&self, text: &str) -> String {
        Delta::from_text(text).compose(self).text()
    }

    /// Append an op, merging it with its neighbour where possible.
    fn push(&mut self, op: Op) {
        if op.is_empty() {
            return;
        }
        if let Op::Insert(text) = op {
            self.push_insert(text);
            return;
        }
        if let Some(last) = self.ops.last_mut() {
            match (last, &op) {
                (Op::Delete(n), Op::Delete(m)) | (Op::Retain(n), Op::Retain(m)) => {
                    *n += *m;
                    return;
                }
                _ => {}
            }
        }
        self.ops.push(op);
    }

    /// Inserts go ahead of an adjacent trailing delete so equal edits have
    /// one canonical form.
    fn push_insert(&mut self, text: String) {
        let at = match self.ops.last() {
            Some(Op::Delete(_)) => self.ops.len() - 1,
            _ => self.ops.len(),
        };
        match at.checked_sub(1).and_then(|i| self.ops.get_mut(i)) {
            Some(Op::Insert(existing)) => existing.push_str(&text),
            _ => self.ops.insert(at, Op::Insert(text)),
        }
    }
}

impl Operation for Delta {
    fn compose(&self, other: &Self) -> Self {
        let mut this = OpIter::new(&self.ops);
        let mut next = OpIter::new(&other.ops);
        let mut out = Delta::new();

        while this.has_next() || next.has_next() {
            if next.peek_kind() == OpKind::Insert {
                out.push(next.next(usize::MAX));
            } else if this.peek_kind() == OpKind::Delete {
                out.push(this.next(usize::MAX));
            } else {
                let length = this.peek_len().min(next.peek_len());
                let this_op = this.next(length);
                let next_op = next.next(length);
                match (this_op, next_op) {
                    (Op::Retain(_), Op::Retain(_)) => out.push(Op::Retain(length)),
                    (Op::Insert(text), Op::Retain(_)) => out.push(Op::Insert(text)),
                    (Op::Retain(_), Op::Delete(_)) => out.push(Op::Delete(length)),
                    // insert then delete cancels out
                    _ => {}
                }
            }
        }
        out.chop()
    }

    fn transform(&self, other: &Self, priority: bool) -> Self {
        let mut this = OpIter::new(&self.ops);
        let mut next = OpIter::new(&other.ops);
        let mut out = Delta::new();

        while this.has_next() || next.has_next() {
            if this.peek_kind() == OpKind::Insert
                && (priority || next.peek_kind() != OpKind::Insert)
            {
                let skipped = this.next(usize::MAX);
                out.push(Op::Retain(skipped.len()));
            } else if next.peek_kind() == OpKind::Insert {
                out.push(next.next(usize::MAX));
            } else {
                let length = this.peek_len().min(next.peek_len());
                let this_op = this.next(length);
                let next_op = next.next(length);
                match (this_op, next_op) {
                    // already deleted on our side
                    (Op::Delete(_), _) => {}
                    (_, Op::Delete(_)) => out.push(Op::Delete(length)),
                    _ => out.push(Op::Retain(length)),
                }
            }
        }
        out.chop()
    }

    fn is_noop(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Op::Retain(_)))
    }

    fn inserted_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Insert(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Cursor over a list of ops that can hand out partial ops.
///
/// Past the end it behaves as an infinite retain.
struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    fn new(ops: &'a [Op]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    fn peek_kind(&self) -> OpKind {
        self.ops.get(self.index).map_or(OpKind::Retain, Op::kind)
    }

    fn peek_len(&self) -> usize {
        self.ops
            .get(self.index)
            .map_or(usize::MAX, |op| op.len() - self.offset)
    }

    fn next(&mut self, length: usize) -> Op {
        let Some(op) = self.ops.get(self.index) else {
            return Op::Retain(usize::MAX);
        };
        let offset = self.offset;
        let remaining = op.len() - offset;
        let taken = length.min(remaining);
        if taken == remaining {
            self.index += 1;
            self.offset = 0;
        } else {
            self.offset += taken;
        }
        match op {
            Op::Insert(text) => Op::Insert(text.chars().skip(offset).take(taken).collect()),
            Op::Retain(_) => Op::Retain(taken),
            Op::Delete(_) => Op::Delete(taken),
        }
    }
}
