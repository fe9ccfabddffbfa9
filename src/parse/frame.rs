//! This module contains the frames of the incremental parser and the stack
//! that holds them.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    data::bit_string::BitString,
    expr::Expr,
    schema::{
        label::CellSchema,
        structure::{Structure, StructureId},
        Schema,
    },
    scope::{CellAddress, FieldPath},
};

/// The environment shared by the frames of one composite expansion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameEnv {
    /// The nodes that led to this expansion.
    pub path: FieldPath,

    /// The values of the expanded label's type arguments.
    pub args: Rc<[Expr]>,

    /// The number of further composite expansions allowed below this one.
    pub depth: u32,
}

impl FrameEnv {
    /// The environment of the root label of a cell with the provided expansion
    /// budget.
    #[must_use]
    pub fn root(depth: u32) -> Self {
        Self {
            path: FieldPath::root(),
            args: Rc::from(Vec::new()),
            depth,
        }
    }
}

/// A single entry on the parser's stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// A position in the body of a composite label.
    Structure {
        structure: Rc<Structure>,
        env:       Rc<FrameEnv>,
    },

    /// Discriminant bits of a chosen switch variant that have yet to be read.
    Const { bits: BitString },

    /// The unread remainder of a bit-array field, of which `offset` bits have
    /// already been read.
    PartialField {
        key:    FieldPath,
        width:  u32,
        offset: u32,
    },

    /// Data and references with no known shape.
    Unknown,
}

impl Frame {
    /// Creates a frame at `structure` within `env`.
    #[must_use]
    pub fn structure(structure: Rc<Structure>, env: Rc<FrameEnv>) -> Self {
        Self::Structure { structure, env }
    }

    /// Checks if the frame describes shapeless data.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::Structure { structure, .. } => matches!(structure.as_ref(), Structure::Unknown),
            _ => false,
        }
    }
}

/// A reference that was skipped over by a data read and is waiting to be
/// loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingRef {
    pub node:      StructureId,
    pub reference: CellSchema,
}

/// The parsing state of a slice.
///
/// The top of the stack is the last frame. Stacks are values: every step
/// produces new stacks and leaves the one it started from untouched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlbStack {
    address:       CellAddress,
    frames:        Vec<Frame>,
    pending_refs:  Vec<PendingRef>,
    consumed_refs: BTreeSet<StructureId>,
}

impl TlbStack {
    /// Creates the initial stack for parsing the cell at `address` according to
    /// `cell`, allowing at most `max_depth` composite expansions.
    ///
    /// The root label counts as the first expansion, so a `max_depth` of zero
    /// yields a stack that treats the whole cell as shapeless.
    #[must_use]
    pub fn new(address: CellAddress, schema: &Schema, cell: CellSchema, max_depth: u32) -> Self {
        let frames = match cell {
            CellSchema::Data(id) if max_depth > 0 => match schema.get(id) {
                Some(label) => {
                    let env = Rc::new(FrameEnv::root(max_depth - 1));
                    vec![Frame::structure(label.structure.clone(), env)]
                }
                None => vec![Frame::Unknown],
            },
            _ => vec![Frame::Unknown],
        };
        Self::from_frames(address, frames)
    }

    /// Creates a stack that treats the whole cell at `address` as shapeless.
    #[must_use]
    pub fn unknown(address: CellAddress) -> Self {
        Self::from_frames(address, vec![Frame::Unknown])
    }

    /// Creates a stack holding `frames`, with the last frame on top.
    #[must_use]
    pub fn from_frames(address: CellAddress, frames: Vec<Frame>) -> Self {
        Self {
            address,
            frames,
            pending_refs: Vec::new(),
            consumed_refs: BTreeSet::new(),
        }
    }

    /// Gets the address of the cell being parsed.
    #[must_use]
    pub fn address(&self) -> CellAddress {
        self.address
    }

    /// Gets the frames, bottom first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Gets the top frame, if any.
    #[must_use]
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Checks if no frames remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Checks if the stack consists only of shapeless data.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].is_unknown()
    }

    /// Gets the references that were skipped over and have yet to be loaded.
    #[must_use]
    pub fn pending_refs(&self) -> &[PendingRef] {
        &self.pending_refs
    }

    /// Checks whether the reference load at `node` has already been consumed.
    #[must_use]
    pub fn is_consumed(&self, node: StructureId) -> bool {
        self.consumed_refs.contains(&node)
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Discards every frame and treats the rest of the cell as shapeless.
    pub(crate) fn collapse_to_unknown(&mut self) {
        self.frames = vec![Frame::Unknown];
    }

    pub(crate) fn consume_ref(&mut self, node: StructureId) {
        self.consumed_refs.insert(node);
    }

    pub(crate) fn take_pending_ref(&mut self) -> Option<PendingRef> {
        if self.pending_refs.is_empty() {
            None
        } else {
            Some(self.pending_refs.remove(0))
        }
    }

    /// Drops the finished structures from the top of the stack.
    #[must_use]
    pub(crate) fn trimmed(mut self) -> Self {
        while let Some(Frame::Structure { structure, .. }) = self.frames.last() {
            if !matches!(structure.as_ref(), Structure::Empty) {
                break;
            }
            self.frames.pop();
        }
        self
    }

    /// Removes frames that cannot be the target of a data read from the top of
    /// the stack.
    ///
    /// Finished structures are popped, and reference loads that have not yet
    /// been consumed are queued so that the next reference read returns them.
    pub(crate) fn skip_to_data(&mut self) {
        while let Some(Frame::Structure { structure, env }) = self.frames.last() {
            match structure.as_ref() {
                Structure::Empty => {
                    self.frames.pop();
                }
                Structure::LoadRef {
                    id,
                    reference,
                    rest,
                } => {
                    let (id, reference) = (*id, *reference);
                    let next = Frame::structure(rest.clone(), env.clone());
                    if self.consumed_refs.insert(id) {
                        self.pending_refs.push(PendingRef {
                            node: id,
                            reference,
                        });
                    }
                    self.frames.pop();
                    self.frames.push(next);
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        parse::frame::{Frame, TlbStack},
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            SchemaBuilder,
        },
        scope::CellAddress,
    };

    #[test]
    fn zero_depth_yields_an_unknown_stack() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(s, Structure::field(AtomicLabel::int(64), Structure::Empty))?;
        let schema = builder.finish()?;

        let stack = TlbStack::new(CellAddress(0), &schema, CellSchema::Data(s), 0);
        assert!(stack.is_unknown());
        let stack = TlbStack::new(CellAddress(0), &schema, CellSchema::Data(s), 3);
        assert!(matches!(stack.top(), Some(Frame::Structure { env, .. }) if env.depth == 2));
        Ok(())
    }

    #[test]
    fn data_reads_queue_skipped_references() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::load_ref(
                CellSchema::Unknown,
                Structure::field(AtomicLabel::uint(8), Structure::Empty),
            ),
        )?;
        let schema = builder.finish()?;

        let mut stack = TlbStack::new(CellAddress(0), &schema, CellSchema::Data(s), 2);
        stack.skip_to_data();
        assert_eq!(stack.pending_refs().len(), 1);
        assert_eq!(stack.frames().len(), 1);

        let pending = stack.take_pending_ref().unwrap();
        assert!(stack.is_consumed(pending.node));
        Ok(())
    }
}
