//! This module contains the structure nodes that make up the body of a
//! composite label, as well as the process-wide source of node identifiers.

use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    data::bit_string::BitString,
    error::schema::{Error, Result},
    schema::label::{CellSchema, TlbLabel},
};

/// The process-wide pool from which structure node identifiers are drawn.
static LAST_STRUCTURE_ID: AtomicUsize = AtomicUsize::new(0);

/// The identifier of a non-leaf structure node.
///
/// Identifiers are unique for the lifetime of the process, so they can be used
/// as keys for the memory fields that hold the values of schema fields.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StructureId {
    id: usize,
}

impl StructureId {
    /// Requests a new unique identifier.
    #[must_use]
    pub fn fresh() -> Self {
        let id = LAST_STRUCTURE_ID.fetch_add(1, Ordering::Relaxed);
        Self { id }
    }

    /// Gets the raw value of the identifier.
    #[must_use]
    pub fn index(&self) -> usize {
        self.id
    }
}

impl Display for StructureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// An argument passed to a label of non-zero arity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TypeArg {
    /// The value of an earlier integer field of the same composite label.
    Field(StructureId),

    /// The parameter of the enclosing composite label at the given index.
    Param(usize),

    /// A constant value.
    Const(u32),
}

/// One alternative of a switch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwitchVariant {
    /// The discriminant bits that select this variant.
    pub key: BitString,

    /// The structure that follows the discriminant.
    pub structure: Rc<Structure>,
}

/// A node in the body of a composite label.
///
/// Structures form a graph rather than a tree, as composite labels are
/// referenced by identifier and may refer to themselves.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Structure {
    /// The end of the data described by the label.
    Empty,

    /// A tail of data and references with no known shape.
    ///
    /// This is only legal in labels that are used as the root of a cell.
    Unknown,

    /// A field of the given label, followed by `rest`.
    KnownTypePrefix {
        id:        StructureId,
        label:     TlbLabel,
        type_args: Vec<TypeArg>,
        rest:      Rc<Structure>,
    },

    /// The load of a reference to a cell with the given schema, followed by
    /// `rest`.
    LoadRef {
        id:        StructureId,
        reference: CellSchema,
        rest:      Rc<Structure>,
    },

    /// A fixed-width discriminant that selects between the variants.
    SwitchPrefix {
        id:          StructureId,
        switch_size: u32,
        variants:    Vec<SwitchVariant>,
    },
}

impl Structure {
    /// Creates a field of `label` with no type arguments, followed by `rest`.
    #[must_use]
    pub fn field(label: impl Into<TlbLabel>, rest: Structure) -> Self {
        Self::known_type_prefix(StructureId::fresh(), label, vec![], rest)
    }

    /// Creates a field with the pre-allocated identifier `id`.
    ///
    /// Pre-allocation allows later fields to refer to this one through
    /// [`TypeArg::Field`] when a structure is built back to front.
    #[must_use]
    pub fn known_type_prefix(
        id: StructureId,
        label: impl Into<TlbLabel>,
        type_args: Vec<TypeArg>,
        rest: Structure,
    ) -> Self {
        Self::KnownTypePrefix {
            id,
            label: label.into(),
            type_args,
            rest: Rc::new(rest),
        }
    }

    /// Creates the load of a reference to a cell of schema `reference`,
    /// followed by `rest`.
    #[must_use]
    pub fn load_ref(reference: CellSchema, rest: Structure) -> Self {
        Self::LoadRef {
            id: StructureId::fresh(),
            reference,
            rest: Rc::new(rest),
        }
    }

    /// Creates a switch over discriminants of `switch_size` bits.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the switch size is zero, if there are no variants, or
    /// if any key has the wrong length or occurs more than once.
    pub fn switch(switch_size: u32, variants: Vec<(BitString, Structure)>) -> Result<Self> {
        if switch_size == 0 {
            return Err(Error::ZeroSwitchSize);
        }
        if variants.is_empty() {
            return Err(Error::EmptySwitch);
        }

        let mut seen = HashSet::new();
        let mut checked = Vec::with_capacity(variants.len());
        for (key, structure) in variants {
            if key.len() != switch_size {
                return Err(Error::InvalidSwitchKey {
                    key: key.to_binary(),
                    switch_size,
                });
            }
            if !seen.insert(key.clone()) {
                return Err(Error::DuplicateSwitchKey {
                    key: key.to_binary(),
                });
            }
            checked.push(SwitchVariant {
                key,
                structure: Rc::new(structure),
            });
        }

        Ok(Self::SwitchPrefix {
            id: StructureId::fresh(),
            switch_size,
            variants: checked,
        })
    }

    /// Creates a switch with a single variant, which acts as a constant
    /// prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `key` is empty.
    pub fn constant(key: BitString, rest: Structure) -> Result<Self> {
        Self::switch(key.len(), vec![(key, rest)])
    }

    /// Gets the identifier of the node, if it is not a leaf.
    #[must_use]
    pub fn id(&self) -> Option<StructureId> {
        match self {
            Self::Empty | Self::Unknown => None,
            Self::KnownTypePrefix { id, .. }
            | Self::LoadRef { id, .. }
            | Self::SwitchPrefix { id, .. } => Some(*id),
        }
    }

    /// Checks whether an [`Structure::Unknown`] tail is reachable from this
    /// node without passing through another label.
    #[must_use]
    pub fn has_unknown_tail(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Unknown => true,
            Self::KnownTypePrefix { rest, .. } | Self::LoadRef { rest, .. } => {
                rest.has_unknown_tail()
            }
            Self::SwitchPrefix { variants, .. } => {
                variants.iter().any(|v| v.structure.has_unknown_tail())
            }
        }
    }

    /// Calls `f` with the label and type arguments of each field directly in
    /// this structure.
    pub fn for_each_field(&self, f: &mut impl FnMut(&TlbLabel, &[TypeArg])) {
        match self {
            Self::Empty | Self::Unknown => {}
            Self::KnownTypePrefix {
                label,
                type_args,
                rest,
                ..
            } => {
                f(label, type_args);
                rest.for_each_field(f);
            }
            Self::LoadRef { rest, .. } => rest.for_each_field(f),
            Self::SwitchPrefix { variants, .. } => {
                variants.iter().for_each(|v| v.structure.for_each_field(f));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        error::schema::Error,
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::{Structure, StructureId},
        },
    };

    fn key(text: &str) -> BitString {
        BitString::from_binary(text).unwrap()
    }

    #[test]
    fn identifiers_are_unique() {
        let a = StructureId::fresh();
        let b = StructureId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_switches() {
        assert_eq!(
            Structure::switch(0, vec![(key(""), Structure::Empty)]),
            Err(Error::ZeroSwitchSize)
        );
        assert_eq!(Structure::switch(2, vec![]), Err(Error::EmptySwitch));
        assert!(matches!(
            Structure::switch(2, vec![(key("0"), Structure::Empty)]),
            Err(Error::InvalidSwitchKey { .. })
        ));
        assert!(matches!(
            Structure::switch(
                1,
                vec![(key("1"), Structure::Empty), (key("1"), Structure::Empty)]
            ),
            Err(Error::DuplicateSwitchKey { .. })
        ));
    }

    #[test]
    fn finds_unknown_tails() {
        let plain = Structure::field(AtomicLabel::uint(8), Structure::Empty);
        assert!(!plain.has_unknown_tail());
        let tail = Structure::load_ref(CellSchema::Unknown, Structure::Unknown);
        assert!(tail.has_unknown_tail());
        let switched = Structure::switch(
            1,
            vec![(key("0"), Structure::Empty), (key("1"), Structure::Unknown)],
        )
        .unwrap();
        assert!(switched.has_unknown_tail());
    }
}
