//! This module contains the intermediate representation of TL-B schemas.
//!
//! A schema is a set of composite labels, each of which owns a [`Structure`]
//! describing the layout of its data and references. Composite labels refer to
//! each other by [`LabelId`], which makes recursive and mutually-recursive
//! definitions straightforward to express.
//!
//! # Construction
//!
//! Schemas are built in two phases using a [`SchemaBuilder`]. All labels are
//! first declared, which allocates their identities, and then their bodies are
//! defined. This allows a body to refer to any declared label, including the
//! one being defined.

pub mod json;
pub mod label;
pub mod structure;

use std::{collections::HashSet, rc::Rc};

use crate::{
    constant::{COINS_LENGTH_BITS, COINS_MAX_UNITS, COINS_UNIT_BITS, MAX_DATA_BITS, MAX_INT_BITS},
    data::{bit_string::BitString, cow::CowMap},
    error::schema::{Error, Errors, Result},
    schema::{
        label::{AtomicLabel, CellSchema, CompositeKind, CompositeLabel, LabelId, TlbLabel},
        structure::{Structure, StructureId, TypeArg},
    },
};

/// A finished schema.
///
/// Cloning a schema is cheap, and labels added to a clone (such as those
/// constructed by the builder) are never visible in the original.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    labels: CowMap<LabelId, Rc<CompositeLabel>>,
    names:  CowMap<Rc<str>, LabelId>,
}

impl Schema {
    /// Creates a schema containing no labels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the composite label with the provided `id`, if it exists.
    #[must_use]
    pub fn get(&self, id: LabelId) -> Option<&Rc<CompositeLabel>> {
        self.labels.get(&id)
    }

    /// Looks up a composite label by its `name`.
    #[must_use]
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.names.get(&Rc::from(name)).copied()
    }

    /// Gets the number of composite labels in the schema.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Checks if the schema contains no composite labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Gets the arity of `label`, or [`None`] if it is a composite label that
    /// does not exist.
    #[must_use]
    pub fn arity(&self, label: &TlbLabel) -> Option<usize> {
        match label {
            TlbLabel::Atomic(atomic) => Some(atomic.arity()),
            TlbLabel::Composite(id) => self.get(*id).map(|l| l.arity),
        }
    }

    /// Gets a human-readable name for `label`.
    #[must_use]
    pub fn label_name(&self, label: &TlbLabel) -> String {
        match label {
            TlbLabel::Atomic(atomic) => atomic.to_string(),
            TlbLabel::Composite(id) => self
                .get(*id)
                .map_or_else(|| id.to_string(), |l| l.name.to_string()),
        }
    }

    /// Adds a label that was constructed after the schema was finished.
    ///
    /// Only this handle observes the new label.
    pub fn insert_constructed(&mut self, label: CompositeLabel) {
        let id = label.id;
        self.names.insert(label.name.clone(), id);
        self.labels.insert(id, Rc::new(label));
    }

    /// Computes the number of data bits that every instance of the label `id`
    /// occupies, if that number is fixed and the label loads no references.
    #[must_use]
    pub fn fixed_data_width(&self, id: LabelId) -> Option<u32> {
        self.fixed_width_impl(id, &mut HashSet::new())
    }

    fn fixed_width_impl(&self, id: LabelId, visiting: &mut HashSet<LabelId>) -> Option<u32> {
        if !visiting.insert(id) {
            return None;
        }
        let label = self.get(id)?;
        let mut width = 0u32;
        let mut current = label.structure.clone();
        let result = loop {
            match current.as_ref() {
                Structure::Empty => break Some(width),
                Structure::Unknown | Structure::LoadRef { .. } => break None,
                Structure::KnownTypePrefix {
                    label,
                    type_args,
                    rest,
                    ..
                } => {
                    let field = match label {
                        TlbLabel::Atomic(atomic) if type_args.is_empty() => {
                            atomic.width(&[]).as_fixed()
                        }
                        TlbLabel::Atomic(_) => None,
                        TlbLabel::Composite(inner) => self.fixed_width_impl(*inner, visiting),
                    };
                    match field {
                        Some(w) => width = width.saturating_add(w),
                        None => break None,
                    }
                    current = rest.clone();
                }
                Structure::SwitchPrefix {
                    switch_size,
                    variants,
                    ..
                } => {
                    if variants.len() != 1 {
                        break None;
                    }
                    width = width.saturating_add(*switch_size);
                    current = variants[0].structure.clone();
                }
            }
        };
        visiting.remove(&id);
        result
    }
}

/// Finds a width of the field of `label` applied to `type_args` that no cell
/// could hold, returning it along with the limit that it exceeds.
///
/// Constant type arguments are bounded by the cell size as they may be used
/// as widths by the label they are passed to.
pub(crate) fn oversized_width(label: &TlbLabel, type_args: &[TypeArg]) -> Option<(u32, u32)> {
    let own = match label {
        TlbLabel::Atomic(AtomicLabel::Integer { bits, .. }) => Some((*bits, MAX_INT_BITS)),
        TlbLabel::Atomic(AtomicLabel::BitArray { bits }) => Some((*bits, MAX_DATA_BITS)),
        TlbLabel::Atomic(AtomicLabel::UnitInteger {
            unit_bits,
            max_units,
            ..
        }) => Some((
            unit_bits.checked_mul(*max_units).unwrap_or(u32::MAX),
            MAX_DATA_BITS,
        )),
        _ => None,
    };
    let constants = type_args.iter().filter_map(|arg| match arg {
        TypeArg::Const(value) => Some((*value, MAX_DATA_BITS)),
        _ => None,
    });
    own.into_iter().chain(constants).find(|(bits, limit)| bits > limit)
}

/// A declared label whose body may not yet be defined.
#[derive(Clone, Debug)]
struct Declaration {
    id:        LabelId,
    name:      Rc<str>,
    arity:     usize,
    kind:      CompositeKind,
    structure: Option<Rc<Structure>>,
}

/// The two-phase constructor for [`Schema`]s.
#[derive(Clone, Debug, Default)]
pub struct SchemaBuilder {
    declarations: Vec<Declaration>,
    coins:        Option<LabelId>,
}

impl SchemaBuilder {
    /// Creates a builder with no declarations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a composite label called `name` that takes `arity` type
    /// arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a label with the same name has already been
    /// declared.
    pub fn declare(&mut self, name: impl Into<Rc<str>>, arity: usize) -> Result<LabelId> {
        self.declare_kind(name.into(), arity, CompositeKind::User)
    }

    fn declare_kind(
        &mut self,
        name: Rc<str>,
        arity: usize,
        kind: CompositeKind,
    ) -> Result<LabelId> {
        if self.declarations.iter().any(|d| d.name == name) {
            return Err(Error::DuplicateLabel {
                name: name.to_string(),
            });
        }
        let id = LabelId::fresh();
        self.declarations.push(Declaration {
            id,
            name,
            arity,
            kind,
            structure: None,
        });
        Ok(id)
    }

    /// Looks up a declared label by `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<LabelId> {
        self.declarations.iter().find(|d| &*d.name == name).map(|d| d.id)
    }

    /// Gets the declared arity of the label `id`.
    #[must_use]
    pub fn arity(&self, id: LabelId) -> Option<usize> {
        self.declarations.iter().find(|d| d.id == id).map(|d| d.arity)
    }

    /// Assigns the body of the declared label `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `id` was not declared by this builder or if the body
    /// of the label has already been assigned.
    pub fn define(&mut self, id: LabelId, structure: Structure) -> Result<()> {
        let Some(declaration) = self.declarations.iter_mut().find(|d| d.id == id) else {
            return Err(Error::UndefinedLabel {
                name: id.to_string(),
            });
        };
        if declaration.structure.is_some() {
            return Err(Error::AlreadyDefined {
                name: declaration.name.to_string(),
            });
        }
        declaration.structure = Some(Rc::new(structure));
        Ok(())
    }

    /// Gets the builtin label for coin amounts, declaring it on first use.
    ///
    /// A coin amount is a four-bit count of bytes followed by an unsigned
    /// integer of that many bytes.
    pub fn coins(&mut self) -> LabelId {
        if let Some(id) = self.coins {
            return id;
        }
        let id = LabelId::fresh();
        let length = StructureId::fresh();
        let structure = Structure::known_type_prefix(
            length,
            AtomicLabel::uint(COINS_LENGTH_BITS),
            vec![],
            Structure::known_type_prefix(
                StructureId::fresh(),
                AtomicLabel::UnitInteger {
                    signed:    false,
                    unit_bits: COINS_UNIT_BITS,
                    max_units: COINS_MAX_UNITS,
                },
                vec![TypeArg::Field(length)],
                Structure::Empty,
            ),
        );
        self.declarations.push(Declaration {
            id,
            name: Rc::from("Coins"),
            arity: 0,
            kind: CompositeKind::Coins,
            structure: Some(Rc::new(structure)),
        });
        self.coins = Some(id);
        id
    }

    /// Creates a builtin label for an optional reference to a cell of schema
    /// `reference`.
    ///
    /// The label is a one-bit switch where `0` ends the data and `1` is
    /// followed by the reference.
    pub fn maybe_ref(&mut self, reference: CellSchema) -> LabelId {
        let id = LabelId::fresh();
        let structure = Structure::SwitchPrefix {
            id:          StructureId::fresh(),
            switch_size: 1,
            variants:    vec![
                structure::SwitchVariant {
                    key:       BitString::from_u128(0, 1),
                    structure: Rc::new(Structure::Empty),
                },
                structure::SwitchVariant {
                    key:       BitString::from_u128(1, 1),
                    structure: Rc::new(Structure::load_ref(reference, Structure::Empty)),
                },
            ],
        };
        self.declarations.push(Declaration {
            id,
            name: Rc::from(format!("Maybe ^{reference}#{id}")),
            arity: 0,
            kind: CompositeKind::MaybeRef,
            structure: Some(Rc::new(structure)),
        });
        id
    }

    /// Finishes construction of the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] containing every problem found if any declared label
    /// was never defined, if a label with an unknown tail is used as a nested
    /// field, or if a field could never fit in a cell. Each error names the
    /// label whose declaration it was found in.
    pub fn finish(self) -> std::result::Result<Schema, Errors> {
        let mut errors = Errors::new();
        let unknown_tailed: HashSet<LabelId> = self
            .declarations
            .iter()
            .filter(|d| d.structure.as_ref().is_some_and(|s| s.has_unknown_tail()))
            .map(|d| d.id)
            .collect();

        for (index, declaration) in self.declarations.iter().enumerate() {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            let declared = &*declaration.name;
            let Some(structure) = &declaration.structure else {
                let name = declared.to_string();
                errors.add_for(index, declared, Error::NeverDefined { name });
                continue;
            };

            let name_of = |id: LabelId| {
                self.declarations
                    .iter()
                    .find(|d| d.id == id)
                    .map_or_else(|| id.to_string(), |d| d.name.to_string())
            };
            let mut nested_unknown = Vec::new();
            let mut oversized = Vec::new();
            structure.for_each_field(&mut |label, type_args| {
                if let TlbLabel::Composite(id) = label {
                    if unknown_tailed.contains(id) {
                        nested_unknown.push(*id);
                    }
                }
                if let Some(width) = oversized_width(label, type_args) {
                    oversized.push((label.clone(), width));
                }
            });
            for id in nested_unknown {
                let name = name_of(id);
                errors.add_for(index, declared, Error::UnknownBelowRoot { name });
            }
            for (label, (bits, limit)) in oversized {
                let name = match label {
                    TlbLabel::Atomic(atomic) => atomic.to_string(),
                    TlbLabel::Composite(id) => name_of(id),
                };
                errors.add_for(index, declared, Error::TooWide { name, bits, limit });
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut schema = Schema::new();
        for declaration in self.declarations {
            let Some(structure) = declaration.structure else {
                continue;
            };
            schema.names.insert(declaration.name.clone(), declaration.id);
            schema.labels.insert(
                declaration.id,
                Rc::new(CompositeLabel {
                    id: declaration.id,
                    name: declaration.name,
                    arity: declaration.arity,
                    kind: declaration.kind,
                    structure,
                }),
            );
        }

        Ok(schema)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        error::schema::Error,
        schema::{
            label::{AtomicLabel, CellSchema, CompositeKind},
            structure::{Structure, StructureId, TypeArg},
            SchemaBuilder,
        },
    };

    #[test]
    fn supports_recursive_definitions() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let list = builder.declare("List", 0)?;
        let body = Structure::switch(
            1,
            vec![
                (BitString::from_binary("0").unwrap(), Structure::Empty),
                (
                    BitString::from_binary("1").unwrap(),
                    Structure::field(
                        AtomicLabel::uint(8),
                        Structure::field(list, Structure::Empty),
                    ),
                ),
            ],
        )?;
        builder.define(list, body)?;
        let schema = builder.finish()?;

        assert_eq!(schema.label_id("List"), Some(list));
        assert_eq!(schema.get(list).map(|l| l.arity), Some(0));
        assert_eq!(schema.fixed_data_width(list), None);
        Ok(())
    }

    #[test]
    fn rejects_duplicate_and_repeated_definitions() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let a = builder.declare("A", 0)?;
        assert!(matches!(builder.declare("A", 0), Err(Error::DuplicateLabel { .. })));
        builder.define(a, Structure::Empty)?;
        assert!(matches!(
            builder.define(a, Structure::Empty),
            Err(Error::AlreadyDefined { .. })
        ));
        Ok(())
    }

    #[test]
    fn reports_undefined_labels_and_nested_unknowns() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let open = builder.declare("Open", 0)?;
        let user = builder.declare("User", 0)?;
        builder.declare("Missing", 0)?;
        builder.define(open, Structure::Unknown)?;
        builder.define(user, Structure::field(open, Structure::Empty))?;

        let errors = builder.finish().unwrap_err();
        let found: Vec<_> = errors.as_slice().iter().map(|e| (e.declaration, &e.error)).collect();
        assert_eq!(found.len(), 2);
        assert!(matches!(found[0], (1, Error::UnknownBelowRoot { .. })));
        assert!(matches!(found[1], (2, Error::NeverDefined { .. })));
        assert_eq!(errors.labels(), vec!["User", "Missing"]);
        Ok(())
    }

    #[test]
    fn provides_builtin_labels() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let coins = builder.coins();
        assert_eq!(builder.coins(), coins);
        let maybe = builder.maybe_ref(CellSchema::Unknown);
        let schema = builder.finish()?;

        assert_eq!(schema.get(coins).map(|l| l.kind), Some(CompositeKind::Coins));
        assert_eq!(schema.get(maybe).map(|l| l.kind), Some(CompositeKind::MaybeRef));
        assert_eq!(schema.fixed_data_width(coins), None);
        Ok(())
    }

    #[test]
    fn computes_fixed_widths_through_nested_labels() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let inner = builder.declare("Inner", 0)?;
        let outer = builder.declare("Outer", 0)?;
        builder.define(inner, Structure::field(AtomicLabel::int(16), Structure::Empty))?;
        builder.define(
            outer,
            Structure::constant(
                BitString::from_binary("10").unwrap(),
                Structure::field(inner, Structure::field(AtomicLabel::bits(5), Structure::Empty)),
            )?,
        )?;
        let schema = builder.finish()?;
        assert_eq!(schema.fixed_data_width(outer), Some(23));
        Ok(())
    }

    #[test]
    fn rejects_fields_that_cannot_fit_in_a_cell() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let units = builder.declare("Units", 0)?;
        let sized = builder.declare("Sized", 0)?;
        let huge_units = AtomicLabel::UnitInteger {
            signed:    false,
            unit_bits: 1 << 30,
            max_units: 15,
        };
        builder.define(
            units,
            Structure::known_type_prefix(
                StructureId::fresh(),
                huge_units,
                vec![TypeArg::Const(4)],
                Structure::Empty,
            ),
        )?;
        builder.define(
            sized,
            Structure::known_type_prefix(
                StructureId::fresh(),
                AtomicLabel::SizedInteger { signed: false },
                vec![TypeArg::Const(5000)],
                Structure::Empty,
            ),
        )?;

        let errors = builder.finish().unwrap_err();
        let found: Vec<_> = errors.as_slice().iter().map(|e| (e.declaration, &e.error)).collect();
        assert_eq!(found.len(), 2);
        assert!(matches!(found[0], (0, Error::TooWide {
            bits: u32::MAX,
            limit: 1023,
            ..
        })));
        assert!(matches!(found[1], (1, Error::TooWide { bits: 5000, .. })));
        Ok(())
    }
}
