//! This module contains the structure builder, which reconstructs a schema
//! for a cell from the stores made while the cell is being assembled.
//!
//! Once the cell is finished the accumulated stores are folded into the body
//! of a fresh composite label, and the values of the stored fields are
//! written into the memory of the new cell. Reads from the finished cell then
//! behave exactly as they would for a cell that carried that label from the
//! start.

use std::rc::Rc;

use tracing::debug;

use crate::{
    constant::{
        CANONICAL_INT_BITS,
        COINS_LENGTH_BITS,
        COINS_MAX_UNITS,
        COINS_UNIT_BITS,
        MAX_DATA_BITS,
        MAX_REFS,
    },
    data::bit_string::BitString,
    error::engine::{Error, Result},
    expr::{
        numeric::{self, DATA_SORT, REFS_SORT, SIZE_SORT},
        Expr,
    },
    schema::{
        label::{AtomicLabel, CellSchema, CompositeKind, CompositeLabel, LabelId, TlbLabel},
        structure::{Structure, StructureId, SwitchVariant, TypeArg},
        Schema,
    },
    scope::{BuilderId, CellAddress, ExecutionScope, FieldKey, FieldPath},
};

/// A single store made to a builder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuilderField {
    /// A value of an atomic label of arity zero.
    Atomic { label: AtomicLabel, value: Expr },

    /// A coin amount, stored as its byte length followed by the amount.
    Coins { amount: Expr },

    /// Raw bits with no further structure.
    Constant(BitString),

    /// A reference to a cell of the provided schema.
    Ref(CellSchema),
}

/// The stores made to a builder so far.
///
/// Builders are values: copying a builder in the host is a clone, and the two
/// copies evolve independently from then on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StructureBuilder {
    fields:       Vec<BuilderField>,
    unknown_tail: bool,
}

/// The result of finishing a builder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuiltCell {
    /// The label reconstructed for the cell.
    pub label: LabelId,

    /// Conditions under which the stores form a valid cell.
    pub constraints: Vec<Expr>,
}

impl BuiltCell {
    /// Gets the schema of the finished cell.
    #[must_use]
    pub fn schema(&self) -> CellSchema {
        CellSchema::Data(self.label)
    }
}

impl StructureBuilder {
    /// Creates a builder to which nothing has been stored.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the stores made so far, in order.
    #[must_use]
    pub fn fields(&self) -> &[BuilderField] {
        &self.fields
    }

    /// Checks if the remainder of the cell has been stored without a known
    /// shape.
    #[must_use]
    pub fn has_unknown_tail(&self) -> bool {
        self.unknown_tail
    }

    /// Stores `value` as a field of `label`.
    ///
    /// Atomic labels of arity zero are stored as they are, and the builtin
    /// coins label is stored as its amount, with `value` being that amount.
    /// Stores after [`Self::add_unknown`] are absorbed by the unknown tail.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `label` takes type arguments, if it is a composite
    /// label other than coins, or if `value` does not have the sort of the
    /// label's values.
    pub fn add_tlb_label(&mut self, schema: &Schema, label: &TlbLabel, value: Expr) -> Result<()> {
        let name = || schema.label_name(label);
        let arity = schema.arity(label).unwrap_or_default();
        if arity != 0 {
            return Err(Error::NonZeroArity {
                label: name(),
                arity,
            });
        }

        let (field, expected) = match label {
            TlbLabel::Atomic(atomic) => {
                let field = BuilderField::Atomic {
                    label: atomic.clone(),
                    value: value.clone(),
                };
                (field, atomic.sort())
            }
            TlbLabel::Composite(id) => match schema.get(*id) {
                Some(composite) if composite.kind == CompositeKind::Coins => {
                    let field = BuilderField::Coins {
                        amount: value.clone(),
                    };
                    (field, numeric::CANONICAL_SORT)
                }
                _ => return Err(Error::UnsupportedBuilderLabel { label: name() }),
            },
        };
        if value.sort() != expected {
            return Err(Error::InitSortMismatch {
                label:    name(),
                expected: expected.to_string(),
                actual:   value.sort().to_string(),
            });
        }

        self.push(field);
        Ok(())
    }

    /// Stores the raw `bits`, merging them into an immediately preceding run
    /// of raw bits.
    pub fn add_constant(&mut self, bits: &BitString) {
        if bits.is_empty() || self.unknown_tail {
            return;
        }
        if let Some(BuilderField::Constant(previous)) = self.fields.last_mut() {
            previous.append(bits);
            return;
        }
        self.fields.push(BuilderField::Constant(bits.clone()));
    }

    /// Stores a reference to a cell of schema `reference`.
    pub fn add_ref(&mut self, reference: CellSchema) {
        self.push(BuilderField::Ref(reference));
    }

    /// Stores data and references with no known shape, which makes the rest
    /// of the cell shapeless.
    pub fn add_unknown(&mut self) {
        self.unknown_tail = true;
    }

    fn push(&mut self, field: BuilderField) {
        if !self.unknown_tail {
            self.fields.push(field);
        }
    }

    /// Finishes the cell at `address` that `owner` was assembling.
    ///
    /// The stores are folded into a fresh composite label that is added to
    /// `schema`, and the values of the stored fields are written to the
    /// memory of `address`. Unless the cell ends in shapeless data, its raw
    /// data and sizes are written as well.
    #[must_use]
    pub fn end(
        &self,
        owner: BuilderId,
        schema: &mut Schema,
        scope: &mut dyn ExecutionScope,
        address: CellAddress,
    ) -> BuiltCell {
        let layout = self.layout();
        let total = layout.last().map_or_else(
            || numeric::size(0),
            |slot| Expr::add(slot.position.clone(), slot.width.clone()),
        );
        let ref_count = u32::try_from(self.ref_count()).unwrap_or(u32::MAX);

        let mut constraints = vec![
            Expr::ule(total.clone(), numeric::size(MAX_DATA_BITS)),
            Expr::ule(numeric::refs(ref_count), numeric::refs(MAX_REFS)),
        ];
        let mut data = Expr::bits(BitString::zeros(MAX_DATA_BITS));
        let mut structure = if self.unknown_tail {
            Structure::Unknown
        } else {
            Structure::Empty
        };

        for (field, slot) in self.fields.iter().zip(&layout).rev() {
            let always = Expr::truth();
            structure = match field {
                BuilderField::Atomic { label, value } => {
                    let id = StructureId::fresh();
                    let key = FieldKey::Tlb(FieldPath::root().child(id));
                    scope.write_field(address, key, label.sort(), value.clone(), &always);
                    data = place(data, raw_bits(label, value), &slot.position);
                    Structure::known_type_prefix(id, label.clone(), vec![], structure)
                }
                BuilderField::Coins { amount } => {
                    let (length_id, amount_id) = (StructureId::fresh(), StructureId::fresh());
                    let units = numeric::unit_length(amount, COINS_UNIT_BITS, COINS_MAX_UNITS);
                    let length = Expr::resize(units, CANONICAL_INT_BITS);
                    let limit = BitString::from_u128(1, CANONICAL_INT_BITS)
                        .shl((COINS_UNIT_BITS * COINS_MAX_UNITS) as usize);
                    constraints.push(Expr::ult(amount.clone(), Expr::bits(limit)));

                    let sort = numeric::CANONICAL_SORT;
                    let length_key = FieldKey::Tlb(FieldPath::root().child(length_id));
                    let amount_key = FieldKey::Tlb(FieldPath::root().child(amount_id));
                    scope.write_field(address, length_key, sort, length.clone(), &always);
                    scope.write_field(address, amount_key, sort, amount.clone(), &always);

                    let length_bits = Expr::resize(length, COINS_LENGTH_BITS);
                    data = place(data, length_bits, &slot.position);
                    let amount_position =
                        Expr::add(slot.position.clone(), numeric::size(COINS_LENGTH_BITS));
                    data = place_wide(data, amount.clone(), &amount_position, &slot.width);

                    let amount_label = AtomicLabel::UnitInteger {
                        signed:    false,
                        unit_bits: COINS_UNIT_BITS,
                        max_units: COINS_MAX_UNITS,
                    };
                    let amount_field = Structure::known_type_prefix(
                        amount_id,
                        amount_label,
                        vec![TypeArg::Field(length_id)],
                        structure,
                    );
                    Structure::known_type_prefix(
                        length_id,
                        AtomicLabel::uint(COINS_LENGTH_BITS),
                        vec![],
                        amount_field,
                    )
                }
                BuilderField::Constant(bits) => {
                    data = place(data, Expr::bits(bits.clone()), &slot.position);
                    Structure::SwitchPrefix {
                        id:          StructureId::fresh(),
                        switch_size: bits.len(),
                        variants:    vec![SwitchVariant {
                            key:       bits.clone(),
                            structure: Rc::new(structure),
                        }],
                    }
                }
                BuilderField::Ref(reference) => Structure::load_ref(*reference, structure),
            };
        }

        if !self.unknown_tail {
            let always = Expr::truth();
            scope.write_field(address, FieldKey::Data, DATA_SORT, data, &always);
            scope.write_field(address, FieldKey::DataLength, SIZE_SORT, total, &always);
            let refs = numeric::refs(ref_count);
            scope.write_field(address, FieldKey::RefsLength, REFS_SORT, refs, &always);
        }

        let id = LabelId::fresh();
        schema.insert_constructed(CompositeLabel {
            id,
            name: Rc::from(format!("Constructed#{owner}#{id}")),
            arity: 0,
            kind: CompositeKind::Constructed,
            structure: Rc::new(structure),
        });
        debug!(
            %owner,
            %address,
            label = %id,
            fields = self.fields.len(),
            unknown_tail = self.unknown_tail,
            "Reconstructed the schema of a built cell"
        );

        BuiltCell {
            label: id,
            constraints,
        }
    }

    fn ref_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|field| matches!(field, BuilderField::Ref(_)))
            .count()
    }

    /// Computes the data position and width of every store.
    fn layout(&self) -> Vec<Slot> {
        let mut position = numeric::size(0);
        self.fields
            .iter()
            .map(|field| {
                let width = match field {
                    BuilderField::Atomic { label, .. } => label.width(&[]).to_expr(),
                    BuilderField::Coins { amount } => {
                        let units = numeric::unit_length(amount, COINS_UNIT_BITS, COINS_MAX_UNITS);
                        Expr::add(
                            numeric::size(COINS_LENGTH_BITS),
                            Expr::mul(units, numeric::size(COINS_UNIT_BITS)),
                        )
                    }
                    BuilderField::Constant(bits) => numeric::size(bits.len()),
                    BuilderField::Ref(_) => numeric::size(0),
                };
                let slot = Slot {
                    position: position.clone(),
                    width:    width.clone(),
                };
                position = Expr::add(position.clone(), width);
                slot
            })
            .collect()
    }
}

/// Where a store lands in the data of the cell.
#[derive(Clone, Debug)]
struct Slot {
    position: Expr,
    width:    Expr,
}

/// Gets the bits that a field of `label` holding `value` occupies in the data.
fn raw_bits(label: &AtomicLabel, value: &Expr) -> Expr {
    match label.width(&[]).as_fixed() {
        Some(0) | None => Expr::bits(BitString::new()),
        Some(bits) if label.is_integer() => Expr::extract(value.clone(), bits - 1, 0),
        Some(_) => value.clone(),
    }
}

/// Places the fixed-width `bits` into `data` starting at `position`.
fn place(data: Expr, bits: Expr, position: &Expr) -> Expr {
    let width = bits.width().unwrap_or(0);
    if width == 0 {
        return data;
    }
    place_wide(data, bits, position, &numeric::size(width))
}

/// Places the low `width` bits of `value` into `data` starting at `position`.
///
/// The bits of `value` above `width` must be zero. Stores never overlap, so
/// adding the shifted value is the same as merging it in.
fn place_wide(data: Expr, value: Expr, position: &Expr, width: &Expr) -> Expr {
    let end = Expr::add(position.clone(), width.clone());
    let distance = Expr::sub(numeric::size(MAX_DATA_BITS), end);
    let widened = Expr::resize(value, MAX_DATA_BITS);
    let shifted = Expr::shl(widened, Expr::resize(distance, MAX_DATA_BITS));
    Expr::add(data, shifted)
}
