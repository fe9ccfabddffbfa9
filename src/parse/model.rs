//! This module contains the model-driven variant of parsing, which walks the
//! schema of a cell under a satisfying model and produces the cell's concrete
//! contents.
//!
//! Where stepping the parser branches on every alternative, this walk follows
//! the alternative that the model selects, so it always yields exactly one
//! result.

use crate::{
    constant::MAX_DATA_BITS,
    data::bit_string::BitString,
    expr::{eval::Value, numeric, Expr},
    parse::{
        expand,
        frame::{Frame, FrameEnv, TlbStack},
        read::{field_data, CHOICE_SORT},
        resolve_args,
        Expansion,
    },
    schema::{
        label::{AtomicLabel, CellSchema, FieldWidth, TlbLabel},
        structure::{Structure, StructureId, SwitchVariant, TypeArg},
        Schema,
    },
    scope::{CellAddress, ExecutionScope, FieldKey},
};

/// The concrete contents of a cell under a model.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModelCell {
    /// The data bits of the cell.
    pub data: BitString,

    /// The schemas of the cell's references, in order.
    pub refs: Vec<CellSchema>,
}

/// Reads the contents of the cell at `address` under the model of `scope`,
/// interpreting it according to `cell`.
///
/// Values that the model leaves unconstrained are taken from the cell's raw
/// data where that is known, and are zero otherwise.
pub fn read_in_model(
    schema: &Schema,
    scope: &mut dyn ExecutionScope,
    address: CellAddress,
    cell: CellSchema,
    max_depth: u32,
) -> ModelCell {
    let mut walker = Walker::new(scope, address);
    let mut stack = TlbStack::new(address, schema, cell, max_depth);
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Unknown => {
                walker.copy_rest();
                break;
            }
            Frame::Const { bits } => walker.emit(&bits),
            Frame::PartialField { .. } => {}
            Frame::Structure { structure, env } => match structure.as_ref() {
                Structure::Empty => {}
                Structure::Unknown => {
                    walker.copy_rest();
                    break;
                }
                Structure::LoadRef {
                    reference, rest, ..
                } => {
                    walker.result.refs.push(*reference);
                    stack.push(Frame::structure(rest.clone(), env.clone()));
                }
                Structure::KnownTypePrefix {
                    id,
                    label: TlbLabel::Atomic(label),
                    type_args,
                    rest,
                } => {
                    walker.field(*id, label, type_args, &env);
                    stack.push(Frame::structure(rest.clone(), env.clone()));
                }
                Structure::KnownTypePrefix {
                    id,
                    label: TlbLabel::Composite(label),
                    type_args,
                    rest,
                } => {
                    let expansion = Expansion {
                        id: *id,
                        label: *label,
                        type_args,
                        rest,
                        env: &env,
                    };
                    expand(schema, &mut *walker.scope, &mut stack, expansion);
                }
                Structure::SwitchPrefix {
                    id,
                    switch_size,
                    variants,
                } => {
                    let variant = walker.choose(*id, *switch_size, variants, &env);
                    if let Some(variant) = variant {
                        stack.push(Frame::structure(variant.structure.clone(), env.clone()));
                        walker.emit(&variant.key);
                    }
                }
            },
        }
    }
    walker.result
}

struct Walker<'a> {
    scope:    &'a mut dyn ExecutionScope,
    address:  CellAddress,
    data:     Expr,
    position: u32,
    result:   ModelCell,
}

impl<'a> Walker<'a> {
    fn new(scope: &'a mut dyn ExecutionScope, address: CellAddress) -> Self {
        let data = scope.read_field(address, &FieldKey::Data, numeric::DATA_SORT);
        Self {
            scope,
            address,
            data,
            position: 0,
            result: ModelCell::default(),
        }
    }

    fn evaluate(&self, expr: &Expr) -> Option<BitString> {
        match self.scope.evaluate_in_model(expr) {
            Some(Value::Bits(bits)) => Some(bits),
            _ => None,
        }
    }

    fn evaluate_u32(&self, expr: &Expr) -> u32 {
        self.evaluate(expr)
            .map_or(0, |bits| u32::try_from(bits.to_usize_saturating()).unwrap_or(u32::MAX))
    }

    fn emit(&mut self, bits: &BitString) {
        self.result.data.append(bits);
        self.position += bits.len();
    }

    /// Emits the value of the atomic field at node `id`.
    fn field(
        &mut self,
        id: StructureId,
        label: &AtomicLabel,
        type_args: &[TypeArg],
        env: &FrameEnv,
    ) {
        let args = resolve_args(&mut *self.scope, self.address, env, type_args);
        let width = label.width(&args);
        let bits = self.evaluate_u32(&width.to_expr()).min(MAX_DATA_BITS);

        let key = FieldKey::Tlb(env.path.child(id));
        let field = self.scope.read_field(self.address, &key, label.sort());
        let value = self.evaluate(&field).or_else(|| {
            let stored = field_data(
                &self.data,
                &numeric::size(self.position),
                label,
                &FieldWidth::Fixed(bits),
            );
            self.evaluate(&stored)
        });

        if bits == 0 {
            return;
        }
        let value = value.unwrap_or_else(|| BitString::zeros(bits));
        let encoded = if value.len() >= bits {
            value.extract(bits - 1, 0)
        } else {
            value.resize_unsigned(bits)
        };
        self.emit(&encoded);
    }

    /// Selects the variant of the switch at node `id` that the model chooses.
    fn choose<'s>(
        &mut self,
        id: StructureId,
        switch_size: u32,
        variants: &'s [SwitchVariant],
        env: &FrameEnv,
    ) -> Option<&'s SwitchVariant> {
        if let [variant] = variants {
            return Some(variant);
        }
        let key = FieldKey::SwitchChoice(env.path.child(id));
        let choice = self.scope.read_field(self.address, &key, CHOICE_SORT);
        if let Some(index) = self.evaluate(&choice) {
            let index = index.to_usize_saturating().min(variants.len().saturating_sub(1));
            return variants.get(index);
        }

        let discriminant = if self.position + switch_size <= MAX_DATA_BITS {
            let position = numeric::size(self.position);
            self.evaluate(&numeric::extract_at(&self.data, &position, switch_size))
        } else {
            None
        };
        match discriminant {
            Some(bits) => variants
                .iter()
                .find(|variant| variant.key == bits)
                .or_else(|| variants.last()),
            None => variants.first(),
        }
    }

    /// Copies the shapeless remainder of the cell.
    fn copy_rest(&mut self) {
        let data_length =
            self.scope
                .read_field(self.address, &FieldKey::DataLength, numeric::SIZE_SORT);
        let length = self.evaluate_u32(&data_length).min(MAX_DATA_BITS);
        if length > self.position {
            if let Some(data) = self.evaluate(&self.data) {
                let rest = data.slice(self.position, length - self.position);
                self.emit(&rest);
            }
        }

        let refs_length =
            self.scope
                .read_field(self.address, &FieldKey::RefsLength, numeric::REFS_SORT);
        let count = usize::try_from(self.evaluate_u32(&refs_length)).unwrap_or(usize::MAX);
        while self.result.refs.len() < count {
            self.result.refs.push(CellSchema::Unknown);
        }
    }
}
