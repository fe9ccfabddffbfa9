//! This module contains the generation of the size and field constraints of a
//! cell.
//!
//! The size constraint of a candidate schema walks the schema the same way the
//! parser does, summing up the data and references that every complete path
//! through it consumes. Paths that end in shapeless data only bound the cell's
//! sizes from below, while paths that end where the schema ends fix them.

use tracing::trace;

use crate::{
    constant::{MAX_DATA_BITS, MAX_REFS},
    expr::{
        numeric::{self, DATA_SORT, REFS_SORT, SIZE_SORT},
        Expr,
    },
    mapper::MapperContext,
    parse::{
        expand,
        frame::{Frame, TlbStack},
        read::{choice_guards, choice_term, known_key, CHOICE_SORT},
        resolve_args,
        Expansion,
    },
    schema::{
        label::{CellSchema, TlbLabel},
        structure::Structure,
    },
    scope::{CellAddress, FieldKey, Guarded},
};

/// Bounds the data length and reference count of the cell at `address` by
/// what any cell can hold.
#[must_use]
pub fn size_bounds(ctx: &mut MapperContext<'_>, address: CellAddress) -> Expr {
    let data_length = ctx.scope.read_field(address, &FieldKey::DataLength, SIZE_SORT);
    let refs_length = ctx.scope.read_field(address, &FieldKey::RefsLength, REFS_SORT);
    Expr::and([
        Expr::ule(data_length, numeric::size(MAX_DATA_BITS)),
        Expr::ule(refs_length, numeric::refs(MAX_REFS)),
    ])
}

/// Computes the constraint that the cell at `address` has the sizes that
/// `cell` predicts, together with the bounds on its fields of symbolic width.
///
/// Cells with no schema, and dictionaries, are only bounded by
/// [`size_bounds`].
#[must_use]
pub fn structural_constraint(
    ctx: &mut MapperContext<'_>,
    address: CellAddress,
    cell: CellSchema,
) -> Expr {
    let CellSchema::Data(_) = cell else {
        return Expr::truth();
    };

    let stack = TlbStack::new(address, ctx.schema, cell, ctx.config.max_tlb_depth);
    let mut walk = Walk {
        extents: Vec::new(),
        fields:  Vec::new(),
    };
    walk.run(ctx, stack, Extent::empty(), &Expr::truth());
    trace!(
        %address,
        %cell,
        paths = walk.extents.len(),
        fields = walk.fields.len(),
        "Computed the extents of a candidate schema"
    );

    let data_length = ctx.scope.read_field(address, &FieldKey::DataLength, SIZE_SORT);
    let refs_length = ctx.scope.read_field(address, &FieldKey::RefsLength, REFS_SORT);
    let paths = walk.extents.into_iter().map(|Guarded { guard, value }| {
        let refs = numeric::refs(value.refs);
        let fits = if value.open {
            Expr::and([
                Expr::ule(value.data, data_length.clone()),
                Expr::ule(refs, refs_length.clone()),
            ])
        } else {
            Expr::and([
                Expr::equal(value.data, data_length.clone()),
                Expr::equal(refs, refs_length.clone()),
            ])
        };
        Expr::and([guard, fits])
    });

    Expr::and(std::iter::once(Expr::or(paths)).chain(walk.fields))
}

/// The data and references consumed along one path through a schema.
#[derive(Clone, Debug)]
struct Extent {
    data: Expr,
    refs: u32,
    open: bool,
}

impl Extent {
    fn empty() -> Self {
        Self {
            data: numeric::size(0),
            refs: 0,
            open: false,
        }
    }

    fn add_data(&mut self, width: Expr) {
        self.data = Expr::add(self.data.clone(), width);
    }
}

struct Walk {
    extents: Vec<Guarded<Extent>>,
    fields:  Vec<Expr>,
}

impl Walk {
    /// Walks `stack` to its end, recording the extent of every path under the
    /// guard that selects it.
    fn run(
        &mut self,
        ctx: &mut MapperContext<'_>,
        mut stack: TlbStack,
        mut extent: Extent,
        guard: &Expr,
    ) {
        let address = stack.address();
        loop {
            let Some(frame) = stack.pop() else {
                self.extents.push(Guarded::new(guard.clone(), extent));
                return;
            };
            let (structure, env) = match frame {
                Frame::Unknown => {
                    extent.open = true;
                    self.extents.push(Guarded::new(guard.clone(), extent));
                    return;
                }
                Frame::Const { bits } => {
                    extent.add_data(numeric::size(bits.len()));
                    continue;
                }
                Frame::PartialField { width, offset, .. } => {
                    extent.add_data(numeric::size(width.saturating_sub(offset)));
                    continue;
                }
                Frame::Structure { structure, env } => (structure, env),
            };

            match structure.as_ref() {
                Structure::Empty => {}
                Structure::Unknown => stack.push(Frame::Unknown),
                Structure::LoadRef { rest, .. } => {
                    extent.refs += 1;
                    stack.push(Frame::structure(rest.clone(), env));
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
                    expand(ctx.schema, &mut *ctx.scope, &mut stack, expansion);
                }
                Structure::KnownTypePrefix {
                    id,
                    label: TlbLabel::Atomic(label),
                    type_args,
                    rest,
                } => {
                    let args = resolve_args(&mut *ctx.scope, address, &env, type_args);
                    let width = label.width(&args).to_expr();
                    if width.as_u32().is_some_and(|bits| bits > MAX_DATA_BITS) {
                        self.fields.push(Expr::not(guard.clone()));
                    } else if width.as_u32().is_none() {
                        let key = FieldKey::Tlb(env.path.child(*id));
                        let value = ctx.scope.read_field(address, &key, label.sort());
                        let bound = numeric::width_constraint(
                            &value,
                            &width,
                            ctx.config.length_upper_bound,
                            label.is_signed(),
                        );
                        self.fields.push(Expr::implies(guard.clone(), bound));
                    }
                    extent.add_data(width);
                    stack.push(Frame::structure(rest.clone(), env));
                }
                Structure::SwitchPrefix {
                    id,
                    switch_size,
                    variants,
                } => {
                    let position = extent.data.clone();
                    extent.add_data(numeric::size(*switch_size));
                    let data = ctx.scope.read_field(address, &FieldKey::Data, DATA_SORT);
                    let discriminant = numeric::extract_at(&data, &position, *switch_size);
                    let known = known_key(&discriminant, variants);

                    // Unknown keys leave the rest of the cell unconstrained so
                    // that reading the switch reports them.
                    let unknown = Expr::and([guard.clone(), Expr::not(known.clone())]);
                    let mut rest = extent.clone();
                    rest.open = true;
                    self.extents.push(Guarded::new(unknown, rest));
                    let guard = Expr::and([guard.clone(), known]);

                    if let [variant] = variants.as_slice() {
                        stack.push(Frame::structure(variant.structure.clone(), env));
                        self.run(ctx, stack, extent, &guard);
                        return;
                    }

                    let key = FieldKey::SwitchChoice(env.path.child(*id));
                    let choice = ctx.scope.read_field(address, &key, CHOICE_SORT);
                    let chosen = Expr::equal(choice.clone(), choice_term(&discriminant, variants));
                    self.fields.push(Expr::implies(guard.clone(), chosen));

                    let guards = choice_guards(&choice, variants.len());
                    for (variant, choice_guard) in variants.iter().zip(guards) {
                        let mut branch = stack.clone();
                        branch.push(Frame::structure(variant.structure.clone(), env.clone()));
                        let guard = Expr::and([guard.clone(), choice_guard]);
                        self.run(ctx, branch, extent.clone(), &guard);
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        engine::Config,
        mapper::{
            constraints::{size_bounds, structural_constraint},
            MapperContext,
        },
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            Schema,
            SchemaBuilder,
        },
        scope::{concolic::ConcolicScope, CellAddress, ExecutionScope, SatResult},
    };

    fn check(schema: &Schema, cell: CellSchema, data: &str, refs: usize) -> SatResult {
        let config = Config::default();
        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        let children: Vec<CellAddress> = (0..refs).map(|_| scope.allocate_cell()).collect();
        scope.seed_cell(address, &BitString::from_binary(data).unwrap(), &children);

        let constraint = {
            let mut ctx = MapperContext {
                config: &config,
                schema,
                scope: &mut scope,
            };
            let bounds = size_bounds(&mut ctx, address);
            crate::expr::Expr::and([bounds, structural_constraint(&mut ctx, address, cell)])
        };
        scope.assert(&constraint)
    }

    #[test]
    fn fixed_schemas_fix_the_cell_sizes() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::field(
                AtomicLabel::uint(4),
                Structure::load_ref(CellSchema::Unknown, Structure::Empty),
            ),
        )?;
        let schema = builder.finish()?;

        assert_eq!(check(&schema, CellSchema::Data(s), "1010", 1), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(s), "10100", 1), SatResult::Unsat);
        assert_eq!(check(&schema, CellSchema::Data(s), "1010", 0), SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn switches_size_the_variant_the_data_selects() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let m = builder.declare("M", 0)?;
        builder.define(
            m,
            Structure::switch(1, vec![
                (BitString::from_binary("0").unwrap(), Structure::Empty),
                (
                    BitString::from_binary("1").unwrap(),
                    Structure::field(AtomicLabel::int(8), Structure::Empty),
                ),
            ])?,
        )?;
        let schema = builder.finish()?;

        assert_eq!(check(&schema, CellSchema::Data(m), "0", 0), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(m), "111111111", 0), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(m), "1", 0), SatResult::Unsat);
        assert_eq!(check(&schema, CellSchema::Data(m), "0000", 0), SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn unknown_switch_keys_leave_the_cell_admissible() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let m = builder.declare("M", 0)?;
        builder.define(
            m,
            Structure::switch(2, vec![
                (BitString::from_binary("00").unwrap(), Structure::Empty),
                (
                    BitString::from_binary("01").unwrap(),
                    Structure::field(AtomicLabel::int(4), Structure::Empty),
                ),
            ])?,
        )?;
        let schema = builder.finish()?;

        assert_eq!(check(&schema, CellSchema::Data(m), "011010", 0), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(m), "0110", 0), SatResult::Unsat);
        assert_eq!(check(&schema, CellSchema::Data(m), "11", 0), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(m), "1000000", 2), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(m), "1", 0), SatResult::Unsat);
        Ok(())
    }

    #[test]
    fn shapeless_tails_bound_the_sizes_from_below() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(s, Structure::field(AtomicLabel::uint(8), Structure::Unknown))?;
        let schema = builder.finish()?;

        assert_eq!(check(&schema, CellSchema::Data(s), "11110000", 0), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(s), "111100001", 3), SatResult::Sat);
        assert_eq!(check(&schema, CellSchema::Data(s), "1111", 0), SatResult::Unsat);
        assert_eq!(check(&schema, CellSchema::Unknown, "1111", 0), SatResult::Sat);
        Ok(())
    }
}
