//! This module contains the propagation of candidate schemas from a cell to
//! the cells it references.

use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    constant::MAX_REFS,
    expr::Expr,
    mapper::{LabelInfo, MapperContext},
    parse::{
        expand,
        frame::{Frame, TlbStack},
        read::{choice_guards, CHOICE_SORT},
        Expansion,
    },
    schema::{
        label::{CellSchema, TlbLabel},
        structure::Structure,
    },
    scope::{CellAddress, FieldKey},
};

/// A reference that a schema predicts at a fixed index of its cell.
#[derive(Clone, Debug, Eq, PartialEq)]
struct ChildSlot {
    index:  u32,
    schema: CellSchema,
    guard:  Expr,
}

/// Computes the candidate schemas of every reference of the cell at `address`
/// that `info` predicts, keyed by reference index.
///
/// The guard of each child candidate is the guard of the parent candidate
/// that predicts it, strengthened by the switch choices along the way. Every
/// child is completed with [`CellSchema::Unknown`] for the models in which no
/// parent candidate predicts anything for it.
#[must_use]
pub fn child_label_infos(
    ctx: &mut MapperContext<'_>,
    address: CellAddress,
    info: &LabelInfo,
) -> BTreeMap<u32, LabelInfo> {
    let mut slots = Vec::new();
    for (cell, guard) in info.candidates() {
        if let CellSchema::Data(_) = cell {
            let stack = TlbStack::new(address, ctx.schema, *cell, ctx.config.max_tlb_depth);
            collect_slots(ctx, stack, 0, guard, &mut slots);
        }
    }

    let mut children: BTreeMap<u32, LabelInfo> = BTreeMap::new();
    for slot in slots {
        children.entry(slot.index).or_default().add(slot.schema, slot.guard);
    }
    for (index, child) in &mut children {
        child.complete();
        trace!(%address, index, candidates = child.len(), "Predicted the schemas of a child");
    }
    children
}

/// Walks `stack` to its end, recording every reference load along the way
/// with the index it loads from.
fn collect_slots(
    ctx: &mut MapperContext<'_>,
    mut stack: TlbStack,
    mut index: u32,
    guard: &Expr,
    slots: &mut Vec<ChildSlot>,
) {
    let address = stack.address();
    while let Some(frame) = stack.pop() {
        let (structure, env) = match frame {
            Frame::Structure { structure, env } => (structure, env),
            Frame::Unknown => return,
            Frame::Const { .. } | Frame::PartialField { .. } => continue,
        };
        match structure.as_ref() {
            Structure::Empty => {}
            Structure::Unknown => return,
            Structure::LoadRef {
                reference, rest, ..
            } => {
                if index >= MAX_REFS {
                    return;
                }
                slots.push(ChildSlot {
                    index,
                    schema: *reference,
                    guard: guard.clone(),
                });
                index += 1;
                stack.push(Frame::structure(rest.clone(), env));
            }
            Structure::KnownTypePrefix {
                label: TlbLabel::Atomic(_),
                rest,
                ..
            } => stack.push(Frame::structure(rest.clone(), env)),
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
            Structure::SwitchPrefix { id, variants, .. } => {
                if let [variant] = variants.as_slice() {
                    stack.push(Frame::structure(variant.structure.clone(), env));
                    continue;
                }
                let key = FieldKey::SwitchChoice(env.path.child(*id));
                let choice = ctx.scope.read_field(address, &key, CHOICE_SORT);
                let guards = choice_guards(&choice, variants.len());
                for (variant, choice_guard) in variants.iter().zip(guards) {
                    let mut branch = stack.clone();
                    branch.push(Frame::structure(variant.structure.clone(), env.clone()));
                    let guard = Expr::and([guard.clone(), choice_guard]);
                    collect_slots(ctx, branch, index, &guard, slots);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        engine::Config,
        expr::Expr,
        mapper::{children::child_label_infos, LabelInfo, MapperContext},
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            SchemaBuilder,
        },
        scope::concolic::ConcolicScope,
    };

    #[test]
    fn references_of_fixed_schemas_are_predicted_unconditionally() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::load_ref(
                CellSchema::Dict { key_length: 16 },
                Structure::field(
                    AtomicLabel::uint(8),
                    Structure::load_ref(CellSchema::Unknown, Structure::Empty),
                ),
            ),
        )?;
        let schema = builder.finish()?;

        let config = Config::default();
        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        let mut ctx = MapperContext {
            config:  &config,
            schema:  &schema,
            scope:   &mut scope,
        };
        let children =
            child_label_infos(&mut ctx, address, &LabelInfo::single(CellSchema::Data(s)));

        assert_eq!(children.len(), 2);
        assert_eq!(
            children[&0].guard_of(CellSchema::Dict { key_length: 16 }),
            Some(&Expr::truth())
        );
        assert_eq!(children[&0].len(), 1);
        assert_eq!(children[&1].guard_of(CellSchema::Unknown), Some(&Expr::truth()));
        Ok(())
    }

    #[test]
    fn optional_references_are_completed_with_unknown() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let maybe = builder.maybe_ref(CellSchema::Dict { key_length: 8 });
        let schema = builder.finish()?;

        let config = Config::default();
        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        let mut ctx = MapperContext {
            config:  &config,
            schema:  &schema,
            scope:   &mut scope,
        };
        let children =
            child_label_infos(&mut ctx, address, &LabelInfo::single(CellSchema::Data(maybe)));

        let child = &children[&0];
        assert_eq!(child.len(), 2);
        let present = child.guard_of(CellSchema::Dict { key_length: 8 }).cloned();
        let absent = child.guard_of(CellSchema::Unknown).cloned();
        assert_eq!(absent, present.map(Expr::not));
        Ok(())
    }
}
