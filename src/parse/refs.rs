//! This module contains the stepping of the parser for reference loads and
//! for the check that a slice has been read completely.
//!
//! References and data are separate streams in a cell, so a reference load
//! does not have to be at the top of the stack to be read. Loads that data
//! reads skip over are queued on the stack, and a reference read takes the
//! oldest queued load before looking at the stack itself.

use tracing::trace;

use crate::{
    error::TlbStructuralError,
    expr::{numeric, Expr},
    parse::{
        frame::{Frame, TlbStack},
        outcome::{EndOutcome, RefOutcome},
        Expansion,
        SliceCursor,
        StepContext,
    },
    schema::{
        label::{CellSchema, TlbLabel},
        structure::{Structure, StructureId},
    },
    scope::Guarded,
};

/// Loads the next reference from the slice whose parsing state is `stack`,
/// where `cursor` is the slice's position before the load.
#[must_use]
pub fn load_ref(
    ctx: &mut StepContext<'_>,
    stack: &TlbStack,
    cursor: &SliceCursor,
) -> Vec<Guarded<RefOutcome>> {
    let mut stack = stack.clone();
    if let Some(pending) = stack.take_pending_ref() {
        trace!(node = %pending.node, "Loaded a queued reference");
        return vec![loaded(stack, pending.reference)];
    }

    loop {
        let Some(frame) = stack.top().cloned() else {
            return vec![Guarded::always(RefOutcome::Error(
                TlbStructuralError::UnexpectedRef,
            ))];
        };
        match frame {
            Frame::Unknown => return unknown_ref(ctx, stack, cursor),
            Frame::Const { .. } | Frame::PartialField { .. } => break,
            Frame::Structure { structure, env } => match structure.as_ref() {
                Structure::Empty => {
                    stack.pop();
                }
                Structure::Unknown => return unknown_ref(ctx, stack, cursor),
                Structure::LoadRef {
                    id,
                    reference,
                    rest,
                } => {
                    stack.pop();
                    stack.push(Frame::structure(rest.clone(), env.clone()));
                    if !stack.is_consumed(*id) {
                        stack.consume_ref(*id);
                        return vec![loaded(stack, *reference)];
                    }
                }
                Structure::KnownTypePrefix {
                    id,
                    label: TlbLabel::Composite(label),
                    type_args,
                    rest,
                } => {
                    stack.pop();
                    let expansion = Expansion {
                        id: *id,
                        label: *label,
                        type_args,
                        rest,
                        env: &env,
                    };
                    ctx.expand(&mut stack, expansion);
                }
                Structure::KnownTypePrefix { .. } | Structure::SwitchPrefix { .. } => break,
            },
        }
    }

    match look_ahead(&stack) {
        Some((node, reference)) => {
            trace!(%node, "Loaded a reference ahead of the data before it");
            stack.consume_ref(node);
            vec![loaded(stack, reference)]
        }
        None => vec![Guarded::always(RefOutcome::Error(
            TlbStructuralError::UnexpectedRef,
        ))],
    }
}

fn loaded(stack: TlbStack, child: CellSchema) -> Guarded<RefOutcome> {
    Guarded::always(RefOutcome::Loaded { stack, child })
}

/// Loads a reference from shapeless data, which succeeds exactly when the
/// cell holds another reference.
fn unknown_ref(
    ctx: &mut StepContext<'_>,
    stack: TlbStack,
    cursor: &SliceCursor,
) -> Vec<Guarded<RefOutcome>> {
    let refs_length = ctx.refs_length(stack.address());
    let available = Expr::ult(cursor.ref_position.clone(), refs_length);
    vec![
        Guarded::new(
            available.clone(),
            RefOutcome::Loaded {
                stack,
                child: CellSchema::Unknown,
            },
        ),
        Guarded::new(
            Expr::not(available),
            RefOutcome::Error(TlbStructuralError::UnexpectedRef),
        ),
    ]
}

/// Searches the linear chain of atomic fields below the top of the stack for
/// a reference load that has not been consumed.
fn look_ahead(stack: &TlbStack) -> Option<(StructureId, CellSchema)> {
    for frame in stack.frames().iter().rev() {
        let mut node = match frame {
            Frame::Structure { structure, .. } => structure.as_ref(),
            Frame::Const { .. } | Frame::PartialField { .. } => continue,
            Frame::Unknown => return None,
        };
        loop {
            match node {
                Structure::KnownTypePrefix {
                    label: TlbLabel::Atomic(_),
                    rest,
                    ..
                } => node = rest,
                Structure::LoadRef {
                    id,
                    reference,
                    rest,
                } => {
                    if !stack.is_consumed(*id) {
                        return Some((*id, *reference));
                    }
                    node = rest;
                }
                Structure::Empty => break,
                _ => return None,
            }
        }
    }
    None
}

/// Checks that the slice whose parsing state is `stack` has been read
/// completely, where `cursor` is the slice's final position.
#[must_use]
pub fn end(
    ctx: &mut StepContext<'_>,
    stack: &TlbStack,
    cursor: &SliceCursor,
) -> Vec<Guarded<EndOutcome>> {
    if !stack.pending_refs().is_empty() {
        return vec![extra_data()];
    }
    end_from(ctx, stack.clone(), cursor)
}

fn extra_data() -> Guarded<EndOutcome> {
    Guarded::always(EndOutcome::Error(TlbStructuralError::UnexpectedExtraData))
}

fn end_from(
    ctx: &mut StepContext<'_>,
    mut stack: TlbStack,
    cursor: &SliceCursor,
) -> Vec<Guarded<EndOutcome>> {
    loop {
        let Some(frame) = stack.pop() else {
            return vec![Guarded::always(EndOutcome::Finished)];
        };
        let (structure, env) = match frame {
            Frame::Unknown => return unknown_end(ctx, &stack, cursor),
            Frame::Const { .. } | Frame::PartialField { .. } => return vec![extra_data()],
            Frame::Structure { structure, env } => (structure, env),
        };
        match structure.as_ref() {
            Structure::Empty => {}
            Structure::Unknown => return unknown_end(ctx, &stack, cursor),
            Structure::LoadRef { id, rest, .. } => {
                if !stack.is_consumed(*id) {
                    return vec![extra_data()];
                }
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
                ctx.expand(&mut stack, expansion);
            }
            Structure::KnownTypePrefix {
                label: TlbLabel::Atomic(label),
                type_args,
                rest,
                ..
            } => {
                let args = ctx.resolve_args(stack.address(), &env, type_args);
                let width = label.width(&args);
                stack.push(Frame::structure(rest.clone(), env));
                match width.as_fixed() {
                    Some(0) => {}
                    Some(_) => return vec![extra_data()],
                    None => {
                        let empty = Expr::equal(width.to_expr(), numeric::size(0));
                        let mut outcomes = vec![Guarded::new(
                            Expr::not(empty.clone()),
                            EndOutcome::Error(TlbStructuralError::UnexpectedExtraData),
                        )];
                        let rest = end_from(ctx, stack, cursor);
                        outcomes.extend(rest.into_iter().map(|o| o.under(&empty)));
                        return outcomes;
                    }
                }
            }
            Structure::SwitchPrefix { .. } => return vec![extra_data()],
        }
    }
}

/// Ends a slice whose remaining contents are shapeless, which succeeds
/// exactly when all data and references have been read.
fn unknown_end(
    ctx: &mut StepContext<'_>,
    stack: &TlbStack,
    cursor: &SliceCursor,
) -> Vec<Guarded<EndOutcome>> {
    let address = stack.address();
    let data_length = ctx.data_length(address);
    let refs_length = ctx.refs_length(address);
    let finished = Expr::and([
        Expr::equal(cursor.data_position.clone(), data_length),
        Expr::equal(cursor.ref_position.clone(), refs_length),
    ]);
    vec![
        Guarded::new(finished.clone(), EndOutcome::Finished),
        Guarded::new(
            Expr::not(finished),
            EndOutcome::Error(TlbStructuralError::UnexpectedExtraData),
        ),
    ]
}

#[cfg(test)]
mod test {
    use crate::{
        data::{bit_string::BitString, cow::CowSet},
        engine::Config,
        error::TlbStructuralError,
        parse::{
            frame::TlbStack,
            outcome::{EndOutcome, RefOutcome},
            refs::{end, load_ref},
            SliceCursor,
            StepContext,
        },
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            SchemaBuilder,
        },
        scope::{concolic::ConcolicScope, fork::fork},
    };

    #[test]
    fn references_are_found_ahead_of_data() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::field(
                AtomicLabel::uint(8),
                Structure::load_ref(CellSchema::Dict { key_length: 32 }, Structure::Empty),
            ),
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let config = Config::default();
        let markers = CowSet::new();
        let mut ctx = StepContext {
            config:  &config,
            schema:  &schema,
            markers: &markers,
            scope:   &mut scope,
        };

        let outcomes = load_ref(&mut ctx, &stack, &SliceCursor::start());
        assert_eq!(outcomes.len(), 1);
        let RefOutcome::Loaded { stack, child } = &outcomes[0].value else {
            panic!("Expected a loaded reference");
        };
        assert_eq!(*child, CellSchema::Dict { key_length: 32 });

        let again = load_ref(&mut ctx, stack, &SliceCursor::at(0, 1));
        assert_eq!(
            again[0].value,
            RefOutcome::Error(TlbStructuralError::UnexpectedRef)
        );
        Ok(())
    }

    #[test]
    fn unknown_cells_end_when_everything_was_read() {
        let schema = crate::schema::Schema::new();
        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        scope.seed_cell(address, &BitString::from_binary("1010").unwrap(), &[]);
        let stack = TlbStack::unknown(address);
        let config = Config::default();
        let markers = CowSet::new();

        let (early, done) = {
            let mut ctx = StepContext {
                config:  &config,
                schema:  &schema,
                markers: &markers,
                scope:   &mut scope,
            };
            let early = end(&mut ctx, &stack, &SliceCursor::at(2, 0));
            let done = end(&mut ctx, &stack, &SliceCursor::at(4, 0));
            (early, done)
        };

        let early: Vec<_> = fork(&scope, early).into_iter().map(|(_, o)| o).collect();
        assert_eq!(early, vec![EndOutcome::Error(
            TlbStructuralError::UnexpectedExtraData
        )]);
        let done: Vec<_> = fork(&scope, done).into_iter().map(|(_, o)| o).collect();
        assert_eq!(done, vec![EndOutcome::Finished]);
    }

    #[test]
    fn unread_fields_are_extra_data() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(s, Structure::field(AtomicLabel::int(8), Structure::Empty))?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let config = Config::default();
        let markers = CowSet::new();
        let mut ctx = StepContext {
            config:  &config,
            schema:  &schema,
            markers: &markers,
            scope:   &mut scope,
        };
        let outcomes = end(&mut ctx, &stack, &SliceCursor::start());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].value,
            EndOutcome::Error(TlbStructuralError::UnexpectedExtraData)
        );
        Ok(())
    }
}
