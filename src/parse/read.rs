//! This module contains the stepping of the parser for data reads.
//!
//! A read is resolved in two phases. First the stack is advanced, which
//! consumes frames and splits the read into guarded branches, each of which
//! records where the bits it reads come from as a sequence of [`Piece`]s.
//! Then every successful branch is materialised, turning its pieces into the
//! value of the read and the data constraints that tie that value to the
//! cell's contents.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::{
    constant::{COINS_LENGTH_BITS, COINS_UNIT_BITS, MAX_DATA_BITS, SWITCH_CHOICE_BITS},
    data::bit_string::BitString,
    error::{engine, TlbStructuralError},
    expr::{
        numeric::{self, CANONICAL_SORT},
        Expr,
        Sort,
    },
    parse::{
        frame::{Frame, FrameEnv, TlbStack},
        outcome::{DataMarker, Piece, ReadOutcome, ReadResult, StepOutcome},
        Expansion,
        ReadKind,
        Request,
        SliceCursor,
        StepContext,
    },
    schema::{
        label::{AtomicLabel, FieldWidth, TlbLabel},
        structure::{Structure, StructureId, SwitchVariant, TypeArg},
    },
    scope::{CellAddress, FieldKey, FieldPath, Guarded},
};

/// The sort of the memory field that holds the chosen variant of a switch.
pub const CHOICE_SORT: Sort = Sort::BitVec(SWITCH_CHOICE_BITS);

/// Reads a value of `kind` at `cursor` from the slice whose parsing state is
/// `stack`.
///
/// The returned outcomes are guarded by mutually exclusive conditions. Each
/// guard already includes the data constraints that its outcome depends on,
/// so asserting the guard is all that is needed to take the outcome.
///
/// # Errors
///
/// Returns [`Err`] if the read itself is invalid, which is the case for reads
/// of zero bits.
pub fn step(
    ctx: &mut StepContext<'_>,
    stack: &TlbStack,
    cursor: &SliceCursor,
    kind: &ReadKind,
) -> engine::Result<Vec<Guarded<StepOutcome>>> {
    let progress = Progress::new(stack.clone());
    let position = cursor.data_position.clone();
    let branches = match kind {
        ReadKind::Integer { width, signed } => {
            let request = Request::Integer {
                width:  width.clone(),
                signed: *signed,
            };
            read(ctx, progress, position, &request)
        }
        ReadKind::BitArray { width: 0 } => {
            return Err(engine::Error::ZeroWidthRead {
                read: kind.to_string(),
            })
        }
        ReadKind::BitArray { width } => read(ctx, progress, position, &Request::Bits(*width)),
        ReadKind::MaybeConstructorBit => read(ctx, progress, position, &Request::Bit),
        ReadKind::StdAddress => read(ctx, progress, position, &Request::Address),
        ReadKind::Coins => read_coins(ctx, progress, position),
    };

    Ok(branches.into_iter().map(finish).collect())
}

/// The state of one branch of a read that is still in progress.
#[derive(Clone, Debug)]
pub(crate) struct Progress {
    pub stack:       TlbStack,
    pub pieces:      Vec<Piece>,
    pub constraints: Vec<Expr>,
    pub markers:     Vec<DataMarker>,
}

impl Progress {
    fn new(stack: TlbStack) -> Self {
        Self {
            stack,
            pieces: Vec::new(),
            constraints: Vec::new(),
            markers: Vec::new(),
        }
    }
}

/// A branch of the advancing phase.
///
/// Failed branches keep their progress, as the constraints gathered before the
/// failure are needed to decide the branch's guard.
#[derive(Clone, Debug)]
struct Attempt {
    progress: Progress,
    error:    Option<TlbStructuralError>,
}

type Branch = Guarded<Attempt>;

/// A branch of the materialising phase.
#[derive(Clone, Debug)]
struct Completed {
    progress: Progress,
    outcome:  Result<Expr, TlbStructuralError>,
}

fn success(progress: Progress) -> Branch {
    Guarded::always(Attempt {
        progress,
        error: None,
    })
}

fn failure(progress: Progress, error: TlbStructuralError) -> Branch {
    Guarded::always(Attempt {
        progress,
        error: Some(error),
    })
}

/// Splits on `guard`, succeeding with `progress` where it holds and failing
/// with `error` where it does not.
fn checked(guard: Expr, progress: Progress, error: TlbStructuralError) -> Vec<Branch> {
    let on_failure = Guarded::new(
        Expr::not(guard.clone()),
        Attempt {
            progress: progress.clone(),
            error:    Some(error),
        },
    );
    let on_success = Guarded::new(
        guard,
        Attempt {
            progress,
            error: None,
        },
    );
    vec![on_success, on_failure]
}

fn finish(branch: Guarded<Completed>) -> Guarded<StepOutcome> {
    let Guarded {
        guard,
        value: Completed { progress, outcome },
    } = branch;
    let guard = Expr::and(progress.constraints.iter().cloned().chain([guard]));
    let outcome = match outcome {
        Ok(value) => StepOutcome::Read(ReadOutcome {
            stack: progress.stack.trimmed(),
            value,
            constraints: progress.constraints,
            markers: progress.markers,
        }),
        Err(error) => StepOutcome::Error(error),
    };
    Guarded::new(guard, outcome)
}

/// Performs a single primitive read, advancing the stack and materialising
/// the value on every branch where that succeeds.
fn read(
    ctx: &mut StepContext<'_>,
    progress: Progress,
    position: Expr,
    request: &Request,
) -> Vec<Guarded<Completed>> {
    advance(ctx, progress, position, request)
        .into_iter()
        .map(|branch| {
            branch.map(|Attempt { mut progress, error }| {
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(materialize(ctx, &mut progress, request)),
                };
                Completed { progress, outcome }
            })
        })
        .collect()
}

/// Reads a coin amount as a four-bit length followed by an unsigned integer
/// of that many bytes.
fn read_coins(
    ctx: &mut StepContext<'_>,
    progress: Progress,
    position: Expr,
) -> Vec<Guarded<Completed>> {
    let length_read = Request::Integer {
        width:  numeric::size(COINS_LENGTH_BITS),
        signed: false,
    };
    let value_position = Expr::add(position.clone(), numeric::size(COINS_LENGTH_BITS));

    let mut results = Vec::new();
    for branch in read(ctx, progress, position, &length_read) {
        let Guarded {
            guard,
            value: Completed { progress, outcome },
        } = branch;
        match outcome {
            Ok(length) => {
                let width = Expr::mul(numeric::to_size(length), numeric::size(COINS_UNIT_BITS));
                let amount_read = Request::Integer {
                    width,
                    signed: false,
                };
                let amounts = read(ctx, progress, value_position.clone(), &amount_read);
                results.extend(amounts.into_iter().map(|b| b.under(&guard)));
            }
            Err(error) => results.push(Guarded::new(guard, Completed {
                progress,
                outcome: Err(error),
            })),
        }
    }
    results
}

/// Consumes frames from the stack to satisfy `request` at `position`.
fn advance(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
) -> Vec<Branch> {
    progress.stack.skip_to_data();
    let Some(frame) = progress.stack.pop() else {
        return vec![failure(progress, TlbStructuralError::UnexpectedEndOfData)];
    };

    match frame {
        Frame::Unknown => read_unknown(ctx, progress, position, request),
        Frame::Const { bits } => read_const(ctx, progress, position, request, &bits),
        Frame::PartialField { key, width, offset } => {
            let partial = Partial { key, width, offset };
            read_partial(ctx, progress, position, request, partial)
        }
        Frame::Structure { structure, env } => match structure.as_ref() {
            Structure::Unknown => read_unknown(ctx, progress, position, request),
            Structure::Empty | Structure::LoadRef { .. } => {
                unreachable!("Skipping to data removes finished structures and reference loads")
            }
            Structure::KnownTypePrefix {
                id,
                label: TlbLabel::Atomic(label),
                type_args,
                rest,
            } => {
                let field = AtomicField {
                    id: *id,
                    label,
                    type_args,
                    rest,
                    env: &env,
                };
                read_atomic(ctx, progress, position, request, field)
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
                read_composite(ctx, progress, position, request, expansion)
            }
            Structure::SwitchPrefix {
                id,
                switch_size,
                variants,
            } => {
                let switch = Switch {
                    id:   *id,
                    size: *switch_size,
                    variants,
                    env:  &env,
                };
                read_switch(ctx, progress, position, request, &switch)
            }
        },
    }
}

/// Reads shapeless data, which succeeds exactly when the cell holds enough
/// data.
fn read_unknown(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
) -> Vec<Branch> {
    let address = progress.stack.address();
    progress.stack.push(Frame::Unknown);

    let width = request.width();
    if width.as_u32().is_some_and(|width| width > MAX_DATA_BITS) {
        return vec![failure(progress, TlbStructuralError::UnexpectedEndOfData)];
    }
    let data_length = ctx.data_length(address);
    let mut fits = vec![Expr::ule(
        Expr::add(position.clone(), width.clone()),
        data_length,
    )];
    if width.as_u32().is_none() {
        fits.push(numeric::width_bound(&width, ctx.config.length_upper_bound));
    }

    progress.pieces.push(Piece {
        result: ReadResult::RawData { width },
        position,
    });
    checked(Expr::and(fits), progress, TlbStructuralError::UnexpectedEndOfData)
}

/// Reads from the discriminant bits of a chosen switch variant.
fn read_const(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
    bits: &BitString,
) -> Vec<Branch> {
    let available = bits.len();
    let taken = match request {
        Request::Integer { width, .. } => match width.as_u32() {
            Some(width) if width <= available => width,
            Some(width) => {
                let error = TlbStructuralError::OutOfSwitchBounds {
                    requested: width,
                    available,
                };
                return vec![failure(progress, error)];
            }
            None => {
                let error = TlbStructuralError::switch_unexpected_type(available, request);
                return vec![failure(progress, error)];
            }
        },
        Request::Bits(width) => (*width).min(available),
        Request::Bit => 1,
        Request::Address => {
            let error = TlbStructuralError::switch_unexpected_type(available, request);
            return vec![failure(progress, error)];
        }
    };

    if taken < available {
        progress.stack.push(Frame::Const {
            bits: bits.slice(taken, available - taken),
        });
    }
    progress.pieces.push(Piece {
        result: ReadResult::Constant(bits.slice(0, taken)),
        position: position.clone(),
    });

    match request {
        Request::Bits(width) if *width > taken => {
            let next = Expr::add(position, numeric::size(taken));
            advance(ctx, progress, next, &Request::Bits(width - taken))
        }
        _ => vec![success(progress)],
    }
}

/// The unread remainder of a bit-array field.
struct Partial {
    key:    FieldPath,
    width:  u32,
    offset: u32,
}

fn read_partial(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
    partial: Partial,
) -> Vec<Branch> {
    let Partial { key, width, offset } = partial;
    let remaining = width - offset;
    let requested = match request {
        Request::Bits(requested) => *requested,
        Request::Bit => 1,
        _ => {
            let expected = AtomicLabel::bits(remaining);
            let error = TlbStructuralError::unexpected_type(expected, request);
            return vec![failure(progress, error)];
        }
    };

    let taken = requested.min(remaining);
    if offset + taken < width {
        progress.stack.push(Frame::PartialField {
            key:    key.clone(),
            width,
            offset: offset + taken,
        });
    }
    progress.pieces.push(Piece {
        result: ReadResult::SchemaField {
            key,
            label: AtomicLabel::bits(width),
            width: FieldWidth::Fixed(width),
            slice: Some((offset, taken)),
        },
        position: position.clone(),
    });

    if requested > taken {
        let next = Expr::add(position, numeric::size(taken));
        advance(ctx, progress, next, &Request::Bits(requested - taken))
    } else {
        vec![success(progress)]
    }
}

/// An atomic field at the top of the stack.
struct AtomicField<'s> {
    id:        StructureId,
    label:     &'s AtomicLabel,
    type_args: &'s [TypeArg],
    rest:      &'s Rc<Structure>,
    env:       &'s Rc<FrameEnv>,
}

fn read_atomic(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
    field: AtomicField<'_>,
) -> Vec<Branch> {
    let AtomicField {
        id,
        label,
        type_args,
        rest,
        env,
    } = field;
    let address = progress.stack.address();
    let key = env.path.child(id);
    let args = ctx.resolve_args(address, env, type_args);
    let width = label.width(&args);
    progress
        .stack
        .push(Frame::structure(rest.clone(), env.clone()));
    if width.as_fixed().is_some_and(|bits| bits > MAX_DATA_BITS) {
        return vec![failure(progress, TlbStructuralError::UnexpectedEndOfData)];
    }

    let mismatch = || TlbStructuralError::unexpected_type(label, request);
    let piece = |slice| Piece {
        result:   ReadResult::SchemaField {
            key: key.clone(),
            label: label.clone(),
            width: width.clone(),
            slice,
        },
        position: position.clone(),
    };

    match (request, label) {
        (Request::Integer { width: requested, signed }, _) if label.is_integer() => {
            if *signed != label.is_signed() {
                return vec![failure(progress, mismatch())];
            }
            progress.pieces.push(piece(None));
            let width = width.to_expr();
            let guard = Expr::equal(requested.clone(), width.clone());
            if width.is_constant() {
                return checked(guard, progress, mismatch());
            }
            let fits = numeric::width_bound(&width, ctx.config.length_upper_bound);
            let mut branches: Vec<_> = checked(guard, progress.clone(), mismatch())
                .into_iter()
                .map(|branch| branch.under(&fits))
                .collect();
            branches.push(Guarded::new(Expr::not(fits), Attempt {
                progress,
                error: Some(TlbStructuralError::UnexpectedEndOfData),
            }));
            branches
        }
        (
            Request::Bit,
            AtomicLabel::BitArray { bits: 1 }
            | AtomicLabel::Integer {
                bits: 1,
                signed: false,
            },
        ) => {
            progress.pieces.push(piece(None));
            vec![success(progress)]
        }
        (
            Request::Bits(requested),
            AtomicLabel::BitArray { bits }
            | AtomicLabel::Integer { bits, .. },
        ) => {
            let fixed = FixedField { key: &key, bits: *bits, label };
            read_fixed_bits(ctx, progress, &position, *requested, &fixed, piece)
        }
        (Request::Bits(requested), AtomicLabel::StdAddress) => {
            let bits = width.as_fixed().unwrap_or_default();
            let fixed = FixedField { key: &key, bits, label };
            read_fixed_bits(ctx, progress, &position, *requested, &fixed, piece)
        }
        (Request::Address, AtomicLabel::StdAddress) => {
            progress.pieces.push(piece(None));
            vec![success(progress)]
        }
        _ => vec![failure(progress, mismatch())],
    }
}

/// A field whose width is known ahead of time.
struct FixedField<'s> {
    key:   &'s FieldPath,
    bits:  u32,
    label: &'s AtomicLabel,
}

/// Reads `requested` bits from the front of a field of fixed width.
fn read_fixed_bits(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: &Expr,
    requested: u32,
    field: &FixedField<'_>,
    piece: impl Fn(Option<(u32, u32)>) -> Piece,
) -> Vec<Branch> {
    let FixedField { key, bits, label } = *field;
    match requested.cmp(&bits) {
        std::cmp::Ordering::Equal => {
            progress.pieces.push(piece(None));
            vec![success(progress)]
        }
        std::cmp::Ordering::Less => {
            let AtomicLabel::BitArray { .. } = label else {
                let error = TlbStructuralError::unexpected_type(label, Request::Bits(requested));
                return vec![failure(progress, error)];
            };
            progress.stack.push(Frame::PartialField {
                key:    key.clone(),
                width:  bits,
                offset: requested,
            });
            progress.pieces.push(piece(Some((0, requested))));
            vec![success(progress)]
        }
        std::cmp::Ordering::Greater => {
            progress.pieces.push(piece(None));
            let next = Expr::add(position.clone(), numeric::size(bits));
            advance(ctx, progress, next, &Request::Bits(requested - bits))
        }
    }
}

fn read_composite(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
    expansion: Expansion<'_>,
) -> Vec<Branch> {
    let label = expansion.label;
    let fallback = progress.clone();
    if ctx.expand(&mut progress.stack, expansion).is_none() {
        debug!(
            %label,
            depth = expansion.env.depth,
            "Expansion budget exhausted, treating the rest as unknown"
        );
        return advance(ctx, progress, position, request);
    }
    trace!(%label, depth = expansion.env.depth, "Expanded composite label");

    let branches = advance(ctx, progress, position.clone(), request);
    let whole_width = request
        .width()
        .as_u32()
        .filter(|width| ctx.schema.fixed_data_width(label) == Some(*width));
    let Some(whole_width) = whole_width else {
        return branches;
    };

    branches
        .into_iter()
        .map(|branch| {
            let Some(error) = &branch.value.error else {
                return branch;
            };
            debug!(%label, %error, "Re-reading the composite label as a whole");
            let mut progress = fallback.clone();
            progress.stack.push(Frame::structure(
                expansion.rest.clone(),
                expansion.env.clone(),
            ));
            progress.pieces.push(Piece {
                result:   ReadResult::RawData {
                    width: numeric::size(whole_width),
                },
                position: position.clone(),
            });
            Guarded::new(branch.guard, Attempt {
                progress,
                error: None,
            })
        })
        .collect()
}

/// A switch at the top of the stack.
struct Switch<'s> {
    id:       StructureId,
    size:     u32,
    variants: &'s [SwitchVariant],
    env:      &'s Rc<FrameEnv>,
}

fn read_switch(
    ctx: &mut StepContext<'_>,
    mut progress: Progress,
    position: Expr,
    request: &Request,
    switch: &Switch<'_>,
) -> Vec<Branch> {
    match request {
        Request::Integer { width, .. } => match width.as_u32() {
            None => {
                let error = TlbStructuralError::switch_unexpected_type(switch.size, request);
                return vec![failure(progress, error)];
            }
            Some(width) if width > switch.size => {
                let error = TlbStructuralError::OutOfSwitchBounds {
                    requested: width,
                    available: switch.size,
                };
                return vec![failure(progress, error)];
            }
            Some(_) => {}
        },
        Request::Address => {
            let error = TlbStructuralError::switch_unexpected_type(switch.size, request);
            return vec![failure(progress, error)];
        }
        Request::Bits(_) | Request::Bit => {}
    }

    let enter = |progress: &mut Progress, variant: &SwitchVariant| {
        progress.stack.push(Frame::structure(
            variant.structure.clone(),
            switch.env.clone(),
        ));
        progress.stack.push(Frame::Const {
            bits: variant.key.clone(),
        });
    };

    let address = progress.stack.address();
    let data = ctx.data(address);
    let discriminant = numeric::extract_at(&data, &position, switch.size);
    let known = known_key(&discriminant, switch.variants);
    let unknown = Guarded::new(Expr::not(known.clone()), Attempt {
        progress: progress.clone(),
        error:    Some(TlbStructuralError::UnknownSwitchKey {
            switch_size: switch.size,
        }),
    });

    let mut branches = Vec::new();
    if let [variant] = switch.variants {
        enter(&mut progress, variant);
        let advanced = advance(ctx, progress, position, request);
        branches.extend(advanced.into_iter().map(|b| b.under(&known)));
        branches.push(unknown);
        return branches;
    }

    let key = FieldKey::SwitchChoice(switch.env.path.child(switch.id));
    let choice = ctx.scope.read_field(address, &key, CHOICE_SORT);
    let marker = (address, key);
    if !ctx.is_marked(&marker, &progress.markers) {
        progress.constraints.push(Expr::equal(
            choice.clone(),
            choice_term(&discriminant, switch.variants),
        ));
        progress.markers.push(marker);
    }

    let guards = choice_guards(&choice, switch.variants.len());
    for (variant, guard) in switch.variants.iter().zip(guards) {
        let mut branch = progress.clone();
        enter(&mut branch, variant);
        let advanced = advance(ctx, branch, position.clone(), request);
        branches.extend(advanced.into_iter().map(|b| b.under(&guard).under(&known)));
    }
    branches.push(unknown);
    branches
}

/// Holds when `discriminant` is the key of one of `variants`.
///
/// Switch keys are distinct, so a switch with a variant for every possible
/// discriminant always matches.
pub(crate) fn known_key(discriminant: &Expr, variants: &[SwitchVariant]) -> Expr {
    let size = discriminant.width().unwrap_or(0);
    let exhaustive = 1u128
        .checked_shl(size)
        .is_some_and(|keys| keys == variants.len() as u128);
    if exhaustive {
        return Expr::bool(true);
    }
    Expr::or(
        variants
            .iter()
            .map(|v| Expr::equal(discriminant.clone(), Expr::bits(v.key.clone()))),
    )
}

/// Gets the index of a switch variant as a value of the choice sort.
pub(crate) fn choice_index(index: usize) -> Expr {
    Expr::bv(index as u128, SWITCH_CHOICE_BITS)
}

/// Computes the index of the variant whose key matches `discriminant`, which
/// is the last variant if no key matches.
pub(crate) fn choice_term(discriminant: &Expr, variants: &[SwitchVariant]) -> Expr {
    let last = variants.len().saturating_sub(1);
    variants[..last]
        .iter()
        .enumerate()
        .rev()
        .fold(choice_index(last), |otherwise, (index, variant)| {
            let matches = Expr::equal(discriminant.clone(), Expr::bits(variant.key.clone()));
            Expr::ite(matches, choice_index(index), otherwise)
        })
}

/// Builds one guard per variant from the switch's `choice` field.
///
/// The last guard also covers every out-of-range choice so that the guards
/// are exhaustive.
pub(crate) fn choice_guards(choice: &Expr, count: usize) -> Vec<Expr> {
    let last = count.saturating_sub(1);
    (0..count)
        .map(|index| {
            if index < last {
                Expr::equal(choice.clone(), choice_index(index))
            } else {
                Expr::uge(choice.clone(), choice_index(last))
            }
        })
        .collect()
}

/// Turns the pieces gathered by a successful branch into the value of the
/// read.
fn materialize(ctx: &mut StepContext<'_>, progress: &mut Progress, request: &Request) -> Expr {
    let address = progress.stack.address();
    let pieces = std::mem::take(&mut progress.pieces);

    if let Request::Integer { width, signed } = request {
        // Integer reads never continue across frames, so there is one piece.
        return match pieces.into_iter().next() {
            Some(piece) => integer_value(ctx, progress, address, piece, width, *signed),
            None => canonical_zero(),
        };
    }

    let bits = pieces
        .into_iter()
        .filter_map(|piece| bits_value(ctx, progress, address, piece))
        .reduce(Expr::concat)
        .unwrap_or_else(|| Expr::bv(0, 1));
    match request {
        Request::Bit => Expr::equal(bits, Expr::bv(1, 1)),
        _ => bits,
    }
}

fn canonical_zero() -> Expr {
    Expr::bv(0, CANONICAL_SORT.width().unwrap_or(1))
}

fn integer_value(
    ctx: &mut StepContext<'_>,
    progress: &mut Progress,
    address: CellAddress,
    piece: Piece,
    width: &Expr,
    signed: bool,
) -> Expr {
    let Piece { result, position } = piece;
    match result {
        ReadResult::Constant(bits) => {
            if bits.is_empty() {
                return canonical_zero();
            }
            constrain_constant(ctx, progress, address, &position, &bits);
            numeric::canonical(Expr::bits(bits), signed)
        }
        ReadResult::SchemaField {
            key, label, width, ..
        } => {
            let field = FieldRef {
                address,
                key,
                label: &label,
                width: &width,
            };
            load_field(ctx, progress, &field, &position)
        }
        ReadResult::RawData { .. } => {
            let data = ctx.data(address);
            match width.as_u32() {
                Some(0) => canonical_zero(),
                Some(width) => {
                    numeric::canonical(numeric::extract_at(&data, &position, width), signed)
                }
                None => numeric::extract_symbolic(
                    &data,
                    &position,
                    width,
                    CANONICAL_SORT.width().unwrap_or(1),
                    signed,
                ),
            }
        }
    }
}

fn bits_value(
    ctx: &mut StepContext<'_>,
    progress: &mut Progress,
    address: CellAddress,
    piece: Piece,
) -> Option<Expr> {
    let Piece { result, position } = piece;
    match result {
        ReadResult::Constant(bits) => {
            if bits.is_empty() {
                return None;
            }
            constrain_constant(ctx, progress, address, &position, &bits);
            Some(Expr::bits(bits))
        }
        ReadResult::SchemaField {
            key,
            label,
            width,
            slice,
        } => {
            let bits = width.as_fixed().filter(|bits| *bits > 0)?;
            let start = match slice {
                Some((offset, _)) => Expr::sub(position, numeric::size(offset)),
                None => position,
            };
            let field = FieldRef {
                address,
                key,
                label: &label,
                width: &width,
            };
            let value = load_field(ctx, progress, &field, &start);
            let whole = if label.is_integer() {
                Expr::extract(value, bits - 1, 0)
            } else {
                value
            };
            match slice {
                Some((_, 0)) => None,
                Some((offset, length)) => Some(Expr::extract(
                    whole,
                    bits - 1 - offset,
                    bits - offset - length,
                )),
                None => Some(whole),
            }
        }
        ReadResult::RawData { width } => {
            let width = width.as_u32().filter(|width| *width > 0)?;
            let data = ctx.data(address);
            Some(numeric::extract_at(&data, &position, width))
        }
    }
}

/// Constrains the data at `position` to equal the constant `bits`.
fn constrain_constant(
    ctx: &mut StepContext<'_>,
    progress: &mut Progress,
    address: CellAddress,
    position: &Expr,
    bits: &BitString,
) {
    let data = ctx.data(address);
    let len = bits.len();
    progress.constraints.push(Expr::equal(
        numeric::extract_at(&data, position, len),
        Expr::bits(bits.clone()),
    ));
}

/// A schema field of a particular cell.
pub(crate) struct FieldRef<'a> {
    pub address: CellAddress,
    pub key:     FieldPath,
    pub label:   &'a AtomicLabel,
    pub width:   &'a FieldWidth,
}

/// Reads the memory field that holds a schema field's value, emitting its
/// data constraint if that has not been done yet.
fn load_field(
    ctx: &mut StepContext<'_>,
    progress: &mut Progress,
    field: &FieldRef<'_>,
    start: &Expr,
) -> Expr {
    let key = FieldKey::Tlb(field.key.clone());
    let value = ctx.scope.read_field(field.address, &key, field.label.sort());
    let marker = (field.address, key);
    if !ctx.is_marked(&marker, &progress.markers) {
        let data = ctx.data(field.address);
        let contents = field_data(&data, start, field.label, field.width);
        progress
            .constraints
            .push(Expr::equal(value.clone(), contents));
        progress.markers.push(marker);
    }
    value
}

/// Computes the value of a field of `label` and `width` stored in `data` at
/// `position`, in the sort of the field's memory field.
///
/// Fields too wide for the data are zero, as no read of them can succeed.
pub(crate) fn field_data(
    data: &Expr,
    position: &Expr,
    label: &AtomicLabel,
    width: &FieldWidth,
) -> Expr {
    let signed = label.is_signed();
    match width {
        FieldWidth::Fixed(bits) if *bits == 0 || *bits > data.width().unwrap_or(0) => {
            Expr::bv(0, label.sort().width().unwrap_or(1))
        }
        FieldWidth::Fixed(bits) => {
            let raw = numeric::extract_at(data, position, *bits);
            if label.is_integer() {
                numeric::canonical(raw, signed)
            } else {
                raw
            }
        }
        FieldWidth::Expr(bits) => numeric::extract_symbolic(
            data,
            position,
            bits,
            label.sort().width().unwrap_or(1),
            signed,
        ),
        FieldWidth::Variants { variants, default } => {
            let fallback = field_data(data, position, label, &FieldWidth::Fixed(*default));
            variants.iter().rev().fold(fallback, |otherwise, (guard, bits)| {
                let value = field_data(data, position, label, &FieldWidth::Fixed(*bits));
                Expr::ite(guard.clone(), value, otherwise)
            })
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::{bit_string::BitString, cow::CowSet},
        engine::Config,
        error::TlbStructuralError,
        expr::{numeric::SIZE_SORT, Expr},
        parse::{
            frame::{Frame, TlbStack},
            outcome::StepOutcome,
            read::step,
            ReadKind,
            SliceCursor,
            StepContext,
        },
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            Schema,
            SchemaBuilder,
        },
        scope::{concolic::ConcolicScope, fork::fork, CellAddress, ExecutionScope},
    };

    /// Steps a read and returns the outcomes that can occur, each with the
    /// scope of its branch.
    fn run(
        schema: &Schema,
        scope: &mut ConcolicScope,
        stack: &TlbStack,
        cursor: &SliceCursor,
        kind: &ReadKind,
    ) -> Vec<(ConcolicScope, StepOutcome)> {
        let config = Config::default();
        let markers = CowSet::new();
        let outcomes = {
            let mut ctx = StepContext {
                config:  &config,
                schema,
                markers: &markers,
                scope:   &mut *scope,
            };
            step(&mut ctx, stack, cursor, kind).unwrap()
        };
        fork(&*scope, outcomes)
    }

    fn cell(scope: &mut ConcolicScope, bits: &str) -> CellAddress {
        let address = scope.allocate_cell();
        scope.seed_cell(address, &BitString::from_binary(bits).unwrap(), &[]);
        address
    }

    fn value_of(scope: &ConcolicScope, outcome: &StepOutcome) -> BitString {
        let read = outcome.as_read().unwrap();
        let value = scope.evaluate_in_model(&read.value).unwrap();
        value.as_bits().unwrap().clone()
    }

    fn single_field(label: AtomicLabel) -> anyhow::Result<(Schema, CellSchema)> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(s, Structure::field(label, Structure::Empty))?;
        Ok((builder.finish()?, CellSchema::Data(s)))
    }

    #[test]
    fn reads_typed_integers() -> anyhow::Result<()> {
        let (schema, root) = single_field(AtomicLabel::int(8))?;
        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "11111110");
        let stack = TlbStack::new(address, &schema, root, 3);

        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::int(8));
        assert_eq!(outcomes.len(), 1);
        let (branch, outcome) = &outcomes[0];
        assert_eq!(value_of(branch, outcome).to_i128(), Some(-2));
        assert_eq!(outcome.as_read().unwrap().markers.len(), 1);
        Ok(())
    }

    #[test]
    fn mismatched_signedness_is_a_type_error() -> anyhow::Result<()> {
        let (schema, root) = single_field(AtomicLabel::int(8))?;
        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "00000001");
        let stack = TlbStack::new(address, &schema, root, 3);

        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::uint(8));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].1.as_error(),
            Some(TlbStructuralError::UnexpectedType { .. })
        ));
        Ok(())
    }

    #[test]
    fn bit_reads_continue_across_fields() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::field(
                AtomicLabel::uint(4),
                Structure::field(AtomicLabel::bits(8), Structure::Empty),
            ),
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "101111001100");
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::bits(6));

        assert_eq!(outcomes.len(), 1);
        let (mut branch, outcome) = outcomes.into_iter().next().unwrap();
        assert_eq!(value_of(&branch, &outcome).to_binary(), "101111");
        let stack = outcome.as_read().unwrap().stack.clone();
        assert!(matches!(
            stack.top(),
            Some(Frame::PartialField {
                offset: 2,
                width: 8,
                ..
            })
        ));

        let cursor = SliceCursor::at(6, 0);
        let outcomes = run(&schema, &mut branch, &stack, &cursor, &ReadKind::bits(6));
        assert_eq!(outcomes.len(), 1);
        let (branch, outcome) = &outcomes[0];
        assert_eq!(value_of(branch, outcome).to_binary(), "001100");
        Ok(())
    }

    #[test]
    fn switches_take_the_variant_matching_the_data() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::switch(2, vec![
                (
                    BitString::from_binary("00").unwrap(),
                    Structure::field(AtomicLabel::int(8), Structure::Empty),
                ),
                (
                    BitString::from_binary("01").unwrap(),
                    Structure::field(AtomicLabel::int(4), Structure::Empty),
                ),
            ])?,
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "011111");
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::uint(2));

        assert_eq!(outcomes.len(), 1);
        let (branch, outcome) = &outcomes[0];
        assert_eq!(value_of(branch, outcome).to_u128(), Some(1));

        let stack = outcome.as_read().unwrap().stack.clone();
        let mut branch = branch.clone();
        let cursor = SliceCursor::at(2, 0);
        let outcomes = run(&schema, &mut branch, &stack, &cursor, &ReadKind::int(4));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(value_of(&outcomes[0].0, &outcomes[0].1).to_i128(), Some(-1));
        Ok(())
    }

    #[test]
    fn discriminants_matching_no_key_are_reported() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::switch(2, vec![
                (BitString::from_binary("00").unwrap(), Structure::Empty),
                (
                    BitString::from_binary("01").unwrap(),
                    Structure::field(AtomicLabel::int(4), Structure::Empty),
                ),
            ])?,
        )?;
        let tagged = builder.declare("Tagged", 0)?;
        builder.define(
            tagged,
            Structure::constant(
                BitString::from_binary("10").unwrap(),
                Structure::field(AtomicLabel::uint(4), Structure::Empty),
            )?,
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        for (root, bits) in [(s, "111111"), (tagged, "011111")] {
            let address = cell(&mut scope, bits);
            let stack = TlbStack::new(address, &schema, CellSchema::Data(root), 3);
            let kind = ReadKind::uint(2);
            let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &kind);
            assert_eq!(outcomes.len(), 1);
            assert_eq!(
                outcomes[0].1.as_error(),
                Some(&TlbStructuralError::UnknownSwitchKey { switch_size: 2 })
            );
        }
        Ok(())
    }

    #[test]
    fn symbolic_reads_of_a_switch_are_rejected() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::switch(2, vec![
                (BitString::from_binary("00").unwrap(), Structure::Empty),
                (BitString::from_binary("01").unwrap(), Structure::Empty),
            ])?,
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "00");
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let kind = ReadKind::Integer {
            width:  Expr::var("w", SIZE_SORT),
            signed: false,
        };
        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &kind);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].1.as_error(),
            Some(TlbStructuralError::SwitchUnexpectedType { switch_size: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn zero_width_reads_are_rejected() {
        let schema = Schema::new();
        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "");
        let stack = TlbStack::unknown(address);
        let config = Config::default();
        let markers = CowSet::new();
        let mut ctx = StepContext {
            config:  &config,
            schema:  &schema,
            markers: &markers,
            scope:   &mut scope,
        };
        assert!(step(&mut ctx, &stack, &SliceCursor::start(), &ReadKind::bits(0)).is_err());
    }

    #[test]
    fn coins_are_read_as_length_and_amount() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        let coins = builder.coins();
        builder.define(s, Structure::field(coins, Structure::Empty))?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "00100000000100000001");
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::Coins);

        assert_eq!(outcomes.len(), 1);
        let (branch, outcome) = &outcomes[0];
        assert_eq!(value_of(branch, outcome).to_u128(), Some(257));
        Ok(())
    }

    #[test]
    fn wide_reads_of_fixed_composites_read_the_whole_label() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let pair = builder.declare("Pair", 0)?;
        let s = builder.declare("S", 0)?;
        builder.define(
            pair,
            Structure::field(
                AtomicLabel::uint(4),
                Structure::field(AtomicLabel::int(4), Structure::Empty),
            ),
        )?;
        builder.define(s, Structure::field(pair, Structure::Empty))?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let address = cell(&mut scope, "00010010");
        let stack = TlbStack::new(address, &schema, CellSchema::Data(s), 3);
        let outcomes = run(&schema, &mut scope, &stack, &SliceCursor::start(), &ReadKind::uint(8));

        assert_eq!(outcomes.len(), 1);
        let (branch, outcome) = &outcomes[0];
        assert_eq!(value_of(branch, outcome).to_u128(), Some(18));
        Ok(())
    }
}
