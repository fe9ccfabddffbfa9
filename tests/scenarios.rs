//! This module is an integration test that drives the engine through the
//! parses of small, hand-constructed, schemas the way a host executor would.
#![cfg(test)]

use common::{bits, only, only_path, Path};
use tlb_inference::{
    error::TlbStructuralError,
    expr::{numeric::SIZE_SORT, Expr},
    parse::{frame::Frame, ReadKind, RefOutcome, SliceCursor, StepOutcome},
    schema::{
        label::{AtomicLabel, CellSchema},
        structure::Structure,
        SchemaBuilder,
    },
    scope::{ExecutionScope, SliceId},
    Config,
};

mod common;

#[test]
fn reads_a_signed_integer_to_the_end_of_the_cell() -> anyhow::Result<()> {
    // _ x:int64 = S
    let mut builder = SchemaBuilder::new();
    let s = builder.declare("S", 0)?;
    builder.define(s, Structure::field(AtomicLabel::int(64), Structure::Empty))?;
    let schema = builder.finish()?;

    let mut path = Path::new(schema, Config::default());
    let cell = path.cell(&"1".repeat(64), &[])?;
    path.declare(cell, CellSchema::Data(s))?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;
    let (path, outcome) = only(path.read(slice, &SliceCursor::start(), &ReadKind::int(64))?)?;

    let StepOutcome::Read(read) = outcome else {
        anyhow::bail!("Expected a successful read but got {outcome:?}");
    };
    assert_eq!(path.value(&read.value)?.to_i128(), Some(-1));
    assert!(read.stack.is_empty());
    assert!(path.state.stack(slice)?.is_empty());
    Ok(())
}

#[test]
fn references_cannot_be_loaded_from_an_empty_constructor() -> anyhow::Result<()> {
    // empty$0 = M; full$1 x:^Any = M
    let mut builder = SchemaBuilder::new();
    let m = builder.declare("M", 0)?;
    builder.define(
        m,
        Structure::switch(1, vec![
            (bits("0")?, Structure::Empty),
            (bits("1")?, Structure::load_ref(CellSchema::Unknown, Structure::Empty)),
        ])?,
    )?;
    let schema = builder.finish()?;

    let mut path = Path::new(schema, Config::default());
    let cell = path.cell("0", &[])?;
    path.declare(cell, CellSchema::Data(m))?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;
    let (mut path, outcome) =
        only(path.read(slice, &SliceCursor::start(), &ReadKind::MaybeConstructorBit)?)?;
    let StepOutcome::Read(read) = outcome else {
        anyhow::bail!("Expected a successful read but got {outcome:?}");
    };
    let present = path.scope.evaluate_in_model(&read.value).and_then(|v| v.as_bool());
    assert_eq!(present, Some(false));

    let (_, outcome) = only(path.load_ref(slice, &SliceCursor::at(1, 0))?)?;
    assert_eq!(outcome, RefOutcome::Error(TlbStructuralError::UnexpectedRef));
    Ok(())
}

#[test]
fn references_are_loaded_from_a_full_constructor() -> anyhow::Result<()> {
    let mut builder = SchemaBuilder::new();
    let m = builder.declare("M", 0)?;
    builder.define(
        m,
        Structure::switch(1, vec![
            (bits("0")?, Structure::Empty),
            (
                bits("1")?,
                Structure::load_ref(CellSchema::Dict { key_length: 8 }, Structure::Empty),
            ),
        ])?,
    )?;
    let schema = builder.finish()?;

    let mut path = Path::new(schema, Config::default());
    let child = path.cell("", &[])?;
    let cell = path.cell("1", &[child])?;
    path.declare(cell, CellSchema::Data(m))?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;
    let (mut path, _) =
        only(path.read(slice, &SliceCursor::start(), &ReadKind::MaybeConstructorBit)?)?;
    let (mut path, outcome) = only(path.load_ref(slice, &SliceCursor::at(1, 0))?)?;
    assert!(matches!(
        outcome,
        RefOutcome::Loaded {
            child: CellSchema::Dict { key_length: 8 },
            ..
        }
    ));

    let (_, finished) = only(path.end(slice, &SliceCursor::at(1, 1))?)?;
    assert_eq!(finished, tlb_inference::parse::EndOutcome::Finished);
    Ok(())
}

#[test]
fn switches_reject_reads_of_symbolic_width() -> anyhow::Result<()> {
    // a$00 x:int64 = T; b$01 x:int32 = T
    let mut builder = SchemaBuilder::new();
    let t = builder.declare("T", 0)?;
    builder.define(
        t,
        Structure::switch(2, vec![
            (bits("00")?, Structure::field(AtomicLabel::int(64), Structure::Empty)),
            (bits("01")?, Structure::field(AtomicLabel::int(32), Structure::Empty)),
        ])?,
    )?;
    let schema = builder.finish()?;

    for data in ["00".to_string() + &"0".repeat(64), "01".to_string() + &"1".repeat(32)] {
        let mut path = Path::new(schema.clone(), Config::default());
        let cell = path.cell(&data, &[])?;
        path.declare(cell, CellSchema::Data(t))?;

        let slice = SliceId(0);
        let mut path = only_path(path.begin(cell, slice))?;
        let kind = ReadKind::Integer {
            width:  Expr::var("w", SIZE_SORT),
            signed: false,
        };
        let (_, outcome) = only(path.read(slice, &SliceCursor::start(), &kind)?)?;
        assert!(matches!(
            outcome.as_error(),
            Some(TlbStructuralError::SwitchUnexpectedType { switch_size: 2, .. })
        ));
    }
    Ok(())
}

#[test]
fn unknown_cells_are_read_up_to_their_length() -> anyhow::Result<()> {
    let schema = SchemaBuilder::new().finish()?;
    let mut path = Path::new(schema, Config::default());
    let cell = path.cell("10110011", &[])?;
    path.declare(cell, CellSchema::Unknown)?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;

    let (branch, outcome) = only(path.read(slice, &SliceCursor::start(), &ReadKind::bits(8))?)?;
    let read = outcome
        .as_read()
        .ok_or_else(|| anyhow::anyhow!("Expected a successful read"))?;
    assert_eq!(branch.value(&read.value)?.to_binary(), "10110011");
    assert!(read.stack.is_unknown());

    let (_, outcome) = only(path.read(slice, &SliceCursor::start(), &ReadKind::bits(9))?)?;
    assert_eq!(outcome.as_error(), Some(&TlbStructuralError::UnexpectedEndOfData));
    Ok(())
}

#[test]
fn recursion_falls_back_to_unknown_data_when_the_depth_runs_out() -> anyhow::Result<()> {
    // a$1 = R; b$0 x:int8 rest:R = R
    let mut builder = SchemaBuilder::new();
    let r = builder.declare("R", 0)?;
    builder.define(
        r,
        Structure::switch(1, vec![
            (bits("1")?, Structure::Empty),
            (
                bits("0")?,
                Structure::field(AtomicLabel::int(8), Structure::field(r, Structure::Empty)),
            ),
        ])?,
    )?;
    let schema = builder.finish()?;

    let config = Config::default().with_max_tlb_depth(2);
    let mut path = Path::new(schema, config);
    let cell = path.cell("0000001010111111111", &[])?;
    path.declare(cell, CellSchema::Data(r))?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;
    let mut position = 0;
    for expected in [5, -1] {
        let cursor = SliceCursor::at(position, 0);
        let (mut next, outcome) = only(path.read(slice, &cursor, &ReadKind::uint(1))?)?;
        let tag = outcome
            .as_read()
            .ok_or_else(|| anyhow::anyhow!("Expected a successful read"))?;
        assert_eq!(next.value(&tag.value)?.to_u128(), Some(0));
        assert!(!tag.stack.is_unknown());

        let cursor = SliceCursor::at(position + 1, 0);
        let (next, outcome) = only(next.read(slice, &cursor, &ReadKind::int(8))?)?;
        let x = outcome
            .as_read()
            .ok_or_else(|| anyhow::anyhow!("Expected a successful read"))?;
        assert_eq!(next.value(&x.value)?.to_i128(), Some(expected));

        path = next;
        position += 9;
    }

    // The third expansion of `R` is over budget, so the tag is plain data.
    let cursor = SliceCursor::at(position, 0);
    let (_, outcome) = only(path.read(slice, &cursor, &ReadKind::uint(1))?)?;
    let tag = outcome
        .as_read()
        .ok_or_else(|| anyhow::anyhow!("Expected a successful read"))?;
    assert!(tag.stack.is_unknown());
    assert!(matches!(tag.stack.top(), Some(Frame::Unknown)));
    Ok(())
}
