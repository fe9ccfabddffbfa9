//! This module is an integration test that loads schemas from their JSON
//! description, parses cells against them and resolves the parsed cells.
#![cfg(test)]

use common::{only, only_path, Path};
use serde_json::json;
use tlb_inference::{
    error::schema::Error,
    parse::{ReadKind, RefOutcome, SliceCursor},
    schema::{json::load_schema, label::CellSchema},
    scope::{ExecutionScope, SliceId},
    Config,
};

mod common;

fn maybe_schema() -> String {
    json!({
        "labels": [{
            "name": "M",
            "structure": {
                "kind": "switch",
                "size": 1,
                "variants": [
                    { "key": "0", "structure": { "kind": "empty" } },
                    { "key": "1", "structure": {
                        "kind": "ref", "cell": { "kind": "unknown" }, "rest": { "kind": "empty" }
                    }}
                ]
            }
        }]
    })
    .to_string()
}

#[test]
fn parses_and_resolves_cells_of_a_loaded_schema() -> anyhow::Result<()> {
    let schema = load_schema(&maybe_schema())?;
    let m = schema
        .label_id("M")
        .ok_or_else(|| anyhow::anyhow!("M was not loaded"))?;

    let mut path = Path::new(schema, Config::default());
    let child = path.cell("1010", &[])?;
    let cell = path.cell("1", &[child])?;
    path.declare(cell, CellSchema::Data(m))?;

    let slice = SliceId(0);
    let mut path = only_path(path.begin(cell, slice))?;
    let (mut path, outcome) =
        only(path.read(slice, &SliceCursor::start(), &ReadKind::MaybeConstructorBit)?)?;
    let read = outcome
        .as_read()
        .ok_or_else(|| anyhow::anyhow!("Expected a successful read"))?;
    let present = path.scope.evaluate_in_model(&read.value).and_then(|v| v.as_bool());
    assert_eq!(present, Some(true));

    let (mut path, outcome) = only(path.load_ref(slice, &SliceCursor::at(1, 0))?)?;
    assert!(matches!(outcome, RefOutcome::Loaded {
        child: CellSchema::Unknown,
        ..
    }));

    let resolved = path.engine.resolve(&path.state, &mut path.scope, cell);
    assert_eq!(resolved.schema, "M");
    assert_eq!(resolved.bit_length, 1);
    assert_eq!(resolved.data, "80");
    assert_eq!(resolved.refs.len(), 1);
    assert_eq!(resolved.refs[0].schema, "Unknown");
    assert_eq!(resolved.refs[0].data, "a0");
    assert_eq!(resolved.refs[0].bit_length, 4);

    let round_tripped = serde_json::to_string(&resolved)?;
    assert_eq!(serde_json::from_str::<tlb_inference::ResolvedCell>(&round_tripped)?, resolved);
    Ok(())
}

#[test]
fn rejects_integers_wider_than_a_cell_can_express() {
    let text = json!({
        "labels": [{
            "name": "Wide",
            "structure": {
                "kind": "field", "name": "x", "type": { "kind": "int", "bits": 300 }
            }
        }]
    })
    .to_string();

    let errors = load_schema(&text).expect_err("Loading should fail");
    assert!(errors
        .as_slice()
        .iter()
        .any(|e| matches!(&e.error, Error::TooWide { bits: 300, .. })));
    assert_eq!(errors.labels(), vec!["Wide"]);
}

#[test]
fn reports_malformed_json() {
    let errors = load_schema("{ \"labels\": [").expect_err("Loading should fail");
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors.as_slice()[0].error, Error::Json { .. }));
}
