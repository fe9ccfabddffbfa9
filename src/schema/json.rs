//! This module contains the loading of schemas from their JSON description.
//!
//! # Format
//!
//! A description is an object with a `labels` array, where each label has a
//! `name`, an optional `arity` and a `structure`. Structures, field types and
//! cell schemas are all objects tagged by their `kind`.
//!
//! ```json
//! {
//!   "labels": [{
//!     "name": "M",
//!     "structure": {
//!       "kind": "switch",
//!       "size": 1,
//!       "variants": [
//!         { "key": "0", "structure": { "kind": "empty" } },
//!         { "key": "1", "structure": {
//!           "kind": "ref", "cell": { "kind": "unknown" }, "rest": { "kind": "empty" }
//!         }}
//!       ]
//!     }
//!   }]
//! }
//! ```
//!
//! Type arguments are written as the name of an earlier integer field of the
//! same label, as `$i` for the label's `i`th parameter, or as a number.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constant::{MAX_DATA_BITS, MAX_INT_BITS},
    data::bit_string::BitString,
    error::schema::{DeclarationError, Error, Errors},
    schema::{
        label::{AtomicLabel, CellSchema, TlbLabel},
        oversized_width,
        structure::{Structure, StructureId, TypeArg},
        Schema,
        SchemaBuilder,
    },
};

/// The description of a whole schema.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub labels: Vec<LabelDescription>,
}

/// The description of a single composite label.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LabelDescription {
    pub name:      String,
    #[serde(default)]
    pub arity:     usize,
    pub structure: StructureDescription,
}

/// The description of a structure node.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureDescription {
    #[default]
    Empty,
    Unknown,
    Field {
        name: String,
        #[serde(rename = "type")]
        typ:  FieldType,
        #[serde(default)]
        rest: Box<StructureDescription>,
    },
    Ref {
        cell: CellDescription,
        #[serde(default)]
        rest: Box<StructureDescription>,
    },
    Switch {
        size:     u32,
        variants: Vec<VariantDescription>,
    },
}

/// The description of one variant of a switch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VariantDescription {
    /// The discriminant as a string of `0` and `1` characters.
    pub key:       String,
    pub structure: StructureDescription,
}

/// The description of a field's label.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    Int {
        bits: u32,
    },
    Uint {
        bits: u32,
    },
    VarInt {
        arg:       String,
        unit_bits: Option<u32>,
        max_units: Option<u32>,
    },
    VarUint {
        arg:       String,
        unit_bits: Option<u32>,
        max_units: Option<u32>,
    },
    Bits {
        bits: u32,
    },
    Address,
    Coins,
    MaybeRef {
        cell: CellDescription,
    },
    Label {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// The description of the schema of a referenced cell.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellDescription {
    Unknown,
    Data { label: String },
    Dict { key_length: u32 },
}

/// Parses `text` as a schema description and builds the schema it describes.
///
/// # Errors
///
/// Returns [`Err`] if the text is not a valid description or if the described
/// schema is malformed.
pub fn load_schema(text: &str) -> Result<Schema, Errors> {
    let description: SchemaDescription = serde_json::from_str(text).map_err(|e| {
        let error = Error::Json {
            message: e.to_string(),
        };
        Errors::from(DeclarationError::new(0, error))
    })?;
    description.build()
}

impl SchemaDescription {
    /// Builds the schema described by `self`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] containing every problem with the description, each
    /// attributed to the label declaration in which it occurs.
    pub fn build(&self) -> Result<Schema, Errors> {
        let mut builder = SchemaBuilder::new();
        let mut errors = Errors::new();

        let mut ids = Vec::with_capacity(self.labels.len());
        for (index, label) in self.labels.iter().enumerate() {
            match builder.declare(label.name.as_str(), label.arity) {
                Ok(id) => ids.push(Some(id)),
                Err(e) => {
                    errors.add_for(declaration(index), &label.name, e);
                    ids.push(None);
                }
            }
        }

        for (index, (label, id)) in self.labels.iter().zip(ids).enumerate() {
            let Some(id) = id else { continue };
            let mut converter = Converter {
                builder:     &mut builder,
                errors:      &mut errors,
                declaration: declaration(index),
                label:       &label.name,
                arity:       label.arity,
            };
            let structure = converter.structure(&label.structure, &mut Vec::new());
            if let Some(structure) = structure {
                if let Err(e) = builder.define(id, structure) {
                    errors.add_for(declaration(index), &label.name, e);
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let schema = builder.finish()?;
        debug!(labels = schema.len(), "Loaded schema description");
        Ok(schema)
    }
}

fn declaration(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// A field visible to later fields of the same label.
#[derive(Clone, Debug)]
struct ScopeEntry {
    name:    String,
    id:      StructureId,
    integer: bool,
}

/// Converts the structure of a single label.
struct Converter<'a> {
    builder:     &'a mut SchemaBuilder,
    errors:      &'a mut Errors,
    declaration: u32,
    label:       &'a str,
    arity:       usize,
}

impl<'a> Converter<'a> {
    fn error(&mut self, error: Error) {
        self.errors.add_for(self.declaration, self.label, error);
    }

    fn structure(
        &mut self,
        description: &StructureDescription,
        scope: &mut Vec<ScopeEntry>,
    ) -> Option<Structure> {
        match description {
            StructureDescription::Empty => Some(Structure::Empty),
            StructureDescription::Unknown => Some(Structure::Unknown),
            StructureDescription::Field { name, typ, rest } => {
                let id = StructureId::fresh();
                let field = self
                    .field(name, typ, scope)
                    .and_then(|(label, args)| self.bounded(name, label, args));
                scope.push(ScopeEntry {
                    name: name.clone(),
                    id,
                    integer: matches!(
                        typ,
                        FieldType::Int { .. }
                            | FieldType::Uint { .. }
                            | FieldType::VarInt { .. }
                            | FieldType::VarUint { .. }
                    ),
                });
                let rest = self.structure(rest, scope);
                scope.pop();
                let (label, args) = field?;
                Some(Structure::known_type_prefix(id, label, args, rest?))
            }
            StructureDescription::Ref { cell, rest } => {
                let reference = self.cell(cell);
                let rest = self.structure(rest, scope);
                Some(Structure::load_ref(reference?, rest?))
            }
            StructureDescription::Switch { size, variants } => {
                let mut converted = Vec::with_capacity(variants.len());
                let mut failed = false;
                for variant in variants {
                    let key = BitString::from_binary(&variant.key);
                    let body = self.structure(&variant.structure, &mut scope.clone());
                    match (key, body) {
                        (Some(key), Some(body)) => converted.push((key, body)),
                        (None, _) => {
                            self.error(Error::InvalidSwitchKey {
                                key:         variant.key.clone(),
                                switch_size: *size,
                            });
                            failed = true;
                        }
                        (_, None) => failed = true,
                    }
                }
                if failed {
                    return None;
                }
                Structure::switch(*size, converted).map_err(|e| self.error(e)).ok()
            }
        }
    }

    fn field(
        &mut self,
        name: &str,
        typ: &FieldType,
        scope: &[ScopeEntry],
    ) -> Option<(TlbLabel, Vec<TypeArg>)> {
        let atomic = |label: AtomicLabel| Some((TlbLabel::Atomic(label), vec![]));
        match typ {
            FieldType::Int { bits } | FieldType::Uint { bits } | FieldType::Bits { bits }
                if *bits == 0 =>
            {
                self.error(Error::ZeroWidth {
                    name: name.to_string(),
                });
                None
            }
            FieldType::Int { bits } | FieldType::Uint { bits } if *bits > MAX_INT_BITS => {
                self.error(Error::TooWide {
                    name:  name.to_string(),
                    bits:  *bits,
                    limit: MAX_INT_BITS,
                });
                None
            }
            FieldType::Bits { bits } if *bits > MAX_DATA_BITS => {
                self.error(Error::TooWide {
                    name:  name.to_string(),
                    bits:  *bits,
                    limit: MAX_DATA_BITS,
                });
                None
            }
            FieldType::Int { bits } => atomic(AtomicLabel::int(*bits)),
            FieldType::Uint { bits } => atomic(AtomicLabel::uint(*bits)),
            FieldType::Bits { bits } => atomic(AtomicLabel::bits(*bits)),
            FieldType::Address => atomic(AtomicLabel::StdAddress),
            FieldType::VarInt {
                arg,
                unit_bits,
                max_units,
            }
            | FieldType::VarUint {
                arg,
                unit_bits,
                max_units,
            } => {
                let signed = matches!(typ, FieldType::VarInt { .. });
                let label = match (unit_bits, max_units) {
                    (Some(unit_bits), Some(max_units)) => AtomicLabel::UnitInteger {
                        signed,
                        unit_bits: *unit_bits,
                        max_units: *max_units,
                    },
                    _ => AtomicLabel::SizedInteger { signed },
                };
                let arg = self.argument(arg, scope)?;
                Some((TlbLabel::Atomic(label), vec![arg]))
            }
            FieldType::Coins => Some((TlbLabel::Composite(self.builder.coins()), vec![])),
            FieldType::MaybeRef { cell } => {
                let reference = self.cell(cell)?;
                Some((TlbLabel::Composite(self.builder.maybe_ref(reference)), vec![]))
            }
            FieldType::Label { name: label, args } => {
                let Some(id) = self.builder.lookup(label) else {
                    self.error(Error::UndefinedLabel {
                        name: label.clone(),
                    });
                    return None;
                };
                let expected = self.builder.arity(id).unwrap_or(0);
                if expected != args.len() {
                    self.error(Error::ArityMismatch {
                        name: label.clone(),
                        expected,
                        actual: args.len(),
                    });
                    return None;
                }
                let args = args
                    .iter()
                    .map(|a| self.argument(a, scope))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .collect::<Option<Vec<_>>>()?;
                Some((TlbLabel::Composite(id), args))
            }
        }
    }

    /// Rejects a field that could never fit in a cell.
    fn bounded(
        &mut self,
        name: &str,
        label: TlbLabel,
        args: Vec<TypeArg>,
    ) -> Option<(TlbLabel, Vec<TypeArg>)> {
        if let Some((bits, limit)) = oversized_width(&label, &args) {
            self.error(Error::TooWide {
                name: name.to_string(),
                bits,
                limit,
            });
            return None;
        }
        Some((label, args))
    }

    fn argument(&mut self, text: &str, scope: &[ScopeEntry]) -> Option<TypeArg> {
        if let Some(index) = text.strip_prefix('$') {
            if let Ok(index) = index.parse::<usize>() {
                if index < self.arity {
                    return Some(TypeArg::Param(index));
                }
            }
        } else if let Ok(value) = text.parse::<u32>() {
            return Some(TypeArg::Const(value));
        } else if let Some(entry) = scope.iter().rev().find(|e| e.name == text) {
            if entry.integer {
                return Some(TypeArg::Field(entry.id));
            }
        }

        self.error(Error::InvalidTypeArgument {
            field: text.to_string(),
        });
        None
    }

    fn cell(&mut self, description: &CellDescription) -> Option<CellSchema> {
        match description {
            CellDescription::Unknown => Some(CellSchema::Unknown),
            CellDescription::Dict { key_length } => Some(CellSchema::Dict {
                key_length: *key_length,
            }),
            CellDescription::Data { label } => match self.builder.lookup(label) {
                Some(id) => Some(CellSchema::Data(id)),
                None => {
                    self.error(Error::UndefinedLabel {
                        name: label.clone(),
                    });
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{
        error::schema::Error,
        schema::{
            json::load_schema,
            label::{AtomicLabel, TlbLabel},
            structure::{Structure, TypeArg},
        },
    };

    #[test]
    fn loads_recursive_labels() -> anyhow::Result<()> {
        let text = json!({
            "labels": [{
                "name": "R",
                "structure": {
                    "kind": "switch",
                    "size": 1,
                    "variants": [
                        { "key": "1", "structure": { "kind": "empty" } },
                        { "key": "0", "structure": {
                            "kind": "field", "name": "x", "type": { "kind": "int", "bits": 8 },
                            "rest": {
                                "kind": "field", "name": "rest",
                                "type": { "kind": "label", "name": "R" }
                            }
                        }}
                    ]
                }
            }]
        })
        .to_string();

        let schema = load_schema(&text)?;
        let id = schema.label_id("R").unwrap();
        let label = schema.get(id).unwrap();
        assert!(matches!(
            label.structure.as_ref(),
            Structure::SwitchPrefix { switch_size: 1, variants, .. } if variants.len() == 2
        ));
        Ok(())
    }

    #[test]
    fn resolves_type_arguments_from_earlier_fields() -> anyhow::Result<()> {
        let text = json!({
            "labels": [{
                "name": "Sized",
                "structure": {
                    "kind": "field", "name": "n", "type": { "kind": "uint", "bits": 8 },
                    "rest": {
                        "kind": "field", "name": "value",
                        "type": { "kind": "var_uint", "arg": "n" }
                    }
                }
            }]
        })
        .to_string();

        let schema = load_schema(&text)?;
        let label = schema.get(schema.label_id("Sized").unwrap()).unwrap();
        let Structure::KnownTypePrefix { id: n, rest, .. } = label.structure.as_ref() else {
            panic!("Expected a field")
        };
        let Structure::KnownTypePrefix {
            label, type_args, ..
        } = rest.as_ref()
        else {
            panic!("Expected a field")
        };
        assert_eq!(
            label,
            &TlbLabel::Atomic(AtomicLabel::SizedInteger { signed: false })
        );
        assert_eq!(type_args, &vec![TypeArg::Field(*n)]);
        Ok(())
    }

    #[test]
    fn collects_every_error_with_its_declaration() {
        let text = json!({
            "labels": [
                { "name": "A", "structure": {
                    "kind": "field", "name": "x", "type": { "kind": "label", "name": "Nope" }
                }},
                { "name": "B", "structure": {
                    "kind": "switch", "size": 2,
                    "variants": [{ "key": "0", "structure": { "kind": "empty" } }]
                }},
                { "name": "A", "structure": { "kind": "empty" } }
            ]
        })
        .to_string();

        let errors = load_schema(&text).unwrap_err();
        let found: Vec<_> = errors
            .as_slice()
            .iter()
            .map(|e| (e.declaration, e.error.clone()))
            .collect();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0], (0, Error::UndefinedLabel { name: "Nope".into() }));
        assert!(matches!(found[1], (1, Error::InvalidSwitchKey { .. })));
        assert!(matches!(found[2], (2, Error::DuplicateLabel { .. })));
        assert_eq!(errors.labels(), vec!["A", "B"]);
        assert!(errors.to_string().contains("In B (declaration #1): "));
    }

    #[test]
    fn reports_invalid_json() {
        let errors = load_schema("{ not json").unwrap_err();
        assert!(matches!(errors.as_slice()[0].error, Error::Json { .. }));
    }

    #[test]
    fn rejects_unknown_arguments() {
        let text = json!({
            "labels": [{
                "name": "Bad",
                "structure": {
                    "kind": "field", "name": "v", "type": { "kind": "var_int", "arg": "$0" }
                }
            }]
        })
        .to_string();

        let errors = load_schema(&text).unwrap_err();
        assert_eq!(
            errors.as_slice()[0].error,
            Error::InvalidTypeArgument { field: "$0".into() }
        );
    }

    #[test]
    fn rejects_fields_that_cannot_fit_in_a_cell() {
        let text = json!({
            "labels": [
                { "name": "Units", "arity": 1, "structure": {
                    "kind": "field", "name": "v",
                    "type": {
                        "kind": "var_uint", "arg": "$0",
                        "unit_bits": 1_073_741_824u32, "max_units": 15
                    }
                }},
                { "name": "Wide", "structure": {
                    "kind": "field", "name": "w",
                    "type": { "kind": "var_uint", "arg": "5000" }
                }},
                { "name": "Applied", "structure": {
                    "kind": "field", "name": "u",
                    "type": { "kind": "label", "name": "Units", "args": ["4"] }
                }}
            ]
        })
        .to_string();

        let errors = load_schema(&text).unwrap_err();
        let found: Vec<_> = errors
            .as_slice()
            .iter()
            .map(|e| (e.declaration, e.error.clone()))
            .collect();
        assert_eq!(found.len(), 2);
        assert!(matches!(&found[0], (0, Error::TooWide { bits: u32::MAX, .. })));
        assert_eq!(found[1], (1, Error::TooWide {
            name:  "w".into(),
            bits:  5000,
            limit: 1023,
        }));
    }
}
