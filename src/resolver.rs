//! This module contains the resolution of cells into concrete contents once
//! the host has found a satisfying model.
//!
//! Resolution picks, for every cell, the candidate schema whose guard holds in
//! the model and then walks that schema with
//! [`crate::parse::model::read_in_model`]. Values the model does not assign
//! are resolved as zero.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    data::bit_string::BitString,
    engine::Config,
    expr::{eval::Value, Expr},
    mapper::AddressMapper,
    parse::model::read_in_model,
    schema::{label::CellSchema, Schema},
    scope::{CellAddress, ExecutionScope},
};

/// The concrete contents of a cell and of the cells it references.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResolvedCell {
    /// The schema the cell was resolved with.
    pub schema: String,

    /// The number of data bits in the cell.
    pub bit_length: u32,

    /// The data bits, hex-encoded and padded with zeros to whole bytes.
    pub data: String,

    /// The referenced cells, in order.
    ///
    /// This is empty for cells beyond the resolution depth.
    pub refs: Vec<ResolvedCell>,
}

impl ResolvedCell {
    /// Decodes the data bits of the cell, returning [`None`] if the data is
    /// not valid hex.
    #[must_use]
    pub fn bits(&self) -> Option<BitString> {
        let bytes = hex::decode(&self.data).ok()?;
        Some(BitString::from_bytes(&bytes, self.bit_length))
    }
}

/// Everything that resolution reads from the engine's state.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    pub config: &'a Config,
    pub schema: &'a Schema,
    pub mapper: &'a AddressMapper,
}

impl<'a> Resolver<'a> {
    /// Resolves the cell at `address` and, up to [`Config::max_cell_depth`]
    /// levels deep, the cells it references.
    #[must_use]
    pub fn resolve(&self, scope: &mut dyn ExecutionScope, address: CellAddress) -> ResolvedCell {
        self.resolve_cell(scope, address, CellSchema::Unknown, self.config.max_cell_depth)
    }

    fn resolve_cell(
        &self,
        scope: &mut dyn ExecutionScope,
        address: CellAddress,
        predicted: CellSchema,
        depth: u32,
    ) -> ResolvedCell {
        let cell = self.select(scope, address, predicted);
        let contents = read_in_model(self.schema, scope, address, cell, self.config.max_tlb_depth);
        debug!(%address, %cell, bits = contents.data.len(), "Resolved a cell");

        let refs = if depth == 0 {
            Vec::new()
        } else {
            (0u32..)
                .zip(contents.refs)
                .map(|(index, child_schema)| {
                    let child = scope.ref_address(address, index);
                    self.resolve_cell(scope, child, child_schema, depth - 1)
                })
                .collect()
        };

        let schema = match cell {
            CellSchema::Data(id) => self
                .schema
                .get(id)
                .map_or_else(|| id.to_string(), |label| label.name.to_string()),
            other => other.to_string(),
        };
        ResolvedCell {
            schema,
            bit_length: contents.data.len(),
            data: hex::encode(contents.data.to_bytes()),
            refs,
        }
    }

    /// Picks the candidate of `address` whose guard holds in the model.
    ///
    /// Addresses the mapper knows nothing about keep the `predicted` schema,
    /// and if no guard can be decided the first candidate that is not ruled
    /// out is taken.
    fn select(
        &self,
        scope: &dyn ExecutionScope,
        address: CellAddress,
        predicted: CellSchema,
    ) -> CellSchema {
        let Some(info) = self.mapper.label_info(address) else {
            return predicted;
        };
        let holds = |guard: &Expr| scope.evaluate_in_model(guard);
        let candidates = info.candidates();
        candidates
            .iter()
            .find(|(_, guard)| holds(guard) == Some(Value::Bool(true)))
            .or_else(|| {
                candidates
                    .iter()
                    .find(|(_, guard)| holds(guard) != Some(Value::Bool(false)))
            })
            .map_or(predicted, |(cell, _)| *cell)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        data::bit_string::BitString,
        engine::Config,
        expr::{Expr, Sort},
        mapper::{AddressMapper, LabelInfo},
        resolver::{ResolvedCell, Resolver},
        schema::{
            label::{AtomicLabel, CellSchema},
            structure::Structure,
            Schema,
            SchemaBuilder,
        },
        scope::{concolic::ConcolicScope, ExecutionScope},
    };

    #[test]
    fn resolves_referenced_cells() -> anyhow::Result<()> {
        let mut builder = SchemaBuilder::new();
        let s = builder.declare("S", 0)?;
        builder.define(
            s,
            Structure::field(
                AtomicLabel::uint(8),
                Structure::load_ref(CellSchema::Unknown, Structure::Empty),
            ),
        )?;
        let schema = builder.finish()?;

        let mut scope = ConcolicScope::new();
        let root = scope.allocate_cell();
        let child = scope.allocate_cell();
        scope.seed_cell(root, &BitString::from_binary("10100101").unwrap(), &[child]);
        scope.seed_cell(child, &BitString::from_binary("111").unwrap(), &[]);

        let mut mapper = AddressMapper::new();
        mapper.register(root, LabelInfo::single(CellSchema::Data(s)));
        let config = Config::default();
        let resolver = Resolver {
            config: &config,
            schema: &schema,
            mapper: &mapper,
        };

        let resolved = resolver.resolve(&mut scope, root);
        assert_eq!(resolved.schema, "S");
        assert_eq!(resolved.data, "a5");
        assert_eq!(resolved.refs.len(), 1);
        assert_eq!(resolved.refs[0].bit_length, 3);
        assert_eq!(resolved.refs[0].bits(), BitString::from_binary("111"));
        Ok(())
    }

    #[test]
    fn candidates_are_selected_by_the_model() {
        let schema = Schema::new();
        let mut scope = ConcolicScope::new();
        let address = scope.allocate_cell();
        scope.seed_cell(address, &BitString::from_binary("1").unwrap(), &[]);

        let p = Expr::var("p", Sort::Bool);
        scope.assert(&Expr::not(p.clone()));
        let mut info = LabelInfo::new();
        info.add(CellSchema::Dict { key_length: 4 }, p);
        info.complete();
        let mut mapper = AddressMapper::new();
        mapper.register(address, info);

        let config = Config::default();
        let resolver = Resolver {
            config: &config,
            schema: &schema,
            mapper: &mapper,
        };
        assert_eq!(resolver.resolve(&mut scope, address).schema, "Unknown");
    }

    #[test]
    fn resolved_cells_serialize_to_json() -> anyhow::Result<()> {
        let cell = ResolvedCell {
            schema:     "Unknown".into(),
            bit_length: 4,
            data:       "f0".into(),
            refs:       vec![],
        };
        let json = serde_json::to_value(&cell)?;
        assert_eq!(json["data"], "f0");
        assert_eq!(serde_json::from_value::<ResolvedCell>(json)?, cell);
        Ok(())
    }
}
