//! This library implements a type-inference and incremental parsing engine for
//! [TL-B](https://docs.ton.org/develop/data-formats/tl-b-language) typed cells,
//! intended to be embedded in a symbolic executor of TVM programs.
//!
//! The engine tracks, for every cell that the host touches, the schemas it may
//! have been built with and the conditions under which each of them applies.
//! Reads and stores made by the program are matched against those schemas so
//! that the values produced are typed fields of the cell, rather than opaque
//! slices of its data.
//!
//! # How it Works
//!
//! From a very high level, the engine is driven by the host as follows:
//!
//! 1. A [`schema::Schema`] is built with a [`schema::SchemaBuilder`] or loaded
//!    from its JSON description with [`schema::json::load_schema`].
//! 2. The candidate schemas of each input cell are declared to the engine with
//!    [`TlbEngine::declare_cell`], and the structural constraints tying the
//!    cells' sizes and references to those schemas are generated with
//!    [`TlbEngine::initialize_children`].
//! 3. Every read, reference load and end-of-parse check performed by the
//!    program is stepped through the [`parse`] module. Each step yields
//!    guarded outcomes, and the host forks once per outcome.
//! 4. Cells assembled by the program are tracked by a [`builder`] so that
//!    their schema can be reconstructed when the builder is finished.
//! 5. Once a path of execution has a model, the concrete contents of its cells
//!    are resolved with [`TlbEngine::resolve`].
//!
//! # Basic Usage
//!
//! ```
//! use tlb_inference::{
//!     data::bit_string::BitString,
//!     mapper::LabelInfo,
//!     parse::{ReadKind, SliceCursor, StepOutcome},
//!     schema::{label::{AtomicLabel, CellSchema}, structure::Structure, SchemaBuilder},
//!     scope::{concolic::ConcolicScope, fork::fork, ExecutionScope, SliceId},
//!     Config,
//!     TlbEngine,
//!     TlbState,
//! };
//!
//! let mut builder = SchemaBuilder::new();
//! let s = builder.declare("S", 0).unwrap();
//! builder
//!     .define(s, Structure::field(AtomicLabel::uint(8), Structure::Empty))
//!     .unwrap();
//! let schema = builder.finish().unwrap();
//!
//! let mut scope = ConcolicScope::new();
//! let cell = scope.allocate_cell();
//! scope.seed_cell(cell, &BitString::from_binary("00101010").unwrap(), &[]);
//!
//! let engine = TlbEngine::new(Config::default());
//! let mut state = TlbState::new(schema);
//! engine.declare_cell(&mut state, cell, LabelInfo::single(CellSchema::Data(s)));
//!
//! let slice = SliceId(0);
//! let stack = engine.begin_parse(&state, cell).remove(0).value;
//! engine.commit_stack(&mut state, slice, stack);
//!
//! let outcomes = engine
//!     .read(&state, &mut scope, slice, &SliceCursor::start(), &ReadKind::uint(8))
//!     .unwrap();
//! let (branch, outcome) = fork(&scope, outcomes).remove(0);
//! let StepOutcome::Read(read) = outcome else { panic!() };
//! let value = branch.evaluate_in_model(&read.value).unwrap();
//! assert_eq!(value.as_bits().unwrap().to_u128(), Some(42));
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod builder;
pub mod constant;
pub mod data;
pub mod engine;
pub mod error;
pub mod expr;
pub mod mapper;
pub mod parse;
pub mod resolver;
pub mod schema;
pub mod scope;

// Re-exports to provide the library interface.
pub use engine::{Config, TlbEngine, TlbState};
pub use resolver::ResolvedCell;
