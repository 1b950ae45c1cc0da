//! Proposal Hydration - multi-source hydration and write-merge engine
//!
//! A proposal wizard keeps each step's data in several places of the same
//! record at once: a canonical per-step snapshot, top-level ownership
//! fields, a legacy per-step snapshot, and values derivable from sibling
//! steps. This crate reconciles those sources into one view per step and
//! turns edits back into partial writes mirrored across every location.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Record                                 │
//! │   wizardState.stepN    ownership fields    stepData.stepN         │
//! └────────┬──────────────────────┬──────────────────────┬───────────┘
//!          └──────────────────────┼──────────────────────┘
//!                                 ▼
//!                       ┌───────────────────┐
//!                       │  SourceCollector  │  envelope unwrap
//!                       └─────────┬─────────┘
//!                       ┌─────────▼─────────┐
//!                       │   KeyNormalizer   │  ids, enums, labels
//!                       └─────────┬─────────┘
//!                       ┌─────────▼─────────┐
//!                       │ PrecedenceMerger  │  first populated wins
//!                       └─────────┬─────────┘
//!                       ┌─────────▼─────────┐      ┌──────────────────┐
//!                       │ReferenceValidator │ ───► │ReferenceResolver │
//!                       └─────────┬─────────┘      └──────────────────┘
//!                       ┌─────────▼─────────┐
//!                       │ DerivationEngine  │  fill gaps from siblings
//!                       └─────────┬─────────┘
//!                                 ▼
//!                            Hydration ──── edit ───► SnapshotWriter
//!                                                          │
//!                                                          ▼
//!                                                     WritePayload
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Record layout, step schemas and derivation rules
//! - [`snapshot`]: Step snapshot trees, field paths and storage deep merge
//! - [`normalize`]: Id, enum and label canonicalization
//! - [`source`]: Source slots and raw fragment collection
//! - [`merge`]: Precedence merge of slot fragments
//! - [`reference`]: Batched reference validation and catalogs
//! - [`derive`]: Cross-step derivation rules
//! - [`writer`]: Write payload construction
//! - [`engine`]: The `hydrate` / `build_write_payload` entry points
//! - [`store`]: Reference storage collaborator

pub mod config;
pub mod derive;
pub mod engine;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod reference;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod writer;

pub use config::HydrationConfig;
pub use engine::{Hydration, HydrationEngine, StepReport};
pub use error::{Error, Result};
pub use reference::{InMemoryCatalog, ReferenceResolver, ValidationReport};
pub use snapshot::{FieldPath, StepSnapshot};
pub use source::{Record, SourceSlot};
pub use writer::WritePayload;
