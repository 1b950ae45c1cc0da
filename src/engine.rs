//! Hydration engine
//!
//! Wires the pipeline together and exposes the two public operations:
//! [`HydrationEngine::hydrate`] (read-only) and
//! [`HydrationEngine::build_write_payload`] (pure; the caller hands the
//! payload to storage).

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{HydrationConfig, LayoutConfig};
use crate::derive::{ClearedPaths, DerivationEngine};
use crate::error::Result;
use crate::merge::PrecedenceMerger;
use crate::normalize::KeyNormalizer;
use crate::reference::{ReferenceResolver, ReferenceValidator, ValidationReport};
use crate::snapshot::{leaf_paths, FieldPath, StepSnapshot};
use crate::source::{Record, SourceCollector, SourceFragment, SourceSlot};
use crate::writer::{SnapshotWriter, StepWrite, WritePayload};

/// What hydration did to one step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub validation: ValidationReport,
    /// Paths filled by derivation
    pub derived: Vec<FieldPath>,
    /// Derived paths copied from a step whose lookups failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unverified_derived: Vec<FieldPath>,
}

/// Result of hydrating a record: one view per step plus per-step reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hydration {
    views: BTreeMap<u32, StepSnapshot>,
    reports: BTreeMap<u32, StepReport>,
}

impl Hydration {
    pub fn view(&self, step: u32) -> Option<&StepSnapshot> {
        self.views.get(&step)
    }

    pub fn views(&self) -> &BTreeMap<u32, StepSnapshot> {
        &self.views
    }

    pub fn into_views(self) -> BTreeMap<u32, StepSnapshot> {
        self.views
    }

    pub fn report(&self, step: u32) -> Option<&StepReport> {
        self.reports.get(&step)
    }

    pub fn reports(&self) -> &BTreeMap<u32, StepReport> {
        &self.reports
    }

    /// Steps whose reference validation could not finish
    pub fn incomplete_steps(&self) -> Vec<u32> {
        self.reports
            .iter()
            .filter(|(_, report)| report.validation.is_incomplete())
            .map(|(step, _)| *step)
            .collect()
    }

    /// True when every step was fully validated
    pub fn is_complete(&self) -> bool {
        self.incomplete_steps().is_empty()
    }
}

/// Multi-source hydration and write-payload engine
pub struct HydrationEngine {
    config: HydrationConfig,
    normalizer: KeyNormalizer,
    collector: SourceCollector,
    merger: PrecedenceMerger,
    validator: ReferenceValidator,
    derivation: DerivationEngine,
    writer: SnapshotWriter,
}

impl HydrationEngine {
    /// Create an engine from a validated configuration
    pub fn new(config: HydrationConfig, resolver: Arc<dyn ReferenceResolver>) -> Result<Self> {
        config.validate()?;

        let normalizer = KeyNormalizer::new(config.enums.clone())?;
        let timeout = Duration::from_millis(config.engine.lookup_timeout_ms);

        tracing::info!(
            steps = config.steps.len(),
            derivations = config.derivations.len(),
            "Hydration engine ready"
        );

        Ok(Self {
            normalizer,
            collector: SourceCollector::new(config.layout.clone()),
            merger: PrecedenceMerger::new(),
            validator: ReferenceValidator::new(resolver, timeout),
            derivation: DerivationEngine::new(config.derivations.clone()),
            writer: SnapshotWriter::new(config.engine.persist_derived),
            config,
        })
    }

    pub fn config(&self) -> &HydrationConfig {
        &self.config
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.config.layout
    }

    /// Hydrate every configured or stored step of a record.
    ///
    /// Read-only and cancellable: dropping the future discards the work.
    pub async fn hydrate(&self, record: &Record) -> Hydration {
        let mut steps: BTreeSet<u32> = self.config.steps.iter().map(|s| s.step).collect();
        steps.extend(self.collector.stored_steps(record));

        let mut views = BTreeMap::new();
        let mut cleared = ClearedPaths::new();
        for step in steps {
            let (view, nulls) = self.merge_step(record, step);
            if !nulls.is_empty() {
                cleared.insert(step, nulls);
            }
            views.insert(step, view);
        }

        let validations = futures::future::join_all(
            views
                .iter_mut()
                .map(|(&step, view)| self.validate_step(step, view)),
        )
        .await;
        let mut reports: BTreeMap<u32, StepReport> = validations
            .into_iter()
            .map(|(step, validation)| {
                let report = StepReport {
                    validation,
                    ..StepReport::default()
                };
                (step, report)
            })
            .collect();

        // A value copied from an unverified step stays unverified, along chains too
        for derived in self.derivation.derive(&mut views, &cleared, &self.normalizer) {
            let inherited = reports
                .get(&derived.source_step)
                .map(|source| source.validation.unverified_types.clone())
                .unwrap_or_default();
            let report = reports.entry(derived.step).or_default();
            if !inherited.is_empty() {
                report.validation.unverified_types.extend(inherited);
                report.unverified_derived.push(derived.path.clone());
            }
            report.derived.push(derived.path);
        }

        let hydration = Hydration { views, reports };
        let incomplete = hydration.incomplete_steps();
        if incomplete.is_empty() {
            tracing::debug!(steps = hydration.views.len(), "Hydrated record");
        } else {
            tracing::warn!(
                steps = hydration.views.len(),
                incomplete = ?incomplete,
                "Hydrated record with incomplete reference validation"
            );
        }
        hydration
    }

    /// Hydrated view of one step.
    ///
    /// Sibling steps are hydrated as well, since derivation reads them.
    pub async fn hydrate_step(&self, record: &Record, step: u32) -> Option<StepSnapshot> {
        let mut hydration = self.hydrate(record).await;
        hydration.views.remove(&step)
    }

    /// Build the write payload for saving `edit` on `step`.
    ///
    /// Derived values copied from an unverified step are left out of the
    /// patch.
    pub async fn build_write_payload(
        &self,
        record: &Record,
        step: u32,
        edit: &StepSnapshot,
    ) -> WritePayload {
        let hydration = self.hydrate(record).await;
        let schema = self.config.step_schema(step);
        let edit = self.normalize_edit(step, edit);

        let derived: Vec<FieldPath> = hydration
            .report(step)
            .map(|report| {
                report
                    .derived
                    .iter()
                    .filter(|path| !report.unverified_derived.contains(path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let empty = StepSnapshot::new();
        let write = StepWrite {
            step,
            schema,
            current: hydration.view(step).unwrap_or(&empty),
            derived: &derived,
            edit: &edit,
        };
        self.writer.build(&write, &self.normalizer)
    }

    /// Hydrated view of a step with an unsaved edit on top
    pub async fn preview(&self, record: &Record, step: u32, edit: &StepSnapshot) -> StepSnapshot {
        let view = self.hydrate_step(record, step).await.unwrap_or_default();
        let edit = self.normalize_edit(step, edit);
        let base = [SourceFragment::new(SourceSlot::CanonicalSnapshot, view)];
        self.merger.merge(&base, Some(&edit))
    }

    /// Collect, normalize and merge one step's slot fragments.
    ///
    /// Also returns the paths stored as an explicit null, read before
    /// normalization drops them.
    fn merge_step(&self, record: &Record, step: u32) -> (StepSnapshot, Vec<Vec<String>>) {
        let schema = self.config.step_schema(step);
        let mut fragments = self.collector.collect(record, step, schema);
        let cleared = stored_nulls(&fragments);
        if let Some(schema) = schema {
            for fragment in &mut fragments {
                self.normalizer.normalize_snapshot(schema, &mut fragment.snapshot);
            }
        }
        (self.merger.merge(&fragments, None), cleared)
    }

    async fn validate_step(&self, step: u32, view: &mut StepSnapshot) -> (u32, ValidationReport) {
        let report = match self.config.step_schema(step) {
            Some(schema) => self.validator.validate(step, schema, view).await,
            None => ValidationReport::default(),
        };
        (step, report)
    }

    fn normalize_edit(&self, step: u32, edit: &StepSnapshot) -> StepSnapshot {
        let mut edit = edit.clone();
        if let Some(schema) = self.config.step_schema(step) {
            self.normalizer.normalize_edit(schema, &mut edit);
        }
        edit
    }
}

/// Null leaves of the canonical and legacy snapshots
fn stored_nulls(fragments: &[SourceFragment]) -> Vec<Vec<String>> {
    fragments
        .iter()
        .filter(|fragment| {
            matches!(
                fragment.slot,
                SourceSlot::CanonicalSnapshot | SourceSlot::LegacySnapshot
            )
        })
        .flat_map(|fragment| leaf_paths(&fragment.snapshot))
        .filter(|(_, value)| value.is_null())
        .map(|(keys, _)| keys)
        .collect()
}
