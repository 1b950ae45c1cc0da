//! Hydration engine configuration
//!
//! Describes where step data lives inside a record and which parts of each
//! step are references, enums, ownership mirrors or label collections.
//! Loaded from TOML or JSON; the default is the proposal wizard layout.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::snapshot::{FieldPath, Segment};

/// Enum type name → canonical value → storage value
pub type EnumTable = BTreeMap<String, BTreeMap<String, String>>;

/// Main hydration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationConfig {
    /// Record layout
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Enum casing tables
    #[serde(default)]
    pub enums: EnumTable,

    /// Per-step schemas
    #[serde(default)]
    pub steps: Vec<StepSchema>,

    /// Cross-step derivation rules, evaluated in order
    #[serde(default)]
    pub derivations: Vec<DerivationRule>,
}

/// Where the snapshot slots live inside a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Record field holding the canonical per-step snapshots
    pub canonical_field: String,

    /// Record field holding the legacy per-step snapshots
    pub legacy_field: String,

    /// Prefix of per-step keys inside the snapshot fields
    pub step_key_prefix: String,

    /// Key of the storage envelope (`{ set: value }`)
    pub envelope_key: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            canonical_field: "wizardState".to_string(),
            legacy_field: "stepData".to_string(),
            step_key_prefix: "step".to_string(),
            envelope_key: "set".to_string(),
        }
    }
}

impl LayoutConfig {
    /// Storage key of a step (`step2`)
    pub fn step_key(&self, step: u32) -> String {
        format!("{}{}", self.step_key_prefix, step)
    }

    /// Step number of a storage key; accepts prefixed and bare numeric keys
    pub fn parse_step_key(&self, key: &str) -> Option<u32> {
        key.strip_prefix(self.step_key_prefix.as_str())
            .unwrap_or(key)
            .parse()
            .ok()
    }
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for one batched reference lookup, in milliseconds
    pub lookup_timeout_ms: u64,

    /// Persist newly derived values with the next write of their step
    pub persist_derived: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 5000,
            persist_derived: true,
        }
    }
}

/// Schema of one wizard step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSchema {
    /// Step number
    pub step: u32,

    /// Reference-typed paths
    #[serde(default)]
    pub references: Vec<ReferenceField>,

    /// Top-level record fields mirroring step paths
    #[serde(default)]
    pub ownership: Vec<OwnershipField>,

    /// Enum-typed paths
    #[serde(default)]
    pub enums: Vec<EnumField>,

    /// Collections whose entries carry a free-text label
    #[serde(default)]
    pub labels: Vec<LabelField>,
}

impl StepSchema {
    /// Create an empty schema for a step
    pub fn new(step: u32) -> Self {
        Self {
            step,
            references: Vec::new(),
            ownership: Vec::new(),
            enums: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Enum paths, including those implied by enum-typed ownership fields
    pub fn enum_fields(&self) -> impl Iterator<Item = (&FieldPath, &str)> {
        self.enums
            .iter()
            .map(|e| (&e.path, e.enum_type.as_str()))
            .chain(self.ownership.iter().filter_map(|o| {
                o.enum_type
                    .as_deref()
                    .map(|enum_type| (&o.path, enum_type))
            }))
    }
}

/// A reference-typed path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceField {
    /// Path to a scalar id or an array of ids
    pub path: FieldPath,

    /// Catalog entity type (`user`, `product`, ...)
    pub entity_type: String,
}

/// A top-level record field mirroring a step path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipField {
    /// Record field name
    pub field: String,

    /// Concrete path inside the step snapshot
    pub path: FieldPath,

    /// Backend treats this field as the authority; mirrored on write
    #[serde(default)]
    pub authoritative: bool,

    /// Enum type for re-casing on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_type: Option<String>,
}

/// An enum-typed path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumField {
    pub path: FieldPath,
    pub enum_type: String,
}

/// A collection of labeled entries (`[{id, title}]` or `{key: {id, title}}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelField {
    /// Path to the collection
    pub path: FieldPath,

    #[serde(default = "default_id_key")]
    pub id_key: String,

    #[serde(default = "default_label_key")]
    pub label_key: String,

    /// Key the normalized label is stored under
    #[serde(default = "default_normalized_key")]
    pub normalized_key: String,
}

fn default_id_key() -> String {
    "id".to_string()
}

fn default_label_key() -> String {
    "title".to_string()
}

fn default_normalized_key() -> String {
    "normalizedTitle".to_string()
}

/// Fill `target_path` of `target_step` from the first candidate that yields
/// a populated value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationRule {
    pub target_step: u32,
    pub target_path: FieldPath,
    pub candidates: Vec<CandidateSource>,
}

/// A sibling-step value a derivation may draw from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSource {
    pub step: u32,
    pub path: FieldPath,
    #[serde(default)]
    pub strategy: MatchStrategy,
}

/// How a candidate value is matched onto the target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MatchStrategy {
    /// Copy the candidate value as-is; its ids are already stable
    #[default]
    StableId,
    /// Re-key a label-keyed map onto an anchor collection, matching each
    /// anchor entry by id first and normalized label second
    NormalizedLabel {
        /// Step holding the anchor collection (defaults to the target step)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_step: Option<u32>,
        /// Path of the anchor collection
        anchor_path: FieldPath,
        #[serde(default = "default_id_key")]
        id_key: String,
        #[serde(default = "default_label_key")]
        label_key: String,
    },
}

impl Default for HydrationConfig {
    fn default() -> Self {
        proposal_wizard_config()
    }
}

impl HydrationConfig {
    /// Load a configuration file; `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))
    }

    /// Default config location (~/.proposal-hydration/config.toml)
    pub fn default_path() -> PathBuf {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".proposal-hydration")
            .join("config.toml")
    }

    /// Schema of a step, if declared
    pub fn step_schema(&self, step: u32) -> Option<&StepSchema> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        let mut seen_steps = HashSet::new();
        let mut owned_fields = HashSet::new();

        for schema in &self.steps {
            if !seen_steps.insert(schema.step) {
                return Err(Error::Config(format!(
                    "step {} is declared more than once",
                    schema.step
                )));
            }

            for owned in &schema.ownership {
                if owned.field.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "step {}: ownership field name is empty",
                        schema.step
                    )));
                }
                if !owned.path.is_concrete() {
                    return Err(Error::Config(format!(
                        "step {}: ownership path '{}' must not contain wildcards",
                        schema.step, owned.path
                    )));
                }
                if owned.authoritative && !owned_fields.insert(owned.field.as_str()) {
                    return Err(Error::Config(format!(
                        "record field '{}' is authoritative for more than one step",
                        owned.field
                    )));
                }
            }

            for (path, enum_type) in schema.enum_fields() {
                if !self.enums.contains_key(enum_type) {
                    return Err(Error::Config(format!(
                        "step {}: path '{}' uses unknown enum type '{}'",
                        schema.step, path, enum_type
                    )));
                }
            }

            for reference in &schema.references {
                if reference.entity_type.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "step {}: reference '{}' has no entity type",
                        schema.step, reference.path
                    )));
                }
            }
        }

        for rule in &self.derivations {
            if !rule.target_path.is_concrete() {
                return Err(Error::Config(format!(
                    "derivation target '{}' of step {} must not contain wildcards",
                    rule.target_path, rule.target_step
                )));
            }
            if rule.candidates.is_empty() {
                return Err(Error::Config(format!(
                    "derivation target '{}' of step {} has no candidates",
                    rule.target_path, rule.target_step
                )));
            }
            for candidate in &rule.candidates {
                let anchor_concrete = match &candidate.strategy {
                    MatchStrategy::StableId => true,
                    MatchStrategy::NormalizedLabel { anchor_path, .. } => {
                        anchor_path.is_concrete()
                    }
                };
                if !candidate.path.is_concrete() || !anchor_concrete {
                    return Err(Error::Config(format!(
                        "derivation candidate '{}' of step {} must not contain wildcards",
                        candidate.path, candidate.step
                    )));
                }
            }
        }

        Ok(())
    }
}

fn path(raw: &str) -> FieldPath {
    FieldPath::from_segments(
        raw.split('.')
            .map(|segment| match segment {
                "*" => Segment::Any,
                key => Segment::Key(key.to_string()),
            })
            .collect(),
    )
}

fn casing(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(canonical, storage)| (canonical.to_string(), storage.to_string()))
        .collect()
}

/// Built-in layout of the proposal wizard
pub fn proposal_wizard_config() -> HydrationConfig {
    let mut enums = EnumTable::new();
    enums.insert(
        "proposalStatus".to_string(),
        casing(&[
            ("DRAFT", "draft"),
            ("IN_REVIEW", "in_review"),
            ("SUBMITTED", "submitted"),
            ("WON", "won"),
            ("LOST", "lost"),
        ]),
    );
    enums.insert(
        "teamRole".to_string(),
        casing(&[("LEAD", "Lead"), ("WRITER", "Writer"), ("REVIEWER", "Reviewer")]),
    );
    enums.insert(
        "pricingModel".to_string(),
        casing(&[
            ("FIXED_FEE", "fixedFee"),
            ("TIME_AND_MATERIALS", "timeAndMaterials"),
        ]),
    );

    // Step 1: basics
    let mut basics = StepSchema::new(1);
    basics.references.push(ReferenceField {
        path: path("clientId"),
        entity_type: "client".to_string(),
    });
    basics.ownership = vec![
        OwnershipField {
            field: "title".to_string(),
            path: path("title"),
            authoritative: true,
            enum_type: None,
        },
        OwnershipField {
            field: "clientId".to_string(),
            path: path("clientId"),
            authoritative: true,
            enum_type: None,
        },
        OwnershipField {
            field: "status".to_string(),
            path: path("status"),
            authoritative: true,
            enum_type: Some("proposalStatus".to_string()),
        },
    ];

    // Step 2: team
    let mut team = StepSchema::new(2);
    team.references = vec![
        ReferenceField {
            path: path("leadId"),
            entity_type: "user".to_string(),
        },
        ReferenceField {
            path: path("team.*.userId"),
            entity_type: "user".to_string(),
        },
        ReferenceField {
            path: path("teamAssignments.*"),
            entity_type: "user".to_string(),
        },
    ];
    team.ownership.push(OwnershipField {
        field: "leadId".to_string(),
        path: path("leadId"),
        authoritative: true,
        enum_type: None,
    });
    team.enums.push(EnumField {
        path: path("team.*.role"),
        enum_type: "teamRole".to_string(),
    });

    // Step 3: products
    let mut products = StepSchema::new(3);
    products.references.push(ReferenceField {
        path: path("productIds"),
        entity_type: "product".to_string(),
    });

    // Step 4: pricing
    let mut pricing = StepSchema::new(4);
    pricing.enums.push(EnumField {
        path: path("pricingModel"),
        enum_type: "pricingModel".to_string(),
    });
    pricing.ownership = vec![
        OwnershipField {
            field: "totalValue".to_string(),
            path: path("pricing.total"),
            authoritative: true,
            enum_type: None,
        },
        OwnershipField {
            field: "currency".to_string(),
            path: path("pricing.currency"),
            authoritative: false,
            enum_type: None,
        },
    ];

    // Step 5: content
    let mut content = StepSchema::new(5);
    content.references = vec![
        ReferenceField {
            path: path("sectionAssignments.*"),
            entity_type: "user".to_string(),
        },
        ReferenceField {
            path: path("reviewerId"),
            entity_type: "user".to_string(),
        },
    ];
    content.labels.push(LabelField {
        path: path("sections"),
        id_key: default_id_key(),
        label_key: default_label_key(),
        normalized_key: default_normalized_key(),
    });

    let derivations = vec![
        DerivationRule {
            target_step: 5,
            target_path: path("sectionAssignments"),
            candidates: vec![CandidateSource {
                step: 2,
                path: path("teamAssignments"),
                strategy: MatchStrategy::NormalizedLabel {
                    anchor_step: None,
                    anchor_path: path("sections"),
                    id_key: default_id_key(),
                    label_key: default_label_key(),
                },
            }],
        },
        DerivationRule {
            target_step: 5,
            target_path: path("reviewerId"),
            candidates: vec![CandidateSource {
                step: 2,
                path: path("leadId"),
                strategy: MatchStrategy::StableId,
            }],
        },
    ];

    HydrationConfig {
        layout: LayoutConfig::default(),
        engine: EngineConfig::default(),
        enums,
        steps: vec![basics, team, products, pricing, content],
        derivations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HydrationConfig::default();
        assert_eq!(config.layout.canonical_field, "wizardState");
        assert_eq!(config.layout.envelope_key, "set");
        assert_eq!(config.engine.lookup_timeout_ms, 5000);
        assert!(config.engine.persist_derived);
        assert_eq!(config.steps.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_step_keys() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.step_key(2), "step2");
        assert_eq!(layout.parse_step_key("step2"), Some(2));
        assert_eq!(layout.parse_step_key("7"), Some(7));
        assert_eq!(layout.parse_step_key("stepX"), None);
        assert_eq!(layout.parse_step_key("meta"), None);
    }

    #[test]
    fn test_enum_fields_include_ownership() {
        let config = HydrationConfig::default();
        let basics = config.step_schema(1).unwrap();
        let enums: Vec<_> = basics
            .enum_fields()
            .map(|(path, ty)| (path.to_string(), ty.to_string()))
            .collect();
        assert_eq!(enums, vec![("status".to_string(), "proposalStatus".to_string())]);
    }

    #[test]
    fn test_validate_rejects_duplicate_steps() {
        let mut config = HydrationConfig::default();
        config.steps.push(StepSchema::new(2));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_wildcard_target() {
        let mut config = HydrationConfig::default();
        config.derivations[0].target_path = FieldPath::parse("sections.*").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_enum() {
        let mut config = HydrationConfig::default();
        config.steps[1].enums[0].enum_type = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_authoritative_field() {
        let mut config = HydrationConfig::default();
        let lead = config.steps[1].ownership[0].clone();
        config.steps[4].ownership.push(lead);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_serde() {
        let json = r#"{"kind":"normalized_label","anchor_path":"sections"}"#;
        let strategy: MatchStrategy = serde_json::from_str(json).unwrap();
        match strategy {
            MatchStrategy::NormalizedLabel {
                anchor_step,
                anchor_path,
                id_key,
                label_key,
            } => {
                assert_eq!(anchor_step, None);
                assert_eq!(anchor_path.to_string(), "sections");
                assert_eq!(id_key, "id");
                assert_eq!(label_key, "title");
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HydrationConfig::default();
        let rendered = config.to_toml_string().unwrap();
        let parsed: HydrationConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.steps.len(), config.steps.len());
        assert_eq!(parsed.derivations.len(), 2);
        assert_eq!(parsed.enums, config.enums);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[layout]
canonical_field = "state"
legacy_field = "legacy"
step_key_prefix = "s"
envelope_key = "set"

[[steps]]
step = 3
references = [{{ path = "productIds", entity_type = "product" }}]
"#
        )
        .unwrap();

        let config = HydrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.layout.canonical_field, "state");
        assert_eq!(config.layout.step_key(3), "s3");
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.steps[0].references[0].entity_type, "product");
        assert!(config.derivations.is_empty());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"engine": {{"lookup_timeout_ms": 50, "persist_derived": false}}}}"#
        )
        .unwrap();

        let config = HydrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.lookup_timeout_ms, 50);
        assert!(!config.engine.persist_derived);
        assert_eq!(config.layout, LayoutConfig::default());
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "steps = 3").unwrap();
        assert!(matches!(
            HydrationConfig::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }
}
