//! YAML run configuration.
//!
//! ```text
//! listsync.yaml
//!   forward:    lists, hard_exclude_lists, tag_overrides
//!   reverse:    enabled, exit_tags, exclusion_rules, archive_exit_contacts
//!   archival:   enabled, exempt_tags, preserved_prefixes
//!   fields:     origin_field, map
//!   execution:  retry bounds, pacing, paging, contact_limit
//!   state:      dir, report_retention_days
//! ```
//!
//! Every section is optional; missing keys take the defaults below.
//! Credentials never live here; the binary reads them from the environment.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{ListId, TagName};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "listsync.yaml";

// ---------------------------------------------------------------------------
// 1. Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub forward: ForwardConfig,
    pub reverse: ReverseConfig,
    pub archival: ArchivalConfig,
    pub fields: FieldsConfig,
    pub execution: ExecutionConfig,
    pub state: StateConfig,
}

/// CRM lists → audience tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub lists: Vec<ListId>,
    /// Members of these lists are never synced.
    pub hard_exclude_lists: Vec<ListId>,
    /// Fixed tag for a list instead of its current name.
    pub tag_overrides: BTreeMap<ListId, TagName>,
}

/// Audience exit tags → CRM lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseConfig {
    pub enabled: bool,
    pub exit_tags: BTreeMap<TagName, ListId>,
    /// Source list → CRM lists that, once reached, imply leaving the source list.
    pub exclusion_rules: BTreeMap<ListId, Vec<ListId>>,
    /// Archive exit-tagged contacts in the audience after they are moved.
    pub archive_exit_contacts: bool,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exit_tags: BTreeMap::new(),
            exclusion_rules: BTreeMap::new(),
            archive_exit_contacts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    pub enabled: bool,
    /// Contacts carrying any of these tags are never archived.
    pub exempt_tags: Vec<TagName>,
    /// Tags starting with one of these prefixes are never retracted and exempt
    /// their contact from archival.
    pub preserved_prefixes: Vec<String>,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exempt_tags: ["VIP", "Founder", "Partner", "Employee", "Investor", "Manual_Addition"]
                .into_iter()
                .map(TagName::from)
                .collect(),
            preserved_prefixes: ["Manual_", "Custom_", "Event_", "Campaign_", "Test_"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ArchivalConfig {
    /// True if `tag` is protected from retraction by a preserved prefix.
    pub fn is_preserved(&self, tag: &TagName) -> bool {
        self.preserved_prefixes.iter().any(|p| tag.as_str().starts_with(p.as_str()))
    }

    /// True if a contact with these tags must not be archived.
    pub fn is_exempt<'a>(&self, tags: impl IntoIterator<Item = &'a TagName>) -> bool {
        tags.into_iter()
            .any(|t| self.exempt_tags.contains(t) || self.is_preserved(t))
    }
}

/// One source property copied into a destination field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub destination: String,
    pub max_len: usize,
}

impl FieldMapping {
    fn new(source: &str, destination: &str, max_len: usize) -> Self {
        Self {
            source: source.to_owned(),
            destination: destination.to_owned(),
            max_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    /// Destination field holding the comma-joined origin list ids.
    pub origin_field: String,
    pub map: Vec<FieldMapping>,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            origin_field: "ORI_LISTS".into(),
            map: vec![
                FieldMapping::new("firstname", "FNAME", 50),
                FieldMapping::new("lastname", "LNAME", 50),
                FieldMapping::new("company", "COMPANY", 255),
                FieldMapping::new("phone", "PHONE", 50),
                FieldMapping::new("address", "ADDRESS", 255),
                FieldMapping::new("address2", "ADDRESS2", 255),
                FieldMapping::new("city", "CITY", 50),
                FieldMapping::new("state", "STATE", 50),
                FieldMapping::new("zip", "POSTCODE", 20),
                FieldMapping::new("country", "COUNTRY", 50),
                FieldMapping::new("branches", "BRANCHES", 255),
            ],
        }
    }
}

impl FieldsConfig {
    /// Source property names the detail fetch must request.
    pub fn source_properties(&self) -> Vec<String> {
        let mut props: Vec<String> = self.map.iter().map(|m| m.source.clone()).collect();
        props.push("email".into());
        props
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Total attempts per mutation, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum spacing between calls to the audience platform.
    pub destination_spacing_ms: u64,
    /// Minimum spacing between calls to the CRM.
    pub source_spacing_ms: u64,
    pub page_size: usize,
    pub detail_batch_size: usize,
    /// Caps contacts per list when non-zero. Disables retraction and archival.
    pub contact_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            destination_spacing_ms: 200,
            source_spacing_ms: 100,
            page_size: 100,
            detail_batch_size: 100,
            contact_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Defaults to `~/.listsync`.
    pub dir: Option<PathBuf>,
    pub report_retention_days: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: None,
            report_retention_days: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the config at `path`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path +
/// line context) if malformed YAML. An empty file yields the defaults.
pub fn load_at(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(SyncConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// `~/.listsync`
pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".listsync"))
        .ok_or(ConfigError::HomeNotFound)
}

impl SyncConfig {
    /// The configured state directory, or [`default_state_dir`].
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.state.dir {
            Some(dir) => Ok(dir.clone()),
            None => default_state_dir(),
        }
    }

    /// `validate()` and turn any errors into `ConfigError::Invalid`.
    pub fn ensure_valid(&self) -> Result<ConfigReport, ConfigError> {
        let report = self.validate();
        if report.errors.is_empty() {
            Ok(report)
        } else {
            Err(ConfigError::Invalid(report.errors))
        }
    }

    /// Check the config for contradictions. Never touches the network.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();
        let forward: BTreeSet<&ListId> = self.forward.lists.iter().collect();

        if self.forward.lists.is_empty() {
            report.errors.push("forward.lists is empty".into());
        }
        if forward.len() != self.forward.lists.len() {
            report.warnings.push("forward.lists contains duplicates".into());
        }
        for id in &self.forward.hard_exclude_lists {
            if forward.contains(id) {
                report
                    .errors
                    .push(format!("list {id} is both a forward list and a hard-exclude list"));
            }
        }
        for (id, tag) in &self.forward.tag_overrides {
            if !forward.contains(id) {
                report
                    .errors
                    .push(format!("tag override for list {id} which is not in forward.lists"));
            }
            if tag.as_str().trim().is_empty() {
                report.errors.push(format!("tag override for list {id} is empty"));
            }
        }
        let mut seen: HashMap<&TagName, &ListId> = HashMap::new();
        for (id, tag) in &self.forward.tag_overrides {
            if let Some(other) = seen.insert(tag, id) {
                report
                    .warnings
                    .push(format!("lists {other} and {id} share the tag '{tag}'"));
            }
        }

        if self.execution.max_attempts == 0 {
            report.errors.push("execution.max_attempts must be at least 1".into());
        }
        if self.execution.page_size == 0 || self.execution.detail_batch_size == 0 {
            report
                .errors
                .push("execution.page_size and detail_batch_size must be positive".into());
        }
        if self.execution.base_delay_ms > self.execution.max_delay_ms {
            report
                .warnings
                .push("execution.base_delay_ms exceeds max_delay_ms; delays are capped".into());
        }
        if self.fields.origin_field.trim().is_empty() {
            report.errors.push("fields.origin_field is empty".into());
        }
        if self.state.report_retention_days == 0 {
            report
                .errors
                .push("state.report_retention_days must be at least 1".into());
        }

        if self.reverse.enabled {
            if self.reverse.exit_tags.is_empty() {
                report.warnings.push("reverse.exit_tags is empty".into());
            }
            for (tag, list) in &self.reverse.exit_tags {
                if list.as_str().trim().is_empty() {
                    report.errors.push(format!("exit tag '{tag}' maps to an empty list id"));
                }
            }
            if self.reverse.exclusion_rules.is_empty() {
                report
                    .warnings
                    .push("reverse.exclusion_rules is empty; no anti-remarketing protection".into());
            }
            for source in self.reverse.exclusion_rules.keys() {
                if !forward.contains(source) {
                    report.warnings.push(format!(
                        "exclusion rule for list {source} which is not a forward list"
                    ));
                }
            }
        }

        if self.execution.contact_limit > 0 {
            report.warnings.push(format!(
                "contact_limit {} is active; tag retraction and archival are disabled",
                self.execution.contact_limit
            ));
        }
        report
    }
}

/// Result of [`SyncConfig::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// 3. Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> SyncConfig {
        SyncConfig {
            forward: ForwardConfig {
                lists: vec!["718".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn minimal_config_is_valid() {
        let report = minimal().validate();
        assert!(report.is_ok(), "{report:?}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_forward_lists_is_an_error() {
        let report = SyncConfig::default().validate();
        assert!(report.errors.iter().any(|e| e.contains("forward.lists")));
    }

    #[test]
    fn override_for_unknown_list_is_an_error() {
        let mut cfg = minimal();
        cfg.forward.tag_overrides.insert("999".into(), "X".into());
        let err = cfg.ensure_valid().unwrap_err();
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn archival_exemption_by_tag_and_prefix() {
        let a = ArchivalConfig::default();
        assert!(a.is_exempt([&TagName::from("VIP")]));
        assert!(a.is_exempt([&TagName::from("Event_Summit")]));
        assert!(!a.is_exempt([&TagName::from("General")]));
        assert!(a.is_preserved(&TagName::from("Manual_import")));
    }

    #[test]
    fn reverse_warnings() {
        let mut cfg = minimal();
        cfg.reverse.enabled = true;
        cfg.reverse.exit_tags.insert("Unsubscribed".into(), "900".into());
        cfg.reverse.exclusion_rules.insert("111".into(), vec!["900".into()]);
        let report = cfg.validate();
        assert!(report.is_ok());
        assert!(report.warnings.iter().any(|w| w.contains("111")));
    }
}
