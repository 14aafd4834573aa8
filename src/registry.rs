//! Cohort registry - access codes and fixed rosters
//!
//! Provisioned out of band and injected at startup from a TOML data file:
//!
//! ```toml
//! [[cohorts]]
//! number = 3
//! access_code = "XYZ"
//! roster = ["A", "B", "C"]
//! ```
//!
//! Rosters never grow after load. Access codes are unique across cohorts and
//! every identifier belongs to exactly one cohort. Identifiers are trimmed on
//! load, matching the trimming applied to signup input; access codes are
//! matched exactly, so a code with surrounding whitespace is rejected.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

use crate::error::{GateError, Result};

/// One cohort as written in the registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortEntry {
    pub number: u32,
    pub access_code: String,
    #[serde(default)]
    pub roster: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    cohorts: Vec<CohortEntry>,
}

/// Loaded cohort
#[derive(Debug, Clone)]
pub struct Cohort {
    pub number: u32,
    access_code: String,
    roster: BTreeSet<String>,
}

impl Cohort {
    pub fn roster(&self) -> impl Iterator<Item = &str> {
        self.roster.iter().map(String::as_str)
    }

    pub fn roster_size(&self) -> usize {
        self.roster.len()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.roster.contains(identifier)
    }
}

/// Read-only lookup tables for codes and rosters
#[derive(Debug, Clone, Default)]
pub struct CohortRegistry {
    cohorts: BTreeMap<u32, Cohort>,
    by_code: HashMap<String, u32>,
    by_identifier: HashMap<String, u32>,
}

impl CohortRegistry {
    /// Build from entries, rejecting duplicate numbers, codes or identifiers
    pub fn from_entries(entries: Vec<CohortEntry>) -> Result<Self> {
        let mut registry = CohortRegistry::default();

        for entry in entries {
            if registry.cohorts.contains_key(&entry.number) {
                return Err(GateError::Config(format!("duplicate cohort number {}", entry.number)));
            }
            if entry.access_code.trim().is_empty() {
                return Err(GateError::Config(format!("cohort {} has a blank access code", entry.number)));
            }
            if entry.access_code.trim() != entry.access_code {
                return Err(GateError::Config(format!(
                    "cohort {} access code has surrounding whitespace",
                    entry.number
                )));
            }
            if registry.by_code.contains_key(&entry.access_code) {
                return Err(GateError::Config(format!(
                    "cohort {} reuses another cohort's access code",
                    entry.number
                )));
            }

            let mut roster = BTreeSet::new();
            for raw in &entry.roster {
                let identifier = raw.trim();
                if identifier.is_empty() {
                    return Err(GateError::Config(format!("cohort {} has a blank identifier", entry.number)));
                }
                match registry.by_identifier.get(identifier) {
                    Some(&other) if other == entry.number => {
                        return Err(GateError::Config(format!(
                            "identifier listed twice in cohort {}",
                            entry.number
                        )));
                    }
                    Some(other) => {
                        return Err(GateError::Config(format!(
                            "identifier listed in both cohort {} and cohort {}",
                            other, entry.number
                        )));
                    }
                    None => {}
                }
                registry.by_identifier.insert(identifier.to_string(), entry.number);
                roster.insert(identifier.to_string());
            }

            registry.by_code.insert(entry.access_code.clone(), entry.number);
            registry.cohorts.insert(
                entry.number,
                Cohort {
                    number: entry.number,
                    access_code: entry.access_code,
                    roster,
                },
            );
        }

        Ok(registry)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(raw)?;
        Self::from_entries(file.cohorts)
    }

    /// Load the registry data file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&raw)?;
        info!(
            "Loaded cohort registry from {:?}: {} cohorts, {} identifiers",
            path,
            registry.cohorts.len(),
            registry.by_identifier.len()
        );
        Ok(registry)
    }

    /// Cohort number for an access code (exact match)
    pub fn resolve_code(&self, access_code: &str) -> Option<u32> {
        self.by_code.get(access_code).copied()
    }

    pub fn cohort(&self, number: u32) -> Option<&Cohort> {
        self.cohorts.get(&number)
    }

    pub fn is_member(&self, number: u32, identifier: &str) -> bool {
        self.cohorts
            .get(&number)
            .map(|c| c.contains(identifier))
            .unwrap_or(false)
    }

    /// Cohort an identifier belongs to, if any
    pub fn cohort_of(&self, identifier: &str) -> Option<u32> {
        self.by_identifier.get(identifier).copied()
    }

    pub fn cohorts(&self) -> impl Iterator<Item = &Cohort> {
        self.cohorts.values()
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    /// Access code lookup for administrative display
    pub fn access_code(&self, number: u32) -> Option<&str> {
        self.cohorts.get(&number).map(|c| c.access_code.as_str())
    }
}
