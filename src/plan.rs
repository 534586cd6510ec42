use crate::version_map::{ParsedLockfile, VersionMap};
use std::collections::BTreeMap;

/// Versions to delete for one dependency, plus the consolidated table used
/// to repoint surviving references. Without a table, references are left
/// untouched and the package manager's install step re-resolves them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedRemoval {
    pub dead: Vec<String>,
    pub optimised: Option<VersionMap>,
}

impl PlannedRemoval {
    pub fn is_dead(&self, version: &str) -> bool {
        self.dead.iter().any(|v| v == version)
    }

    /// The surviving version this specifier was reassigned to, if any.
    pub fn new_target(&self, specifier: &str) -> Option<&str> {
        let optimised = self.optimised.as_ref()?;
        optimised
            .iter()
            .find(|(_, specs)| specs.iter().any(|s| s == specifier))
            .map(|(version, _)| version)
    }
}

/// Diff between a lockfile's recorded versions and their consolidated form:
/// per dependency name, which resolved versions die and where each surviving
/// specifier now points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalPlan {
    entries: BTreeMap<String, PlannedRemoval>,
}

impl RemovalPlan {
    pub fn from_parsed(parsed: &ParsedLockfile) -> Self {
        let mut plan = Self::default();
        for (name, dep) in &parsed.dependencies {
            let Some(optimised) = &dep.optimised else {
                continue;
            };
            let dead: Vec<String> = dep
                .versions
                .versions()
                .filter(|v| !optimised.contains(v))
                .map(str::to_string)
                .collect();
            if dead.is_empty() {
                continue;
            }
            plan.entries.insert(
                name.clone(),
                PlannedRemoval {
                    dead,
                    optimised: Some(optimised.clone()),
                },
            );
        }
        plan
    }

    pub fn insert(&mut self, name: &str, removal: PlannedRemoval) {
        self.entries.insert(name.to_string(), removal);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of resolved versions marked dead across all names.
    pub fn removed_count(&self) -> usize {
        self.entries.values().map(|r| r.dead.len()).sum()
    }

    pub fn get(&self, name: &str) -> Option<&PlannedRemoval> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlannedRemoval)> {
        self.entries.iter().map(|(name, r)| (name.as_str(), r))
    }
}
