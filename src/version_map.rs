use semver::Version;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Map from resolved version to the specifiers that currently resolve to it,
/// for one dependency name.
///
/// Two ordering rules are invariants of the type, not output formatting:
/// keys ascend by semantic version and each specifier list is deduplicated
/// and natural-sorted. Both are maintained by `insert`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMap {
    entries: Vec<(String, Vec<String>)>,
}

impl VersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `specifier` resolves to `version`.
    pub fn insert(&mut self, version: &str, specifier: &str) {
        let idx = match self.entries.iter().position(|(v, _)| v == version) {
            Some(idx) => idx,
            None => {
                let idx = self
                    .entries
                    .iter()
                    .position(|(v, _)| compare_versions(version, v) == Ordering::Less)
                    .unwrap_or(self.entries.len());
                self.entries.insert(idx, (version.to_string(), Vec::new()));
                idx
            }
        };
        let specs = &mut self.entries[idx].1;
        if !specs.iter().any(|s| s == specifier) {
            specs.push(specifier.to_string());
            specs.sort_by(|a, b| natural_cmp(a, b));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, version: &str) -> bool {
        self.entries.iter().any(|(v, _)| v == version)
    }

    pub fn get(&self, version: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, specs)| specs.as_slice())
    }

    /// Resolved versions in ascending semantic order.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(v, _)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(v, specs)| (v.as_str(), specs.as_slice()))
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &[&str])]) -> Self {
        let mut map = Self::new();
        for (version, specs) in pairs {
            for spec in *specs {
                map.insert(version, spec);
            }
        }
        map
    }
}

/// Per-dependency view: the versions the lockfile records and, when
/// requested, their consolidated form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyVersions {
    pub versions: VersionMap,
    pub optimised: Option<VersionMap>,
}

/// Format-agnostic view of one lockfile: every resolvable dependency
/// reference grouped by name and resolved version. Workspace `link:`
/// references never appear here.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedLockfile {
    pub dependencies: BTreeMap<String, DependencyVersions>,
}

impl ParsedLockfile {
    pub fn record(&mut self, name: &str, version: &str, specifier: &str) {
        self.dependencies
            .entry(name.to_string())
            .or_default()
            .versions
            .insert(version, specifier);
    }
}

/// Ascending semantic order, falling back to natural string order for keys
/// that are not plain semver.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => natural_cmp(a, b),
    }
}

/// Byte-wise comparison with digit runs compared numerically, so that
/// "^18.1.9" sorts before "^18.1.10".
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let si = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let da = trim_leading_zeros(&a[si..i]);
            let db = trim_leading_zeros(&b[sj..j]);
            let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let start = digits
        .iter()
        .position(|&d| d != b'0')
        .unwrap_or(digits.len().saturating_sub(1));
    &digits[start..]
}
