use crate::optimise::optimise_lockfile;
use crate::plan::RemovalPlan;
use crate::version_map::ParsedLockfile;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// The subset of pnpm-lock.yaml this tool reads. Everything else in the
/// document is opaque and only ever carried through a rewrite unmodified.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PnpmLockfile {
    #[serde(default)]
    importers: BTreeMap<String, PnpmImporter>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PnpmImporter {
    #[serde(default)]
    dependencies: BTreeMap<String, PnpmDependencyEntry>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, PnpmDependencyEntry>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, PnpmDependencyEntry>,
}

#[derive(Debug, Deserialize)]
struct PnpmDependencyEntry {
    specifier: String,
    version: String,
}

const IMPORTER_SECTIONS: [&str; 3] =
    ["dependencies", "devDependencies", "optionalDependencies"];

/// Parse pnpm-lock.yaml text into the format-agnostic model, grouping every
/// importer's dependency references by name and resolved version.
pub fn parse_lock(content: &str, optimise: bool) -> Result<ParsedLockfile> {
    let lockfile: PnpmLockfile =
        serde_yaml::from_str(content).context("parse pnpm-lock.yaml")?;

    let mut parsed = ParsedLockfile::default();
    for importer in lockfile.importers.values() {
        for deps in [
            &importer.dependencies,
            &importer.dev_dependencies,
            &importer.optional_dependencies,
        ] {
            for (name, entry) in deps {
                // Workspace references are not resolvable versions.
                if entry.version.starts_with("link:") {
                    continue;
                }
                parsed.record(name, base_version(&entry.version), &entry.specifier);
            }
        }
    }

    if optimise {
        optimise_lockfile(&mut parsed);
    }
    Ok(parsed)
}

/// Apply a removal plan to pnpm-lock.yaml text: repoint importer references
/// to their consolidated versions, then drop dead keys from `packages` and
/// `snapshots` in lockstep. The whole document is re-serialized, so
/// formatting may drift; an empty plan returns the input untouched.
pub fn apply_removals(content: &str, plan: &RemovalPlan) -> Result<String> {
    if plan.is_empty() {
        return Ok(content.to_string());
    }

    let mut doc: Value =
        serde_yaml::from_str(content).context("parse pnpm-lock.yaml")?;
    ensure!(doc.is_mapping(), "pnpm-lock.yaml root must be a mapping");

    if let Some(importers) = doc.get_mut("importers").and_then(Value::as_mapping_mut) {
        for (_, importer) in importers.iter_mut() {
            repoint_importer(importer, plan);
        }
    }

    let mut removed_packages: Vec<(String, String)> = Vec::new();
    for section in ["packages", "snapshots"] {
        if let Some(map) = doc.get_mut(section).and_then(Value::as_mapping_mut) {
            let (kept, dropped) = drop_dead_keys(map, plan);
            *map = kept;
            if section == "packages" {
                removed_packages = dropped;
            }
        }
    }

    for (name, removal) in plan.iter() {
        for version in &removal.dead {
            ensure!(
                removed_packages
                    .iter()
                    .any(|(n, v)| n == name && v == version),
                "cannot remove {name}@{version}: no such package in lockfile"
            );
        }
    }

    serde_yaml::to_string(&doc).context("serialize pnpm-lock.yaml")
}

/// Rewrite the `version` field of every dependency entry whose resolved
/// version is marked dead, preserving any parenthesized peer/patch suffix.
fn repoint_importer(importer: &mut Value, plan: &RemovalPlan) {
    let Some(importer) = importer.as_mapping_mut() else {
        return;
    };
    for section in IMPORTER_SECTIONS {
        let Some(deps) = importer.get_mut(section).and_then(Value::as_mapping_mut) else {
            continue;
        };
        for (name, entry) in deps.iter_mut() {
            let (Some(name), Some(entry)) = (name.as_str(), entry.as_mapping_mut()) else {
                continue;
            };
            let Some(removal) = plan.get(name) else {
                continue;
            };
            let current = match entry.get("version").and_then(Value::as_str) {
                Some(v) => v.to_string(),
                None => continue,
            };
            if current.starts_with("link:") {
                continue;
            }
            let base = base_version(&current);
            if !removal.is_dead(base) {
                continue;
            }
            let specifier = match entry.get("specifier").and_then(Value::as_str) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let Some(target) = removal.new_target(&specifier) else {
                continue;
            };
            if target == base {
                continue;
            }
            let updated = format!("{target}{}", &current[base.len()..]);
            entry.insert(Value::from("version"), Value::from(updated));
        }
    }
}

/// Rebuild a packages/snapshots mapping without the keys whose exact
/// (name, version) pair the plan marks dead, preserving key order.
fn drop_dead_keys(map: &Mapping, plan: &RemovalPlan) -> (Mapping, Vec<(String, String)>) {
    let mut kept = Mapping::new();
    let mut dropped = Vec::new();
    for (key, value) in map {
        let dead = key.as_str().and_then(split_package_key).and_then(
            |(name, version)| {
                plan.get(name)
                    .filter(|r| r.is_dead(version))
                    .map(|_| (name.to_string(), version.to_string()))
            },
        );
        match dead {
            Some(pair) => dropped.push(pair),
            None => {
                kept.insert(key.clone(), value.clone());
            }
        }
    }
    (kept, dropped)
}

/// Strip a parenthesized peer/patch suffix: "18.2.0(react@18.2.0)" becomes
/// "18.2.0".
fn base_version(version: &str) -> &str {
    match version.find('(') {
        Some(idx) => &version[..idx],
        None => version,
    }
}

/// Split a packages/snapshots key into name and version. The version segment
/// starts after the last `@` before any peer/patch suffix; a leading
/// `@scope/` does not count.
fn split_package_key(key: &str) -> Option<(&str, &str)> {
    let head = &key[..key.find('(').unwrap_or(key.len())];
    let scope_end = if head.starts_with('@') {
        head.find('/')?
    } else {
        0
    };
    let at = head[scope_end..].rfind('@')? + scope_end;
    if at == 0 {
        return None;
    }
    Some((&key[..at], &key[at + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlannedRemoval;
    use crate::version_map::VersionMap;

    fn value_at<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
        let mut cur = doc;
        for segment in path {
            cur = cur.get(*segment)?;
        }
        Some(cur)
    }

    #[test]
    fn splits_package_keys() {
        assert_eq!(split_package_key("react@18.2.0"), Some(("react", "18.2.0")));
        assert_eq!(
            split_package_key("@types/react@18.2.79"),
            Some(("@types/react", "18.2.79"))
        );
        assert_eq!(
            split_package_key("react-dom@18.2.0(react@18.2.0)"),
            Some(("react-dom", "18.2.0(react@18.2.0)"))
        );
        assert_eq!(split_package_key("__metadata"), None);
    }

    #[test]
    fn handles_simple_dependencies_with_no_duplicates() {
        let parsed = parse_lock(
            r#"
lockfileVersion: '9.0'

settings:
  autoInstallPeers: true
  excludeLinksFromLockfile: false

importers:
  .:
    dependencies:
      react:
        specifier: ^18.2.0
        version: 18.2.0
    devDependencies:
      '@types/react':
        specifier: ^18.2.15
        version: 18.2.79

packages:
  '@types/react@18.2.79':
    resolution: {integrity: sha512-aaa==}

  react@18.2.0:
    resolution: {integrity: sha512-bbb==}
    engines: {node: '>=0.10.0'}
"#,
            false,
        )
        .unwrap();

        assert_eq!(parsed.dependencies.len(), 2);
        assert_eq!(
            parsed.dependencies["@types/react"].versions,
            VersionMap::from_pairs(&[("18.2.79", ["^18.2.15"].as_slice())])
        );
        assert_eq!(
            parsed.dependencies["react"].versions,
            VersionMap::from_pairs(&[("18.2.0", ["^18.2.0"].as_slice())])
        );
        assert!(parsed.dependencies["react"].optimised.is_none());
    }

    #[test]
    fn groups_multiple_versions_across_importers() {
        let parsed = parse_lock(
            r#"
lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      react:
        specifier: ^18.2.0
        version: 18.2.0

  packages/legacy:
    dependencies:
      react:
        specifier: ^7.1.2
        version: 7.1.3

  packages/old:
    dependencies:
      react:
        specifier: ^18.1.0
        version: 18.1.3

  packages/old2:
    dependencies:
      react:
        specifier: ^18.1.2
        version: 18.1.3
"#,
            false,
        )
        .unwrap();

        let react = &parsed.dependencies["react"];
        let versions: Vec<&str> = react.versions.versions().collect();
        assert_eq!(versions, vec!["7.1.3", "18.1.3", "18.2.0"]);
        assert_eq!(
            react.versions,
            VersionMap::from_pairs(&[
                ("7.1.3", ["^7.1.2"].as_slice()),
                ("18.1.3", ["^18.1.0", "^18.1.2"].as_slice()),
                ("18.2.0", ["^18.2.0"].as_slice()),
            ])
        );
    }

    #[test]
    fn skips_workspace_link_versions() {
        let parsed = parse_lock(
            r#"
lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      '@acme/cli':
        specifier: workspace:*
        version: link:packages/cli

  packages/cli:
    dependencies:
      semver:
        specifier: ^7.7.3
        version: 7.7.3
"#,
            false,
        )
        .unwrap();

        assert_eq!(parsed.dependencies.len(), 1);
        assert!(parsed.dependencies.contains_key("semver"));
        assert!(!parsed.dependencies.contains_key("@acme/cli"));
    }

    #[test]
    fn strips_peer_suffixes_when_grouping() {
        let parsed = parse_lock(
            r#"
lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      react-dom:
        specifier: ^18.2.0
        version: 18.2.0(react@18.2.0)
"#,
            false,
        )
        .unwrap();

        assert_eq!(
            parsed.dependencies["react-dom"].versions,
            VersionMap::from_pairs(&[("18.2.0", ["^18.2.0"].as_slice())])
        );
    }

    #[test]
    fn computes_the_optimised_table_when_requested() {
        let parsed = parse_lock(
            r#"
lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      semver:
        specifier: ^7.7.3
        version: 7.7.3

  packages/yarn:
    dependencies:
      semver:
        specifier: ^7.7.2
        version: 7.7.2
"#,
            true,
        )
        .unwrap();

        let semver = &parsed.dependencies["semver"];
        assert_eq!(
            semver.versions,
            VersionMap::from_pairs(&[
                ("7.7.2", ["^7.7.2"].as_slice()),
                ("7.7.3", ["^7.7.3"].as_slice()),
            ])
        );
        assert_eq!(
            semver.optimised,
            Some(VersionMap::from_pairs(&[(
                "7.7.3",
                ["^7.7.2", "^7.7.3"].as_slice()
            )]))
        );
    }

    #[test]
    fn malformed_yaml_is_a_hard_error() {
        assert!(parse_lock("importers:\n  .:\n  broken", false).is_err());
    }

    const REMOVAL_FIXTURE: &str = r#"lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      react:
        specifier: ^18.2.0
        version: 18.2.0
      react-legacy:
        specifier: ^7.1.2
        version: 7.1.3
    devDependencies:
      '@types/react':
        specifier: ^18.2.15
        version: 18.2.79

packages:
  '@types/react@18.2.79':
    resolution: {integrity: sha512-aaa==}

  react@7.1.3:
    resolution: {integrity: sha512-bbb==}

  react@18.1.3:
    resolution: {integrity: sha512-ccc==}

  react@18.2.0:
    resolution: {integrity: sha512-ddd==}

snapshots:
  '@types/react@18.2.79': {}
  react@7.1.3: {}
  react@18.1.3: {}
  react@18.2.0: {}
"#;

    #[test]
    fn removes_package_and_snapshot_entries_in_lockstep() {
        let mut plan = RemovalPlan::default();
        plan.insert(
            "react",
            PlannedRemoval {
                dead: vec!["18.2.0".to_string()],
                optimised: None,
            },
        );

        let rewritten = apply_removals(REMOVAL_FIXTURE, &plan).unwrap();
        let doc: Value = serde_yaml::from_str(&rewritten).unwrap();

        assert!(value_at(&doc, &["packages", "react@18.2.0"]).is_none());
        assert!(value_at(&doc, &["packages", "react@18.1.3"]).is_some());
        assert!(value_at(&doc, &["packages", "react@7.1.3"]).is_some());
        assert!(value_at(&doc, &["packages", "@types/react@18.2.79"]).is_some());

        assert!(value_at(&doc, &["snapshots", "react@18.2.0"]).is_none());
        assert!(value_at(&doc, &["snapshots", "react@18.1.3"]).is_some());
        assert!(value_at(&doc, &["snapshots", "react@7.1.3"]).is_some());
        assert!(value_at(&doc, &["snapshots", "@types/react@18.2.79"]).is_some());

        // Without an optimised table, importer references stay untouched.
        assert_eq!(
            value_at(&doc, &["importers", ".", "dependencies", "react", "version"])
                .and_then(Value::as_str),
            Some("18.2.0")
        );
        assert!(value_at(
            &doc,
            &["importers", ".", "devDependencies", "@types/react"]
        )
        .is_some());
    }

    #[test]
    fn removes_multiple_versions_of_one_dependency() {
        let mut plan = RemovalPlan::default();
        plan.insert(
            "react",
            PlannedRemoval {
                dead: vec!["18.2.0".to_string(), "7.1.3".to_string()],
                optimised: None,
            },
        );

        let rewritten = apply_removals(REMOVAL_FIXTURE, &plan).unwrap();
        let doc: Value = serde_yaml::from_str(&rewritten).unwrap();

        assert!(value_at(&doc, &["packages", "react@18.2.0"]).is_none());
        assert!(value_at(&doc, &["packages", "react@7.1.3"]).is_none());
        assert!(value_at(&doc, &["packages", "react@18.1.3"]).is_some());
        assert!(value_at(&doc, &["snapshots", "react@18.2.0"]).is_none());
        assert!(value_at(&doc, &["snapshots", "react@7.1.3"]).is_none());
        assert!(value_at(&doc, &["snapshots", "react@18.1.3"]).is_some());
    }

    #[test]
    fn handles_scoped_package_keys() {
        let source = r#"lockfileVersion: '9.0'

importers:
  .:
    devDependencies:
      '@types/react':
        specifier: ^18.2.15
        version: 18.2.79

packages:
  '@types/react@18.2.70':
    resolution: {integrity: sha512-old==}

  '@types/react@18.2.79':
    resolution: {integrity: sha512-new==}

snapshots:
  '@types/react@18.2.70': {}
  '@types/react@18.2.79': {}
"#;
        let mut plan = RemovalPlan::default();
        plan.insert(
            "@types/react",
            PlannedRemoval {
                dead: vec!["18.2.70".to_string()],
                optimised: None,
            },
        );

        let rewritten = apply_removals(source, &plan).unwrap();
        let doc: Value = serde_yaml::from_str(&rewritten).unwrap();
        assert!(value_at(&doc, &["packages", "@types/react@18.2.70"]).is_none());
        assert!(value_at(&doc, &["packages", "@types/react@18.2.79"]).is_some());
        assert!(value_at(&doc, &["snapshots", "@types/react@18.2.70"]).is_none());
        assert!(value_at(&doc, &["snapshots", "@types/react@18.2.79"]).is_some());
    }

    #[test]
    fn repoints_importer_references_to_consolidated_versions() {
        let source = r#"lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      semver:
        specifier: ^7.7.3
        version: 7.7.3

  packages/yarn:
    dependencies:
      semver:
        specifier: ^7.7.2
        version: 7.7.2
      typescript:
        specifier: ^5.9
        version: 5.9.2

packages:
  semver@7.7.2:
    resolution: {integrity: sha512-aaa==}

  semver@7.7.3:
    resolution: {integrity: sha512-bbb==}

  typescript@5.9.2:
    resolution: {integrity: sha512-ccc==}
    hasBin: true

  typescript@5.9.3:
    resolution: {integrity: sha512-ddd==}
    hasBin: true

snapshots:
  semver@7.7.2: {}

  semver@7.7.3: {}

  typescript@5.9.2: {}

  typescript@5.9.3: {}
"#;
        let mut plan = RemovalPlan::default();
        plan.insert(
            "semver",
            PlannedRemoval {
                dead: vec!["7.7.2".to_string()],
                optimised: Some(VersionMap::from_pairs(&[(
                    "7.7.3",
                    ["^7.7.2", "^7.7.3"].as_slice(),
                )])),
            },
        );
        plan.insert(
            "typescript",
            PlannedRemoval {
                dead: vec!["5.9.2".to_string()],
                optimised: Some(VersionMap::from_pairs(&[(
                    "5.9.3",
                    ["^5.9"].as_slice(),
                )])),
            },
        );

        let rewritten = apply_removals(source, &plan).unwrap();
        let doc: Value = serde_yaml::from_str(&rewritten).unwrap();

        assert!(value_at(&doc, &["packages", "semver@7.7.2"]).is_none());
        assert!(value_at(&doc, &["packages", "semver@7.7.3"]).is_some());
        assert!(value_at(&doc, &["packages", "typescript@5.9.2"]).is_none());
        assert!(value_at(&doc, &["packages", "typescript@5.9.3"]).is_some());
        assert!(value_at(&doc, &["snapshots", "semver@7.7.2"]).is_none());
        assert!(value_at(&doc, &["snapshots", "typescript@5.9.2"]).is_none());

        assert_eq!(
            value_at(&doc, &["importers", ".", "dependencies", "semver", "version"])
                .and_then(Value::as_str),
            Some("7.7.3")
        );
        assert_eq!(
            value_at(
                &doc,
                &["importers", "packages/yarn", "dependencies", "semver", "version"]
            )
            .and_then(Value::as_str),
            Some("7.7.3")
        );
        assert_eq!(
            value_at(
                &doc,
                &[
                    "importers",
                    "packages/yarn",
                    "dependencies",
                    "typescript",
                    "version"
                ]
            )
            .and_then(Value::as_str),
            Some("5.9.3")
        );
    }

    #[test]
    fn preserves_peer_suffixes_when_repointing() {
        let source = r#"lockfileVersion: '9.0'

importers:
  .:
    dependencies:
      react-dom:
        specifier: ^18.1.0
        version: 18.1.0(react@18.2.0)

packages:
  react-dom@18.1.0:
    resolution: {integrity: sha512-aaa==}

  react-dom@18.2.0:
    resolution: {integrity: sha512-bbb==}

snapshots:
  react-dom@18.1.0(react@18.2.0): {}
  react-dom@18.2.0(react@18.2.0): {}
"#;
        let mut plan = RemovalPlan::default();
        plan.insert(
            "react-dom",
            PlannedRemoval {
                dead: vec!["18.1.0".to_string()],
                optimised: Some(VersionMap::from_pairs(&[(
                    "18.2.0",
                    ["^18.1.0", "^18.2.0"].as_slice(),
                )])),
            },
        );

        let rewritten = apply_removals(source, &plan).unwrap();
        let doc: Value = serde_yaml::from_str(&rewritten).unwrap();
        assert_eq!(
            value_at(
                &doc,
                &["importers", ".", "dependencies", "react-dom", "version"]
            )
            .and_then(Value::as_str),
            Some("18.2.0(react@18.2.0)")
        );
        assert!(value_at(&doc, &["packages", "react-dom@18.1.0"]).is_none());
        // Snapshot keys carrying a suffix are not the planned exact pair.
        assert!(
            value_at(&doc, &["snapshots", "react-dom@18.2.0(react@18.2.0)"]).is_some()
        );
    }

    #[test]
    fn empty_plan_is_a_byte_for_byte_no_op() {
        let rewritten = apply_removals(REMOVAL_FIXTURE, &RemovalPlan::default()).unwrap();
        assert_eq!(rewritten, REMOVAL_FIXTURE);
    }

    #[test]
    fn unknown_removal_target_is_a_contract_error() {
        let mut plan = RemovalPlan::default();
        plan.insert(
            "react",
            PlannedRemoval {
                dead: vec!["9.9.9".to_string()],
                optimised: None,
            },
        );
        let err = apply_removals(REMOVAL_FIXTURE, &plan).unwrap_err();
        assert!(err.to_string().contains("react@9.9.9"));
    }
}
