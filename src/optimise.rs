use crate::npm_semver;
use crate::version_map::{ParsedLockfile, VersionMap};

/// Collapse compatible resolved versions onto a single representative.
///
/// Scans versions in ascending order, greedily extending the current cluster
/// while the next (higher) version still satisfies every specifier gathered
/// so far; the cluster's maximum version becomes its representative and
/// carries every member's specifiers. Versions that cannot merge are emitted
/// with their own specifier lists. Output keys are always drawn from the
/// input, every input specifier survives, and the version count never grows.
pub fn optimise_versions(versions: &VersionMap) -> VersionMap {
    if versions.len() <= 1 {
        return versions.clone();
    }

    let mut out = VersionMap::new();
    let mut rep: Option<&str> = None;
    let mut cluster: Vec<&str> = Vec::new();

    for (version, specs) in versions.iter() {
        if !cluster.is_empty()
            && cluster.iter().all(|s| npm_semver::satisfies(s, version))
        {
            rep = Some(version);
        } else {
            if let Some(rep) = rep {
                for spec in &cluster {
                    out.insert(rep, spec);
                }
            }
            cluster.clear();
            rep = Some(version);
        }
        cluster.extend(specs.iter().map(String::as_str));
    }
    if let Some(rep) = rep {
        for spec in &cluster {
            out.insert(rep, spec);
        }
    }
    out
}

/// Fill in the consolidated table for every dependency in the model.
pub fn optimise_lockfile(parsed: &mut ParsedLockfile) {
    for dep in parsed.dependencies.values_mut() {
        dep.optimised = Some(optimise_versions(&dep.versions));
    }
}
