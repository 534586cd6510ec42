use crate::optimise::optimise_lockfile;
use crate::plan::RemovalPlan;
use crate::version_map::ParsedLockfile;
use anyhow::{Context, Result, bail, ensure};

/// One textual package block: a header line of `name@range` keys followed by
/// body lines at deeper indentation.
#[derive(Debug)]
struct Block {
    start: usize,
    end: usize,
    keys: Vec<(String, String)>,
    version: Option<String>,
}

/// Parse flow-format lockfile text (yarn) into the format-agnostic model.
/// Every header key contributes its range as a specifier for the block's
/// resolved version.
pub fn parse_lock(content: &str, optimise: bool) -> Result<ParsedLockfile> {
    let lines: Vec<&str> = content.lines().collect();
    let blocks = scan_blocks(&lines)?;

    let mut parsed = ParsedLockfile::default();
    for block in &blocks {
        if block.keys.is_empty() {
            continue;
        }
        let version = block.version.as_deref().with_context(|| {
            format!(
                "malformed lockfile: block at line {} has no version field",
                block.start + 1
            )
        })?;
        for (name, range) in &block.keys {
            if range.starts_with("workspace:")
                || range.starts_with("link:")
                || range.starts_with("patch:")
            {
                continue;
            }
            parsed.record(name, version, range);
        }
    }

    if optimise {
        optimise_lockfile(&mut parsed);
    }
    Ok(parsed)
}

/// Delete each dead package's whole block, collapsing exactly one trailing
/// blank line per removed block so blank runs never accumulate. Untouched
/// lines pass through verbatim, line terminators included; an empty plan
/// returns the input untouched.
pub fn apply_removals(content: &str, plan: &RemovalPlan) -> Result<String> {
    if plan.is_empty() {
        return Ok(content.to_string());
    }
    let raw: Vec<&str> = content.split_inclusive('\n').collect();
    let lines: Vec<&str> = raw.iter().map(|l| strip_line_ending(l)).collect();
    let blocks = scan_blocks(&lines)?;

    let mut drop = vec![false; lines.len()];
    let mut matched: Vec<(&str, &str)> = Vec::new();
    for block in &blocks {
        let Some(version) = block.version.as_deref() else {
            continue;
        };
        let Some((name, _)) = block.keys.first() else {
            continue;
        };
        let Some(removal) = plan.get(name) else {
            continue;
        };
        if !removal.is_dead(version) {
            continue;
        }
        for flag in &mut drop[block.start..block.end] {
            *flag = true;
        }
        if lines.get(block.end).is_some_and(|l| l.trim().is_empty()) {
            drop[block.end] = true;
        }
        matched.push((name.as_str(), version));
    }

    for (name, removal) in plan.iter() {
        for version in &removal.dead {
            ensure!(
                matched.iter().any(|(n, v)| *n == name && *v == version),
                "cannot remove {name}@{version}: no such package in lockfile"
            );
        }
    }

    let mut out = String::with_capacity(content.len());
    for (idx, line) in raw.iter().enumerate() {
        if drop[idx] {
            continue;
        }
        out.push_str(line);
    }
    Ok(out)
}

/// Trim a `\n` or `\r\n` terminator for inspection, leaving the raw line
/// untouched for output.
fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Walk the lines once, collecting block boundaries, header keys, and each
/// block's resolved version. Comments and blank lines belong to no block.
fn scan_blocks(lines: &[&str]) -> Result<Vec<Block>> {
    let mut blocks: Vec<Block> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some(block) = blocks.last_mut() else {
                bail!(
                    "malformed lockfile: indented line {} outside any block",
                    idx + 1
                );
            };
            block.end = idx + 1;
            if block.version.is_none() {
                block.version = parse_version_field(line);
            }
        } else {
            let header = line.trim_end();
            let Some(header) = header.strip_suffix(':') else {
                bail!(
                    "malformed lockfile: expected a block header at line {}",
                    idx + 1
                );
            };
            blocks.push(Block {
                start: idx,
                end: idx + 1,
                keys: parse_header(header)?,
                version: None,
            });
        }
    }
    Ok(blocks)
}

/// Split `react@^18.1.0, react@^18.1.2` (keys optionally quoted, berry-style
/// `npm:` protocol stripped, aliased keys reduced to the alias name) into
/// (name, range) pairs. A key with no parseable name/range boundary marks
/// the whole block as non-dependency metadata.
fn parse_header(header: &str) -> Result<Vec<(String, String)>> {
    let mut keys = Vec::new();
    for raw in header.split(", ") {
        let key = raw.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() {
            bail!("malformed lockfile: empty block key in `{header}`");
        }
        let Some((name, range)) = split_spec_key(key) else {
            return Ok(Vec::new());
        };
        let range = range.strip_prefix("npm:").unwrap_or(range);
        // `foo@npm:bar@^1.0.0` installs `bar` under the name `foo`; the
        // alias is the logical dependency name.
        let name = match name.find("@npm:") {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        };
        keys.push((name.to_string(), range.to_string()));
    }
    Ok(keys)
}

/// Last `@` splits name from range; an `@` at position zero is a scope
/// prefix, not a boundary.
fn split_spec_key(key: &str) -> Option<(&str, &str)> {
    let idx = key.rfind('@')?;
    if idx == 0 {
        return None;
    }
    Some((&key[..idx], &key[idx + 1..]))
}

/// Extract the resolved version from a body line, accepting both
/// `version "18.2.0"` and `version: 18.2.0` field styles.
fn parse_version_field(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix("version")?;
    if !matches!(rest.chars().next(), Some(':' | ' ' | '\t')) {
        return None;
    }
    let rest = rest.strip_prefix(':').unwrap_or(rest).trim();
    let value = rest.trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
