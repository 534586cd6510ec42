use anyhow::{Context, Result, anyhow};
use semver::{Version, VersionReq};

/// Does the range `req` accept the resolved version `version`?
///
/// Unparseable input on either side never matches, except for the trivial
/// accept-anything ranges and an exact string match.
pub(crate) fn satisfies(req: &str, version: &str) -> bool {
    let req = req.trim();
    if req.is_empty() || req == "*" || req == "latest" {
        return true;
    }
    let Ok(version) = Version::parse(version.trim()) else {
        return false;
    };
    // A bare "1.2.3" is an exact pin in npm ranges, not a caret default.
    if let Ok(pin) = Version::parse(req) {
        return pin == version;
    }
    let Ok(reqs) = parse_req_any(req) else {
        return false;
    };
    reqs.iter().any(|r| r.matches(&version))
}

pub(crate) fn parse_req_any(req: &str) -> Result<Vec<VersionReq>> {
    let req = req.trim();
    if req.is_empty() {
        return Err(anyhow!("empty version range"));
    }

    let parts = req
        .split("||")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    let mut out = Vec::with_capacity(parts.len().max(1));
    for part in parts {
        out.push(parse_req_loose(part).with_context(|| format!("invalid range part `{part}`"))?);
    }

    if out.is_empty() {
        return Err(anyhow!("empty version range"));
    }
    Ok(out)
}

fn parse_req_loose(s: &str) -> Result<VersionReq> {
    let s = s.trim();

    // Bare partial versions are X-ranges in npm: "18" means 18.x and
    // "18.2" means 18.2.x, narrower than the caret default `semver` applies.
    if s.bytes().next().is_some_and(|b| b.is_ascii_digit()) && !s.contains(' ') {
        let mapped = match s.split('.').count() {
            1 => Some(format!("^{s}")),
            2 => Some(format!("~{s}")),
            _ => None,
        };
        if let Some(mapped) = mapped {
            if let Ok(r) = VersionReq::parse(&mapped) {
                return Ok(r);
            }
        }
    }

    // A bare full version is an exact pin even as one alternative of an
    // `||` range, not the caret default `semver` would give it.
    if let Ok(pin) = Version::parse(s) {
        if let Ok(r) = VersionReq::parse(&format!("={pin}")) {
            return Ok(r);
        }
    }

    if let Ok(r) = VersionReq::parse(s) {
        return Ok(r);
    }

    // npm hyphen ranges: "1 - 3" means ">=1.0.0 <4.0.0" (partial upper bound
    // is an X-range), "1.2.3 - 2.3.4" means ">=1.2.3 <=2.3.4".
    if let Some((low, high)) = s.split_once(" - ") {
        let (low, high) = (low.trim(), high.trim());
        let low_ver = if low.is_empty() {
            Version::new(0, 0, 0)
        } else {
            Version::parse(&pad_partial(low))
                .with_context(|| format!("invalid lower bound in hyphen range: `{low}`"))?
        };
        if high.is_empty() {
            return Err(anyhow!("missing upper bound in hyphen range"));
        }
        let high_ver = Version::parse(&pad_partial(high))
            .with_context(|| format!("invalid upper bound in hyphen range: `{high}`"))?;
        let upper = if is_partial(high) {
            Version::new(high_ver.major + 1, 0, 0)
        } else {
            Version::new(high_ver.major, high_ver.minor, high_ver.patch + 1)
        };
        let range = format!(">={low_ver}, <{upper}");
        return VersionReq::parse(&range)
            .with_context(|| format!("failed to parse hyphen range `{s}`"));
    }

    // npm often uses whitespace to separate AND constraints, while `semver`
    // prefers commas.
    let normalized = s
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if normalized != s {
        if let Ok(r) = VersionReq::parse(&normalized) {
            return Ok(r);
        }
    }

    Err(anyhow!("unsupported semver range `{s}`"))
}

fn pad_partial(s: &str) -> String {
    match s.split('.').count() {
        1 => format!("{s}.0.0"),
        2 => format!("{s}.0"),
        _ => s.to_string(),
    }
}

fn is_partial(s: &str) -> bool {
    s.split('.').count() < 3
}
