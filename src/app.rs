use crate::cli::{Cli, Command};
use crate::plan::RemovalPlan;
use crate::version_map::{ParsedLockfile, VersionMap};
use crate::{pnpm, yarn};
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcCommand, ExitCode};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockfileKind {
    Yarn,
    Pnpm,
}

impl LockfileKind {
    pub fn from_path(path: &Path) -> Self {
        if path.file_name().is_some_and(|n| n == "pnpm-lock.yaml") {
            LockfileKind::Pnpm
        } else {
            LockfileKind::Yarn
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            LockfileKind::Yarn => "yarn.lock",
            LockfileKind::Pnpm => "pnpm-lock.yaml",
        }
    }

    fn package_manager(self) -> &'static str {
        match self {
            LockfileKind::Yarn => "yarn",
            LockfileKind::Pnpm => "pnpm",
        }
    }

    pub fn parse(self, content: &str, optimise: bool) -> Result<ParsedLockfile> {
        match self {
            LockfileKind::Yarn => yarn::parse_lock(content, optimise),
            LockfileKind::Pnpm => pnpm::parse_lock(content, optimise),
        }
    }

    pub fn apply_removals(self, content: &str, plan: &RemovalPlan) -> Result<String> {
        match self {
            LockfileKind::Yarn => yarn::apply_removals(content, plan),
            LockfileKind::Pnpm => pnpm::apply_removals(content, plan),
        }
    }
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Some(Command::Check { path }) => cmd_check(path),
        Some(Command::Optimise { path, no_install }) => cmd_optimise(path, no_install),
        None => cmd_check(cli.path),
    }
}

fn locate_lockfile(path: Option<PathBuf>) -> Result<(PathBuf, LockfileKind)> {
    if let Some(path) = path {
        let kind = LockfileKind::from_path(&path);
        return Ok((path, kind));
    }
    for kind in [LockfileKind::Pnpm, LockfileKind::Yarn] {
        let candidate = PathBuf::from(kind.file_name());
        if candidate.exists() {
            return Ok((candidate, kind));
        }
    }
    bail!("no lockfile found: looked for pnpm-lock.yaml and yarn.lock")
}

fn cmd_check(path: Option<PathBuf>) -> Result<ExitCode> {
    let (path, kind) = locate_lockfile(path)?;
    let content =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let parsed = kind.parse(&content, true)?;

    let mut total = 0usize;
    let mut optimised = 0usize;
    for dep in parsed.dependencies.values() {
        total += dep.versions.len();
        optimised += dep.optimised.as_ref().map_or(0, VersionMap::len);
    }

    if total == optimised {
        println!("No optimization possible");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "Can be optimized from {total} to {optimised} dependencies ({})",
        kind.file_name()
    );
    for (name, dep) in &parsed.dependencies {
        let Some(opt) = &dep.optimised else {
            continue;
        };
        if opt.len() == dep.versions.len() {
            continue;
        }
        let colored: Vec<String> = dep
            .versions
            .versions()
            .map(|v| {
                if opt.contains(v) {
                    format!("{GREEN}{v}{RESET}")
                } else {
                    format!("{RED}{v}{RESET}")
                }
            })
            .collect();
        println!("{name}: {}", colored.join(", "));
    }
    Ok(ExitCode::FAILURE)
}

fn cmd_optimise(path: Option<PathBuf>, no_install: bool) -> Result<ExitCode> {
    let (path, kind) = locate_lockfile(path)?;
    let content =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let parsed = kind.parse(&content, true)?;

    let plan = RemovalPlan::from_parsed(&parsed);
    if plan.is_empty() {
        println!("No optimization possible");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Removing {} dependencies", plan.removed_count());

    let rewritten = kind.apply_removals(&content, &plan)?;
    fs::write(&path, rewritten).with_context(|| format!("write {}", path.display()))?;

    if no_install {
        return Ok(ExitCode::SUCCESS);
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let pm = kind.package_manager();
    let status = ProcCommand::new(pm)
        .arg("install")
        .current_dir(dir)
        .status()
        .with_context(|| format!("run `{pm} install`"))?;
    if !status.success() {
        bail!("`{pm} install` exited with {status}");
    }
    Ok(ExitCode::SUCCESS)
}
