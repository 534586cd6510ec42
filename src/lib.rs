pub mod app;
pub mod cli;
mod npm_semver;
pub mod optimise;
pub mod plan;
pub mod pnpm;
pub mod version_map;
pub mod yarn;

pub use plan::{PlannedRemoval, RemovalPlan};
pub use version_map::{DependencyVersions, ParsedLockfile, VersionMap};
