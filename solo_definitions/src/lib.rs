#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
extern crate serde_json;
extern crate serde;

extern crate walkdir;
extern crate dirs;

#[macro_use]
extern crate log;

extern crate regex;

extern crate semver;
extern crate base64;
extern crate chrono;

#[macro_use] extern crate failure;

#[macro_use]
extern crate static_assertions;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Dotted configuration key handling
pub mod keys;

/// The ordered tree model behind flat configuration keys
pub mod forest;
pub use forest::{Forest, Node};

/// Capability-declared storage backends
pub mod backend;
pub use backend::{StorageBackend, StorageCapability, YamlStore};

/// Schema registry and migration pipeline
pub mod schema;
pub use schema::{Schema, SchemaMigration};

/// Layered configuration sources
pub mod source;
pub use source::{ConfigSource, LayeredConfig, MapSource};

/// Component types and lifecycle phases
pub mod components;
pub use components::{Component, ConsensusNode, DeploymentPhase, LedgerPhase};

/// Local per-user state
pub mod local;
pub use local::LocalConfig;

/// Remote per-deployment state
pub mod remote;
pub use remote::RemoteConfig;

/// Genesis network roster and node overrides
pub mod genesis;

/// Computational helpers
pub mod math;

/// Duration string handling
pub mod duration;

/// Version and version-range primitives
pub mod version;
pub use version::VersionRange;

/// Path confinement and regex helpers
pub mod safety;
