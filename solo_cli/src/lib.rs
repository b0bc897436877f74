#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]
#![allow(non_snake_case)]

#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
extern crate serde;
#[macro_use]
extern crate serde_json;

// kubernetes api client
extern crate kube as kube_client;
extern crate k8s_openapi;
extern crate tokio;
extern crate either;

extern crate chrono;

#[macro_use]
extern crate log;

// sanity
extern crate dirs;
extern crate regex;
extern crate semver;
extern crate base64;
extern crate uuid;
extern crate libc;

// parallel task groups:
extern crate threadpool;

#[macro_use] extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

extern crate solo_definitions;
pub use solo_definitions::{Forest, LayeredConfig, LocalConfig, RemoteConfig};
pub use solo_definitions::components::{self, DeploymentPhase, LedgerPhase};
pub use solo_definitions::local;
pub use solo_definitions::remote;

/// A typed kubernetes interface, one facade per context
pub mod kube;

/// Deployment lease manager and background renewal service
pub mod lease;

/// Task graph executor for multi-step commands
pub mod task;

/// A small CLI helm interface
pub mod helm;

/// Cluster config-map storage backend
pub mod backend;

/// Flag registry and layered config manager
pub mod settings;

/// Flag resolvers and interactive prompts
pub mod resolvers;

/// Ledger SDK boundary
pub mod ledger;

/// Process-wide wiring of managers and facades
pub mod app;

/// `solo init`
pub mod init;

/// Cluster level commands
pub mod cluster;

/// Deployment bookkeeping commands
pub mod deployment;

/// Network chart deploy/destroy
pub mod network;

/// Consensus node lifecycle commands
pub mod node;

/// Ledger account commands
pub mod account;

/// Mirror node, explorer and relay sidecar commands
pub mod addons;

/// Kube context commands
pub mod context;

/// Smart initialiser with safety
///
/// Ensures the solo home directory layout exists before any command runs.
pub fn init() -> Result<()> {
    use std::fs;
    let home = local::home_dir();
    for dir in &[
        home.clone(),
        local::cache_dir().join("templates"),
        local::cache_dir().join("profiles"),
        local::logs_dir(),
        home.join("staging"),
    ] {
        if !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}
