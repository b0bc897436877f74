use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use clap::ArgMatches;

use solo_definitions::source::{ConfigSource, EnvSource, LayeredConfig, MapSource, YamlFileSource};
use solo_definitions::local;
use super::Result;

/// Environment variables below this prefix act as a low-precedence source.
pub const ENV_PREFIX: &str = "SOLO_";

/// Source ordinals, low to high.
const ORDINAL_DEFAULTS: i32 = 0;
const ORDINAL_ENV: i32 = 10;
const ORDINAL_CONFIG_FILE: i32 = 20;
const ORDINAL_ARGV: i32 = 100;

/// Flags shared across the command surface.
pub mod flags {
    pub const DEPLOYMENT: &str = "deployment";
    pub const NAMESPACE: &str = "namespace";
    pub const CLUSTER_REF: &str = "cluster-ref";
    pub const CONTEXT: &str = "context";
    pub const NODE_ALIASES: &str = "node-aliases-unparsed";
    pub const RELEASE_TAG: &str = "release-tag";
    pub const CACHE_DIR: &str = "cache-dir";
    pub const CHART_DIRECTORY: &str = "chart-directory";
    pub const USER_EMAIL: &str = "user-email";
    pub const ACCOUNT_ID: &str = "account-id";
    pub const INITIAL_BALANCE: &str = "initial-balance";
    pub const MEMO: &str = "memo";
    pub const FORCE: &str = "force";
    pub const QUIET: &str = "quiet";
    pub const DEV: &str = "dev";

    /// Every flag the config manager tracks.
    pub fn declared() -> &'static [&'static str] {
        &[
            DEPLOYMENT,
            NAMESPACE,
            CLUSTER_REF,
            CONTEXT,
            NODE_ALIASES,
            RELEASE_TAG,
            CACHE_DIR,
            CHART_DIRECTORY,
            USER_EMAIL,
            ACCOUNT_ID,
            INITIAL_BALANCE,
            MEMO,
            FORCE,
            QUIET,
            DEV,
        ]
    }
}

/// Layered configuration manager with an explicit flag read-set.
///
/// Sources, lowest precedence first: built-in defaults, `SOLO_*`
/// environment variables, the optional `config.yaml` in the solo home, and
/// the merged argv flags. Every `get` records the flag so commands can
/// report the flags they were given but never read.
pub struct Settings {
    layered: Mutex<LayeredConfig>,
    accessed: Mutex<BTreeSet<String>>,
}

impl Settings {
    pub fn new() -> Result<Settings> {
        let mut defaults = BTreeMap::new();
        defaults.insert(
            flags::CACHE_DIR.to_string(),
            local::cache_dir().display().to_string(),
        );

        let sources: Vec<Box<dyn ConfigSource>> = vec![
            Box::new(MapSource::with_entries("defaults", ORDINAL_DEFAULTS, defaults)),
            Box::new(EnvSource::new(ORDINAL_ENV, Some(ENV_PREFIX))),
            Box::new(YamlFileSource::new(
                "config-file",
                ORDINAL_CONFIG_FILE,
                local::home_dir().join("config.yaml"),
            )),
            Box::new(MapSource::new("argv", ORDINAL_ARGV)),
        ];
        Ok(Settings {
            layered: Mutex::new(LayeredConfig::new(sources)?),
            accessed: Mutex::new(BTreeSet::new()),
        })
    }

    /// Overlay parsed argv onto the layered view.
    ///
    /// Valued flags carry their value; bare switches become `"true"`.
    pub fn merge_argv(&self, matches: &ArgMatches) -> Result<()> {
        let mut layered = self.layered.lock().unwrap();
        for flag in flags::declared() {
            if matches.is_present(flag) {
                match matches.value_of(flag) {
                    Some(v) => layered.set(flag, v)?,
                    None => layered.set(flag, "true")?,
                }
            }
        }
        Ok(())
    }

    /// Programmatic override, used by resolvers after prompting.
    pub fn set(&self, flag: &str, value: &str) -> Result<()> {
        self.layered.lock().unwrap().set(flag, value)
    }

    /// Read a flag, recording the access.
    pub fn get(&self, flag: &str) -> Option<String> {
        self.accessed.lock().unwrap().insert(flag.to_string());
        self.layered.lock().unwrap().value(flag)
    }

    /// Read a mandatory flag.
    pub fn require(&self, flag: &str) -> Result<String> {
        self.get(flag)
            .ok_or_else(|| format_err!("{} is required", flag))
    }

    pub fn get_bool(&self, flag: &str) -> bool {
        self.get(flag).map(|v| v == "true").unwrap_or(false)
    }

    pub fn is_quiet(&self) -> bool {
        self.get_bool(flags::QUIET)
    }

    pub fn is_force(&self) -> bool {
        self.get_bool(flags::FORCE)
    }

    pub fn is_dev(&self) -> bool {
        self.get_bool(flags::DEV)
    }

    /// Declared flags that no code path has read so far.
    pub fn unused_flags(&self) -> Vec<String> {
        let accessed = self.accessed.lock().unwrap();
        flags::declared()
            .iter()
            .filter(|f| !accessed.contains(**f))
            .map(|f| f.to_string())
            .collect()
    }

    /// Reload refreshable sources (environment, config file).
    pub fn refresh(&self) -> Result<()> {
        self.layered.lock().unwrap().refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> Settings {
        // no argv merged; defaults + env + optional file
        Settings::new().unwrap()
    }

    #[test]
    fn records_the_read_set() {
        let settings = bare();
        assert!(settings.unused_flags().contains(&flags::DEPLOYMENT.to_string()));
        let _ = settings.get(flags::DEPLOYMENT);
        assert!(!settings.unused_flags().contains(&flags::DEPLOYMENT.to_string()));
    }

    #[test]
    fn set_then_get_wins_over_defaults() {
        let settings = bare();
        settings.set(flags::CACHE_DIR, "/tmp/other-cache").unwrap();
        assert_eq!(
            settings.get(flags::CACHE_DIR).unwrap(),
            "/tmp/other-cache"
        );
    }

    #[test]
    fn bool_flags_default_off() {
        let settings = bare();
        assert!(!settings.is_quiet());
        assert!(!settings.is_force());
        settings.set(flags::QUIET, "true").unwrap();
        assert!(settings.is_quiet());
    }

    #[test]
    fn require_names_the_flag() {
        let settings = bare();
        let err = settings.require(flags::DEPLOYMENT).unwrap_err();
        assert!(err.to_string().contains("deployment is required"));
    }

    #[test]
    fn env_source_feeds_flags() {
        std::env::set_var("SOLO_RELEASE-TAG", "v0.58.1");
        // env keys go through `_` → `.` conversion, so use a dot-free flag
        let settings = bare();
        settings.refresh().unwrap();
        assert_eq!(settings.get("release-tag"), Some("v0.58.1".to_string()));
        std::env::remove_var("SOLO_RELEASE-TAG");
    }
}
