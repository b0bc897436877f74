use std::fmt;

use super::Result;

// All main errors that can happen from state mutation
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum StateError {
    #[fail(display = "component '{}' cannot move from '{}' to '{}'", _0, _1, _2)]
    IllegalTransition(String, String, String),

    #[fail(display = "component '{}' already exists", _0)]
    DuplicateComponent(String),

    #[fail(display = "component '{}' does not exist", _0)]
    UnknownComponent(String),

    #[fail(display = "component '{}' references unknown cluster '{}'", _0, _1)]
    UnknownCluster(String, String),
}

/// RFC 1123 DNS label: lowercase alphanumerics and dashes, alphanumeric at
/// both ends, at most 63 characters.
pub fn is_dns1123_label(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| (b'a'..=b'z').contains(&b) || (b'0'..=b'9').contains(&b);
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

/// Persisted lifecycle stage of a deployed component.
///
/// Distinct from the kubernetes pod phase; this is what solo believes it has
/// done to the component so far.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPhase {
    Requested,
    Deployed,
    Configured,
    Started,
    Stopped,
    Frozen,
}

impl Default for DeploymentPhase {
    fn default() -> DeploymentPhase {
        DeploymentPhase::Requested
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DeploymentPhase::Requested => "requested",
            DeploymentPhase::Deployed => "deployed",
            DeploymentPhase::Configured => "configured",
            DeploymentPhase::Started => "started",
            DeploymentPhase::Stopped => "stopped",
            DeploymentPhase::Frozen => "frozen",
        };
        f.write_str(s)
    }
}

impl DeploymentPhase {
    /// Whether a component may move to `next`.
    ///
    /// Only consensus nodes advance past `Deployed`; sidecars terminate
    /// there.
    pub fn can_transition(self, next: DeploymentPhase, consensus: bool) -> bool {
        use self::DeploymentPhase::*;
        match (self, next) {
            (Requested, Deployed) => true,
            (Deployed, Configured)
            | (Configured, Started)
            | (Started, Stopped)
            | (Stopped, Started)
            | (Started, Frozen) => consensus,
            _ => false,
        }
    }
}

/// Deployment-wide ledger lifecycle stage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerPhase {
    Uninitialized,
    Initialized,
    SnapshotRestoring,
    SnapshotRestored,
    Recovering,
    Recovered,
    Freezing,
    Frozen,
}

impl Default for LedgerPhase {
    fn default() -> LedgerPhase {
        LedgerPhase::Uninitialized
    }
}

impl fmt::Display for LedgerPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LedgerPhase::Uninitialized => "uninitialized",
            LedgerPhase::Initialized => "initialized",
            LedgerPhase::SnapshotRestoring => "snapshot-restoring",
            LedgerPhase::SnapshotRestored => "snapshot-restored",
            LedgerPhase::Recovering => "recovering",
            LedgerPhase::Recovered => "recovered",
            LedgerPhase::Freezing => "freezing",
            LedgerPhase::Frozen => "frozen",
        };
        f.write_str(s)
    }
}

impl LedgerPhase {
    pub fn can_transition(self, next: LedgerPhase) -> bool {
        use self::LedgerPhase::*;
        match (self, next) {
            (Uninitialized, Initialized) => true,
            (Initialized, SnapshotRestoring) | (Initialized, Recovering) => true,
            (SnapshotRestoring, SnapshotRestored) | (Recovering, Recovered) => true,
            (Initialized, Freezing)
            | (SnapshotRestored, Freezing)
            | (Recovered, Freezing) => true,
            (Freezing, Frozen) => true,
            _ => false,
        }
    }
}

/// A deployed sidecar component (proxy, mirror node, explorer, relay, block
/// node).
///
/// ```yaml
/// name: mirror-node-1
/// namespace: solo-e2e
/// cluster: cluster-1
/// phase: deployed
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Component {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    #[serde(default)]
    pub phase: DeploymentPhase,
}

impl Component {
    pub fn new(base: &str, index: u64, cluster: &str, namespace: &str) -> Component {
        Component {
            name: render_component_name(base, index),
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            phase: DeploymentPhase::Requested,
        }
    }

    /// The numeric index baked into the component name.
    pub fn index(&self) -> Result<u64> {
        parse_component_index(&self.name)
    }

    pub fn verify(&self) -> Result<()> {
        if !is_dns1123_label(&self.name) {
            bail!("component name '{}' is not a DNS-1123 label", self.name);
        }
        if !is_dns1123_label(&self.namespace) {
            bail!("component '{}' has invalid namespace '{}'", self.name, self.namespace);
        }
        if self.cluster.is_empty() {
            bail!("component '{}' has an empty cluster reference", self.name);
        }
        parse_component_index(&self.name)?;
        Ok(())
    }
}

/// A consensus node component; carries its ledger node id.
///
/// ```yaml
/// id: 1
/// name: node1
/// namespace: solo-e2e
/// cluster: cluster-1
/// phase: started
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConsensusNode {
    pub id: u64,
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    #[serde(default)]
    pub phase: DeploymentPhase,
}

impl ConsensusNode {
    pub fn new(id: u64, cluster: &str, namespace: &str) -> ConsensusNode {
        ConsensusNode {
            id,
            name: node_alias(id),
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            phase: DeploymentPhase::Requested,
        }
    }

    pub fn verify(&self) -> Result<()> {
        if !is_dns1123_label(&self.name) {
            bail!("node name '{}' is not a DNS-1123 label", self.name);
        }
        let parsed = parse_component_index(&self.name)?;
        if parsed != self.id {
            bail!("node '{}' id {} does not match its name", self.name, self.id);
        }
        if self.cluster.is_empty() {
            bail!("node '{}' has an empty cluster reference", self.name);
        }
        Ok(())
    }
}

/// Render the deterministic name for the i-th component of a base kind.
pub fn render_component_name(base: &str, index: u64) -> String {
    format!("{}-{}", base, index)
}

/// Short alias for a consensus node (`node1`, `node2`, …).
pub fn node_alias(id: u64) -> String {
    format!("node{}", id)
}

/// Parse the trailing digits of a component name or node alias.
pub fn parse_component_index(name: &str) -> Result<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        bail!("component name '{}' carries no index", name);
    }
    Ok(digits.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_roundtrip() {
        for i in &[0u64, 1, 7, 10, 42, 120] {
            assert_eq!(
                parse_component_index(&render_component_name("haproxy", *i)).unwrap(),
                *i
            );
            assert_eq!(parse_component_index(&node_alias(*i)).unwrap(), *i);
        }
        assert!(parse_component_index("envoy").is_err());
    }

    #[test]
    fn dns_labels() {
        assert!(is_dns1123_label("node1"));
        assert!(is_dns1123_label("mirror-node-1"));
        assert!(!is_dns1123_label(""));
        assert!(!is_dns1123_label("A"));
        assert!(!is_dns1123_label("-x"));
        assert!(!is_dns1123_label("x-"));
        assert!(!is_dns1123_label(&"x".repeat(64)));
        assert!(is_dns1123_label(&"x".repeat(63)));
    }

    #[test]
    fn consensus_phase_walk() {
        use super::DeploymentPhase::*;
        assert!(Requested.can_transition(Deployed, true));
        assert!(Deployed.can_transition(Configured, true));
        assert!(Configured.can_transition(Started, true));
        assert!(Started.can_transition(Stopped, true));
        assert!(Stopped.can_transition(Started, true));
        assert!(Started.can_transition(Frozen, true));
        assert!(!Frozen.can_transition(Started, true));
        assert!(!Requested.can_transition(Started, true));
    }

    #[test]
    fn sidecars_terminate_at_deployed() {
        use super::DeploymentPhase::*;
        assert!(Requested.can_transition(Deployed, false));
        assert!(!Deployed.can_transition(Configured, false));
        assert!(!Deployed.can_transition(Started, false));
    }

    #[test]
    fn ledger_phase_branches() {
        use super::LedgerPhase::*;
        assert!(Uninitialized.can_transition(Initialized));
        assert!(Initialized.can_transition(SnapshotRestoring));
        assert!(SnapshotRestoring.can_transition(SnapshotRestored));
        assert!(SnapshotRestored.can_transition(Freezing));
        assert!(Initialized.can_transition(Recovering));
        assert!(Recovering.can_transition(Recovered));
        assert!(Freezing.can_transition(Frozen));
        assert!(!SnapshotRestoring.can_transition(Recovering));
        assert!(!Frozen.can_transition(Freezing));
    }

    #[test]
    fn phases_serialize_kebab() {
        let rendered = serde_yaml::to_string(&DeploymentPhase::Started).unwrap();
        assert!(rendered.contains("started"));
        let parsed: LedgerPhase = serde_yaml::from_str("snapshot-restoring").unwrap();
        assert_eq!(parsed, LedgerPhase::SnapshotRestoring);
    }
}
