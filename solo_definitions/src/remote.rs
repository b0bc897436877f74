use chrono::{DateTime, Utc};
use semver::Version;
use serde_yaml::{Mapping, Value};

use crate::components::{
    Component, ConsensusNode, DeploymentPhase, LedgerPhase, StateError,
};
use crate::schema::{Schema, SchemaMigration};
use crate::version::VersionRange;
use super::Result;

/// Current schema version of the remote document.
pub const REMOTE_SCHEMA_VERSION: u32 = 1;

const_assert!(REMOTE_SCHEMA_IS_VERSIONED; REMOTE_SCHEMA_VERSION >= 1);

/// Who performed the last mutation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UserIdentity {
    pub name: String,
    pub hostname: String,
}

/// Mutation audit metadata.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteMetadata {
    pub lastUpdatedAt: DateTime<Utc>,
    pub lastUpdatedBy: UserIdentity,
}

/// Application versions deployed for this deployment.
///
/// ```yaml
/// cli: 0.9.0
/// chart: 0.42.0
/// consensusNode: 0.58.1
/// mirrorNodeChart: 0.118.0
/// explorerChart: 0.2.1
/// jsonRpcRelayChart: 0.63.2
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ApplicationVersions {
    pub cli: Version,
    pub chart: Version,
    pub consensusNode: Version,
    pub mirrorNodeChart: Version,
    pub explorerChart: Version,
    pub jsonRpcRelayChart: Version,
}

impl ApplicationVersions {
    pub fn zero() -> ApplicationVersions {
        ApplicationVersions {
            cli: Version::new(0, 0, 0),
            chart: Version::new(0, 0, 0),
            consensusNode: Version::new(0, 0, 0),
            mirrorNodeChart: Version::new(0, 0, 0),
            explorerChart: Version::new(0, 0, 0),
            jsonRpcRelayChart: Version::new(0, 0, 0),
        }
    }
}

/// A cluster participating in the deployment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusterSpec {
    pub name: String,
    pub dnsBaseDomain: String,
    pub dnsConsensusNodePattern: String,
}

/// Component lists per kind plus the deployment-wide ledger phase.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentState {
    #[serde(default)]
    pub ledgerPhase: LedgerPhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consensusNodes: Vec<ConsensusNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockNodes: Vec<Component>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrorNodes: Vec<Component>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relayNodes: Vec<Component>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub haProxies: Vec<Component>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envoyProxies: Vec<Component>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explorers: Vec<Component>,
}

/// Append-only record of commands executed against the deployment.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct History {
    #[serde(default)]
    pub commands: Vec<String>,

    #[serde(default)]
    pub lastExecutedCommand: String,
}

/// Sidecar component kinds tracked in the remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    BlockNode,
    MirrorNode,
    RelayNode,
    HaProxy,
    EnvoyProxy,
    Explorer,
}

impl ComponentKind {
    /// Base prefix for deterministic component names.
    pub fn base_name(self) -> &'static str {
        match self {
            ComponentKind::BlockNode => "block-node",
            ComponentKind::MirrorNode => "mirror-node",
            ComponentKind::RelayNode => "relay",
            ComponentKind::HaProxy => "haproxy",
            ComponentKind::EnvoyProxy => "envoy-proxy",
            ComponentKind::Explorer => "explorer",
        }
    }
}

/// The authoritative per-deployment document stored in the cluster.
///
/// Any process mutating it must hold the deployment lease; the schema layer
/// migrates older documents forward on load and never hands out a document
/// whose version lags the current schema.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub schemaVersion: u32,
    pub metadata: RemoteMetadata,
    pub versions: ApplicationVersions,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    #[serde(default)]
    pub state: DeploymentState,
    #[serde(default)]
    pub history: History,
}

/// v0 documents carried flag-shaped version metadata under `flags:` and no
/// schema version; flatten that into the `versions:` block.
struct FlagsToVersions;

impl SchemaMigration for FlagsToVersions {
    fn range(&self) -> VersionRange {
        VersionRange::exact(0)
    }

    fn version(&self) -> u32 {
        1
    }

    fn migrate(&self, doc: &mut Mapping) -> Result<()> {
        let flag_key = Value::String("flags".to_string());
        let flags = match doc.remove(&flag_key) {
            Some(Value::Mapping(m)) => m,
            _ => Mapping::new(),
        };
        let take = |flags: &Mapping, name: &str| -> Value {
            flags
                .get(&Value::String(name.to_string()))
                .cloned()
                .unwrap_or_else(|| Value::String("0.0.0".to_string()))
        };
        let mut versions = Mapping::new();
        versions.insert(Value::String("cli".into()), take(&flags, "cliVersion"));
        versions.insert(Value::String("chart".into()), take(&flags, "chartVersion"));
        versions.insert(
            Value::String("consensusNode".into()),
            take(&flags, "consensusNodeVersion"),
        );
        versions.insert(
            Value::String("mirrorNodeChart".into()),
            take(&flags, "mirrorNodeChartVersion"),
        );
        versions.insert(
            Value::String("explorerChart".into()),
            take(&flags, "explorerChartVersion"),
        );
        versions.insert(
            Value::String("jsonRpcRelayChart".into()),
            take(&flags, "jsonRpcRelayChartVersion"),
        );
        doc.insert(Value::String("versions".into()), Value::Mapping(versions));

        let history_key = Value::String("history".to_string());
        if doc.get(&history_key).is_none() {
            doc.insert(history_key, serde_yaml::to_value(History::default())?);
        }
        Ok(())
    }
}

impl RemoteConfig {
    /// The schema of the remote document, with its migration chain.
    pub fn schema() -> Schema<RemoteConfig> {
        Schema::new(
            "remote-config",
            REMOTE_SCHEMA_VERSION,
            vec![Box::new(FlagsToVersions)],
        )
    }

    /// Fresh document for a newly created deployment.
    pub fn new(
        by: UserIdentity,
        versions: ApplicationVersions,
        clusters: Vec<ClusterSpec>,
    ) -> RemoteConfig {
        RemoteConfig {
            schemaVersion: REMOTE_SCHEMA_VERSION,
            metadata: RemoteMetadata {
                lastUpdatedAt: Utc::now(),
                lastUpdatedBy: by,
            },
            versions,
            clusters,
            state: DeploymentState::default(),
            history: History::default(),
        }
    }

    /// Load from a plain document: validate the migration chain, migrate
    /// forward, verify invariants.
    pub fn from_document(value: &Value) -> Result<RemoteConfig> {
        let schema = RemoteConfig::schema();
        schema.validate_migrations()?;
        let config = schema.transform(value)?;
        config.verify()?;
        Ok(config)
    }

    /// Serialize for persistence, stamping the current schema version and
    /// the mutation metadata.
    pub fn to_document(&mut self, by: UserIdentity) -> Result<Value> {
        self.verify()?;
        self.metadata = RemoteMetadata {
            lastUpdatedAt: Utc::now(),
            lastUpdatedBy: by,
        };
        RemoteConfig::schema().encode(self)
    }

    fn cluster_known(&self, cluster: &str) -> bool {
        self.clusters.iter().any(|c| c.name == cluster)
    }

    /// Next free consensus node id.
    pub fn next_node_id(&self) -> u64 {
        self.state
            .consensusNodes
            .iter()
            .map(|n| n.id)
            .max()
            .map(|id| id + 1)
            .unwrap_or(1)
    }

    pub fn consensus_node(&self, id: u64) -> Result<&ConsensusNode> {
        self.state
            .consensusNodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| StateError::UnknownComponent(format!("node{}", id)).into())
    }

    pub fn add_consensus_node(&mut self, node: ConsensusNode) -> Result<()> {
        node.verify()?;
        if !self.cluster_known(&node.cluster) {
            return Err(StateError::UnknownCluster(node.name, node.cluster).into());
        }
        if self
            .state
            .consensusNodes
            .iter()
            .any(|n| n.name == node.name || n.id == node.id)
        {
            return Err(StateError::DuplicateComponent(node.name).into());
        }
        self.state.consensusNodes.push(node);
        Ok(())
    }

    pub fn remove_consensus_node(&mut self, id: u64) -> Result<ConsensusNode> {
        let idx = self
            .state
            .consensusNodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| StateError::UnknownComponent(format!("node{}", id)))?;
        Ok(self.state.consensusNodes.remove(idx))
    }

    fn components_mut(&mut self, kind: ComponentKind) -> &mut Vec<Component> {
        match kind {
            ComponentKind::BlockNode => &mut self.state.blockNodes,
            ComponentKind::MirrorNode => &mut self.state.mirrorNodes,
            ComponentKind::RelayNode => &mut self.state.relayNodes,
            ComponentKind::HaProxy => &mut self.state.haProxies,
            ComponentKind::EnvoyProxy => &mut self.state.envoyProxies,
            ComponentKind::Explorer => &mut self.state.explorers,
        }
    }

    pub fn components(&self, kind: ComponentKind) -> &[Component] {
        match kind {
            ComponentKind::BlockNode => &self.state.blockNodes,
            ComponentKind::MirrorNode => &self.state.mirrorNodes,
            ComponentKind::RelayNode => &self.state.relayNodes,
            ComponentKind::HaProxy => &self.state.haProxies,
            ComponentKind::EnvoyProxy => &self.state.envoyProxies,
            ComponentKind::Explorer => &self.state.explorers,
        }
    }

    pub fn add_component(&mut self, kind: ComponentKind, component: Component) -> Result<()> {
        component.verify()?;
        if !self.cluster_known(&component.cluster) {
            return Err(
                StateError::UnknownCluster(component.name, component.cluster).into(),
            );
        }
        let list = self.components_mut(kind);
        if list.iter().any(|c| c.name == component.name) {
            return Err(StateError::DuplicateComponent(component.name).into());
        }
        list.push(component);
        Ok(())
    }

    pub fn remove_component(&mut self, kind: ComponentKind, name: &str) -> Result<Component> {
        let list = self.components_mut(kind);
        let idx = list
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StateError::UnknownComponent(name.to_string()))?;
        Ok(list.remove(idx))
    }

    /// Move a consensus node along its lifecycle; illegal transitions fail
    /// without mutating.
    pub fn change_node_phase(&mut self, id: u64, next: DeploymentPhase) -> Result<()> {
        let node = self
            .state
            .consensusNodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StateError::UnknownComponent(format!("node{}", id)))?;
        if !node.phase.can_transition(next, true) {
            return Err(StateError::IllegalTransition(
                node.name.clone(),
                node.phase.to_string(),
                next.to_string(),
            )
            .into());
        }
        node.phase = next;
        Ok(())
    }

    pub fn change_component_phase(
        &mut self,
        kind: ComponentKind,
        name: &str,
        next: DeploymentPhase,
    ) -> Result<()> {
        let component = self
            .components_mut(kind)
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| StateError::UnknownComponent(name.to_string()))?;
        if !component.phase.can_transition(next, false) {
            return Err(StateError::IllegalTransition(
                component.name.clone(),
                component.phase.to_string(),
                next.to_string(),
            )
            .into());
        }
        component.phase = next;
        Ok(())
    }

    pub fn change_ledger_phase(&mut self, next: LedgerPhase) -> Result<()> {
        if !self.state.ledgerPhase.can_transition(next) {
            return Err(StateError::IllegalTransition(
                "ledger".to_string(),
                self.state.ledgerPhase.to_string(),
                next.to_string(),
            )
            .into());
        }
        self.state.ledgerPhase = next;
        Ok(())
    }

    /// Append a command line to the history. Append-only.
    pub fn record_command(&mut self, line: &str) {
        self.history.commands.push(line.to_string());
        self.history.lastExecutedCommand = line.to_string();
    }

    pub fn verify(&self) -> Result<()> {
        let mut cluster_names: Vec<&str> = self.clusters.iter().map(|c| c.name.as_str()).collect();
        cluster_names.sort_unstable();
        cluster_names.dedup();
        if cluster_names.len() != self.clusters.len() {
            bail!("duplicate cluster names in remote state");
        }

        let mut names: Vec<&str> = Vec::new();
        let mut ids: Vec<u64> = Vec::new();
        for node in &self.state.consensusNodes {
            node.verify()?;
            if !self.cluster_known(&node.cluster) {
                return Err(
                    StateError::UnknownCluster(node.name.clone(), node.cluster.clone()).into(),
                );
            }
            names.push(&node.name);
            ids.push(node.id);
        }
        names.sort_unstable();
        names.dedup();
        if names.len() != self.state.consensusNodes.len() {
            bail!("duplicate consensus node names");
        }
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.state.consensusNodes.len() {
            bail!("duplicate consensus node ids");
        }

        for kind in &[
            ComponentKind::BlockNode,
            ComponentKind::MirrorNode,
            ComponentKind::RelayNode,
            ComponentKind::HaProxy,
            ComponentKind::EnvoyProxy,
            ComponentKind::Explorer,
        ] {
            let list = self.components(*kind);
            let mut seen: Vec<&str> = Vec::new();
            for c in list {
                c.verify()?;
                if !self.cluster_known(&c.cluster) {
                    return Err(
                        StateError::UnknownCluster(c.name.clone(), c.cluster.clone()).into(),
                    );
                }
                seen.push(&c.name);
            }
            seen.sort_unstable();
            seen.dedup();
            if seen.len() != list.len() {
                bail!("duplicate {} names", kind.base_name());
            }
        }

        match self.history.commands.last() {
            Some(last) if *last != self.history.lastExecutedCommand => {
                bail!("history lastExecutedCommand does not match the last entry");
            }
            None if !self.history.lastExecutedCommand.is_empty() => {
                bail!("lastExecutedCommand set on empty history");
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UserIdentity {
        UserIdentity {
            name: "dev@example.com".to_string(),
            hostname: "workstation".to_string(),
        }
    }

    fn cluster(name: &str) -> ClusterSpec {
        ClusterSpec {
            name: name.to_string(),
            dnsBaseDomain: "cluster.local".to_string(),
            dnsConsensusNodePattern: "network-{nodeAlias}-svc.{namespace}.svc".to_string(),
        }
    }

    fn sample() -> RemoteConfig {
        let mut config = RemoteConfig::new(
            identity(),
            ApplicationVersions::zero(),
            vec![cluster("cluster-1")],
        );
        config
            .add_consensus_node(ConsensusNode::new(1, "cluster-1", "solo-e2e"))
            .unwrap();
        config
    }

    #[test]
    fn save_then_load_roundtrips() {
        let mut config = sample();
        config.record_command("deployment create");
        let doc = config.to_document(identity()).unwrap();
        let loaded = RemoteConfig::from_document(&doc).unwrap();
        assert_eq!(loaded.schemaVersion, REMOTE_SCHEMA_VERSION);
        assert_eq!(loaded.state, config.state);
        assert_eq!(loaded.history, config.history);
    }

    #[test]
    fn migrates_v0_documents_forward() {
        let v0: Value = serde_yaml::from_str(
            r#"
metadata:
  lastUpdatedAt: "2024-05-01T12:00:00Z"
  lastUpdatedBy:
    name: dev@example.com
    hostname: workstation
flags:
  cliVersion: 0.8.0
  chartVersion: 0.40.0
  consensusNodeVersion: 0.57.0
  mirrorNodeChartVersion: 0.110.0
  explorerChartVersion: 0.2.0
  jsonRpcRelayChartVersion: 0.60.0
clusters:
- name: cluster-1
  dnsBaseDomain: cluster.local
  dnsConsensusNodePattern: "network-{nodeAlias}-svc.{namespace}.svc"
"#,
        )
        .unwrap();
        let config = RemoteConfig::from_document(&v0).unwrap();
        assert_eq!(config.schemaVersion, 1);
        assert_eq!(config.versions.cli, Version::new(0, 8, 0));
        assert_eq!(config.versions.jsonRpcRelayChart, Version::new(0, 60, 0));
        assert!(config.history.commands.is_empty());
    }

    #[test]
    fn add_remove_component_is_neutral() {
        let mut config = sample();
        let before = config.components(ComponentKind::HaProxy).to_vec();
        let proxy = Component::new("haproxy", 1, "cluster-1", "solo-e2e");
        config
            .add_component(ComponentKind::HaProxy, proxy.clone())
            .unwrap();
        config
            .remove_component(ComponentKind::HaProxy, &proxy.name)
            .unwrap();
        assert_eq!(config.components(ComponentKind::HaProxy), &before[..]);
    }

    #[test]
    fn duplicate_components_are_rejected() {
        let mut config = sample();
        let proxy = Component::new("haproxy", 1, "cluster-1", "solo-e2e");
        config
            .add_component(ComponentKind::HaProxy, proxy.clone())
            .unwrap();
        assert!(config.add_component(ComponentKind::HaProxy, proxy).is_err());
        assert!(config
            .add_consensus_node(ConsensusNode::new(1, "cluster-1", "solo-e2e"))
            .is_err());
    }

    #[test]
    fn unknown_cluster_is_rejected() {
        let mut config = sample();
        let err = config
            .add_component(
                ComponentKind::Explorer,
                Component::new("explorer", 1, "nowhere", "solo-e2e"),
            )
            .unwrap_err();
        match err.downcast_ref::<StateError>() {
            Some(StateError::UnknownCluster(..)) => {}
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn phase_walk_and_illegal_transitions() {
        let mut config = sample();
        config.change_node_phase(1, DeploymentPhase::Deployed).unwrap();
        config.change_node_phase(1, DeploymentPhase::Configured).unwrap();
        config.change_node_phase(1, DeploymentPhase::Started).unwrap();
        config.change_node_phase(1, DeploymentPhase::Stopped).unwrap();
        config.change_node_phase(1, DeploymentPhase::Started).unwrap();

        let err = config
            .change_node_phase(1, DeploymentPhase::Requested)
            .unwrap_err();
        match err.downcast_ref::<StateError>() {
            Some(StateError::IllegalTransition(..)) => {}
            other => panic!("unexpected error {:?}", other),
        }
        // failed transition leaves the phase untouched
        assert_eq!(
            config.consensus_node(1).unwrap().phase,
            DeploymentPhase::Started
        );
    }

    #[test]
    fn sidecars_cannot_pass_deployed() {
        let mut config = sample();
        config
            .add_component(
                ComponentKind::MirrorNode,
                Component::new("mirror-node", 1, "cluster-1", "solo-e2e"),
            )
            .unwrap();
        config
            .change_component_phase(
                ComponentKind::MirrorNode,
                "mirror-node-1",
                DeploymentPhase::Deployed,
            )
            .unwrap();
        assert!(config
            .change_component_phase(
                ComponentKind::MirrorNode,
                "mirror-node-1",
                DeploymentPhase::Started,
            )
            .is_err());
    }

    #[test]
    fn history_is_append_only_and_consistent() {
        let mut config = sample();
        config.record_command("network deploy --deployment dual");
        config.record_command("node add --node-aliases node2");
        assert_eq!(
            config.history.lastExecutedCommand,
            "node add --node-aliases node2"
        );
        assert_eq!(config.history.commands.len(), 2);
        config.verify().unwrap();

        config.history.lastExecutedCommand = "tampered".to_string();
        assert!(config.verify().is_err());
    }

    #[test]
    fn next_node_id_follows_max() {
        let mut config = sample();
        assert_eq!(config.next_node_id(), 2);
        config
            .add_consensus_node(ConsensusNode::new(5, "cluster-1", "solo-e2e"))
            .unwrap();
        assert_eq!(config.next_node_id(), 6);
    }

    #[test]
    fn ledger_phase_transitions() {
        let mut config = sample();
        config.change_ledger_phase(LedgerPhase::Initialized).unwrap();
        assert!(config.change_ledger_phase(LedgerPhase::Frozen).is_err());
        config.change_ledger_phase(LedgerPhase::Freezing).unwrap();
        config.change_ledger_phase(LedgerPhase::Frozen).unwrap();
    }
}
