use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::components::parse_component_index;
use crate::safety;
use super::Result;

/// Ledger node accounts start here; `node1` maps to `<shard>.<realm>.3`.
const NODE_ACCOUNT_BASE: u64 = 3;

/// A single host/port endpoint exposed by a node.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceEndpoint {
    pub hostname: String,
    pub port: u16,
}

/// Gossip and service endpoints for one node alias.
#[derive(Clone, Debug)]
pub struct NodeEndpoints {
    pub gossip: ServiceEndpoint,
    pub service: ServiceEndpoint,
}

/// Per-node genesis data handed to the ledger at bootstrap.
#[derive(Serialize, Clone, Debug)]
pub struct GenesisNode {
    pub nodeId: u64,
    pub accountId: String,
    pub adminKey: String,
    pub weight: u64,
    pub gossipEndpoint: ServiceEndpoint,
    pub serviceEndpoint: ServiceEndpoint,
    pub gossipCaCertificate: String,
}

/// Matching roster entry for one node.
#[derive(Serialize, Clone, Debug)]
pub struct RosterEntry {
    pub nodeId: u64,
    pub weight: u64,
    pub gossipCaCertificate: String,
    pub gossipEndpoint: Vec<ServiceEndpoint>,
}

#[derive(Serialize, Clone, Debug)]
pub struct NodeMetadataEntry {
    pub node: GenesisNode,
    pub rosterEntry: RosterEntry,
}

/// The bootstrap roster consumed by the ledger.
#[derive(Serialize, Clone, Debug)]
pub struct GenesisNetwork {
    pub nodeMetadata: Vec<NodeMetadataEntry>,
}

impl GenesisNetwork {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder over node aliases, keys, signing certificates and endpoints.
pub struct GenesisNetworkBuilder {
    aliases: Vec<String>,
    endpoints: BTreeMap<String, NodeEndpoints>,
    admin_keys: Option<Vec<String>>,
    genesis_public_key: String,
    certs_dir: PathBuf,
    weights: BTreeMap<String, u64>,
    realm: i64,
    shard: i64,
}

impl GenesisNetworkBuilder {
    pub fn new<P: AsRef<Path>>(
        aliases: Vec<String>,
        endpoints: BTreeMap<String, NodeEndpoints>,
        genesis_public_key: &str,
        certs_dir: P,
    ) -> GenesisNetworkBuilder {
        GenesisNetworkBuilder {
            aliases,
            endpoints,
            admin_keys: None,
            genesis_public_key: genesis_public_key.to_string(),
            certs_dir: certs_dir.as_ref().to_path_buf(),
            weights: BTreeMap::new(),
            realm: 0,
            shard: 0,
        }
    }

    /// Explicit admin keys; the count must equal the node count.
    pub fn admin_keys(mut self, keys: Vec<String>) -> GenesisNetworkBuilder {
        self.admin_keys = Some(keys);
        self
    }

    pub fn weights(mut self, weights: BTreeMap<String, u64>) -> GenesisNetworkBuilder {
        self.weights = weights;
        self
    }

    pub fn realm_and_shard(mut self, realm: i64, shard: i64) -> GenesisNetworkBuilder {
        self.realm = realm;
        self.shard = shard;
        self
    }

    pub fn build(&self) -> Result<GenesisNetwork> {
        if let Some(keys) = &self.admin_keys {
            if keys.len() != self.aliases.len() {
                bail!(
                    "{} admin keys supplied for {} nodes",
                    keys.len(),
                    self.aliases.len()
                );
            }
        }

        let mut entries = Vec::with_capacity(self.aliases.len());
        for (i, alias) in self.aliases.iter().enumerate() {
            let endpoints = self
                .endpoints
                .get(alias)
                .ok_or_else(|| format_err!("no endpoints for node alias '{}'", alias))?;
            // ledger node ids are zero based while aliases are one based
            let ordinal = parse_component_index(alias)?;
            if ordinal == 0 {
                bail!("node alias '{}' must be one based", alias);
            }
            let node_id = ordinal - 1;
            let account = format!(
                "{}.{}.{}",
                self.shard,
                self.realm,
                NODE_ACCOUNT_BASE + node_id
            );
            let admin_key = match &self.admin_keys {
                Some(keys) => keys[i].clone(),
                None => self.genesis_public_key.clone(),
            };
            let weight = self.weights.get(alias).cloned().unwrap_or(0);
            let certificate = base64::encode(&read_gossip_certificate(&self.certs_dir, alias)?);

            let node = GenesisNode {
                nodeId: node_id,
                accountId: account,
                adminKey: admin_key,
                weight,
                gossipEndpoint: endpoints.gossip.clone(),
                serviceEndpoint: endpoints.service.clone(),
                gossipCaCertificate: certificate.clone(),
            };
            let roster = RosterEntry {
                nodeId: node_id,
                weight,
                gossipCaCertificate: certificate,
                gossipEndpoint: vec![endpoints.gossip.clone()],
            };
            entries.push(NodeMetadataEntry {
                node,
                rosterEntry: roster,
            });
        }
        Ok(GenesisNetwork {
            nodeMetadata: entries,
        })
    }
}

/// Read a node's gossip CA certificate as DER bytes.
///
/// Accepts `<alias>.der` as-is or `<alias>.pem` with the armor stripped.
fn read_gossip_certificate(dir: &Path, alias: &str) -> Result<Vec<u8>> {
    let der_name = format!("{}.der", alias);
    if dir.join(&der_name).is_file() {
        let path = safety::safe_join(dir, &[der_name.as_str()])?;
        return Ok(fs::read(path)?);
    }
    let pem_name = format!("{}.pem", alias);
    if dir.join(&pem_name).is_file() {
        let path = safety::safe_join(dir, &[pem_name.as_str()])?;
        let text = fs::read_to_string(path)?;
        let body: String = text
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<Vec<_>>()
            .concat();
        return Ok(base64::decode(body.trim())
            .map_err(|e| format_err!("certificate for '{}' is not valid PEM: {}", alias, e))?);
    }
    bail!(
        "no signing certificate for '{}' under {}",
        alias,
        dir.display()
    )
}

/// Gossip endpoint override handed to a node at startup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EndpointOverride {
    pub nodeId: u64,
    pub hostname: String,
    pub port: u16,
}

/// The node-overrides document (`gossip:` section of a node values file).
///
/// Entries are JSON-encoded strings inside the YAML lists, as the node
/// software expects them.
#[derive(Clone, Debug, Default)]
pub struct NodeOverrides {
    pub interface_bindings: Vec<EndpointOverride>,
    pub endpoint_overrides: Vec<EndpointOverride>,
}

impl NodeOverrides {
    pub fn to_yaml(&self) -> Result<String> {
        let encode = |list: &[EndpointOverride]| -> Result<Vec<String>> {
            let mut out = Vec::with_capacity(list.len());
            for o in list {
                out.push(serde_json::to_string(o)?);
            }
            Ok(out)
        };
        let mut gossip = serde_yaml::Mapping::new();
        gossip.insert(
            serde_yaml::Value::String("interfaceBindings".to_string()),
            serde_yaml::to_value(encode(&self.interface_bindings)?)?,
        );
        gossip.insert(
            serde_yaml::Value::String("endpointOverrides".to_string()),
            serde_yaml::to_value(encode(&self.endpoint_overrides)?)?,
        );
        let mut doc = serde_yaml::Mapping::new();
        doc.insert(
            serde_yaml::Value::String("gossip".to_string()),
            serde_yaml::Value::Mapping(gossip),
        );
        Ok(serde_yaml::to_string(&serde_yaml::Value::Mapping(doc))?)
    }
}
