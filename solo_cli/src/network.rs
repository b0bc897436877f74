use std::fs;
use std::sync::Arc;
use std::time::Duration;

use solo_definitions::components::{ConsensusNode, DeploymentPhase};
use solo_definitions::local;
use solo_definitions::remote::{ApplicationVersions, ClusterSpec, RemoteConfig};
use solo_definitions::version;

use crate::app::App;
use crate::cluster::{CHART_REPO, CHART_REPO_URL};
use crate::kube::ResourceRef;
use crate::settings::flags;
use crate::task::{Context, Outcome, Task, TaskList};
use super::Result;

pub const NETWORK_RELEASE: &str = "solo-deployment";
const NETWORK_CHART: &str = "solo-charts/solo-deployment";

/// Default DNS anatomy of a consensus node service.
const DNS_BASE_DOMAIN: &str = "cluster.local";
const DNS_NODE_PATTERN: &str = "network-{nodeAlias}-svc.{namespace}.svc.{clusterDomain}";

const POD_WAIT_ATTEMPTS: u32 = 60;
const POD_WAIT_DELAY: Duration = Duration::from_secs(5);

/// Node aliases from the flag, `node1` when unset.
pub fn requested_aliases(app: &App) -> Vec<String> {
    app.settings
        .get(flags::NODE_ALIASES)
        .map(|raw| {
            raw.split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect()
        })
        .unwrap_or_else(|| vec!["node1".to_string()])
}

/// The pod backing a consensus node alias.
pub fn node_pod_ref(namespace: &crate::kube::NamespaceName, alias: &str) -> Result<ResourceRef> {
    ResourceRef::new(namespace.clone(), &format!("network-{}-0", alias))
}

/// `solo network deploy`
pub fn deploy(app: &Arc<App>) -> Result<()> {
    let target = app.target()?;
    let aliases = requested_aliases(app);
    let release_tag = app.settings.get(flags::RELEASE_TAG);
    let history_line = format!(
        "network deploy --deployment {} --node-aliases {}",
        target.deployment,
        aliases.join(",")
    );

    app.with_lease(&target, || {
        let ctx = Context::new();

        let kube = target.kube.clone();
        let namespace = target.namespace.clone();
        let initialize = Task::step("initialize", move |_| {
            kube.namespaces().ensure(&namespace)
        });

        let values_aliases = aliases.clone();
        let values_namespace = target.namespace.clone();
        let deployment_name = target.deployment.clone();
        let prepare_values = Task::step("prepare chart values", move |ctx| {
            let values = json!({
                "global": {
                    "namespaceOverride": values_namespace.as_str(),
                },
                "deployment": deployment_name,
                "nodes": values_aliases.iter().map(|a| json!({"name": a})).collect::<Vec<_>>(),
            });
            let dir = local::cache_dir().join("templates");
            fs::create_dir_all(&dir)?;
            let path = dir.join(format!("{}-values.yaml", deployment_name));
            fs::write(&path, serde_yaml::to_string(&values)?)?;
            ctx.set("valuesFile", &path.display().to_string())
        });

        let app_install = app.clone();
        let install_cluster = target.cluster_ref.clone();
        let install_namespace = target.namespace.clone();
        let install_tag = release_tag.clone();
        let install = Task::step("install network chart", move |ctx| {
            let values_file: String = ctx.get("valuesFile")?;
            let helm = app_install.helm_for_cluster(&install_cluster)?;
            helm.repo_add(CHART_REPO, CHART_REPO_URL)?;
            helm.upgrade_install(
                install_namespace.as_str(),
                NETWORK_RELEASE,
                NETWORK_CHART,
                install_tag.as_ref().map(|t| t.as_str()),
                &[values_file],
                &[],
            )
        });

        let wait_kube = target.kube.clone();
        let wait_namespace = target.namespace.clone();
        let wait_aliases = aliases.clone();
        let wait = Task::new("wait for consensus pods", move |_| {
            let mut subtasks = Vec::new();
            for alias in &wait_aliases {
                let kube = wait_kube.clone();
                let pod = node_pod_ref(&wait_namespace, alias)?;
                subtasks.push(Task::step(alias, move |_| {
                    kube.pods().wait_ready(&pod, POD_WAIT_ATTEMPTS, POD_WAIT_DELAY)
                }));
            }
            Ok(Outcome::Nested(TaskList::concurrent(subtasks)))
        });

        let app_state = app.clone();
        let state_kube = target.kube.clone();
        let state_namespace = target.namespace.clone();
        let state_cluster = target.cluster_ref.clone();
        let state_aliases = aliases.clone();
        let state_tag = release_tag.clone();
        let state_history = history_line.clone();
        let persist = Task::step("persist remote state", move |_| {
            let mut remote = if app_state.remote_exists(&state_kube, &state_namespace)? {
                app_state.load_remote(&state_kube, &state_namespace)?
            } else {
                let mut versions = ApplicationVersions::zero();
                versions.cli = version::parse(env!("CARGO_PKG_VERSION"))?;
                if let Some(tag) = &state_tag {
                    versions.consensusNode = version::parse(tag)?;
                }
                RemoteConfig::new(
                    app_state.identity(),
                    versions,
                    vec![ClusterSpec {
                        name: state_cluster.clone(),
                        dnsBaseDomain: DNS_BASE_DOMAIN.to_string(),
                        dnsConsensusNodePattern: DNS_NODE_PATTERN.to_string(),
                    }],
                )
            };
            for alias in &state_aliases {
                let id = solo_definitions::components::parse_component_index(alias)?;
                if remote.consensus_node(id).is_err() {
                    remote.add_consensus_node(ConsensusNode::new(
                        id,
                        &state_cluster,
                        state_namespace.as_str(),
                    ))?;
                    remote.change_node_phase(id, DeploymentPhase::Deployed)?;
                }
            }
            remote.record_command(&state_history);
            app_state.save_remote(&state_kube, &state_namespace, &mut remote)
        });

        TaskList::sequential(vec![initialize, prepare_values, install, wait, persist]).run(&ctx)
    })
}

/// `solo network destroy`
///
/// Uninstall the chart, then sweep claims, secrets and the remote state.
/// Every step probes before deleting so a re-run converges.
pub fn destroy(app: &Arc<App>) -> Result<()> {
    let target = app.target()?;

    app.with_lease(&target, || {
        let ctx = Context::new();

        let app_uninstall = app.clone();
        let uninstall_cluster = target.cluster_ref.clone();
        let uninstall_namespace = target.namespace.clone();
        let uninstall = Task::step("uninstall network chart", move |_| {
            let helm = app_uninstall.helm_for_cluster(&uninstall_cluster)?;
            helm.uninstall(uninstall_namespace.as_str(), NETWORK_RELEASE)
        });

        let pvc_kube = target.kube.clone();
        let pvc_namespace = target.namespace.clone();
        let sweep_pvcs = Task::step("delete persistent volume claims", move |_| {
            for name in pvc_kube.pvcs().list(&pvc_namespace, None)? {
                let claim = ResourceRef::new(pvc_namespace.clone(), &name)?;
                pvc_kube.pvcs().delete(&claim)?;
            }
            Ok(())
        });

        let secret_kube = target.kube.clone();
        let secret_namespace = target.namespace.clone();
        let sweep_secrets = Task::step("delete node secrets", move |_| {
            for name in secret_kube
                .secrets()
                .list(&secret_namespace, Some("app.kubernetes.io/managed-by=solo"))?
            {
                let secret = ResourceRef::new(secret_namespace.clone(), &name)?;
                secret_kube.secrets().delete(&secret)?;
            }
            Ok(())
        });

        let app_remote = app.clone();
        let remote_kube = target.kube.clone();
        let remote_namespace = target.namespace.clone();
        let drop_remote = Task::step("delete remote state", move |_| {
            app_remote.delete_remote(&remote_kube, &remote_namespace)
        });

        TaskList::sequential(vec![uninstall, sweep_pvcs, sweep_secrets, drop_remote]).run(&ctx)
    })
}
