use std::sync::Arc;

use solo_definitions::components::{Component, DeploymentPhase};
use solo_definitions::remote::ComponentKind;

use crate::app::App;
use super::Result;

/// Chart coordinates for the sidecar components.
struct AddonChart {
    kind: ComponentKind,
    release: &'static str,
    chart: &'static str,
    repo: &'static str,
    repo_url: &'static str,
}

const MIRROR: AddonChart = AddonChart {
    kind: ComponentKind::MirrorNode,
    release: "solo-mirror-node",
    chart: "hedera-mirror/hedera-mirror",
    repo: "hedera-mirror",
    repo_url: "https://hashgraph.github.io/hedera-mirror-node/charts",
};

const EXPLORER: AddonChart = AddonChart {
    kind: ComponentKind::Explorer,
    release: "solo-explorer",
    chart: "hedera-explorer/hedera-explorer",
    repo: "hedera-explorer",
    repo_url: "https://hashgraph.github.io/hedera-mirror-node-explorer/charts",
};

const RELAY: AddonChart = AddonChart {
    kind: ComponentKind::RelayNode,
    release: "solo-relay",
    chart: "hedera-json-rpc-relay/hedera-json-rpc-relay",
    repo: "hedera-json-rpc-relay",
    repo_url: "https://hashgraph.github.io/hedera-json-rpc-relay/charts",
};

fn deploy_addon(app: &Arc<App>, addon: &AddonChart) -> Result<()> {
    let target = app.target()?;
    let history = format!(
        "{} deploy --deployment {}",
        addon.kind.base_name(),
        target.deployment
    );

    app.with_lease(&target, || {
        let helm = app.helm_for_cluster(&target.cluster_ref)?;
        if !helm.is_installed(target.namespace.as_str(), addon.release)? {
            helm.repo_add(addon.repo, addon.repo_url)?;
            helm.upgrade_install(
                target.namespace.as_str(),
                addon.release,
                addon.chart,
                None,
                &[],
                &[],
            )?;
        } else {
            info!("{} already installed", addon.release);
        }

        let mut remote = app.load_remote(&target.kube, &target.namespace)?;
        let base = addon.kind.base_name();
        let already = remote
            .components(addon.kind)
            .iter()
            .any(|c| c.cluster == target.cluster_ref);
        if !already {
            let index = remote
                .components(addon.kind)
                .iter()
                .filter_map(|c| c.index().ok())
                .max()
                .map(|i| i + 1)
                .unwrap_or(1);
            let component = Component::new(base, index, &target.cluster_ref, target.namespace.as_str());
            let name = component.name.clone();
            remote.add_component(addon.kind, component)?;
            remote.change_component_phase(addon.kind, &name, DeploymentPhase::Deployed)?;
        }
        remote.record_command(&history);
        app.save_remote(&target.kube, &target.namespace, &mut remote)
    })
}

fn destroy_addon(app: &Arc<App>, addon: &AddonChart) -> Result<()> {
    let target = app.target()?;
    let history = format!(
        "{} destroy --deployment {}",
        addon.kind.base_name(),
        target.deployment
    );

    app.with_lease(&target, || {
        let helm = app.helm_for_cluster(&target.cluster_ref)?;
        helm.uninstall(target.namespace.as_str(), addon.release)?;

        let mut remote = app.load_remote(&target.kube, &target.namespace)?;
        let doomed: Vec<String> = remote
            .components(addon.kind)
            .iter()
            .filter(|c| c.cluster == target.cluster_ref)
            .map(|c| c.name.clone())
            .collect();
        for name in doomed {
            remote.remove_component(addon.kind, &name)?;
        }
        remote.record_command(&history);
        app.save_remote(&target.kube, &target.namespace, &mut remote)
    })
}

/// `solo mirror-node deploy`
pub fn mirror_deploy(app: &Arc<App>) -> Result<()> {
    deploy_addon(app, &MIRROR)
}

/// `solo mirror-node destroy`
pub fn mirror_destroy(app: &Arc<App>) -> Result<()> {
    destroy_addon(app, &MIRROR)
}

/// `solo explorer deploy`
pub fn explorer_deploy(app: &Arc<App>) -> Result<()> {
    deploy_addon(app, &EXPLORER)
}

/// `solo explorer destroy`
pub fn explorer_destroy(app: &Arc<App>) -> Result<()> {
    destroy_addon(app, &EXPLORER)
}

/// `solo relay deploy`
pub fn relay_deploy(app: &Arc<App>) -> Result<()> {
    deploy_addon(app, &RELAY)
}

/// `solo relay destroy`
pub fn relay_destroy(app: &Arc<App>) -> Result<()> {
    destroy_addon(app, &RELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solo_definitions::components::render_component_name;

    #[test]
    fn component_names_follow_kind_bases() {
        assert_eq!(render_component_name(MIRROR.kind.base_name(), 1), "mirror-node-1");
        assert_eq!(render_component_name(RELAY.kind.base_name(), 2), "relay-2");
        assert_eq!(render_component_name(EXPLORER.kind.base_name(), 1), "explorer-1");
    }
}
