use solo_definitions::local::Deployment;

use crate::app::App;
use crate::kube::NamespaceName;
use crate::settings::flags;
use super::Result;

/// `solo deployment create`
///
/// Local bookkeeping only; clusters attach via `add-cluster` and the remote
/// state appears on the first `network deploy`.
pub fn create(app: &App) -> Result<()> {
    let name = app.settings.require(flags::DEPLOYMENT)?;
    let namespace = app.settings.require(flags::NAMESPACE)?;
    // validated eagerly so a bad name fails before it is persisted
    NamespaceName::new(&namespace)?;
    app.update_local(|local| {
        local.add_deployment(
            &name,
            Deployment {
                clusters: Vec::new(),
                namespace: namespace.clone(),
                realm: 0,
                shard: 0,
            },
        )
    })?;
    info!("created deployment '{}' in namespace '{}'", name, namespace);
    Ok(())
}

/// `solo deployment add-cluster`
pub fn add_cluster(app: &App) -> Result<()> {
    let name = app.settings.require(flags::DEPLOYMENT)?;
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    app.update_local(|local| {
        if local.context_for(&cluster_ref).is_err() {
            bail!(
                "cluster-ref '{}' must be connected before it joins a deployment",
                cluster_ref
            );
        }
        let deployment = local
            .deployments
            .get_mut(&name)
            .ok_or_else(|| format_err!("deployment '{}' does not exist", name))?;
        if deployment.clusters.contains(&cluster_ref) {
            bail!("deployment '{}' already spans '{}'", name, cluster_ref);
        }
        deployment.clusters.push(cluster_ref.clone());
        Ok(())
    })?;
    info!("deployment '{}' now spans '{}'", name, cluster_ref);
    Ok(())
}

/// `solo deployment list`
pub fn list(app: &App) -> Result<()> {
    for (name, deployment) in &app.local_config().deployments {
        println!(
            "{}\t{}\t{}",
            name,
            deployment.namespace,
            deployment.clusters.join(",")
        );
    }
    Ok(())
}
