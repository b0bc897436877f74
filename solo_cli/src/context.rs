use crate::app::App;
use crate::kube::Kube;
use crate::settings::flags;
use super::Result;

/// `solo context connect`
///
/// Point an existing cluster reference at a different kube context, probing
/// the connection first.
pub fn connect(app: &App) -> Result<()> {
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    let context = app.settings.require(flags::CONTEXT)?;
    if !Kube::contexts()?.contains(&context) {
        bail!("context '{}' is not defined in the kubeconfig", context);
    }
    if !Kube::test_context_connection(&context) {
        bail!("context '{}' did not answer a namespace list probe", context);
    }
    app.update_local(|local| {
        if !local.clusterRefs.contains_key(&cluster_ref) {
            bail!("cluster-ref '{}' is not connected yet", cluster_ref);
        }
        local.add_cluster_ref(&cluster_ref, &context)
    })?;
    info!("cluster-ref '{}' now uses context '{}'", cluster_ref, context);
    Ok(())
}
