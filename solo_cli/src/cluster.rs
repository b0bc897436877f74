use regex::Regex;

use crate::app::App;
use crate::kube::Kube;
use crate::resolvers;
use crate::settings::flags;
use super::Result;

/// Shared chart repository for cluster level resources.
pub const CHART_REPO: &str = "solo-charts";
pub const CHART_REPO_URL: &str = "https://hashgraph.github.io/solo-charts";
const SETUP_RELEASE: &str = "solo-cluster-setup";
const SETUP_CHART: &str = "solo-charts/solo-cluster-setup";
const SETUP_NAMESPACE: &str = "solo-setup";

/// `solo cluster connect`
///
/// Register a kube context under a user-chosen cluster reference.
pub fn connect(app: &App) -> Result<()> {
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    // short, lower case labels with dashes; they end up in resource names
    let re = Regex::new(r"^[0-9a-z][0-9a-z\-]{0,49}$").unwrap();
    if !re.is_match(&cluster_ref) {
        bail!("please use a short, lower case cluster-ref with dashes");
    }
    let context = match app.settings.get(flags::CONTEXT) {
        Some(c) => c,
        None => match Kube::current_context()? {
            Some(c) => c,
            None => bail!("no context flag given and no current kube context set"),
        },
    };
    if !Kube::contexts()?.contains(&context) {
        bail!("context '{}' is not defined in the kubeconfig", context);
    }
    if !app.settings.is_quiet() && !Kube::test_context_connection(&context) {
        warn!("context '{}' did not answer a namespace list probe", context);
    }
    app.update_local(|local| local.add_cluster_ref(&cluster_ref, &context))?;
    info!("connected cluster-ref '{}' to context '{}'", cluster_ref, context);
    Ok(())
}

/// `solo cluster list`
pub fn list(app: &App) -> Result<()> {
    for (cluster_ref, context) in &app.local_config().clusterRefs {
        println!("{}\t{}", cluster_ref, context);
    }
    Ok(())
}

/// `solo cluster info`
pub fn info(app: &App) -> Result<()> {
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    let local = app.local_config();
    let context = local.context_for(&cluster_ref)?;
    println!("cluster-ref: {}", cluster_ref);
    println!("context: {}", context);
    let kube = app.kube_for_cluster(&cluster_ref)?;
    let namespaces = kube.namespaces().list()?;
    println!("namespaces: {}", namespaces.len());
    for used_by in local
        .deployments
        .iter()
        .filter(|(_, d)| d.clusters.contains(&cluster_ref))
        .map(|(name, _)| name)
    {
        println!("deployment: {}", used_by);
    }
    Ok(())
}

/// `solo cluster setup`
///
/// Install the shared cluster chart (ingress, minio, metrics plumbing).
/// Probes the release first so re-runs are no-ops.
pub fn setup(app: &App) -> Result<()> {
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    let helm = app.helm_for_cluster(&cluster_ref)?;
    if helm.is_installed(SETUP_NAMESPACE, SETUP_RELEASE)? {
        info!("cluster '{}' is already set up", cluster_ref);
        return Ok(());
    }
    helm.repo_add(CHART_REPO, CHART_REPO_URL)?;
    helm.upgrade_install(SETUP_NAMESPACE, SETUP_RELEASE, SETUP_CHART, None, &[], &[])?;
    info!("cluster '{}' set up", cluster_ref);
    Ok(())
}

/// `solo cluster reset`
pub fn reset(app: &App) -> Result<()> {
    let cluster_ref = app.settings.require(flags::CLUSTER_REF)?;
    if resolvers::is_interactive(&app.settings) {
        let answer = resolvers::prompt(&format!(
            "Really remove the shared setup from '{}'? (yes/no)",
            cluster_ref
        ))?;
        if answer != "yes" {
            bail!("cluster reset aborted");
        }
    }
    let helm = app.helm_for_cluster(&cluster_ref)?;
    helm.uninstall(SETUP_NAMESPACE, SETUP_RELEASE)?;
    info!("cluster '{}' reset", cluster_ref);
    Ok(())
}
