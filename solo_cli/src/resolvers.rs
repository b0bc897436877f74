use std::io::{self, BufRead, Write};

use solo_definitions::LocalConfig;

use crate::kube::NamespaceName;
use crate::settings::{flags, Settings};
use super::Result;

fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// Interactive means: neither quiet nor force, and stdin is a terminal.
pub fn is_interactive(settings: &Settings) -> bool {
    !settings.is_quiet() && !settings.is_force() && stdin_is_tty()
}

/// Ask on stderr, read one line from stdin.
pub fn prompt(question: &str) -> Result<String> {
    eprint!("{}: ", question);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_string();
    if answer.is_empty() {
        bail!("no answer given for '{}'", question);
    }
    Ok(answer)
}

/// Resolve the deployment name: flag, then prompt when interactive, else
/// fail. The resolved name must exist in the local config.
pub fn resolve_deployment(local: &LocalConfig, settings: &Settings) -> Result<String> {
    let name = match settings.get(flags::DEPLOYMENT) {
        Some(d) => d,
        None => {
            if is_interactive(settings) {
                let answer = prompt("Enter the deployment name")?;
                settings.set(flags::DEPLOYMENT, &answer)?;
                answer
            } else {
                bail!("deployment is required");
            }
        }
    };
    if !local.deployments.contains_key(&name) {
        bail!(
            "deployment '{}' missing from deployments: {:?}",
            name,
            local.deployments.keys().collect::<Vec<_>>()
        );
    }
    Ok(name)
}

/// The namespace of the resolved deployment.
pub fn resolve_namespace_from_deployment(
    local: &LocalConfig,
    settings: &Settings,
) -> Result<NamespaceName> {
    let deployment = resolve_deployment(local, settings)?;
    let namespace = &local
        .deployments
        .get(&deployment)
        .expect("deployment membership was just checked")
        .namespace;
    NamespaceName::new(namespace)
}

/// Resolve the target cluster reference for a deployment.
///
/// The flag wins; a single-cluster deployment needs no flag; multi-cluster
/// deployments prompt when interactive and fail otherwise.
pub fn resolve_cluster_ref(
    local: &LocalConfig,
    settings: &Settings,
    deployment: &str,
) -> Result<String> {
    let clusters = &local
        .deployments
        .get(deployment)
        .ok_or_else(|| format_err!("deployment '{}' is not known", deployment))?
        .clusters;
    if let Some(cluster_ref) = settings.get(flags::CLUSTER_REF) {
        if !clusters.contains(&cluster_ref) {
            bail!(
                "cluster-ref '{}' is not part of deployment '{}': {:?}",
                cluster_ref,
                deployment,
                clusters
            );
        }
        return Ok(cluster_ref);
    }
    match clusters.len() {
        0 => bail!("deployment '{}' has no clusters", deployment),
        1 => Ok(clusters[0].clone()),
        _ => {
            if is_interactive(settings) {
                let answer = prompt(&format!(
                    "Select the cluster-ref for '{}' ({:?})",
                    deployment, clusters
                ))?;
                if !clusters.contains(&answer) {
                    bail!("'{}' is not one of {:?}", answer, clusters);
                }
                settings.set(flags::CLUSTER_REF, &answer)?;
                Ok(answer)
            } else {
                bail!("cluster-ref is required for multi-cluster deployments");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solo_definitions::local::Deployment;

    fn local_with(deployments: &[(&str, &str, &[&str])]) -> LocalConfig {
        let mut local = LocalConfig::create("dev@example.com", "0.9.0").unwrap();
        local.add_cluster_ref("cluster-1", "kind-1").unwrap();
        local.add_cluster_ref("cluster-2", "kind-2").unwrap();
        for (name, namespace, clusters) in deployments {
            local
                .add_deployment(
                    name,
                    Deployment {
                        clusters: clusters.iter().map(|c| c.to_string()).collect(),
                        namespace: namespace.to_string(),
                        realm: 0,
                        shard: 0,
                    },
                )
                .unwrap();
        }
        local
    }

    fn quiet_settings() -> Settings {
        let settings = Settings::new().unwrap();
        settings.set(flags::QUIET, "true").unwrap();
        settings
    }

    #[test]
    fn flag_resolves_deployment_and_namespace() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1"])]);
        let settings = quiet_settings();
        settings.set(flags::DEPLOYMENT, "dual").unwrap();
        assert_eq!(resolve_deployment(&local, &settings).unwrap(), "dual");
        assert_eq!(
            resolve_namespace_from_deployment(&local, &settings)
                .unwrap()
                .as_str(),
            "solo-e2e"
        );
    }

    #[test]
    fn quiet_without_flag_fails() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1"])]);
        let settings = quiet_settings();
        let err = resolve_deployment(&local, &settings).unwrap_err();
        assert!(err.to_string().contains("deployment is required"));
    }

    #[test]
    fn unknown_deployment_lists_known_ones() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1"])]);
        let settings = quiet_settings();
        settings.set(flags::DEPLOYMENT, "ghost").unwrap();
        let err = resolve_deployment(&local, &settings).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("missing from deployments"));
        assert!(rendered.contains("dual"));
    }

    #[test]
    fn single_cluster_needs_no_flag() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1"])]);
        let settings = quiet_settings();
        assert_eq!(
            resolve_cluster_ref(&local, &settings, "dual").unwrap(),
            "cluster-1"
        );
    }

    #[test]
    fn multi_cluster_requires_flag_when_quiet() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1", "cluster-2"])]);
        let settings = quiet_settings();
        assert!(resolve_cluster_ref(&local, &settings, "dual").is_err());
        settings.set(flags::CLUSTER_REF, "cluster-2").unwrap();
        assert_eq!(
            resolve_cluster_ref(&local, &settings, "dual").unwrap(),
            "cluster-2"
        );
    }

    #[test]
    fn cluster_flag_must_belong_to_deployment() {
        let local = local_with(&[("dual", "solo-e2e", &["cluster-1"])]);
        let settings = quiet_settings();
        settings.set(flags::CLUSTER_REF, "cluster-2").unwrap();
        assert!(resolve_cluster_ref(&local, &settings, "dual").is_err());
    }
}
