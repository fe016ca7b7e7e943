use crate::crd::managed_cluster::ManagedCluster;

/// Names of the secrets a cluster references through its DNS providers, in
/// declaration order. Providers without a secret name are skipped.
pub fn referenced_secret_names(cluster: &ManagedCluster) -> Vec<String> {
    let Some(dns) = cluster.spec.dns.as_ref() else {
        return Vec::new();
    };
    dns.providers
        .iter()
        .filter_map(|p| p.secret_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
