use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default,
)]
#[kube(
    group = "oaas.io",
    version = "v1alpha1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    shortname = "mcl",
    namespaced,
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Provider region the cluster is provisioned in
    pub region: Option<String>,
    /// Requested Kubernetes version of the provisioned cluster
    pub version: Option<String>,
    /// DNS settings; provider entries may reference user-owned credential secrets
    pub dns: Option<DnsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsSpec {
    pub domain: Option<String>,
    #[serde(default)]
    pub providers: Vec<DnsProvider>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsProvider {
    /// Provider type (e.g., "aws-route53", "google-clouddns")
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// Name of a Secret in the same namespace holding provider credentials
    pub secret_name: Option<String>,
    pub primary: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// User-managed secrets currently protected on behalf of this cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protected_secrets: Option<Vec<String>>,
}

impl ManagedClusterStatus {
    /// Overlay the fields set in `patch`, like a JSON merge patch would.
    pub fn merge(&mut self, patch: &ManagedClusterStatus) {
        if patch.phase.is_some() {
            self.phase = patch.phase.clone();
        }
        if patch.observed_generation.is_some() {
            self.observed_generation = patch.observed_generation;
        }
        if patch.protected_secrets.is_some() {
            self.protected_secrets = patch.protected_secrets.clone();
        }
    }
}

impl DnsProvider {
    pub fn with_secret(type_: &str, secret_name: &str) -> Self {
        Self {
            type_: Some(type_.to_string()),
            secret_name: Some(secret_name.to_string()),
            primary: None,
        }
    }
}
