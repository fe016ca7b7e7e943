use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};

/// Finalizer owned by the reference-protection controller.
pub const PROTECTION_FINALIZER: &str = "oaas.io/reference-protection";

/// Finalizer held by the platform while it still manages a cluster.
pub const MANAGED_FINALIZER: &str = "oaas.io/finalizer";

/// Label present on secrets the platform creates and protects on its own.
pub const ROLE_LABEL: &str = "oaas.io/role";

/// Matches objects that do NOT carry a given label key, i.e. the
/// `!key` requirement of a Kubernetes label selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelAbsent {
    key: String,
}

impl LabelAbsent {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !labels.contains_key(&self.key)
    }

    /// Render as a label selector query for list calls.
    pub fn to_query(&self) -> String {
        format!("!{}", self.key)
    }
}

/// Marker names and the user-managed selector, built once at startup and
/// shared read-only by every reconcile pass.
#[derive(Clone, Debug)]
pub struct Markers {
    pub protection_finalizer: String,
    pub managed_finalizer: String,
    pub user_managed: LabelAbsent,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            protection_finalizer: PROTECTION_FINALIZER.to_string(),
            managed_finalizer: MANAGED_FINALIZER.to_string(),
            user_managed: LabelAbsent::new(ROLE_LABEL),
        }
    }
}

impl Markers {
    pub fn is_protected<K: Resource>(&self, obj: &K) -> bool {
        has_finalizer(obj, &self.protection_finalizer)
    }

    pub fn is_platform_managed<K: Resource>(&self, obj: &K) -> bool {
        has_finalizer(obj, &self.managed_finalizer)
    }

    pub fn is_user_managed<K: Resource>(&self, obj: &K) -> bool {
        self.user_managed.matches(obj.labels())
    }

    /// Deletion was requested and the platform has let go of the object:
    /// nothing it references needs to be kept alive on its behalf anymore.
    pub fn is_released<K: Resource>(&self, obj: &K) -> bool {
        obj.meta().deletion_timestamp.is_some()
            && !self.is_platform_managed(obj)
    }
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::core::ObjectMeta;

    fn secret(labels: &[(&str, &str)], finalizers: &[&str]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("s".into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                finalizers: Some(
                    finalizers.iter().map(|f| f.to_string()).collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn label_absent_matches_only_without_key() {
        let sel = LabelAbsent::new(ROLE_LABEL);
        assert!(sel.matches(&BTreeMap::new()));
        assert!(sel.matches(&BTreeMap::from([(
            "app".to_string(),
            "x".to_string()
        )])));
        // value does not matter, presence of the key does
        assert!(!sel.matches(&BTreeMap::from([(
            ROLE_LABEL.to_string(),
            String::new()
        )])));
        assert_eq!(sel.to_query(), "!oaas.io/role");
    }

    #[test]
    fn user_managed_and_protected_predicates() {
        let m = Markers::default();
        let user = secret(&[], &[PROTECTION_FINALIZER]);
        let platform = secret(&[(ROLE_LABEL, "dns")], &[]);
        assert!(m.is_user_managed(&user));
        assert!(m.is_protected(&user));
        assert!(!m.is_user_managed(&platform));
        assert!(!m.is_protected(&platform));
    }

    #[test]
    fn released_requires_deletion_and_no_managed_finalizer() {
        let m = Markers::default();
        let mut obj = secret(&[], &[MANAGED_FINALIZER]);
        assert!(!m.is_released(&obj));

        obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(!m.is_released(&obj), "still held by the platform");

        obj.metadata.finalizers = Some(vec![PROTECTION_FINALIZER.into()]);
        assert!(m.is_released(&obj));
    }
}
