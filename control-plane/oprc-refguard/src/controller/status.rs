use crate::crd::managed_cluster::{ManagedCluster, ManagedClusterStatus};

/// Status fields this controller owns, or `None` when the stored status
/// already says the same thing.
pub fn protection_status(
    cluster: &ManagedCluster,
    mut protected: Vec<String>,
) -> Option<ManagedClusterStatus> {
    protected.sort();
    protected.dedup();
    let generation = cluster.metadata.generation;
    let current = cluster.status.as_ref();
    let unchanged = current.is_some_and(|s| {
        s.protected_secrets.as_deref().unwrap_or_default() == protected.as_slice()
            && s.observed_generation == generation
    });
    if unchanged {
        return None;
    }
    Some(ManagedClusterStatus {
        phase: None,
        observed_generation: generation,
        protected_secrets: Some(protected),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::managed_cluster::ManagedClusterSpec;

    #[test]
    fn writes_sorted_names_once() {
        let mut c = ManagedCluster::new("c", ManagedClusterSpec::default());
        c.metadata.generation = Some(3);

        let st = protection_status(&c, vec!["b".into(), "a".into(), "b".into()])
            .expect("first write");
        assert_eq!(
            st.protected_secrets,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(st.observed_generation, Some(3));

        c.status = Some(ManagedClusterStatus {
            phase: Some("Ready".into()),
            ..st
        });
        assert!(protection_status(&c, vec!["a".into(), "b".into()]).is_none());

        c.metadata.generation = Some(4);
        assert!(protection_status(&c, vec!["a".into(), "b".into()]).is_some());
    }

    #[test]
    fn empty_set_is_recorded_against_missing_status() {
        let c = ManagedCluster::new("c", ManagedClusterSpec::default());
        let st = protection_status(&c, vec![]).expect("status missing");
        assert_eq!(st.protected_secrets, Some(vec![]));
    }
}
