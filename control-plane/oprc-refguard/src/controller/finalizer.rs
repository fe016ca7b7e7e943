use kube::ResourceExt;
use tracing::debug;

use crate::store::{
    FinalizerOwner, PatchTarget, ReferenceStore, StoreError, StoreResult,
};

/// How many times a write rejected as stale is re-planned on a fresh read.
const CONFLICT_RETRIES: u32 = 5;

/// Whether an object carries a given finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkState {
    Unmarked,
    Marked,
}

/// What a transition request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested state; nothing to write.
    Noop,
    /// Write this finalizer list to reach the requested state.
    Write(Vec<String>),
}

pub fn mark_state(finalizers: &[String], finalizer: &str) -> MarkState {
    if finalizers.iter().any(|f| f == finalizer) {
        MarkState::Marked
    } else {
        MarkState::Unmarked
    }
}

/// Plan the finalizer list that takes `current` to `desired`, keeping every
/// other finalizer untouched and in order.
pub fn plan(current: &[String], finalizer: &str, desired: MarkState) -> Transition {
    match (mark_state(current, finalizer), desired) {
        (MarkState::Marked, MarkState::Marked)
        | (MarkState::Unmarked, MarkState::Unmarked) => Transition::Noop,
        (MarkState::Unmarked, MarkState::Marked) => {
            let mut next = current.to_vec();
            next.push(finalizer.to_string());
            Transition::Write(next)
        }
        (MarkState::Marked, MarkState::Unmarked) => Transition::Write(
            current
                .iter()
                .filter(|f| f.as_str() != finalizer)
                .cloned()
                .collect(),
        ),
    }
}

/// Drive `obj` to `desired` for `finalizer`. Returns true when a patch was
/// sent, false when the object was already in that state.
///
/// `obj` may be a stale read. A write rejected because the object moved on
/// is planned again against the current finalizers, so a transition another
/// pass already made ends as a no-op and foreign finalizers added meanwhile
/// survive.
pub async fn ensure<K: FinalizerOwner>(
    store: &dyn ReferenceStore,
    obj: &K,
    finalizer: &str,
    desired: MarkState,
) -> StoreResult<bool> {
    let mut target = PatchTarget::of(obj);
    let mut current = obj.finalizers().to_vec();
    let mut retries = 0;
    loop {
        let Transition::Write(next) = plan(&current, finalizer, desired) else {
            return Ok(false);
        };
        debug!(%target, ?desired, %finalizer, "finalizer transition");
        match store.patch_finalizers(&target, next).await {
            Ok(()) => return Ok(true),
            Err(StoreError::Conflict(_)) if retries < CONFLICT_RETRIES => {
                retries += 1;
                debug!(%target, retries, "stale finalizer write; re-reading");
                let fresh = store
                    .get_finalizers(target.kind, &target.key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(target.to_string()))?;
                target.resource_version = fresh.resource_version;
                current = fresh.finalizers;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn add<K: FinalizerOwner>(
    store: &dyn ReferenceStore,
    obj: &K,
    finalizer: &str,
) -> StoreResult<bool> {
    ensure(store, obj, finalizer, MarkState::Marked).await
}

pub async fn remove<K: FinalizerOwner>(
    store: &dyn ReferenceStore,
    obj: &K,
    finalizer: &str,
) -> StoreResult<bool> {
    ensure(store, obj, finalizer, MarkState::Unmarked).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{ObjectKey, TargetKind};
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::ObjectMeta;

    const F: &str = "oaas.io/reference-protection";

    fn secret(finalizers: &[&str]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("shared".into()),
                namespace: Some("project-dev".into()),
                finalizers: Some(list(finalizers)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn stored(store: &MemoryStore, key: &ObjectKey) -> Vec<String> {
        store
            .secret(key)
            .await
            .and_then(|s| s.metadata.finalizers)
            .unwrap_or_default()
    }

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mark_is_idempotent() {
        assert_eq!(plan(&list(&[F]), F, MarkState::Marked), Transition::Noop);
        assert_eq!(
            plan(&list(&["other"]), F, MarkState::Marked),
            Transition::Write(list(&["other", F]))
        );
        assert_eq!(
            plan(&[], F, MarkState::Marked),
            Transition::Write(list(&[F]))
        );
    }

    #[test]
    fn unmark_is_idempotent_and_keeps_foreign_finalizers() {
        assert_eq!(
            plan(&list(&["other"]), F, MarkState::Unmarked),
            Transition::Noop
        );
        assert_eq!(
            plan(&list(&["a", F, "b"]), F, MarkState::Unmarked),
            Transition::Write(list(&["a", "b"]))
        );
    }

    #[test]
    fn duplicate_entries_are_all_removed() {
        assert_eq!(
            plan(&list(&[F, "a", F]), F, MarkState::Unmarked),
            Transition::Write(list(&["a"]))
        );
    }

    #[tokio::test]
    async fn duplicate_add_from_stale_reads_is_a_noop() {
        let store = MemoryStore::new();
        let key = store.put_secret(secret(&[])).await;
        let first = store.secret(&key).await.unwrap();
        let second = store.secret(&key).await.unwrap();

        assert!(add(&store, &first, F).await.unwrap());
        assert!(!add(&store, &second, F).await.unwrap());
        assert_eq!(stored(&store, &key).await, list(&[F]));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn duplicate_remove_from_stale_reads_is_a_noop() {
        let store = MemoryStore::new();
        let key = store.put_secret(secret(&["other", F])).await;
        let first = store.secret(&key).await.unwrap();
        let second = store.secret(&key).await.unwrap();

        assert!(remove(&store, &first, F).await.unwrap());
        assert!(!remove(&store, &second, F).await.unwrap());
        assert_eq!(stored(&store, &key).await, list(&["other"]));
    }

    #[tokio::test]
    async fn stale_add_keeps_finalizer_written_meanwhile() {
        let store = MemoryStore::new();
        let key = store.put_secret(secret(&[])).await;
        let read = store.secret(&key).await.unwrap();
        store
            .update_secret(&key, |s| {
                s.metadata.finalizers = Some(list(&["example.com/hold"]))
            })
            .await;

        assert!(add(&store, &read, F).await.unwrap());
        assert_eq!(stored(&store, &key).await, list(&["example.com/hold", F]));
    }

    #[tokio::test]
    async fn stale_remove_of_vanished_object_is_not_found() {
        let store = MemoryStore::new();
        let key = store.put_secret(secret(&[F])).await;
        let read = store.secret(&key).await.unwrap();
        store.delete_secret(&key).await;
        remove(&store, &store.secret(&key).await.unwrap(), F)
            .await
            .unwrap();
        assert!(store.secret(&key).await.is_none());

        let err = remove(&store, &read, F).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn lost_race_is_replanned_on_fresh_read() {
        let store = MemoryStore::new();
        let key = store.put_secret(secret(&[])).await;
        let read = store.secret(&key).await.unwrap();
        store
            .interleave_write(TargetKind::Secret, &key, list(&["x"]))
            .await;

        assert!(add(&store, &read, F).await.unwrap());
        assert_eq!(stored(&store, &key).await, list(&["x", F]));
    }
}
