use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct RefGuardConfig {
    #[envconfig(from = "OPRC_REFGUARD_PROFILE", default = "dev")]
    pub profile: String,

    /// Restrict the watch to one namespace; all namespaces when unset.
    /// Env: OPRC_REFGUARD_WATCH_NAMESPACE
    #[envconfig(from = "OPRC_REFGUARD_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Concurrent reconcile workers (profile default: dev=1, edge=2, full=5)
    /// Env: OPRC_REFGUARD_WORKERS
    #[envconfig(from = "OPRC_REFGUARD_WORKERS")]
    pub workers: Option<usize>,

    /// How long to wait before retrying a cluster whose referenced secret
    /// does not exist yet.
    /// Env: OPRC_REFGUARD_MISSING_REQUEUE_SECS
    #[envconfig(from = "OPRC_REFGUARD_MISSING_REQUEUE_SECS", default = "30")]
    pub missing_requeue_secs: u64,

    /// Delay before a failed reconcile pass is retried.
    /// Env: OPRC_REFGUARD_ERROR_REQUEUE_SECS
    #[envconfig(from = "OPRC_REFGUARD_ERROR_REQUEUE_SECS", default = "60")]
    pub error_requeue_secs: u64,
}

impl RefGuardConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    pub fn apply_profile_defaults(mut self) -> Self {
        let def_workers = match self.profile.as_str() {
            "edge" => 2,
            "full" | "prod" | "production" => 5,
            _ /* dev */ => 1,
        };
        if self.workers.is_none() {
            self.workers = Some(def_workers);
        }
        self
    }

    pub fn missing_child_requeue(&self) -> Duration {
        Duration::from_secs(self.missing_requeue_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
