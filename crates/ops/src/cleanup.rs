//! Scoped deletion of a created pod.

use std::sync::Arc;

use metrics::counter;
use podcheck_core::{ClusterError, PodCluster, PodRef, WatchObserver};
use tracing::debug;

/// Deletes the pod exactly once: explicitly via [`PodCleanup::run`], or on drop if the
/// owning future was abandoned before reaching it.
pub struct PodCleanup {
    cluster: Arc<dyn PodCluster>,
    observer: Arc<dyn WatchObserver>,
    pod: Option<PodRef>,
}

impl PodCleanup {
    pub fn new(cluster: Arc<dyn PodCluster>, observer: Arc<dyn WatchObserver>, pod: PodRef) -> Self {
        Self { cluster, observer, pod: Some(pod) }
    }

    /// Pod still owed a delete, if any.
    pub fn pending(&self) -> Option<&PodRef> {
        self.pod.as_ref()
    }

    /// Issue the delete now. Failures are reported as warnings only.
    pub async fn run(mut self) {
        if let Some(pod) = self.pod.take() {
            delete_best_effort(self.cluster.as_ref(), self.observer.as_ref(), &pod).await;
        }
    }
}

impl Drop for PodCleanup {
    fn drop(&mut self) {
        let Some(pod) = self.pod.take() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let cluster = self.cluster.clone();
                let observer = self.observer.clone();
                rt.spawn(async move { delete_best_effort(cluster.as_ref(), observer.as_ref(), &pod).await });
            }
            Err(_) => self
                .observer
                .on_warning(&format!("failed to clean up pod {}: no async runtime available", pod.name)),
        }
    }
}

async fn delete_best_effort(cluster: &dyn PodCluster, observer: &dyn WatchObserver, pod: &PodRef) {
    match cluster.delete_pod(pod).await {
        Ok(()) => debug!(pod = %pod, "pod deleted"),
        // Already gone, or never created
        Err(ClusterError::Api { code: 404, .. }) => debug!(pod = %pod, "pod not found during cleanup"),
        Err(e) => {
            counter!("podcheck_cleanup_failures_total", 1);
            observer.on_warning(&format!("failed to clean up pod {}: {}", pod.name, e));
        }
    }
}
