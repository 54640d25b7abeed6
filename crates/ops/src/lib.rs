//! podcheck ops: start a placeholder pod, wait for it to converge, always delete it.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use podcheck_core::{
    EventRecord, PodCluster, PodHandle, PodPhase, PodRef, PodTemplate, ReportedEventKey, WatchConfig, WatchError,
    WatchObserver,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cleanup;
mod events;

pub use cleanup::PodCleanup;
pub use events::{EventPoll, EventTracker};

/// Successful end of a watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchOutcome {
    pub pod: PodRef,
    pub phase: PodPhase,
    /// Number of poll iterations taken, starting at 1.
    pub attempts: u32,
}

/// Default observer: everything goes to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl WatchObserver for LogObserver {
    fn on_event(&self, pod: &PodRef, key: &ReportedEventKey, record: &EventRecord) {
        info!(pod = %pod, event_type = %record.event_type, reason = %record.reason, "{}", key);
    }

    fn on_warning(&self, message: &str) {
        warn!("{}", message);
    }

    fn on_created(&self, pod: &PodRef, image: &str) {
        info!(pod = %pod, uid = ?pod.uid, image = %image, "pod created; waiting for pod to start");
    }

    fn on_phase(&self, pod: &PodRef, phase: PodPhase) {
        info!(pod = %pod, phase = %phase, "pod phase");
    }
}

/// Pod Lifecycle Controller. One instance may serve many concurrent watches;
/// all per-watch state lives inside [`PodWatcher::run`].
#[derive(Clone)]
pub struct PodWatcher {
    cluster: Arc<dyn PodCluster>,
    observer: Arc<dyn WatchObserver>,
    config: WatchConfig,
}

impl PodWatcher {
    pub fn new(cluster: Arc<dyn PodCluster>, observer: Arc<dyn WatchObserver>, config: WatchConfig) -> Self {
        Self { cluster, observer, config }
    }

    /// Create `name` running `image` in `namespace` and wait until it is Running or Succeeded.
    ///
    /// The pod is deleted on every exit path once a create has been issued, including
    /// cancellation while the create is still in flight.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        name: &str,
        image: &str,
        namespace: &str,
    ) -> Result<WatchOutcome, WatchError> {
        if cancel.is_cancelled() {
            return Err(WatchError::Cancelled);
        }
        let started = Instant::now();
        let result = self.create_and_converge(cancel, name, image, namespace).await;
        let outcome = match &result {
            Ok(_) => "converged",
            Err(e) => e.kind(),
        };
        histogram!("podcheck_watch_ms", started.elapsed().as_secs_f64() * 1000.0, "outcome" => outcome);
        result
    }

    async fn create_and_converge(
        &self,
        cancel: &CancellationToken,
        name: &str,
        image: &str,
        namespace: &str,
    ) -> Result<WatchOutcome, WatchError> {
        info!(pod = %name, ns = %namespace, image = %image, "starting pod");
        let template = PodTemplate::placeholder(name, image);
        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The server may have created it anyway; delete by name
                let pending = PodRef::new(name, namespace, None, None);
                PodCleanup::new(self.cluster.clone(), self.observer.clone(), pending).run().await;
                return Err(WatchError::Cancelled);
            }
            res = self.cluster.create_pod(namespace, &template) => {
                res.map_err(|source| WatchError::Creation { name: name.to_string(), source })?
            }
        };
        self.observer.on_created(&created.pod, image);

        let cleanup = PodCleanup::new(self.cluster.clone(), self.observer.clone(), created.pod.clone());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WatchError::Cancelled),
            r = self.converge(created) => r,
        };
        cleanup.run().await;
        result
    }

    async fn converge(&self, mut handle: PodHandle) -> Result<WatchOutcome, WatchError> {
        let mut tracker = EventTracker::new();
        for attempt in 0..self.config.max_tries {
            counter!("podcheck_watch_attempts_total", 1);
            if let EventPoll::Fatal(key) = tracker.poll(self.cluster.as_ref(), &handle.pod, self.observer.as_ref()).await? {
                // Waiting cannot fix this
                return Err(WatchError::FatalEvent(key));
            }

            tokio::time::sleep(self.config.backoff.delay(attempt)).await;

            handle = self.cluster.get_pod(&handle.pod).await?;
            self.observer.on_phase(&handle.pod, handle.phase);
            if handle.phase.is_converged() {
                return Ok(WatchOutcome { pod: handle.pod, phase: handle.phase, attempts: attempt + 1 });
            }
        }
        Err(WatchError::Exhausted { attempts: self.config.max_tries })
    }
}
