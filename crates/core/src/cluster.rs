use async_trait::async_trait;

use crate::{ClusterError, EventRecord, EventSelector, PodHandle, PodPhase, PodRef, PodTemplate, ReportedEventKey};

/// The control-plane requests a watch needs. Implementations must be safe to share
/// between concurrent watches.
#[async_trait]
pub trait PodCluster: Send + Sync {
    async fn create_pod(&self, namespace: &str, template: &PodTemplate) -> Result<PodHandle, ClusterError>;

    async fn get_pod(&self, pod: &PodRef) -> Result<PodHandle, ClusterError>;

    /// List events matching the selector, in server order.
    async fn list_events(&self, selector: &EventSelector) -> Result<Vec<EventRecord>, ClusterError>;

    async fn delete_pod(&self, pod: &PodRef) -> Result<(), ClusterError>;
}

/// Sink for what a watch reports.
pub trait WatchObserver: Send + Sync {
    /// Called once per distinct event key.
    fn on_event(&self, pod: &PodRef, key: &ReportedEventKey, record: &EventRecord);

    fn on_warning(&self, message: &str);

    fn on_created(&self, _pod: &PodRef, _image: &str) {}

    fn on_phase(&self, _pod: &PodRef, _phase: PodPhase) {}
}
