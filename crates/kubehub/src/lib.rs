//! podcheck kubehub: kube-rs backed `PodCluster` and credential discovery

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Event, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use metrics::{counter, histogram};
use podcheck_core::{ClusterError, EventRecord, EventSelector, PodCluster, PodHandle, PodPhase, PodRef, PodTemplate};
use tracing::{debug, info};

/// `PodCluster` over a shared kube `Client`. Cheap to clone; safe for concurrent watches.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Infer credentials (kubeconfig or in-cluster) and resolve the target namespace.
pub async fn connect(namespace: Option<&str>) -> Result<(KubeCluster, String)> {
    let config = kube::Config::infer().await.context("inferring kube config")?;
    let ns = namespace.map(|s| s.to_string()).unwrap_or_else(|| config.default_namespace.clone());
    let client = Client::try_from(config).context("building kube client")?;
    info!(ns = %ns, "kube client ready");
    Ok((KubeCluster::new(client), ns))
}

/// Build the single-container manifest for a template.
pub fn pod_manifest(template: &PodTemplate) -> Pod {
    Pod {
        metadata: ObjectMeta { name: Some(template.name.clone()), ..Default::default() },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: template.name.clone(),
                image: Some(template.image.clone()),
                command: Some(template.command.clone()),
                image_pull_policy: Some(template.pull_policy.as_str().to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Convert an API pod into identity + phase. The typed client strips `kind`, so it comes from the resource type.
pub fn handle_from_pod(pod: &Pod, fallback_namespace: &str) -> Result<PodHandle, ClusterError> {
    let meta = &pod.metadata;
    let name = meta.name.clone().ok_or_else(|| ClusterError::Decode("pod missing metadata.name".into()))?;
    let namespace = meta.namespace.clone().unwrap_or_else(|| fallback_namespace.to_string());
    let kind = <Pod as k8s_openapi::Resource>::KIND.to_string();
    let phase = PodPhase::from_status(pod.status.as_ref().and_then(|s| s.phase.as_deref()));
    Ok(PodHandle { pod: PodRef::new(name, namespace, meta.uid.clone(), Some(kind)), phase })
}

pub fn record_from_event(ev: &Event) -> EventRecord {
    EventRecord {
        event_type: ev.type_.clone().unwrap_or_default(),
        reason: ev.reason.clone().unwrap_or_default(),
        message: ev.message.clone().unwrap_or_default(),
        involved_uid: ev.involved_object.uid.clone(),
        involved_kind: ev.involved_object.kind.clone(),
    }
}

pub fn cluster_error(e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) => ClusterError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        kube::Error::SerdeError(se) => ClusterError::Decode(se.to_string()),
        other => ClusterError::Connection(other.to_string()),
    }
}

fn observe<T>(op: &'static str, started: Instant, res: kube::Result<T>) -> Result<T, ClusterError> {
    histogram!("podcheck_kube_request_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
    res.map_err(|e| {
        counter!("podcheck_kube_request_errors_total", 1, "op" => op);
        debug!(op, error = %e, "kube request failed");
        cluster_error(e)
    })
}

#[async_trait]
impl PodCluster for KubeCluster {
    async fn create_pod(&self, namespace: &str, template: &PodTemplate) -> Result<PodHandle, ClusterError> {
        let started = Instant::now();
        let res = self.pods(namespace).create(&PostParams::default(), &pod_manifest(template)).await;
        let pod = observe("create_pod", started, res)?;
        handle_from_pod(&pod, namespace)
    }

    async fn get_pod(&self, pod: &PodRef) -> Result<PodHandle, ClusterError> {
        let started = Instant::now();
        let res = self.pods(&pod.namespace).get(&pod.name).await;
        let fresh = observe("get_pod", started, res)?;
        handle_from_pod(&fresh, &pod.namespace)
    }

    async fn list_events(&self, selector: &EventSelector) -> Result<Vec<EventRecord>, ClusterError> {
        let started = Instant::now();
        let api: Api<Event> = Api::namespaced(self.client.clone(), &selector.namespace);
        let lp = ListParams::default().fields(&selector.to_field_selector());
        let list = observe("list_events", started, api.list(&lp).await)?;
        Ok(list.items.iter().map(record_from_event).collect())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<(), ClusterError> {
        let started = Instant::now();
        let res = self.pods(&pod.namespace).delete(&pod.name, &DeleteParams::default()).await;
        let _ = observe("delete_pod", started, res)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ObjectReference, PodStatus};
    use podcheck_core::ImagePullPolicy;

    #[test]
    fn manifest_has_single_never_pull_container() {
        let pod = pod_manifest(&PodTemplate::placeholder("probe-1", "registry.local/app:dev"));
        assert_eq!(pod.metadata.name.as_deref(), Some("probe-1"));
        let spec = pod.spec.expect("spec");
        assert_eq!(spec.containers.len(), 1);
        let c = &spec.containers[0];
        assert_eq!(c.name, "probe-1");
        assert_eq!(c.image.as_deref(), Some("registry.local/app:dev"));
        assert_eq!(c.command.as_deref(), Some(&["sleep".to_string(), "60".to_string()][..]));
        assert_eq!(c.image_pull_policy.as_deref(), Some(ImagePullPolicy::Never.as_str()));
    }

    #[test]
    fn manifest_serializes_pull_policy_field() {
        let pod = pod_manifest(&PodTemplate::placeholder("p", "img"));
        let v = serde_json::to_value(&pod).expect("serialize");
        assert_eq!(v["spec"]["containers"][0]["imagePullPolicy"], "Never");
    }

    #[test]
    fn handle_reads_identity_and_phase() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("p".into()),
                namespace: Some("builds".into()),
                uid: Some("0b7f".into()),
                ..Default::default()
            },
            status: Some(PodStatus { phase: Some("Running".into()), ..Default::default() }),
            ..Default::default()
        };
        let h = handle_from_pod(&pod, "default").expect("handle");
        assert_eq!(h.pod.namespace, "builds");
        assert_eq!(h.pod.uid.as_deref(), Some("0b7f"));
        assert_eq!(h.pod.kind.as_deref(), Some("Pod"));
        assert_eq!(h.phase, PodPhase::Running);
    }

    #[test]
    fn handle_without_status_is_unknown_and_uses_fallback_ns() {
        let pod = Pod { metadata: ObjectMeta { name: Some("p".into()), ..Default::default() }, ..Default::default() };
        let h = handle_from_pod(&pod, "default").expect("handle");
        assert_eq!(h.pod.namespace, "default");
        assert_eq!(h.pod.uid, None);
        assert_eq!(h.phase, PodPhase::Unknown);
    }

    #[test]
    fn handle_without_name_is_decode_error() {
        let err = handle_from_pod(&Pod::default(), "default").unwrap_err();
        assert!(matches!(err, ClusterError::Decode(_)));
    }

    #[test]
    fn event_conversion_fills_empty_strings() {
        let ev = Event {
            type_: Some("Warning".into()),
            reason: Some("ErrImageNeverPull".into()),
            message: None,
            involved_object: ObjectReference { uid: Some("u1".into()), kind: Some("Pod".into()), ..Default::default() },
            ..Default::default()
        };
        let r = record_from_event(&ev);
        assert_eq!(r.event_type, "Warning");
        assert!(r.is_fatal());
        assert_eq!(r.message, "");
        assert_eq!(r.involved_uid.as_deref(), Some("u1"));
    }

    #[test]
    fn api_errors_keep_code_and_reason() {
        let e = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "pods \"p\" already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        });
        match cluster_error(e) {
            ClusterError::Api { code, reason, .. } => {
                assert_eq!(code, 409);
                assert_eq!(reason, "AlreadyExists");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
