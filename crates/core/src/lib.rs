//! podcheck core types: pod identity, events, dedup keys and the watch schedule.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

mod cluster;
mod error;

pub use cluster::{PodCluster, WatchObserver};
pub use error::{ClusterError, WatchError};

/// Event reason reported when the node does not have the image and pulls are forbidden.
pub const FATAL_EVENT_REASON: &str = "ErrImageNeverPull";

pub const DEFAULT_MAX_TRIES: u32 = 100;

/// Long-lived command so the watcher, not the workload, decides how long the pod lives.
pub const PLACEHOLDER_COMMAND: [&str; 2] = ["sleep", "60"];

pub mod prelude {
    pub use super::{
        Backoff, ClusterError, EventRecord, EventSelector, ImagePullPolicy, PodCluster, PodHandle, PodPhase, PodRef,
        PodTemplate, ReportedEventKey, ReportedEvents, WatchConfig, WatchError, WatchObserver,
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Map the orchestrator's `status.phase` string; anything unrecognised is `Unknown`.
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }

    /// Running or Succeeded.
    pub fn is_converged(&self) -> bool {
        matches!(self, PodPhase::Running | PodPhase::Succeeded)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one pod instance. `uid`/`kind` are `None` until the server reports them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub kind: Option<String>,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, uid: Option<String>, kind: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: uid.filter(|s| !s.is_empty()),
            kind: kind.filter(|s| !s.is_empty()),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Last observed state of a pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodHandle {
    pub pod: PodRef,
    pub phase: PodPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    #[default]
    Never,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePullPolicy::Always => "Always",
            ImagePullPolicy::IfNotPresent => "IfNotPresent",
            ImagePullPolicy::Never => "Never",
        }
    }
}

/// Single-container pod to create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodTemplate {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub pull_policy: ImagePullPolicy,
}

impl PodTemplate {
    /// Placeholder pod: the image must already be resident on the node.
    pub fn placeholder(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: PLACEHOLDER_COMMAND.iter().map(|s| s.to_string()).collect(),
            pull_policy: ImagePullPolicy::Never,
        }
    }
}

/// A cluster event as observed. Missing text fields are empty strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventRecord {
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub involved_uid: Option<String>,
    pub involved_kind: Option<String>,
}

impl EventRecord {
    /// True when the event's involved object is exactly this pod instance.
    pub fn involves(&self, pod: &PodRef) -> bool {
        self.involved_uid.as_deref().unwrap_or("") == pod.uid.as_deref().unwrap_or("")
    }

    pub fn is_fatal(&self) -> bool {
        self.reason == FATAL_EVENT_REASON
    }
}

/// Field-selector scope for events about one involved object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSelector {
    pub name: String,
    pub namespace: String,
    pub kind: Option<String>,
    pub uid: Option<String>,
}

impl EventSelector {
    pub fn for_pod(pod: &PodRef) -> Self {
        Self { name: pod.name.clone(), namespace: pod.namespace.clone(), kind: pod.kind.clone(), uid: pod.uid.clone() }
    }

    /// Render as `involvedObject.*` terms, keys sorted, absent keys omitted.
    pub fn to_field_selector(&self) -> String {
        let mut terms: Vec<String> = Vec::with_capacity(4);
        if let Some(kind) = &self.kind {
            terms.push(format!("involvedObject.kind={}", escape_field_value(kind)));
        }
        terms.push(format!("involvedObject.name={}", escape_field_value(&self.name)));
        terms.push(format!("involvedObject.namespace={}", escape_field_value(&self.namespace)));
        if let Some(uid) = &self.uid {
            terms.push(format!("involvedObject.uid={}", escape_field_value(uid)));
        }
        terms.join(",")
    }
}

fn escape_field_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        if matches!(c, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Dedup key `type:pod:reason:message`. Also the text that gets reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReportedEventKey(String);

impl ReportedEventKey {
    pub fn new(event: &EventRecord, pod_name: &str) -> Self {
        Self(format!("{}:{}:{}:{}", event.event_type, pod_name, event.reason, event.message))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportedEventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys already reported during one watch.
#[derive(Debug, Default)]
pub struct ReportedEvents {
    seen: FxHashSet<ReportedEventKey>,
}

impl ReportedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key had not been seen before.
    pub fn insert(&mut self, key: ReportedEventKey) -> bool {
        self.seen.insert(key)
    }

    pub fn contains(&self, key: &ReportedEventKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Linear backoff: `base + step * attempt`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub step: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(100), step: Duration::from_millis(20) }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_add(self.step.saturating_mul(attempt))
    }
}

/// Poll schedule for one watch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    pub max_tries: u32,
    pub backoff: Backoff,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { max_tries: DEFAULT_MAX_TRIES, backoff: Backoff::default() }
    }
}

impl WatchConfig {
    /// Defaults overridden by `PODCHECK_MAX_TRIES`, `PODCHECK_BASE_DELAY_MS` and `PODCHECK_STEP_DELAY_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WatchConfig::from_env`] with a custom variable source. Unparsable values keep the default.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let max_tries = get("PODCHECK_MAX_TRIES").and_then(|s| s.parse::<u32>().ok()).unwrap_or(d.max_tries);
        let base_ms = get("PODCHECK_BASE_DELAY_MS").and_then(|s| s.parse::<u64>().ok());
        let step_ms = get("PODCHECK_STEP_DELAY_MS").and_then(|s| s.parse::<u64>().ok());
        Self {
            max_tries: max_tries.max(1),
            backoff: Backoff {
                base: base_ms.map(Duration::from_millis).unwrap_or(d.backoff.base),
                step: step_ms.map(Duration::from_millis).unwrap_or(d.backoff.step),
            },
        }
    }
}
