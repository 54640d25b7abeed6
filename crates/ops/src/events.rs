//! Per-watch event dedup and fatal-reason classification.

use metrics::counter;
use podcheck_core::{ClusterError, EventRecord, EventSelector, PodCluster, PodRef, ReportedEventKey, ReportedEvents, WatchObserver};

/// Outcome of one event poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPoll {
    Clear,
    /// A fatal event was reported; the key is its formatted line.
    Fatal(ReportedEventKey),
}

impl EventPoll {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventPoll::Fatal(_))
    }
}

/// Remembers which event keys were already reported during one watch.
#[derive(Debug, Default)]
pub struct EventTracker {
    reported: ReportedEvents,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> &ReportedEvents {
        &self.reported
    }

    /// List events scoped to `pod` and report the new ones. Query errors are returned unchanged.
    pub async fn poll(
        &mut self,
        cluster: &dyn PodCluster,
        pod: &PodRef,
        observer: &dyn WatchObserver,
    ) -> Result<EventPoll, ClusterError> {
        let events = cluster.list_events(&EventSelector::for_pod(pod)).await?;
        Ok(self.absorb(pod, &events, observer))
    }

    /// Process fetched events in order. Stops at the first new fatal event.
    pub fn absorb(&mut self, pod: &PodRef, events: &[EventRecord], observer: &dyn WatchObserver) -> EventPoll {
        for ev in events {
            // The backend may return more than the selector asked for
            if !ev.involves(pod) {
                continue;
            }
            let key = ReportedEventKey::new(ev, &pod.name);
            if !self.reported.insert(key.clone()) {
                continue;
            }
            counter!("podcheck_events_reported_total", 1);
            observer.on_event(pod, &key, ev);
            if ev.is_fatal() {
                return EventPoll::Fatal(key);
            }
        }
        EventPoll::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podcheck_core::FATAL_EVENT_REASON;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl WatchObserver for Lines {
        fn on_event(&self, _pod: &PodRef, key: &ReportedEventKey, _record: &EventRecord) {
            self.0.lock().unwrap().push(key.to_string());
        }
        fn on_warning(&self, _message: &str) {}
    }

    fn pod() -> PodRef {
        PodRef::new("p", "ns", Some("u1".into()), Some("Pod".into()))
    }

    fn ev(uid: &str, reason: &str, message: &str) -> EventRecord {
        EventRecord {
            event_type: "Normal".into(),
            reason: reason.into(),
            message: message.into(),
            involved_uid: Some(uid.into()),
            involved_kind: Some("Pod".into()),
        }
    }

    #[test]
    fn reports_each_key_once_across_polls() {
        let lines = Lines::default();
        let mut tracker = EventTracker::new();
        let batch = vec![ev("u1", "Scheduled", "ok"), ev("u1", "Scheduled", "ok"), ev("u1", "Pulled", "present")];
        assert_eq!(tracker.absorb(&pod(), &batch, &lines), EventPoll::Clear);
        assert_eq!(tracker.absorb(&pod(), &batch, &lines), EventPoll::Clear);
        assert_eq!(*lines.0.lock().unwrap(), vec!["Normal:p:Scheduled:ok", "Normal:p:Pulled:present"]);
        assert_eq!(tracker.reported().len(), 2);
    }

    #[test]
    fn skips_events_for_other_instances() {
        let lines = Lines::default();
        let mut tracker = EventTracker::new();
        let batch = vec![ev("old-uid", FATAL_EVENT_REASON, "stale"), ev("u1", "Scheduled", "ok")];
        assert_eq!(tracker.absorb(&pod(), &batch, &lines), EventPoll::Clear);
        assert_eq!(*lines.0.lock().unwrap(), vec!["Normal:p:Scheduled:ok"]);
    }

    #[test]
    fn stops_at_first_fatal_event() {
        let lines = Lines::default();
        let mut tracker = EventTracker::new();
        let batch = vec![
            ev("u1", "Scheduled", "ok"),
            ev("u1", FATAL_EVENT_REASON, "image not present with pull policy of Never"),
            ev("u1", "Failed", "later"),
        ];
        let poll = tracker.absorb(&pod(), &batch, &lines);
        assert!(poll.is_fatal());
        match poll {
            EventPoll::Fatal(key) => assert!(key.as_str().ends_with("image not present with pull policy of Never")),
            EventPoll::Clear => unreachable!(),
        }
        // Events after the fatal one are not reported
        assert_eq!(lines.0.lock().unwrap().len(), 2);
    }
}
