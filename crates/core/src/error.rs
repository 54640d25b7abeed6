use thiserror::Error;

use crate::ReportedEventKey;

/// Failure of a single control-plane request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("connection: {0}")]
    Connection(String),
    #[error("decode: {0}")]
    Decode(String),
}

/// Terminal failure of one watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Nothing was created, so nothing is cleaned up.
    #[error("creating pod {name}: {source}")]
    Creation {
        name: String,
        #[source]
        source: ClusterError,
    },
    /// The cluster reported a condition that waiting cannot fix.
    #[error("{0}")]
    FatalEvent(ReportedEventKey),
    /// An event list or status get failed; not retried.
    #[error(transparent)]
    Infra(#[from] ClusterError),
    #[error("pod never started")]
    Exhausted { attempts: u32 },
    #[error("watch cancelled")]
    Cancelled,
}

impl WatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::Creation { .. } => "creation",
            WatchError::FatalEvent(_) => "fatal_event",
            WatchError::Infra(_) => "infra",
            WatchError::Exhausted { .. } => "exhausted",
            WatchError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventRecord;

    #[test]
    fn infra_error_displays_unchanged() {
        let inner = ClusterError::Connection("dial tcp 10.0.0.1:6443: connection refused".into());
        let err = WatchError::from(inner.clone());
        assert_eq!(err.to_string(), inner.to_string());
        assert_eq!(err.kind(), "infra");
    }

    #[test]
    fn fatal_event_displays_event_line() {
        let ev = EventRecord {
            event_type: "Warning".into(),
            reason: "ErrImageNeverPull".into(),
            message: "image not present".into(),
            ..Default::default()
        };
        let err = WatchError::FatalEvent(ReportedEventKey::new(&ev, "p"));
        assert_eq!(err.to_string(), "Warning:p:ErrImageNeverPull:image not present");
    }

    #[test]
    fn exhausted_says_never_started() {
        assert_eq!(WatchError::Exhausted { attempts: 100 }.to_string(), "pod never started");
    }
}
