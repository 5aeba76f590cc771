/// Notifications the core emits towards the render sink. The core never
/// touches presentation; whoever owns the UI listens to these and re-reads
/// the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// The aggregate total/online counters changed.
    CountersChanged,
    /// A single device's list entry changed.
    DeviceChanged(String),
    /// The detail view of the given device changed; only emitted while that
    /// exact device's detail view is open.
    DetailChanged(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

/// A transient user-visible message, e.g. "Network connection restored".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Notification {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notification {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}
