use std::sync::{Arc, Mutex};

/// Structured audit record correlated with the request id the tower-http
/// layer assigned.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub name: &'static str,
    pub request_id: String,
    pub fid: Option<String>,
    pub attributes: Vec<(&'static str, String)>,
}

impl AuditEvent {
    pub fn new(name: &'static str, request_id: String) -> Self {
        Self {
            name,
            request_id,
            fid: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_fid(mut self, fid: impl Into<String>) -> Self {
        self.fid = Some(fid.into());
        self
    }

    pub fn with_attribute(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.attributes.push((key, value.into()));
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events and counters through tracing, and mirrors audit events
/// into an optional sink so tests can assert on them.
#[derive(Clone, Default)]
pub struct Observability {
    sink: Option<Arc<dyn AuditSink>>,
}

impl Observability {
    pub fn with_sink(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn audit(&self, event: AuditEvent) {
        tracing::info!(
            target: "coincast.audit",
            event = event.name,
            request_id = %event.request_id,
            fid = event.fid.as_deref().unwrap_or("-"),
            attributes = ?event.attributes,
            "audit event",
        );

        if let Some(sink) = &self.sink {
            sink.record(&event);
        }
    }

    pub fn increment_counter(&self, name: &'static str, request_id: &str) {
        tracing::debug!(
            target: "coincast.metrics",
            counter = name,
            request_id,
            "counter incremented",
        );
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_events_reach_the_sink() {
        let sink = Arc::new(RecordingAuditSink::default());
        let observability = Observability::with_sink(sink.clone());

        observability.audit(
            AuditEvent::new("alert.set", "req_1".to_string())
                .with_fid("7")
                .with_attribute("token_address", "0xabc"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "alert.set");
        assert_eq!(events[0].fid.as_deref(), Some("7"));
        assert_eq!(events[0].attributes[0], ("token_address", "0xabc".to_string()));
    }

    #[test]
    fn default_observability_has_no_sink() {
        let observability = Observability::default();
        observability.audit(AuditEvent::new("noop", "req_2".to_string()));
        observability.increment_counter("noop", "req_2");
    }
}
