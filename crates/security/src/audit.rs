//! Audit logging: structured identity events.
//!
//! Every verification outcome and every provisioning side effect is recorded
//! here. Entries go to the configured sinks (tracing by default) and the
//! most recent ones are kept in memory for inspection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many entries the in-memory tail keeps.
const DEFAULT_RETAINED: usize = 1024;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Email of the identity, or "anonymous" when unknown.
    pub actor: String,
    /// Tenant the event concerns, when known.
    pub tenant: Option<String>,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// The credential a request presented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    BearerToken,
    SessionCookie,
    DevLogin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    IdentityVerified { credential: Credential },
    AuthFailure { credential: Credential },
    InactiveRejected,
    LoginStateRejected,
    SessionIssued,
    TenantProvisioned { name: String },
    UserProvisioned { is_admin: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

pub struct AuditLogger {
    entries: std::sync::Mutex<VecDeque<AuditEntry>>,
    retained: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }
}

impl AuditLogger {
    /// A logger that only keeps entries in memory.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: std::sync::Mutex::new(VecDeque::new()),
            retained: DEFAULT_RETAINED,
            sinks,
        }
    }

    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        tenant: Option<&str>,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            tenant: tenant.map(str::to_string),
            outcome,
            details,
        };

        for sink in &self.sinks {
            sink.record(&entry);
        }

        let mut entries = self.lock();
        if entries.len() == self.retained {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writes entries as structured `tracing` events.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        match entry.outcome {
            AuditOutcome::Success => tracing::info!(
                event = ?entry.event,
                actor = %entry.actor,
                tenant = ?entry.tenant,
                "AUDIT"
            ),
            AuditOutcome::Failure | AuditOutcome::Denied => tracing::warn!(
                event = ?entry.event,
                actor = %entry.actor,
                tenant = ?entry.tenant,
                outcome = ?entry.outcome,
                details = ?entry.details,
                "AUDIT"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn log_and_filter() {
        let logger = AuditLogger::new();
        logger.log(
            AuditEvent::IdentityVerified { credential: Credential::BearerToken },
            "ana@example.com",
            Some("t1"),
            AuditOutcome::Success,
            None,
        );
        logger.log(
            AuditEvent::AuthFailure { credential: Credential::SessionCookie },
            "anonymous",
            None,
            AuditOutcome::Failure,
            Some("signature verification failed".into()),
        );

        assert_eq!(logger.count(), 2);
        let failures = logger.entries_by_outcome(&AuditOutcome::Failure);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].actor, "anonymous");
    }

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let mut logger = AuditLogger::new();
        logger.retained = 3;
        for i in 0..5 {
            logger.log(AuditEvent::SessionIssued, &format!("user{i}"), None, AuditOutcome::Success, None);
        }
        let actors: Vec<String> = logger.entries().into_iter().map(|e| e.actor).collect();
        assert_eq!(actors, vec!["user2", "user3", "user4"]);
    }

    #[test]
    fn event_serialization() {
        let json = serde_json::to_value(AuditEvent::AuthFailure {
            credential: Credential::DevLogin,
        })
        .unwrap();
        assert_eq!(json["type"], "auth_failure");
        assert_eq!(json["credential"], "dev_login");
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.actor.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink { received: received.clone() })]);
        logger.log(AuditEvent::InactiveRejected, "bo@example.com", Some("t1"), AuditOutcome::Denied, None);

        assert_eq!(*received.lock().unwrap(), vec!["bo@example.com".to_string()]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::new());
        assert!(debug_str.contains("entry_count"));
    }
}
