//! Per-project event fan-out.
//!
//! One broadcast channel per project. Delivery is best-effort and ordered
//! per subscriber; a subscriber that falls more than the backlog behind
//! loses oldest events first and continues from there. Subscribers joining
//! mid-stream receive only future events.

use std::collections::HashMap;

use eidetic_core::{Evidence, Proposition, PropositionStatus};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Incremental updates emitted after each commit, in the order the
/// Reconciler applied them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProjectEvent {
    NewEvidence {
        evidence: Evidence,
    },
    NewProposition {
        proposition: Proposition,
    },
    PropositionUpdated {
        id: String,
        confidence: f64,
        status: PropositionStatus,
    },
    PropositionMerged {
        source_ids: Vec<String>,
        merged_into: String,
    },
    PropositionPruned {
        id: String,
    },
    ScriptUpdated {
        version: u32,
        changes_summary: String,
        publish_pending: bool,
    },
    ScriptGenerationFailed {
        version_kept: u32,
        detail: String,
    },
    AnalysisFailed {
        interview_id: String,
        detail: String,
    },
    PublishFailed {
        version: u32,
        detail: String,
    },
}

impl ProjectEvent {
    /// Stream-facing event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProjectEvent::NewEvidence { .. } => "new_evidence",
            ProjectEvent::NewProposition { .. } => "new_proposition",
            ProjectEvent::PropositionUpdated { .. } => "proposition_updated",
            ProjectEvent::PropositionMerged { .. } => "proposition_merged",
            ProjectEvent::PropositionPruned { .. } => "proposition_pruned",
            ProjectEvent::ScriptUpdated { .. } => "script_updated",
            ProjectEvent::ScriptGenerationFailed { .. } => "script_generation_failed",
            ProjectEvent::AnalysisFailed { .. } => "analysis_failed",
            ProjectEvent::PublishFailed { .. } => "publish_failed",
        }
    }
}

/// Registry of per-project broadcast channels. Process-wide state, torn
/// down with the process; events are best-effort and not persisted.
pub struct EventBus {
    backlog: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ProjectEvent>>>,
}

impl EventBus {
    pub fn new(backlog: usize) -> Self {
        Self {
            backlog: backlog.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Join the stream for a project. Only future events are delivered.
    pub fn subscribe(&self, project_id: &str) -> broadcast::Receiver<ProjectEvent> {
        self.sender(project_id).subscribe()
    }

    /// Emit to all current subscribers; a project with no subscribers
    /// drops the event.
    pub fn emit(&self, project_id: &str, event: ProjectEvent) {
        let sender = self.sender(project_id);
        let delivered = sender.send(event.clone()).unwrap_or(0);
        debug!(project = project_id, event = event.name(), delivered, "event emitted");
    }

    pub fn emit_all(&self, project_id: &str, events: impl IntoIterator<Item = ProjectEvent>) {
        for event in events {
            self.emit(project_id, event);
        }
    }

    /// Drop a project's channel (project deletion).
    pub fn remove(&self, project_id: &str) {
        self.channels.lock().remove(project_id);
    }

    fn sender(&self, project_id: &str) -> broadcast::Sender<ProjectEvent> {
        let mut channels = self.channels.lock();
        channels
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(self.backlog).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pruned(id: &str) -> ProjectEvent {
        ProjectEvent::PropositionPruned { id: id.to_string() }
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe("p1");
        bus.emit("p1", pruned("P001"));
        bus.emit("p1", pruned("P002"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ProjectEvent::PropositionPruned { id } if id == "P001"));
        assert!(matches!(second, ProjectEvent::PropositionPruned { id } if id == "P002"));
    }

    #[tokio::test]
    async fn late_subscriber_misses_past_events() {
        let bus = EventBus::new(16);
        bus.emit("p1", pruned("P001"));
        let mut rx = bus.subscribe("p1");
        bus.emit("p1", pruned("P002"));

        let only = rx.recv().await.unwrap();
        assert!(matches!(only, ProjectEvent::PropositionPruned { id } if id == "P002"));
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest_first() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe("p1");
        for i in 0..5 {
            bus.emit("p1", pruned(&format!("P{i:03}")));
        }

        // The first recv reports the lag, then delivery resumes from the
        // oldest retained event.
        let lagged = rx.recv().await;
        assert!(matches!(
            lagged,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let next = rx.recv().await.unwrap();
        assert!(matches!(next, ProjectEvent::PropositionPruned { id } if id == "P003"));
    }

    #[tokio::test]
    async fn projects_are_isolated() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe("a");
        let mut rx_b = bus.subscribe("b");
        bus.emit("a", pruned("P001"));

        assert!(rx_a.recv().await.is_ok());
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn event_serializes_with_tag_and_data() {
        let json = serde_json::to_value(pruned("P001")).unwrap();
        assert_eq!(json["event"], "proposition_pruned");
        assert_eq!(json["data"]["id"], "P001");
    }
}
