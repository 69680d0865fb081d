//! The ingestion pipeline: transcript in, script out.
//!
//! Ingestions run concurrently across projects but serialize within one via
//! a per-project async lock, held across Analyst → Reconciler → Designer →
//! publish so overlapping interviews on the same project produce a total
//! order of script versions. LLM calls are long; nothing coarser than the
//! project lock is ever held across one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eidetic_agents::{AnalystAgent, DesignerAgent, SafetyStatus, ScriptSafetyGuard};
use eidetic_core::{
    Interview, InterviewScript, PipelineError, ProjectState, Settings, StoreError,
};
use eidetic_storage::ProjectStore;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::events::{EventBus, ProjectEvent};
use crate::reconcile::{reconcile, ReconcileConfig};
use crate::voice::ScriptPublisher;

/// Result of one `ingest` call.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Processed {
        interview_id: String,
        script_version: Option<u32>,
    },
    /// The conversation id was already ingested; nothing changed.
    Duplicate,
}

pub struct Pipeline {
    store: Arc<ProjectStore>,
    analyst: AnalystAgent,
    designer: DesignerAgent,
    safety: ScriptSafetyGuard,
    publisher: Arc<dyn ScriptPublisher>,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<ProjectStore>,
        analyst: AnalystAgent,
        designer: DesignerAgent,
        publisher: Arc<dyn ScriptPublisher>,
        bus: Arc<EventBus>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            analyst,
            designer,
            safety: ScriptSafetyGuard::new(),
            publisher,
            bus,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<ProjectStore> {
        &self.store
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig::from(self.settings.as_ref())
    }

    // ========================================================================
    // Project lifecycle
    // ========================================================================

    /// Create a project: Designer seeds propositions + script v1, the store
    /// commits them, and the script is published when an agent is bound.
    pub async fn create_project(
        &self,
        project_id: &str,
        research_question: &str,
        seed_angles: Vec<String>,
        voice_agent_id: Option<String>,
    ) -> anyhow::Result<ProjectState> {
        if self.store.exists(project_id) {
            return Err(StoreError::AlreadyExists(project_id.to_string()).into());
        }

        let (propositions, script) = self
            .designer
            .generate_initial(research_question, &seed_angles)
            .await?;

        let mut project = ProjectState::new(project_id, research_question, seed_angles);
        project.voice_agent_id = voice_agent_id;
        project.counters.proposition = propositions.len() as u32;
        project.propositions = propositions;
        let script = self.apply_safety(&project, script);
        project.scripts = vec![script];
        self.store.create(&project)?;

        self.publish_current(&mut project).await;
        self.store.save(&project)?;
        info!(project = project_id, "project created with script v1");
        Ok(project)
    }

    pub fn delete_project(&self, project_id: &str) -> Result<(), StoreError> {
        self.store.delete(project_id)?;
        self.bus.remove(project_id);
        Ok(())
    }

    /// Re-publish the current script (manual recovery after publish failure).
    pub async fn republish(&self, project_id: &str) -> anyhow::Result<u32> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let mut project = self.store.load(project_id)?;
        let Some(script) = project.current_script() else {
            anyhow::bail!("project '{project_id}' has no script to publish");
        };
        let version = script.version;
        self.publish_current(&mut project).await;
        self.store.save(&project)?;
        if project.publish_pending {
            anyhow::bail!("publish of script v{version} failed; still pending");
        }
        Ok(version)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Process one delivered transcript end to end.
    pub async fn ingest(
        &self,
        project_id: &str,
        conversation_id: &str,
        transcript: &str,
        language: Option<String>,
    ) -> Result<IngestOutcome, PipelineError> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let mut project = self.store.load(project_id)?;
        if project.has_processed(conversation_id) {
            info!(project = project_id, conversation = conversation_id, "duplicate webhook ignored");
            return Ok(IngestOutcome::Duplicate);
        }

        // Commit the interview before anything fallible: the transcript is
        // kept even if every later stage fails, and the committed record is
        // what makes redeliveries of this conversation short-circuit above.
        let interview_id = project.counters.next_interview();
        project.interviews.push(Interview {
            id: interview_id.clone(),
            conversation_id: conversation_id.to_string(),
            transcript: transcript.to_string(),
            language,
            script_version_used: project.scripts.last().map(|s| s.version),
            received_at: Utc::now(),
            analysis_error: None,
        });
        self.store.save(&project)?;

        let budget = Duration::from_secs(self.settings.ingest_budget_secs.max(1));
        let phase = self.post_interview_phase(&mut project, &interview_id, transcript);
        match tokio::time::timeout(budget, phase).await {
            Ok(result) => result,
            Err(_) => {
                let budget_secs = self.settings.ingest_budget_secs;
                error!(project = project_id, interview = %interview_id, budget_secs, "ingestion abandoned over budget");
                // The phase future is gone; reload whatever it committed and
                // record the abandonment on the interview.
                let mut project = self.store.load(project_id)?;
                if let Some(i) = project
                    .interviews
                    .iter_mut()
                    .find(|i| i.id == interview_id)
                {
                    i.analysis_error = Some(format!("abandoned after {budget_secs}s budget"));
                }
                self.store.save(&project)?;
                self.bus.emit(
                    project_id,
                    ProjectEvent::AnalysisFailed {
                        interview_id,
                        detail: format!("ingestion exceeded {budget_secs}s budget"),
                    },
                );
                Err(PipelineError::BudgetExceeded { budget_secs })
            }
        }
    }

    async fn post_interview_phase(
        &self,
        project: &mut ProjectState,
        interview_id: &str,
        transcript: &str,
    ) -> Result<IngestOutcome, PipelineError> {
        let project_id = project.id.clone();

        // -- analysis --------------------------------------------------------
        let diff = match self
            .analyst
            .analyze(
                transcript,
                interview_id,
                &project.evidence,
                &project.propositions,
                project.metrics.mode,
            )
            .await
        {
            Ok(diff) => diff,
            Err(err) => {
                let detail = err.to_string();
                warn!(project = %project_id, interview = interview_id, %detail, "analysis failed");
                if let Some(i) = project.interviews.iter_mut().find(|i| i.id == interview_id) {
                    i.analysis_error = Some(detail.clone());
                }
                self.store.save(project)?;
                self.bus.emit(
                    &project_id,
                    ProjectEvent::AnalysisFailed {
                        interview_id: interview_id.to_string(),
                        detail: detail.clone(),
                    },
                );
                return Err(PipelineError::AnalysisFailed {
                    interview_id: interview_id.to_string(),
                    detail,
                });
            }
        };

        // -- reconcile + commit ----------------------------------------------
        let outcome = reconcile(project, diff, interview_id, &self.reconcile_config());
        self.store.save(project)?;
        self.bus.emit_all(&project_id, outcome.events);

        // -- script regeneration ---------------------------------------------
        let previous = project.current_script().cloned();
        match self.designer.update_script(project, previous.as_ref()).await {
            Ok(script) => {
                let script = self.apply_safety(project, script);
                let version = script.version;
                let summary = script.changes_summary.clone();
                project.scripts.push(script);
                self.store.save(project)?;

                // -- publication --------------------------------------------
                self.publish_current(project).await;
                self.store.save(project)?;
                self.bus.emit(
                    &project_id,
                    ProjectEvent::ScriptUpdated {
                        version,
                        changes_summary: summary,
                        publish_pending: project.publish_pending,
                    },
                );
            }
            Err(err) => {
                // Previous script stays active; future interviews proceed.
                let version_kept = previous.map(|s| s.version).unwrap_or(0);
                warn!(project = %project_id, %err, version_kept, "script generation failed");
                self.bus.emit(
                    &project_id,
                    ProjectEvent::ScriptGenerationFailed {
                        version_kept,
                        detail: err.to_string(),
                    },
                );
            }
        }

        Ok(IngestOutcome::Processed {
            interview_id: interview_id.to_string(),
            script_version: project.current_script().map(|s| s.version),
        })
    }

    /// Run the Designer's output through the safety guard before it is
    /// persisted or published. A rewrite is recorded in the changes summary
    /// so operators can see the guard fired.
    fn apply_safety(&self, project: &ProjectState, script: InterviewScript) -> InterviewScript {
        let outcome = self
            .safety
            .enforce(&script, &project.research_question, &project.propositions);
        if outcome.status != SafetyStatus::Ok {
            warn!(
                project = %project.id,
                version = script.version,
                status = outcome.status.as_str(),
                violations = outcome.violations.len(),
                "script safety guard rewrote the script"
            );
        }
        if outcome.topic_redirect_applied {
            info!(project = %project.id, version = script.version, "topic drift redirected to the research question");
        }

        let mut script = outcome.script;
        if outcome.status != SafetyStatus::Ok {
            let marker = format!(
                "safety_guard={} violations={}",
                outcome.status.as_str(),
                outcome.violations.len()
            );
            if !script.changes_summary.contains(&marker) {
                let summary = script.changes_summary.trim();
                script.changes_summary = if summary.is_empty() {
                    format!("Script updated [{marker}]")
                } else {
                    format!("{summary} [{marker}]")
                };
            }
        }
        script
    }

    /// Push the newest script to the voice runtime, tracking pending state.
    /// The script stays persisted either way; a failed push is retried by
    /// the next ingestion or an explicit republish.
    async fn publish_current(&self, project: &mut ProjectState) {
        let Some(agent_id) = project.voice_agent_id.clone() else {
            return;
        };
        let Some(script) = project.current_script() else {
            return;
        };
        let version = script.version;
        let prompt = self.designer.build_interviewer_prompt(script);

        match self.publisher.publish(&agent_id, &prompt).await {
            Ok(()) => {
                project.publish_pending = false;
                project.publish_pending_version = None;
                project.last_publish_at = Some(Utc::now());
                info!(project = %project.id, version, "script published");
            }
            Err(err) => {
                project.publish_pending = true;
                project.publish_pending_version = Some(version);
                warn!(project = %project.id, version, %err, "script publish failed");
                self.bus.emit(
                    &project.id,
                    ProjectEvent::PublishFailed {
                        version,
                        detail: err.to_string(),
                    },
                );
            }
        }
    }
}
