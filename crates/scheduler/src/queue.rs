//! The fair-share queue and subtask lifecycle.
//!
//! Selection order for a claim: ascending project completion count, then
//! descending priority, then FIFO. Claimed subtasks stay resident so a
//! vanished worker times out into a requeue rather than losing the task.

use edgecoder_crypto::KeyRing;
use edgecoder_types::error::ScheduleError;
use edgecoder_types::task::{ResourceClass, Subtask, SubtaskResult};
use edgecoder_types::{AgentId, ProjectId, SubtaskId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Queue tuning.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Requeues (timeout or explicit) after which a subtask is surfaced failed.
    pub max_requeues: u32,
    /// Hard bound on resident ready+claimed subtasks.
    pub max_queued: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_requeues: 3,
            max_queued: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Ready,
    Claimed { by: AgentId, at_ms: u64 },
    Completed,
    Failed,
}

struct SubtaskState {
    subtask: Subtask,
    status: Status,
    requeues: u32,
    enqueue_seq: u64,
}

/// Ordering key inside one project: descending priority, then FIFO.
type ReadyKey = (i64, u64);

fn ready_key(priority: i32, seq: u64) -> ReadyKey {
    (-(priority as i64), seq)
}

#[derive(Default)]
struct ProjectState {
    completions: u64,
    ready: BTreeMap<ReadyKey, SubtaskId>,
}

#[derive(Default)]
struct Inner {
    projects: HashMap<ProjectId, ProjectState>,
    /// Projects with ready work, ordered by (completions, projectId).
    project_index: BTreeSet<(u64, ProjectId)>,
    subtasks: HashMap<SubtaskId, SubtaskState>,
    results: HashMap<SubtaskId, SubtaskResult>,
    next_seq: u64,
}

/// What `complete` retired, for the ordering chain and accrual.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub subtask: Subtask,
    pub result: SubtaskResult,
}

/// Point-in-time queue statistics for `/capacity` and load pressure.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    pub ready: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cpu_ready: u64,
    pub gpu_ready: u64,
}

/// The multi-tenant fair-share queue. All mutations go through one critical
/// section.
pub struct FairShareQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl FairShareQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a subtask to its project's queue.
    pub fn enqueue(&self, subtask: Subtask) -> Result<(), ScheduleError> {
        let mut inner = self.inner.lock();
        let resident = inner
            .subtasks
            .values()
            .filter(|s| matches!(s.status, Status::Ready | Status::Claimed { .. }))
            .count();
        if resident >= self.config.max_queued {
            return Err(ScheduleError::QueueFull);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let project_id = subtask.project_meta.project_id.clone();
        let key = ready_key(subtask.project_meta.priority, seq);
        let id = subtask.id.clone();

        let project = inner.projects.entry(project_id.clone()).or_default();
        let completions = project.completions;
        project.ready.insert(key, id.clone());
        inner.project_index.insert((completions, project_id));
        inner.subtasks.insert(
            id,
            SubtaskState {
                subtask,
                status: Status::Ready,
                requeues: 0,
                enqueue_seq: seq,
            },
        );
        Ok(())
    }

    /// Hand the fairest ready subtask to `agent_id`, or `None` when idle.
    pub fn claim(&self, agent_id: &str, now_ms: u64) -> Option<Subtask> {
        let mut inner = self.inner.lock();

        // Gather every project tied at the minimum completion count, then
        // choose the best head task among them by (priority desc, seq asc).
        let min_completions = inner.project_index.iter().next()?.0;
        let tied: Vec<ProjectId> = inner
            .project_index
            .iter()
            .take_while(|(c, _)| *c == min_completions)
            .map(|(_, p)| p.clone())
            .collect();

        let mut best: Option<(ReadyKey, ProjectId)> = None;
        for project_id in tied {
            if let Some(project) = inner.projects.get(&project_id) {
                if let Some((key, _)) = project.ready.iter().next() {
                    match &best {
                        Some((best_key, _)) if *key >= *best_key => {}
                        _ => best = Some((*key, project_id)),
                    }
                }
            }
        }
        let (key, project_id) = best?;

        let project = inner.projects.get_mut(&project_id)?;
        let subtask_id = project.ready.remove(&key)?;
        if project.ready.is_empty() {
            inner
                .project_index
                .remove(&(min_completions, project_id.clone()));
        }
        let state = inner.subtasks.get_mut(&subtask_id)?;
        state.status = Status::Claimed {
            by: agent_id.to_string(),
            at_ms: now_ms,
        };
        debug!(target: "scheduler", subtask = %subtask_id, agent = %agent_id, "claimed");
        Some(state.subtask.clone())
    }

    /// Retire a claimed subtask with its signed result.
    ///
    /// The report signature (when a key ring is supplied) must verify under
    /// the claiming agent's key; a bad signature rejects the result and
    /// requeues the subtask.
    pub fn complete(
        &self,
        result: SubtaskResult,
        keyring: Option<&KeyRing>,
        now_ms: u64,
    ) -> Result<CompletionOutcome, ScheduleError> {
        let mut inner = self.inner.lock();
        let state = inner
            .subtasks
            .get(&result.subtask_id)
            .ok_or_else(|| ScheduleError::NotFound(result.subtask_id.clone()))?;
        match &state.status {
            Status::Claimed { by, .. } if *by == result.agent_id => {}
            Status::Claimed { .. } => {
                return Err(ScheduleError::NoEligibleAgent(
                    "result from non-claiming agent".into(),
                ))
            }
            _ => return Err(ScheduleError::NotFound(result.subtask_id.clone())),
        }

        if let Some(ring) = keyring {
            let verified = result
                .report_signature
                .as_deref()
                .and_then(|sig| {
                    result
                        .signing_bytes()
                        .ok()
                        .map(|bytes| ring.verify(&result.agent_id, &bytes, sig, now_ms).is_ok())
                })
                .unwrap_or(false);
            if !verified {
                warn!(
                    target: "scheduler",
                    subtask = %result.subtask_id,
                    agent = %result.agent_id,
                    "result signature invalid, requeuing"
                );
                Self::requeue_locked(&self.config, &mut inner, &result.subtask_id);
                return Err(ScheduleError::NoEligibleAgent(
                    "result signature invalid".into(),
                ));
            }
        }

        let state = inner
            .subtasks
            .get_mut(&result.subtask_id)
            .ok_or_else(|| ScheduleError::NotFound(result.subtask_id.clone()))?;
        state.status = Status::Completed;
        let subtask = state.subtask.clone();
        let project_id = subtask.project_meta.project_id.clone();

        let project = inner.projects.entry(project_id.clone()).or_default();
        let old = project.completions;
        project.completions += 1;
        let has_ready = !project.ready.is_empty();
        if has_ready {
            inner.project_index.remove(&(old, project_id.clone()));
            inner.project_index.insert((old + 1, project_id));
        }
        inner.results.insert(result.subtask_id.clone(), result.clone());
        Ok(CompletionOutcome { subtask, result })
    }

    /// Requeue every claimed subtask whose worker exceeded the task timeout.
    /// Returns ids that were requeued or failed out.
    pub fn sweep_timeouts(&self, now_ms: u64) -> Vec<SubtaskId> {
        let mut inner = self.inner.lock();
        let expired: Vec<SubtaskId> = inner
            .subtasks
            .iter()
            .filter_map(|(id, s)| match &s.status {
                Status::Claimed { at_ms, .. }
                    if now_ms.saturating_sub(*at_ms) > s.subtask.timeout_ms =>
                {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        for id in &expired {
            Self::requeue_locked(&self.config, &mut inner, id);
        }
        expired
    }

    /// Explicitly return a claimed subtask to the queue.
    pub fn requeue(&self, subtask_id: &str) -> Result<(), ScheduleError> {
        let mut inner = self.inner.lock();
        if !inner.subtasks.contains_key(subtask_id) {
            return Err(ScheduleError::NotFound(subtask_id.to_string()));
        }
        Self::requeue_locked(&self.config, &mut inner, subtask_id);
        Ok(())
    }

    fn requeue_locked(config: &QueueConfig, inner: &mut Inner, subtask_id: &str) {
        let Some(state) = inner.subtasks.get_mut(subtask_id) else {
            return;
        };
        state.requeues += 1;
        if state.requeues > config.max_requeues {
            state.status = Status::Failed;
            warn!(target: "scheduler", subtask = %subtask_id, "exceeded max requeues, failed");
            return;
        }
        state.status = Status::Ready;
        let project_id = state.subtask.project_meta.project_id.clone();
        // Original enqueue order is kept so requeues do not jump the line.
        let key = ready_key(state.subtask.project_meta.priority, state.enqueue_seq);
        let id = state.subtask.id.clone();
        let project = inner.projects.entry(project_id.clone()).or_default();
        let completions = project.completions;
        project.ready.insert(key, id);
        inner.project_index.insert((completions, project_id));
    }

    /// Completion count for one project.
    pub fn completions(&self, project_id: &str) -> u64 {
        self.inner
            .lock()
            .projects
            .get(project_id)
            .map(|p| p.completions)
            .unwrap_or(0)
    }

    /// Requeue count for one subtask.
    pub fn requeues(&self, subtask_id: &str) -> Option<u32> {
        self.inner.lock().subtasks.get(subtask_id).map(|s| s.requeues)
    }

    pub fn result(&self, subtask_id: &str) -> Option<SubtaskResult> {
        self.inner.lock().results.get(subtask_id).cloned()
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        let inner = self.inner.lock();
        let mut snap = CapacitySnapshot::default();
        for s in inner.subtasks.values() {
            match s.status {
                Status::Ready => {
                    snap.ready += 1;
                    match s.subtask.project_meta.resource_class {
                        ResourceClass::Cpu => snap.cpu_ready += 1,
                        ResourceClass::Gpu => snap.gpu_ready += 1,
                    }
                }
                Status::Claimed { .. } => snap.claimed += 1,
                Status::Completed => snap.completed += 1,
                Status::Failed => snap.failed += 1,
            }
        }
        snap
    }
}

impl Default for FairShareQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
