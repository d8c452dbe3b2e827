//! Subtasks: the schedulable unit of work, and their signed results.

use crate::ids::{AgentId, ProjectId, SubtaskId, TaskId};
use serde::{Deserialize, Serialize};

/// The execution shape of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskKind {
    MicroLoop,
    SingleStep,
}

/// Hardware class a subtask needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Cpu,
    Gpu,
}

/// Fair-share and tenancy metadata attached to every subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub resource_class: ResourceClass,
    pub priority: i32,
}

/// A single unit of code-inference work.
///
/// Created by submission, mutated only by claim/complete transitions,
/// destroyed after the result is persisted and acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: SubtaskId,
    pub task_id: TaskId,
    pub kind: SubtaskKind,
    pub language: String,
    pub input: String,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<String>,
    pub project_meta: ProjectMeta,
    /// Model required to execute this subtask, if any. Used for
    /// cross-coordinator routing when no local agent can serve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_model: Option<String>,
}

/// The agent-signed outcome of a subtask. One-to-one with the subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskResult {
    pub subtask_id: SubtaskId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub ok: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_nonce: Option<String>,
    /// Base64 Ed25519 signature over the canonical result-without-signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_signature: Option<String>,
}

impl SubtaskResult {
    /// Canonical bytes the reporting agent signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, crate::codec::CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Unsigned<'a> {
            subtask_id: &'a str,
            task_id: &'a str,
            agent_id: &'a str,
            ok: bool,
            output: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a str>,
            duration_ms: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            report_nonce: Option<&'a str>,
        }
        crate::codec::to_canonical_bytes(&Unsigned {
            subtask_id: &self.subtask_id,
            task_id: &self.task_id,
            agent_id: &self.agent_id,
            ok: self.ok,
            output: &self.output,
            error: self.error.as_deref(),
            duration_ms: self.duration_ms,
            report_nonce: self.report_nonce.as_deref(),
        })
    }
}
