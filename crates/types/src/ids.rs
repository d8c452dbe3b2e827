//! Opaque identifier aliases.
//!
//! Identities on the mesh are opaque strings paired with a public-key record;
//! nothing in the coordinator derives meaning from their contents.

/// A coordinator, agent, or phone node addressable on the mesh.
pub type PeerId = String;
/// A worker node identity. Agents are peers with `role = agent`.
pub type AgentId = String;
/// A credit-bearing account. Usually equal to the owning peer id.
pub type AccountId = String;
/// A submitted top-level task.
pub type TaskId = String;
/// A single schedulable unit of a task.
pub type SubtaskId = String;
/// The fair-share grouping key for subtasks.
pub type ProjectId = String;
