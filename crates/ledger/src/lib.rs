//! Hash-linked ledgers for the EdgeCoder coordinator.
//!
//! The per-coordinator ordering chain, the quorum ledger driving
//! proposal → vote → commit → checkpoint, and optional external anchoring of
//! checkpoint hashes.

pub mod anchor;
pub mod ordering;
pub mod quorum;

pub use anchor::{AnchorConfirmation, AnchorManager, AnchorProvider, AnchorRecord, AnchorTx};
pub use ordering::{OrderingChain, QueueEventInput, VerifyOutcome};
pub use quorum::{QuorumLedger, QuorumStatus, VotePayload};
