//! World topology and containment.
//!
//! Rooms grouped into areas, directed exits between them (with optional
//! door and trap sub-records), and the ledger that keeps every item
//! instance in exactly one place. Everything is persisted in sled.

pub mod errors;
pub mod exits;
pub mod ledger;
pub mod seed_loader;
pub mod service;
pub mod storage;
pub mod types;

pub use errors::WorldError;
pub use exits::{ExitCreated, ExitDeleted, ExitGraph, ExitLimits, ReverseOutcome};
pub use ledger::{ContainmentLedger, PlacementChange, MAX_NESTING_DEPTH};
pub use seed_loader::{
    apply_seed, apply_seed_to_empty, load_seed_from_json, SeedSummary, WorldSeed,
};
pub use service::{AuditReport, DigOutcome, RoomDeletion, RoomRemoval, WorldService};
pub use storage::{WorldStore, WorldStoreBuilder};
pub use types::*;
