use thiserror::Error;

use crate::world::types::{Direction, ExitId, ItemInstanceId, RoomId};

/// Errors raised by the world graph, the containment ledger and their store.
///
/// Every variant names the invariant that was violated so callers can show
/// something better than a generic failure.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Backing sled store failed; surfaced as-is, never retried here.
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, seed files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Referenced entity is absent.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("direction already occupied: room {room} already has an exit {direction}")]
    DuplicateDirection { room: RoomId, direction: Direction },

    #[error("exit destination room {0} does not exist")]
    UnknownRoom(RoomId),

    #[error("invalid door: {0}")]
    InvalidDoorSpec(String),

    #[error("invalid trap: {0}")]
    InvalidTrapSpec(String),

    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    /// Placement target (room, character or container) is absent.
    #[error("placement target does not exist: {0}")]
    UnknownTarget(String),

    #[error("item {0} is not a container")]
    NotAContainer(ItemInstanceId),

    #[error("would create a containment cycle: {item} cannot go inside {container}")]
    CyclicContainment {
        item: ItemInstanceId,
        container: ItemInstanceId,
    },

    #[error("container {0} is not empty")]
    ContainerNotEmpty(ItemInstanceId),

    /// Room deletion rejected while exits or items still reference it.
    #[error("room {room} is still referenced: {reason}")]
    RoomInUse { room: RoomId, reason: String },

    #[error("item {item} is not carried by character {character}")]
    NotCarried { item: ItemInstanceId, character: u64 },

    #[error("item {item} is not lying in room {room}")]
    NotInRoom { item: ItemInstanceId, room: RoomId },

    /// Seeding refused because the world already holds rooms.
    #[error("world already has {rooms} room(s); seed only applies to an empty world")]
    AlreadySeeded { rooms: usize },

    /// Post-mutation consistency check failed.
    #[error("consistency check failed: {0}")]
    Inconsistent(String),

    /// A composed operation failed part-way; `rolled_back` tells whether the
    /// earlier steps were undone.
    #[error("step '{step}' failed ({}): {source}", rollback_note(.rolled_back))]
    Step {
        step: &'static str,
        rolled_back: bool,
        #[source]
        source: Box<WorldError>,
    },
}

impl WorldError {
    pub fn exit_not_found(id: ExitId) -> Self {
        WorldError::NotFound(format!("exit: {}", id))
    }

    pub fn room_not_found(id: RoomId) -> Self {
        WorldError::NotFound(format!("room: {}", id))
    }

    pub fn item_not_found(id: ItemInstanceId) -> Self {
        WorldError::NotFound(format!("item instance: {}", id))
    }

    /// Short stable label, used as a metrics key.
    pub fn kind(&self) -> &'static str {
        match self {
            WorldError::StoreUnavailable(_) => "store_unavailable",
            WorldError::Serialization(_) => "serialization",
            WorldError::Io(_) => "io",
            WorldError::SchemaMismatch { .. } => "schema_mismatch",
            WorldError::NotFound(_) => "not_found",
            WorldError::DuplicateDirection { .. } => "duplicate_direction",
            WorldError::UnknownRoom(_) => "unknown_room",
            WorldError::InvalidDoorSpec(_) => "invalid_door_spec",
            WorldError::InvalidTrapSpec(_) => "invalid_trap_spec",
            WorldError::InvalidDirection(_) => "invalid_direction",
            WorldError::UnknownTarget(_) => "unknown_target",
            WorldError::NotAContainer(_) => "not_a_container",
            WorldError::CyclicContainment { .. } => "cyclic_containment",
            WorldError::ContainerNotEmpty(_) => "container_not_empty",
            WorldError::RoomInUse { .. } => "room_in_use",
            WorldError::NotCarried { .. } => "not_carried",
            WorldError::NotInRoom { .. } => "not_in_room",
            WorldError::AlreadySeeded { .. } => "already_seeded",
            WorldError::Inconsistent(_) => "inconsistent",
            WorldError::Step { .. } => "step_failed",
        }
    }

    /// The innermost error of a composed operation.
    pub fn root(&self) -> &WorldError {
        match self {
            WorldError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "earlier steps rolled back"
    } else {
        "earlier steps kept"
    }
}

impl From<sled::transaction::TransactionError<WorldError>> for WorldError {
    fn from(err: sled::transaction::TransactionError<WorldError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => WorldError::StoreUnavailable(e),
        }
    }
}
