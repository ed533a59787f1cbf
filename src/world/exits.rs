//! Exit graph manager: directed exits between rooms, their door/trap
//! sub-records and best-effort reverse pairing.
//!
//! Door and trap data is validated for shape only. Whether an actor may pass
//! a locked door or trips a trap is decided by the movement collaborator that
//! reads these records.

use log::{debug, info, warn};
use sled::transaction::{abort, TransactionalTree};
use sled::Transactional;

use crate::metrics;
use crate::world::errors::WorldError;
use crate::world::storage::{
    exit_key, exits_in_key, exits_out_key, room_key, tx_exists, tx_get, tx_get_record, tx_put,
    tx_put_set, InboundIndex, OutboundIndex, TxResult, WorldStore,
};
use crate::world::types::{
    Direction, DoorSpec, ExitId, ExitPatch, ExitRecord, NewExit, RoomId, TrapSpec,
    EXIT_SCHEMA_VERSION,
};

/// Upper bounds for door and trap difficulty ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitLimits {
    pub max_lock_difficulty: u8,
    pub max_trap_difficulty: u8,
}

impl Default for ExitLimits {
    fn default() -> Self {
        Self {
            max_lock_difficulty: 50,
            max_trap_difficulty: 50,
        }
    }
}

/// What happened to the paired exit of a create or delete call. `Failed` is a
/// warning: the primary operation has already committed.
#[derive(Debug)]
pub enum ReverseOutcome {
    NotRequested,
    Created(ExitRecord),
    Removed(ExitRecord),
    /// No matching exit pointed back, nothing to delete.
    Absent,
    Failed(WorldError),
}

impl ReverseOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(self, ReverseOutcome::Failed(_))
    }

    pub fn exit(&self) -> Option<&ExitRecord> {
        match self {
            ReverseOutcome::Created(exit) | ReverseOutcome::Removed(exit) => Some(exit),
            _ => None,
        }
    }

    /// Human readable warning for partial success, if any.
    pub fn warning(&self) -> Option<String> {
        match self {
            ReverseOutcome::Failed(err) => Some(format!("reverse exit not paired: {}", err)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ExitCreated {
    pub exit: ExitRecord,
    pub reverse: ReverseOutcome,
}

#[derive(Debug)]
pub struct ExitDeleted {
    pub removed: ExitRecord,
    pub reverse: ReverseOutcome,
}

/// Owns the directed exits of the world graph.
#[derive(Clone)]
pub struct ExitGraph {
    store: WorldStore,
    limits: ExitLimits,
}

impl ExitGraph {
    pub fn new(store: WorldStore) -> Self {
        Self::with_limits(store, ExitLimits::default())
    }

    pub fn with_limits(store: WorldStore, limits: ExitLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> ExitLimits {
        self.limits
    }

    fn validate(&self, door: Option<&DoorSpec>, trap: Option<&TrapSpec>) -> Result<(), WorldError> {
        if let Some(door) = door {
            door.validate(self.limits.max_lock_difficulty)?;
        }
        if let Some(trap) = trap {
            trap.validate(self.limits.max_trap_difficulty)?;
        }
        Ok(())
    }

    /// Create an exit and, if requested, its mirror in the destination room.
    ///
    /// The mirror copies the hidden flag and the door but not the trap. It is
    /// attempted only after the primary exit has committed; if it cannot be
    /// created the primary stays and the failure is returned in
    /// [`ExitCreated::reverse`].
    pub fn create_exit(&self, request: &NewExit) -> Result<ExitCreated, WorldError> {
        self.validate(request.door.as_ref(), request.trap.as_ref())?;

        let exit = self.insert_exit(ExitRecord {
            id: self.store.next_id()?,
            source: request.source,
            direction: request.direction,
            destination: request.destination,
            is_hidden: request.hidden,
            door: request.door.clone(),
            trap: request.trap.clone(),
            schema_version: EXIT_SCHEMA_VERSION,
        })?;
        metrics::inc_exits_created();
        info!(
            "exit {} created: room {} {} -> room {}",
            exit.id, exit.source, exit.direction, exit.destination
        );

        let reverse = if request.create_reverse {
            let mirrored = self.store.next_id().and_then(|id| {
                self.insert_exit(ExitRecord {
                    id,
                    source: request.destination,
                    direction: request.direction.inverse(),
                    destination: request.source,
                    is_hidden: request.hidden,
                    door: request.door.clone(),
                    trap: None,
                    schema_version: EXIT_SCHEMA_VERSION,
                })
            });
            match mirrored {
                Ok(reverse) => {
                    metrics::inc_exits_created();
                    info!(
                        "reverse exit {} created: room {} {} -> room {}",
                        reverse.id, reverse.source, reverse.direction, reverse.destination
                    );
                    ReverseOutcome::Created(reverse)
                }
                Err(err) => {
                    metrics::inc_reverse_failures();
                    warn!(
                        "exit {} kept without reverse pairing in room {}: {}",
                        exit.id, request.destination, err
                    );
                    ReverseOutcome::Failed(err)
                }
            }
        } else {
            ReverseOutcome::NotRequested
        };

        Ok(ExitCreated { exit, reverse })
    }

    fn insert_exit(&self, record: ExitRecord) -> Result<ExitRecord, WorldError> {
        (&self.store.rooms, &self.store.exits, &self.store.exit_index)
            .transaction(|(rooms, exits, index)| insert_exit_tx(rooms, exits, index, &record))?;
        self.store.commit()?;
        Ok(record)
    }

    /// Remove an exit. With `delete_reverse`, also removes the exit in the
    /// destination room that points back through the inverse direction, if
    /// one exists; that half is best effort.
    pub fn delete_exit(&self, exit_id: ExitId, delete_reverse: bool) -> Result<ExitDeleted, WorldError> {
        let removed = (&self.store.exits, &self.store.exit_index)
            .transaction(|(exits, index)| remove_exit_tx(exits, index, exit_id))?;
        self.store.commit()?;
        metrics::inc_exits_removed();
        info!(
            "exit {} removed: room {} {} -> room {}",
            removed.id, removed.source, removed.direction, removed.destination
        );

        let reverse = if delete_reverse {
            match self.remove_reverse_of(&removed) {
                Ok(Some(reverse)) => {
                    metrics::inc_exits_removed();
                    info!("reverse exit {} removed from room {}", reverse.id, reverse.source);
                    ReverseOutcome::Removed(reverse)
                }
                Ok(None) => {
                    debug!(
                        "no reverse exit for {} in room {} {}",
                        removed.id,
                        removed.destination,
                        removed.direction.inverse()
                    );
                    ReverseOutcome::Absent
                }
                Err(err) => {
                    metrics::inc_reverse_failures();
                    warn!("reverse of exit {} not removed: {}", removed.id, err);
                    ReverseOutcome::Failed(err)
                }
            }
        } else {
            ReverseOutcome::NotRequested
        };

        Ok(ExitDeleted { removed, reverse })
    }

    fn remove_reverse_of(&self, removed: &ExitRecord) -> Result<Option<ExitRecord>, WorldError> {
        let room = removed.destination;
        let direction = removed.direction.inverse();
        let points_to = removed.source;
        let result = (&self.store.exits, &self.store.exit_index).transaction(|(exits, index)| {
            let outbound: OutboundIndex = tx_get(index, &exits_out_key(room))?.unwrap_or_default();
            let Some(candidate) = outbound.get(&direction).copied() else {
                return Ok(None);
            };
            let exit: Option<ExitRecord> = tx_get_record(exits, &exit_key(candidate))?;
            match exit {
                Some(exit) if exit.destination == points_to => {
                    remove_exit_tx(exits, index, candidate).map(Some)
                }
                _ => Ok(None),
            }
        })?;
        if result.is_some() {
            self.store.commit()?;
        }
        Ok(result)
    }

    /// Edit an exit in place. Validation matches [`ExitGraph::create_exit`].
    pub fn update_exit(&self, exit_id: ExitId, patch: &ExitPatch) -> Result<ExitRecord, WorldError> {
        let door = patch.door.as_ref().and_then(|d| d.as_ref());
        let trap = patch.trap.as_ref().and_then(|t| t.as_ref());
        self.validate(door, trap)?;

        let updated = (&self.store.rooms, &self.store.exits, &self.store.exit_index)
            .transaction(|(rooms, exits, index)| {
                let Some(mut exit) = tx_get_record::<ExitRecord>(exits, &exit_key(exit_id))? else {
                    return abort(WorldError::exit_not_found(exit_id));
                };
                if let Some(destination) = patch.destination {
                    if destination != exit.destination {
                        if !tx_exists(rooms, &room_key(destination))? {
                            return abort(WorldError::UnknownRoom(destination));
                        }
                        let mut old_in: InboundIndex =
                            tx_get(index, &exits_in_key(exit.destination))?.unwrap_or_default();
                        old_in.remove(&exit_id);
                        tx_put_set(index, &exits_in_key(exit.destination), &old_in)?;
                        let mut new_in: InboundIndex =
                            tx_get(index, &exits_in_key(destination))?.unwrap_or_default();
                        new_in.insert(exit_id);
                        tx_put_set(index, &exits_in_key(destination), &new_in)?;
                        exit.destination = destination;
                    }
                }
                if let Some(hidden) = patch.hidden {
                    exit.is_hidden = hidden;
                }
                if let Some(door) = &patch.door {
                    exit.door = door.clone();
                }
                if let Some(trap) = &patch.trap {
                    exit.trap = trap.clone();
                }
                tx_put(exits, &exit_key(exit_id), &exit)?;
                Ok(exit)
            })?;
        self.store.commit()?;
        info!("exit {} updated", exit_id);
        Ok(updated)
    }

    pub fn exit(&self, exit_id: ExitId) -> Result<ExitRecord, WorldError> {
        self.store.get_exit(exit_id)
    }

    /// Exits owned by a room, ordered by direction.
    pub fn list_exits(&self, room: RoomId) -> Result<Vec<ExitRecord>, WorldError> {
        if !self.store.room_exists(room)? {
            return Err(WorldError::room_not_found(room));
        }
        let outbound = self.store.outbound_index(room)?;
        self.load_exits(outbound.into_values())
    }

    /// Exits in other rooms (or this one) that lead into `room`.
    pub fn inbound_exits(&self, room: RoomId) -> Result<Vec<ExitRecord>, WorldError> {
        let inbound = self.store.inbound_index(room)?;
        self.load_exits(inbound.into_iter())
    }

    fn load_exits(&self, ids: impl Iterator<Item = ExitId>) -> Result<Vec<ExitRecord>, WorldError> {
        let mut exits = Vec::new();
        for id in ids {
            match self.store.get_exit(id) {
                Ok(exit) => exits.push(exit),
                // removed between the index read and the record read
                Err(WorldError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(exits)
    }

    /// The exit leaving `room` through `direction`, if any. Callers apply
    /// door and trap checks before treating the destination as reachable.
    pub fn resolve_exit(&self, room: RoomId, direction: Direction) -> Result<Option<ExitRecord>, WorldError> {
        let outbound = self.store.outbound_index(room)?;
        match outbound.get(&direction) {
            Some(id) => match self.store.get_exit(*id) {
                Ok(exit) => Ok(Some(exit)),
                Err(WorldError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            },
            None => Ok(None),
        }
    }
}

/// Check the slot is free and both rooms exist, then write the exit and both
/// index entries. Runs inside one transaction so two writers racing for the
/// same slot cannot both commit.
fn insert_exit_tx(
    rooms: &TransactionalTree,
    exits: &TransactionalTree,
    index: &TransactionalTree,
    record: &ExitRecord,
) -> TxResult<()> {
    if !tx_exists(rooms, &room_key(record.source))? {
        return abort(WorldError::room_not_found(record.source));
    }
    if !tx_exists(rooms, &room_key(record.destination))? {
        return abort(WorldError::UnknownRoom(record.destination));
    }
    let out_key = exits_out_key(record.source);
    let mut outbound: OutboundIndex = tx_get(index, &out_key)?.unwrap_or_default();
    if outbound.contains_key(&record.direction) {
        return abort(WorldError::DuplicateDirection {
            room: record.source,
            direction: record.direction,
        });
    }
    outbound.insert(record.direction, record.id);

    let in_key = exits_in_key(record.destination);
    let mut inbound: InboundIndex = tx_get(index, &in_key)?.unwrap_or_default();
    inbound.insert(record.id);

    tx_put(exits, &exit_key(record.id), record)?;
    tx_put(index, &out_key, &outbound)?;
    tx_put(index, &in_key, &inbound)?;
    Ok(())
}

/// Remove one exit record and unhook it from both room indexes.
pub(crate) fn remove_exit_tx(
    exits: &TransactionalTree,
    index: &TransactionalTree,
    exit_id: ExitId,
) -> TxResult<ExitRecord> {
    let Some(exit) = tx_get_record::<ExitRecord>(exits, &exit_key(exit_id))? else {
        return abort(WorldError::exit_not_found(exit_id));
    };

    let out_key = exits_out_key(exit.source);
    let mut outbound: OutboundIndex = tx_get(index, &out_key)?.unwrap_or_default();
    if outbound.get(&exit.direction) == Some(&exit_id) {
        outbound.remove(&exit.direction);
    }
    if outbound.is_empty() {
        index.remove(out_key)?;
    } else {
        tx_put(index, &out_key, &outbound)?;
    }

    let in_key = exits_in_key(exit.destination);
    let mut inbound: InboundIndex = tx_get(index, &in_key)?.unwrap_or_default();
    inbound.remove(&exit_id);
    tx_put_set(index, &in_key, &inbound)?;

    exits.remove(exit_key(exit_id))?;
    Ok(exit)
}

/// Remove every exit leaving or entering `room`. Returns the removed ids.
pub(crate) fn detach_room_exits_tx(
    exits: &TransactionalTree,
    index: &TransactionalTree,
    room: RoomId,
) -> TxResult<Vec<ExitId>> {
    let outbound: OutboundIndex = tx_get(index, &exits_out_key(room))?.unwrap_or_default();
    let inbound: InboundIndex = tx_get(index, &exits_in_key(room))?.unwrap_or_default();
    let ids: InboundIndex = outbound.into_values().chain(inbound).collect();
    let mut removed = Vec::with_capacity(ids.len());
    for id in ids {
        remove_exit_tx(exits, index, id)?;
        removed.push(id);
    }
    index.remove(exits_out_key(room))?;
    index.remove(exits_in_key(room))?;
    Ok(removed)
}
