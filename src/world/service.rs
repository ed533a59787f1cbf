//! World service facade.
//!
//! The only surface external collaborators (admin console, game engine)
//! call. It delegates to [`ExitGraph`] and [`ContainmentLedger`], runs a
//! targeted consistency check after each mutation, and offers composed
//! operations that report which step failed and whether earlier steps were
//! undone.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::abort;
use sled::Transactional;

use crate::config::Config;
use crate::metrics;
use crate::world::errors::WorldError;
use crate::world::exits::{detach_room_exits_tx, ExitCreated, ExitDeleted, ExitGraph, ExitLimits};
use crate::world::ledger::{purge_tx, ContainmentLedger, PlacementChange};
use crate::world::storage::{
    area_key, contents_key, exits_in_key, exits_out_key, room_key, tx_exists, tx_get,
    tx_get_record, tx_put, ContentsIndex, InboundIndex, OutboundIndex, WorldStore,
    WorldStoreBuilder,
};
use crate::world::types::{
    AreaRecord, CharacterId, Direction, DoorSpec, ExitId, ExitPatch, ExitRecord,
    ItemInstanceId, ItemInstanceRecord, Located, NewExit, NewInstance, NewRoom, Placement,
    RoomId, RoomRecord, RoomSnapshot, FULL_CONDITION, ROOM_SCHEMA_VERSION,
};

/// What `delete_room` does when exits or items still reference the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomDeletion {
    /// Refuse with `RoomInUse`.
    #[default]
    Reject,
    /// Remove the room's exits (both directions) and every item lying in it.
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRemoval {
    pub room: RoomId,
    pub exits_removed: Vec<ExitId>,
    pub items_removed: Vec<ItemInstanceId>,
}

#[derive(Debug)]
pub struct DigOutcome {
    pub room: RoomRecord,
    pub exit: ExitCreated,
}

/// Findings of a full scan of the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub rooms_checked: usize,
    pub exits_checked: usize,
    pub items_checked: usize,
    pub problems: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Clone)]
pub struct WorldService {
    store: WorldStore,
    exits: ExitGraph,
    ledger: ContainmentLedger,
}

impl WorldService {
    pub fn new(store: WorldStore) -> Self {
        Self::with_settings(store, ExitLimits::default(), FULL_CONDITION)
    }

    pub fn with_settings(store: WorldStore, limits: ExitLimits, default_condition: i32) -> Self {
        Self {
            exits: ExitGraph::with_limits(store.clone(), limits),
            ledger: ContainmentLedger::with_default_condition(store.clone(), default_condition),
            store,
        }
    }

    /// Open the store described by `config` and apply the configured seed
    /// when the world has no rooms yet.
    pub fn open(config: &Config) -> Result<Self, WorldError> {
        let store = WorldStoreBuilder::new(config.storage.world_db_path())
            .flush_every_write(config.storage.flush_every_write)
            .open()?;
        let service = Self::with_settings(
            store,
            config.world.exit_limits(),
            config.world.default_condition,
        );
        if let Some(seed_file) = &config.world.seed_file {
            if service.store.count_rooms() == 0 {
                let seed = crate::world::seed_loader::load_seed_from_json(seed_file)?;
                let summary = crate::world::seed_loader::apply_seed_to_empty(&service, &seed)?;
                info!("seeded world from {}: {}", seed_file, summary);
            }
        }
        Ok(service)
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn exit_graph(&self) -> &ExitGraph {
        &self.exits
    }

    pub fn ledger(&self) -> &ContainmentLedger {
        &self.ledger
    }

    fn rejected<T>(&self, operation: &str, err: WorldError) -> Result<T, WorldError> {
        metrics::record_rejection(err.root().kind());
        warn!("{} rejected: {}", operation, err);
        Err(err)
    }

    fn inconsistent<T>(&self, detail: String) -> Result<T, WorldError> {
        metrics::inc_consistency_failures();
        error!("consistency check failed: {}", detail);
        Err(WorldError::Inconsistent(detail))
    }

    // ----- areas and rooms -----

    pub fn create_area(&self, name: &str, description: &str) -> Result<AreaRecord, WorldError> {
        let area = AreaRecord::new(self.store.next_id()?, name, description);
        self.store.put_area(area.clone())?;
        info!("area {} '{}' created", area.id, area.name);
        Ok(area)
    }

    pub fn create_room(&self, request: &NewRoom) -> Result<RoomRecord, WorldError> {
        if !self.store.area_exists(request.area_id)? {
            return self.rejected(
                "create room",
                WorldError::NotFound(format!("area: {}", request.area_id)),
            );
        }
        let mut room = RoomRecord::new(
            self.store.next_id()?,
            request.area_id,
            &request.name,
            &request.description,
        );
        room.currency = request.currency;
        room.flags = request.flags.clone();
        room.spawners = request.spawners.clone();
        self.store.put_room(room.clone())?;
        info!("room {} '{}' created in area {}", room.id, room.name, room.area_id);
        Ok(room)
    }

    pub fn room(&self, id: RoomId) -> Result<RoomRecord, WorldError> {
        self.store.get_room(id)
    }

    /// Replace a room's own fields. Exits and items are untouched. The
    /// existence checks and the write share one transaction, so a room
    /// deleted concurrently stays deleted.
    pub fn update_room(&self, mut room: RoomRecord) -> Result<RoomRecord, WorldError> {
        room.schema_version = ROOM_SCHEMA_VERSION;
        let store = &self.store;
        let result = (&store.areas, &store.rooms).transaction(|(areas, rooms)| {
            let Some(existing) = tx_get_record::<RoomRecord>(rooms, &room_key(room.id))? else {
                return abort(WorldError::room_not_found(room.id));
            };
            if !tx_exists(areas, &area_key(room.area_id))? {
                return abort(WorldError::NotFound(format!("area: {}", room.area_id)));
            }
            let mut updated = room.clone();
            updated.created_at = existing.created_at;
            updated.touch();
            tx_put(rooms, &room_key(updated.id), &updated)?;
            Ok(updated)
        });
        let updated = match result {
            Ok(updated) => updated,
            Err(err) => return self.rejected("update room", err.into()),
        };
        self.store.commit()?;
        info!("room {} updated", updated.id);
        Ok(updated)
    }

    /// Delete a room. With [`RoomDeletion::Reject`] any exit into or out of
    /// the room, or any item lying in it, blocks the deletion. With
    /// [`RoomDeletion::Cascade`] those go too, all in one transaction.
    pub fn delete_room(&self, room: RoomId, policy: RoomDeletion) -> Result<RoomRemoval, WorldError> {
        let store = &self.store;
        let result = (&store.rooms, &store.exits, &store.exit_index, &store.items, &store.contents)
            .transaction(|(rooms, exits, index, items, contents)| {
                if rooms.get(room_key(room))?.is_none() {
                    return abort(WorldError::room_not_found(room));
                }
                let outbound: OutboundIndex = tx_get(index, &exits_out_key(room))?.unwrap_or_default();
                let inbound: InboundIndex = tx_get(index, &exits_in_key(room))?.unwrap_or_default();
                let lying: ContentsIndex =
                    tx_get(contents, &contents_key(&Placement::InRoom(room)))?.unwrap_or_default();

                if policy == RoomDeletion::Reject {
                    let mut reasons = Vec::new();
                    if !outbound.is_empty() {
                        reasons.push(format!("{} outbound exit(s)", outbound.len()));
                    }
                    if !inbound.is_empty() {
                        reasons.push(format!("{} inbound exit(s)", inbound.len()));
                    }
                    if !lying.is_empty() {
                        reasons.push(format!("{} item(s) on the floor", lying.len()));
                    }
                    if !reasons.is_empty() {
                        return abort(WorldError::RoomInUse {
                            room,
                            reason: reasons.join(", "),
                        });
                    }
                }

                let exits_removed = detach_room_exits_tx(exits, index, room)?;
                let mut items_removed = Vec::new();
                for item in lying {
                    purge_tx(items, contents, item, 0, &mut items_removed)?;
                }
                contents.remove(contents_key(&Placement::InRoom(room)))?;
                rooms.remove(room_key(room))?;
                Ok(RoomRemoval {
                    room,
                    exits_removed,
                    items_removed,
                })
            });
        let removal = match result {
            Ok(removal) => removal,
            Err(err) => return self.rejected("delete room", err.into()),
        };
        self.store.commit()?;
        metrics::add_items_removed(removal.items_removed.len() as u64);
        for _ in &removal.exits_removed {
            metrics::inc_exits_removed();
        }
        info!(
            "room {} deleted ({} exit(s), {} item(s) removed)",
            room,
            removal.exits_removed.len(),
            removal.items_removed.len()
        );
        Ok(removal)
    }

    /// A room with its outbound exits, for the admin console.
    pub fn room_snapshot(&self, room: RoomId) -> Result<RoomSnapshot, WorldError> {
        Ok(RoomSnapshot {
            room: self.store.get_room(room)?,
            exits: self.exits.list_exits(room)?,
        })
    }

    // ----- exits -----

    pub fn list_exits(&self, room: RoomId) -> Result<Vec<ExitRecord>, WorldError> {
        self.exits.list_exits(room)
    }

    pub fn resolve_exit(&self, room: RoomId, direction: Direction) -> Result<Option<ExitRecord>, WorldError> {
        self.exits.resolve_exit(room, direction)
    }

    pub fn create_exit(&self, request: &NewExit) -> Result<ExitCreated, WorldError> {
        let created = match self.exits.create_exit(request) {
            Ok(created) => created,
            Err(err) => return self.rejected("create exit", err),
        };
        self.check_exit(&created.exit)?;
        if let Some(reverse) = created.reverse.exit() {
            self.check_exit(reverse)?;
        }
        Ok(created)
    }

    pub fn delete_exit(&self, exit_id: ExitId, delete_reverse: bool) -> Result<ExitDeleted, WorldError> {
        match self.exits.delete_exit(exit_id, delete_reverse) {
            Ok(deleted) => {
                self.check_exit_gone(&deleted.removed)?;
                Ok(deleted)
            }
            Err(err) => self.rejected("delete exit", err),
        }
    }

    pub fn update_exit(&self, exit_id: ExitId, patch: &ExitPatch) -> Result<ExitRecord, WorldError> {
        match self.exits.update_exit(exit_id, patch) {
            Ok(exit) => {
                self.check_exit(&exit)?;
                Ok(exit)
            }
            Err(err) => self.rejected("update exit", err),
        }
    }

    /// Both endpoints exist and the slot index points at this exit.
    fn check_exit(&self, exit: &ExitRecord) -> Result<(), WorldError> {
        if !self.store.room_exists(exit.source)? {
            return self.inconsistent(format!("exit {} has missing source room {}", exit.id, exit.source));
        }
        if !self.store.room_exists(exit.destination)? {
            return self.inconsistent(format!(
                "exit {} has missing destination room {}",
                exit.id, exit.destination
            ));
        }
        if self.store.outbound_index(exit.source)?.get(&exit.direction) != Some(&exit.id) {
            return self.inconsistent(format!(
                "room {} slot {} does not point at exit {}",
                exit.source, exit.direction, exit.id
            ));
        }
        Ok(())
    }

    fn check_exit_gone(&self, exit: &ExitRecord) -> Result<(), WorldError> {
        if self.store.outbound_index(exit.source)?.get(&exit.direction) == Some(&exit.id) {
            return self.inconsistent(format!("deleted exit {} still indexed", exit.id));
        }
        Ok(())
    }

    // ----- items -----

    pub fn create_instance(&self, request: &NewInstance) -> Result<ItemInstanceRecord, WorldError> {
        let record = match self.ledger.create_instance(request) {
            Ok(record) => record,
            Err(err) => return self.rejected("create item", err),
        };
        self.check_item(record.id)?;
        Ok(record)
    }

    pub fn place_in_room(&self, item: ItemInstanceId, room: RoomId) -> Result<PlacementChange, WorldError> {
        self.placed("place item in room", self.ledger.place_in_room(item, room))
    }

    pub fn place_on_character(
        &self,
        item: ItemInstanceId,
        character: CharacterId,
    ) -> Result<PlacementChange, WorldError> {
        self.placed("place item on character", self.ledger.place_on_character(item, character))
    }

    pub fn place_in_container(
        &self,
        item: ItemInstanceId,
        container: ItemInstanceId,
    ) -> Result<PlacementChange, WorldError> {
        self.placed("place item in container", self.ledger.place_in_container(item, container))
    }

    /// Move an item to any placement. Used by the admin console, which
    /// names the target directly instead of going through a character.
    pub fn relocate(&self, item: ItemInstanceId, target: Placement) -> Result<PlacementChange, WorldError> {
        self.placed("move item", self.ledger.relocate(item, target, None))
    }

    fn placed(
        &self,
        operation: &str,
        result: Result<PlacementChange, WorldError>,
    ) -> Result<PlacementChange, WorldError> {
        match result {
            Ok(change) => {
                self.check_item(change.item)?;
                Ok(change)
            }
            Err(err) => self.rejected(operation, err),
        }
    }

    pub fn remove_instance(&self, item: ItemInstanceId, cascade: bool) -> Result<Vec<ItemInstanceId>, WorldError> {
        match self.ledger.remove_instance(item, cascade) {
            Ok(removed) => Ok(removed),
            Err(err) => self.rejected("remove item", err),
        }
    }

    pub fn locate(&self, item: ItemInstanceId) -> Result<Located, WorldError> {
        self.ledger.locate(item)
    }

    /// The placement target exists and the container chain terminates.
    fn check_item(&self, item: ItemInstanceId) -> Result<(), WorldError> {
        let record = self.store.get_item(item)?;
        if !self.store.placement_target_exists(&record.placement)? {
            return self.inconsistent(format!("item {} placed in missing {}", item, record.placement));
        }
        if !self.store.contents_index(&record.placement)?.contains(&item) {
            return self.inconsistent(format!(
                "item {} missing from contents of {}",
                item, record.placement
            ));
        }
        if let Err(err) = self.ledger.outermost(item) {
            return self.inconsistent(err.to_string());
        }
        Ok(())
    }

    // ----- composed operations -----

    /// Create a room and connect it to `source`. If the exit cannot be
    /// created the new room is deleted again.
    pub fn dig(
        &self,
        source: RoomId,
        direction: Direction,
        new_room: &NewRoom,
        door: Option<DoorSpec>,
        two_way: bool,
    ) -> Result<DigOutcome, WorldError> {
        let room = self.create_room(new_room).map_err(|err| WorldError::Step {
            step: "create room",
            rolled_back: false,
            source: Box::new(err),
        })?;

        let mut request = NewExit::new(source, direction, room.id);
        request.door = door;
        request.create_reverse = two_way;

        match self.create_exit(&request) {
            Ok(exit) => {
                if let Some(warning) = exit.reverse.warning() {
                    warn!("dig from room {}: {}", source, warning);
                }
                Ok(DigOutcome { room, exit })
            }
            Err(err) => {
                let rolled_back = match self.delete_room(room.id, RoomDeletion::Reject) {
                    Ok(_) => true,
                    Err(undo) => {
                        error!("dig: could not remove room {} after failed exit: {}", room.id, undo);
                        false
                    }
                };
                Err(WorldError::Step {
                    step: "create exit",
                    rolled_back,
                    source: Box::new(err),
                })
            }
        }
    }

    /// A character drops an item it carries onto the floor of `room`.
    pub fn drop_item(
        &self,
        character: CharacterId,
        item: ItemInstanceId,
        room: RoomId,
    ) -> Result<PlacementChange, WorldError> {
        self.placed(
            "drop item",
            self.ledger.relocate(
                item,
                Placement::InRoom(room),
                Some(Placement::OnCharacter(character)),
            ),
        )
    }

    /// A character picks up an item lying in `room`.
    pub fn pick_up(
        &self,
        character: CharacterId,
        item: ItemInstanceId,
        room: RoomId,
    ) -> Result<PlacementChange, WorldError> {
        self.placed(
            "pick up item",
            self.ledger.relocate(
                item,
                Placement::OnCharacter(character),
                Some(Placement::InRoom(room)),
            ),
        )
    }

    pub fn give_item(
        &self,
        from: CharacterId,
        to: CharacterId,
        item: ItemInstanceId,
    ) -> Result<PlacementChange, WorldError> {
        self.placed(
            "give item",
            self.ledger.relocate(
                item,
                Placement::OnCharacter(to),
                Some(Placement::OnCharacter(from)),
            ),
        )
    }

    /// Put a carried item into a container the same character holds
    /// (directly or nested).
    pub fn stow_item(
        &self,
        character: CharacterId,
        item: ItemInstanceId,
        container: ItemInstanceId,
    ) -> Result<PlacementChange, WorldError> {
        let holder = match self.ledger.instance(container) {
            Ok(_) => self.ledger.outermost(container)?,
            Err(WorldError::NotFound(_)) => {
                return self.rejected(
                    "stow item",
                    WorldError::UnknownTarget(format!("container {}", container)),
                )
            }
            Err(err) => return Err(err),
        };
        if holder != Placement::OnCharacter(character) {
            return self.rejected(
                "stow item",
                WorldError::NotCarried {
                    item: container,
                    character,
                },
            );
        }
        self.placed(
            "stow item",
            self.ledger.relocate(
                item,
                Placement::InContainer(container),
                Some(Placement::OnCharacter(character)),
            ),
        )
    }

    // ----- audit -----

    /// Scan the whole store for dangling references and index drift.
    pub fn audit(&self) -> Result<AuditReport, WorldError> {
        let mut report = AuditReport::default();

        let rooms = self.store.list_rooms()?;
        report.rooms_checked = rooms.len();
        for room in &rooms {
            if !self.store.area_exists(room.area_id)? {
                report
                    .problems
                    .push(format!("room {} belongs to missing area {}", room.id, room.area_id));
            }
            for (direction, exit_id) in self.store.outbound_index(room.id)? {
                match self.store.get_exit(exit_id) {
                    Ok(exit) if exit.source == room.id && exit.direction == direction => {}
                    Ok(exit) => report.problems.push(format!(
                        "room {} slot {} points at exit {} ({} from room {})",
                        room.id, direction, exit_id, exit.direction, exit.source
                    )),
                    Err(WorldError::NotFound(_)) => report.problems.push(format!(
                        "room {} slot {} points at missing exit {}",
                        room.id, direction, exit_id
                    )),
                    Err(err) => return Err(err),
                }
            }
        }

        let exits = self.store.list_all_exits()?;
        report.exits_checked = exits.len();
        for exit in &exits {
            if !self.store.room_exists(exit.source)? {
                report
                    .problems
                    .push(format!("exit {} leaves missing room {}", exit.id, exit.source));
            } else if self.store.outbound_index(exit.source)?.get(&exit.direction) != Some(&exit.id) {
                report.problems.push(format!(
                    "exit {} is not indexed in room {} slot {}",
                    exit.id, exit.source, exit.direction
                ));
            }
            if !self.store.room_exists(exit.destination)? {
                report
                    .problems
                    .push(format!("exit {} leads to missing room {}", exit.id, exit.destination));
            }
            if !self.store.inbound_index(exit.destination)?.contains(&exit.id) {
                report.problems.push(format!(
                    "exit {} is not indexed as inbound to room {}",
                    exit.id, exit.destination
                ));
            }
        }

        let items = self.store.list_items()?;
        report.items_checked = items.len();
        for item in &items {
            if !self.store.placement_target_exists(&item.placement)? {
                report
                    .problems
                    .push(format!("item {} placed in missing {}", item.id, item.placement));
                continue;
            }
            if !self.store.contents_index(&item.placement)?.contains(&item.id) {
                report.problems.push(format!(
                    "item {} missing from contents of {}",
                    item.id, item.placement
                ));
            }
            if let Placement::InContainer(container) = item.placement {
                if let Some(problem) = self.audit_container(item.id, container)? {
                    report.problems.push(problem);
                }
            }
            if let Err(err) = self.ledger.outermost(item.id) {
                report.problems.push(err.to_string());
            }
        }

        if report.is_clean() {
            info!(
                "audit clean: {} rooms, {} exits, {} items",
                report.rooms_checked, report.exits_checked, report.items_checked
            );
        } else {
            warn!("audit found {} problem(s)", report.problems.len());
        }
        Ok(report)
    }

    /// Check that `container` still exists and its template can hold items.
    fn audit_container(
        &self,
        item: ItemInstanceId,
        container: ItemInstanceId,
    ) -> Result<Option<String>, WorldError> {
        let holder = match self.store.find_item(container)? {
            Some(holder) => holder,
            None => {
                return Ok(Some(format!(
                    "item {} sits in missing container {}",
                    item, container
                )))
            }
        };
        match self.store.get_item_template(holder.template_id) {
            Ok(template) if template.is_container_capable() => Ok(None),
            Ok(_) => Ok(Some(format!(
                "item {} sits in {} which is not a container",
                item, container
            ))),
            Err(WorldError::NotFound(_)) => Ok(Some(format!(
                "container {} uses missing template {}",
                container, holder.template_id
            ))),
            Err(err) => Err(err),
        }
    }
}
