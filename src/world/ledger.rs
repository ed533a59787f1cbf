//! Containment ledger: every item instance lies in a room, is carried by a
//! character, or sits inside a container item. Never more than one, never none.
//!
//! Placement is a single [`Placement`] value on the instance record, and each
//! re-parenting rewrites that record together with the contents index of the
//! old and new holder in one sled transaction.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use sled::transaction::{abort, TransactionalTree};
use sled::Transactional;
use uuid::Uuid;

use crate::metrics;
use crate::world::errors::WorldError;
use crate::world::storage::{
    character_key, contents_key, item_key, room_key, template_key, tx_exists, tx_get,
    tx_get_record, tx_put, tx_put_set, ContentsIndex, TxResult, WorldStore,
};
use crate::world::types::{
    CharacterId, ItemInstanceId, ItemInstanceRecord, ItemTemplateRecord, Located, NewInstance,
    Placement, RoomId, FULL_CONDITION, ITEM_SCHEMA_VERSION,
};

/// Container chains deeper than this are treated as corrupt data.
pub const MAX_NESTING_DEPTH: usize = 256;

/// A committed re-parenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementChange {
    pub item: ItemInstanceId,
    pub from: Placement,
    pub to: Placement,
}

impl PlacementChange {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Clone)]
pub struct ContainmentLedger {
    store: WorldStore,
    default_condition: i32,
}

impl ContainmentLedger {
    pub fn new(store: WorldStore) -> Self {
        Self::with_default_condition(store, FULL_CONDITION)
    }

    pub fn with_default_condition(store: WorldStore, default_condition: i32) -> Self {
        Self {
            store,
            default_condition,
        }
    }

    /// Create a new instance of a catalog template at the given placement.
    pub fn create_instance(&self, request: &NewInstance) -> Result<ItemInstanceRecord, WorldError> {
        // templates are read-only catalog data
        self.store.get_item_template(request.template_id)?;

        let record = ItemInstanceRecord {
            id: Uuid::new_v4(),
            template_id: request.template_id,
            condition: request.condition.unwrap_or(self.default_condition),
            instance_stats: request.instance_stats.clone(),
            placement: request.placement,
            schema_version: ITEM_SCHEMA_VERSION,
        };

        let store = &self.store;
        (&store.rooms, &store.characters, &store.items, &store.contents, &store.templates)
            .transaction(|(rooms, characters, items, contents, templates)| {
                check_target_tx(rooms, characters, items, templates, &record.placement)?;
                let parent_key = contents_key(&record.placement);
                let mut siblings: ContentsIndex = tx_get(contents, &parent_key)?.unwrap_or_default();
                siblings.insert(record.id);
                tx_put(contents, &parent_key, &siblings)?;
                tx_put(items, &item_key(record.id), &record)?;
                Ok(())
            })?;
        self.store.commit()?;
        metrics::inc_items_created();
        info!(
            "item {} (template {}) created in {}",
            record.id, record.template_id, record.placement
        );
        Ok(record)
    }

    pub fn place_in_room(&self, item: ItemInstanceId, room: RoomId) -> Result<PlacementChange, WorldError> {
        self.relocate(item, Placement::InRoom(room), None)
    }

    pub fn place_on_character(
        &self,
        item: ItemInstanceId,
        character: CharacterId,
    ) -> Result<PlacementChange, WorldError> {
        self.relocate(item, Placement::OnCharacter(character), None)
    }

    pub fn place_in_container(
        &self,
        item: ItemInstanceId,
        container: ItemInstanceId,
    ) -> Result<PlacementChange, WorldError> {
        self.relocate(item, Placement::InContainer(container), None)
    }

    /// Move `item` to `target`. When `expected` is given the move only
    /// happens if the item is still exactly there, checked in the same
    /// transaction as the write.
    pub fn relocate(
        &self,
        item: ItemInstanceId,
        target: Placement,
        expected: Option<Placement>,
    ) -> Result<PlacementChange, WorldError> {
        let store = &self.store;
        let result = (&store.rooms, &store.characters, &store.items, &store.contents, &store.templates)
            .transaction(|(rooms, characters, items, contents, templates)| {
                relocate_tx(rooms, characters, items, contents, templates, item, target, expected)
            });
        let change = match result {
            Ok(change) => change,
            Err(err) => {
                let err = WorldError::from(err);
                if matches!(err, WorldError::CyclicContainment { .. }) {
                    metrics::inc_cycles_rejected();
                }
                debug!("placement of {} into {} rejected: {}", item, target, err);
                return Err(err);
            }
        };
        if !change.is_noop() {
            self.store.commit()?;
            metrics::inc_placements();
            info!("item {} moved from {} to {}", item, change.from, change.to);
        }
        Ok(change)
    }

    /// Delete an instance. A non-empty container is refused unless `cascade`
    /// is set, in which case its contents go first, depth-first. Returns the
    /// removed ids in deletion order.
    pub fn remove_instance(&self, item: ItemInstanceId, cascade: bool) -> Result<Vec<ItemInstanceId>, WorldError> {
        let removed = (&self.store.items, &self.store.contents).transaction(|(items, contents)| {
            let children: ContentsIndex =
                tx_get(contents, &contents_key(&Placement::InContainer(item)))?.unwrap_or_default();
            if !children.is_empty() && !cascade {
                return abort(WorldError::ContainerNotEmpty(item));
            }
            remove_subtree_tx(items, contents, item)
        })?;
        self.store.commit()?;
        metrics::add_items_removed(removed.len() as u64);
        info!("removed {} item(s) rooted at {}", removed.len(), item);
        Ok(removed)
    }

    pub fn locate(&self, item: ItemInstanceId) -> Result<Located, WorldError> {
        Ok(self
            .store
            .find_item(item)?
            .map(|record| Located::from(record.placement))
            .unwrap_or(Located::NotFound))
    }

    pub fn instance(&self, item: ItemInstanceId) -> Result<ItemInstanceRecord, WorldError> {
        self.store.get_item(item)
    }

    /// Items directly inside a container.
    pub fn contents_of(&self, container: ItemInstanceId) -> Result<Vec<ItemInstanceRecord>, WorldError> {
        self.held_by(&Placement::InContainer(container))
    }

    pub fn items_in_room(&self, room: RoomId) -> Result<Vec<ItemInstanceRecord>, WorldError> {
        self.held_by(&Placement::InRoom(room))
    }

    pub fn items_on_character(&self, character: CharacterId) -> Result<Vec<ItemInstanceRecord>, WorldError> {
        self.held_by(&Placement::OnCharacter(character))
    }

    fn held_by(&self, holder: &Placement) -> Result<Vec<ItemInstanceRecord>, WorldError> {
        let mut records = Vec::new();
        for id in self.store.contents_index(holder)? {
            if let Some(record) = self.store.find_item(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Everything nested inside `item`, depth-first, not including `item`.
    pub fn descendants(&self, item: ItemInstanceId) -> Result<Vec<ItemInstanceId>, WorldError> {
        let mut out = Vec::new();
        let mut stack: Vec<(ItemInstanceId, usize)> = vec![(item, 0)];
        while let Some((current, depth)) = stack.pop() {
            if depth > MAX_NESTING_DEPTH {
                return Err(WorldError::Inconsistent(format!(
                    "container nesting under {} exceeds {} levels",
                    item, MAX_NESTING_DEPTH
                )));
            }
            if current != item {
                out.push(current);
            }
            let children = self.store.contents_index(&Placement::InContainer(current))?;
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(out)
    }

    /// Follow container references up to the room or character that
    /// ultimately holds `item`.
    pub fn outermost(&self, item: ItemInstanceId) -> Result<Placement, WorldError> {
        let mut seen = BTreeSet::new();
        let mut current = self.store.get_item(item)?;
        loop {
            match current.placement {
                Placement::InContainer(parent) => {
                    if !seen.insert(parent) || seen.len() > MAX_NESTING_DEPTH {
                        warn!("container chain of {} does not terminate", item);
                        return Err(WorldError::Inconsistent(format!(
                            "container chain of {} is cyclic",
                            item
                        )));
                    }
                    current = self.store.get_item(parent).map_err(|_| {
                        WorldError::Inconsistent(format!(
                            "item {} points at missing container {}",
                            current.id, parent
                        ))
                    })?;
                }
                top => return Ok(top),
            }
        }
    }
}

/// Verify a placement target exists and, for containers, can hold items.
fn check_target_tx(
    rooms: &TransactionalTree,
    characters: &TransactionalTree,
    items: &TransactionalTree,
    templates: &TransactionalTree,
    target: &Placement,
) -> TxResult<()> {
    match target {
        Placement::InRoom(room) => {
            if !tx_exists(rooms, &room_key(*room))? {
                return abort(WorldError::UnknownTarget(format!("room {}", room)));
            }
        }
        Placement::OnCharacter(character) => {
            if !tx_exists(characters, &character_key(*character))? {
                return abort(WorldError::UnknownTarget(format!("character {}", character)));
            }
        }
        Placement::InContainer(container) => {
            let Some(record) = tx_get_record::<ItemInstanceRecord>(items, &item_key(*container))? else {
                return abort(WorldError::UnknownTarget(format!("container {}", container)));
            };
            check_container_capable_tx(templates, &record)?;
        }
    }
    Ok(())
}

fn check_container_capable_tx(templates: &TransactionalTree, container: &ItemInstanceRecord) -> TxResult<()> {
    let template: Option<ItemTemplateRecord> = tx_get_record(templates, &template_key(container.template_id))?;
    match template {
        Some(template) if template.is_container_capable() => Ok(()),
        Some(_) => abort(WorldError::NotAContainer(container.id)),
        None => abort(WorldError::NotFound(format!(
            "item template: {}",
            container.template_id
        ))),
    }
}

/// Fails with `CyclicContainment` if `item` is `container` or an ancestor of it.
fn check_acyclic_tx(items: &TransactionalTree, item: ItemInstanceId, container: ItemInstanceId) -> TxResult<()> {
    let mut current = container;
    for _ in 0..=MAX_NESTING_DEPTH {
        if current == item {
            return abort(WorldError::CyclicContainment { item, container });
        }
        let Some(record) = tx_get_record::<ItemInstanceRecord>(items, &item_key(current))? else {
            return Ok(());
        };
        match record.placement {
            Placement::InContainer(parent) => current = parent,
            _ => return Ok(()),
        }
    }
    abort(WorldError::Inconsistent(format!(
        "container chain above {} exceeds {} levels",
        container, MAX_NESTING_DEPTH
    )))
}

#[allow(clippy::too_many_arguments)]
fn relocate_tx(
    rooms: &TransactionalTree,
    characters: &TransactionalTree,
    items: &TransactionalTree,
    contents: &TransactionalTree,
    templates: &TransactionalTree,
    item: ItemInstanceId,
    target: Placement,
    expected: Option<Placement>,
) -> TxResult<PlacementChange> {
    let Some(mut record) = tx_get_record::<ItemInstanceRecord>(items, &item_key(item))? else {
        return abort(WorldError::item_not_found(item));
    };
    if let Some(expected) = expected {
        if record.placement != expected {
            return abort(match expected {
                Placement::OnCharacter(character) => WorldError::NotCarried { item, character },
                Placement::InRoom(room) => WorldError::NotInRoom { item, room },
                Placement::InContainer(container) => {
                    WorldError::NotFound(format!("item {} inside container {}", item, container))
                }
            });
        }
    }

    // Cycle detection runs before the capability check: putting A into B
    // while B sits in A is a cycle whatever B is.
    match target {
        Placement::InContainer(container) => {
            if !tx_exists(items, &item_key(container))? {
                return abort(WorldError::UnknownTarget(format!("container {}", container)));
            }
            check_acyclic_tx(items, item, container)?;
            check_target_tx(rooms, characters, items, templates, &target)?;
        }
        _ => check_target_tx(rooms, characters, items, templates, &target)?,
    }

    let from = record.placement;
    if from == target {
        return Ok(PlacementChange { item, from, to: target });
    }

    let old_key = contents_key(&from);
    let mut old_siblings: ContentsIndex = tx_get(contents, &old_key)?.unwrap_or_default();
    old_siblings.remove(&item);
    tx_put_set(contents, &old_key, &old_siblings)?;

    let new_key = contents_key(&target);
    let mut new_siblings: ContentsIndex = tx_get(contents, &new_key)?.unwrap_or_default();
    new_siblings.insert(item);
    tx_put(contents, &new_key, &new_siblings)?;

    record.placement = target;
    tx_put(items, &item_key(item), &record)?;
    Ok(PlacementChange { item, from, to: target })
}

/// Delete `root` and everything inside it, children before parents, and
/// unhook `root` from its holder's contents list.
pub(crate) fn remove_subtree_tx(
    items: &TransactionalTree,
    contents: &TransactionalTree,
    root: ItemInstanceId,
) -> TxResult<Vec<ItemInstanceId>> {
    let Some(record) = tx_get_record::<ItemInstanceRecord>(items, &item_key(root))? else {
        return abort(WorldError::item_not_found(root));
    };
    let parent_key = contents_key(&record.placement);
    let mut siblings: ContentsIndex = tx_get(contents, &parent_key)?.unwrap_or_default();
    siblings.remove(&root);
    tx_put_set(contents, &parent_key, &siblings)?;

    let mut removed = Vec::new();
    purge_tx(items, contents, root, 0, &mut removed)?;
    Ok(removed)
}

/// Delete `item` and its descendants without touching its holder's list.
pub(crate) fn purge_tx(
    items: &TransactionalTree,
    contents: &TransactionalTree,
    item: ItemInstanceId,
    depth: usize,
    removed: &mut Vec<ItemInstanceId>,
) -> TxResult<()> {
    if depth > MAX_NESTING_DEPTH {
        return abort(WorldError::Inconsistent(format!(
            "container nesting at {} exceeds {} levels",
            item, MAX_NESTING_DEPTH
        )));
    }
    let own_key = contents_key(&Placement::InContainer(item));
    let children: ContentsIndex = tx_get(contents, &own_key)?.unwrap_or_default();
    for child in children {
        purge_tx(items, contents, child, depth + 1, removed)?;
    }
    contents.remove(own_key)?;
    items.remove(item_key(item))?;
    removed.push(item);
    Ok(())
}
