use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::IVec;

use crate::world::errors::WorldError;
use crate::world::types::{
    AreaId, AreaRecord, CharacterId, CharacterRecord, Direction, ExitId, ExitRecord,
    ItemInstanceId, ItemInstanceRecord, ItemTemplateRecord, Placement, RoomId, RoomRecord,
    TemplateId, AREA_SCHEMA_VERSION, CHARACTER_SCHEMA_VERSION, EXIT_SCHEMA_VERSION,
    ITEM_SCHEMA_VERSION, ROOM_SCHEMA_VERSION, TEMPLATE_SCHEMA_VERSION,
};

const TREE_META: &str = "world_meta";
const TREE_AREAS: &str = "world_areas";
const TREE_ROOMS: &str = "world_rooms";
const TREE_EXITS: &str = "world_exits";
const TREE_EXIT_INDEX: &str = "world_exit_index";
const TREE_TEMPLATES: &str = "world_item_templates";
const TREE_CHARACTERS: &str = "world_characters";
const TREE_ITEMS: &str = "world_items";
const TREE_CONTENTS: &str = "world_contents";

const KEY_NEXT_ID: &[u8] = b"next_id";

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, WorldError>;

/// Outbound exits of a room, keyed by direction. One slot per direction.
pub(crate) type OutboundIndex = BTreeMap<Direction, ExitId>;
/// Exits whose destination is a room.
pub(crate) type InboundIndex = BTreeSet<ExitId>;
/// Item instances directly held by a room, character or container.
pub(crate) type ContentsIndex = BTreeSet<ItemInstanceId>;

/// A persisted record with a schema version byte checked on every read.
pub(crate) trait Record: Serialize + DeserializeOwned {
    const ENTITY: &'static str;
    const SCHEMA_VERSION: u8;
    fn schema_version(&self) -> u8;
    fn set_schema_version(&mut self, version: u8);
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal, $version:expr) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;
            const SCHEMA_VERSION: u8 = $version;
            fn schema_version(&self) -> u8 {
                self.schema_version
            }
            fn set_schema_version(&mut self, version: u8) {
                self.schema_version = version;
            }
        }
    };
}

impl_record!(AreaRecord, "area", AREA_SCHEMA_VERSION);
impl_record!(RoomRecord, "room", ROOM_SCHEMA_VERSION);
impl_record!(ExitRecord, "exit", EXIT_SCHEMA_VERSION);
impl_record!(ItemTemplateRecord, "item template", TEMPLATE_SCHEMA_VERSION);
impl_record!(CharacterRecord, "character", CHARACTER_SCHEMA_VERSION);
impl_record!(ItemInstanceRecord, "item instance", ITEM_SCHEMA_VERSION);

pub(crate) fn area_key(id: AreaId) -> Vec<u8> {
    format!("areas:{:020}", id).into_bytes()
}

pub(crate) fn room_key(id: RoomId) -> Vec<u8> {
    format!("rooms:{:020}", id).into_bytes()
}

pub(crate) fn exit_key(id: ExitId) -> Vec<u8> {
    format!("exits:{:020}", id).into_bytes()
}

pub(crate) fn exits_out_key(room: RoomId) -> Vec<u8> {
    format!("out:{:020}", room).into_bytes()
}

pub(crate) fn exits_in_key(room: RoomId) -> Vec<u8> {
    format!("in:{:020}", room).into_bytes()
}

pub(crate) fn template_key(id: TemplateId) -> Vec<u8> {
    format!("templates:{:020}", id).into_bytes()
}

pub(crate) fn character_key(id: CharacterId) -> Vec<u8> {
    format!("characters:{:020}", id).into_bytes()
}

pub(crate) fn item_key(id: ItemInstanceId) -> Vec<u8> {
    format!("items:{}", id).into_bytes()
}

/// Key of the contents list a placement points into.
pub(crate) fn contents_key(placement: &Placement) -> Vec<u8> {
    match placement {
        Placement::InRoom(room) => format!("room:{:020}", room),
        Placement::OnCharacter(character) => format!("char:{:020}", character),
        Placement::InContainer(item) => format!("item:{}", item),
    }
    .into_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WorldError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WorldError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

fn decode_record<T: Record>(bytes: &[u8]) -> Result<T, WorldError> {
    let record: T = decode(bytes)?;
    if record.schema_version() != T::SCHEMA_VERSION {
        return Err(WorldError::SchemaMismatch {
            entity: T::ENTITY,
            expected: T::SCHEMA_VERSION,
            found: record.schema_version(),
        });
    }
    Ok(record)
}

fn abort_with(err: WorldError) -> ConflictableTransactionError<WorldError> {
    ConflictableTransactionError::Abort(err)
}

/// Read a bincode value inside a transaction.
pub(crate) fn tx_get<T: DeserializeOwned>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).map_err(abort_with),
        None => Ok(None),
    }
}

/// Read a versioned record inside a transaction.
pub(crate) fn tx_get_record<T: Record>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => decode_record(&bytes).map(Some).map_err(abort_with),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes = encode(value).map_err(abort_with)?;
    tree.insert(key, bytes)?;
    Ok(())
}

/// Write a set-like index entry, dropping the key once the set is empty.
pub(crate) fn tx_put_set<T: Serialize + Ord>(
    tree: &TransactionalTree,
    key: &[u8],
    set: &BTreeSet<T>,
) -> TxResult<()> {
    if set.is_empty() {
        tree.remove(key)?;
        Ok(())
    } else {
        tx_put(tree, key, set)
    }
}

pub(crate) fn tx_exists(tree: &TransactionalTree, key: &[u8]) -> TxResult<bool> {
    Ok(tree.get(key)?.is_some())
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct WorldStoreBuilder {
    path: PathBuf,
    flush_every_write: bool,
}

impl WorldStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_every_write: true,
        }
    }

    /// Skip the fsync after each committed mutation (bulk imports, tests).
    pub fn without_flush(mut self) -> Self {
        self.flush_every_write = false;
        self
    }

    pub fn flush_every_write(mut self, flush: bool) -> Self {
        self.flush_every_write = flush;
        self
    }

    pub fn open(self) -> Result<WorldStore, WorldError> {
        WorldStore::open_with_options(self.path, self.flush_every_write)
    }
}

/// Sled-backed persistence for the world graph and the item ledger.
///
/// Cloning is cheap: all clones share the same database handle, so a store can
/// be handed to as many request handlers as needed.
#[derive(Clone)]
pub struct WorldStore {
    db: sled::Db,
    meta: sled::Tree,
    pub(crate) areas: sled::Tree,
    pub(crate) rooms: sled::Tree,
    pub(crate) exits: sled::Tree,
    pub(crate) exit_index: sled::Tree,
    pub(crate) templates: sled::Tree,
    pub(crate) characters: sled::Tree,
    pub(crate) items: sled::Tree,
    pub(crate) contents: sled::Tree,
    flush_every_write: bool,
}

impl WorldStore {
    /// Open (or create) the world store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        Self::open_with_options(path, true)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, flush_every_write: bool) -> Result<Self, WorldError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let store = Self {
            meta: db.open_tree(TREE_META)?,
            areas: db.open_tree(TREE_AREAS)?,
            rooms: db.open_tree(TREE_ROOMS)?,
            exits: db.open_tree(TREE_EXITS)?,
            exit_index: db.open_tree(TREE_EXIT_INDEX)?,
            templates: db.open_tree(TREE_TEMPLATES)?,
            characters: db.open_tree(TREE_CHARACTERS)?,
            items: db.open_tree(TREE_ITEMS)?,
            contents: db.open_tree(TREE_CONTENTS)?,
            db,
            flush_every_write,
        };
        debug!("opened world store at {}", path_ref.display());
        Ok(store)
    }

    /// Flush committed writes to disk when the store was opened durable.
    pub(crate) fn commit(&self) -> Result<(), WorldError> {
        if self.flush_every_write {
            self.db.flush()?;
        }
        Ok(())
    }

    /// Allocate a fresh id for areas, rooms and exits. Ids start at 1.
    pub fn next_id(&self) -> Result<u64, WorldError> {
        let bytes = self.meta.update_and_fetch(KEY_NEXT_ID, |old| {
            let current = old.map(read_counter).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        Ok(bytes.as_deref().map(read_counter).unwrap_or(1))
    }

    /// Make sure future `next_id` calls never hand out `id` (explicit ids from seeds).
    pub(crate) fn reserve_id(&self, id: u64) -> Result<(), WorldError> {
        self.meta.update_and_fetch(KEY_NEXT_ID, |old| {
            let current = old.map(read_counter).unwrap_or(0);
            Some(current.max(id).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn put<T: Record>(&self, tree: &sled::Tree, key: Vec<u8>, mut record: T) -> Result<(), WorldError> {
        record.set_schema_version(T::SCHEMA_VERSION);
        let bytes = encode(&record)?;
        tree.insert(key, bytes)?;
        self.commit()
    }

    fn get<T: Record>(&self, tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, WorldError> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: Record>(&self, tree: &sled::Tree) -> Result<Vec<T>, WorldError> {
        tree.iter()
            .map(|entry| {
                let (_key, value): (IVec, IVec) = entry?;
                decode_record(&value)
            })
            .collect()
    }

    // ----- areas -----

    pub fn put_area(&self, area: AreaRecord) -> Result<(), WorldError> {
        self.reserve_id(area.id)?;
        self.put(&self.areas, area_key(area.id), area)
    }

    pub fn get_area(&self, id: AreaId) -> Result<AreaRecord, WorldError> {
        self.get(&self.areas, &area_key(id))?
            .ok_or_else(|| WorldError::NotFound(format!("area: {}", id)))
    }

    pub fn area_exists(&self, id: AreaId) -> Result<bool, WorldError> {
        Ok(self.areas.contains_key(area_key(id))?)
    }

    pub fn list_areas(&self) -> Result<Vec<AreaRecord>, WorldError> {
        self.scan(&self.areas)
    }

    // ----- rooms -----

    /// Insert or update a room record. Exits are stored separately and are
    /// not touched.
    pub fn put_room(&self, room: RoomRecord) -> Result<(), WorldError> {
        self.reserve_id(room.id)?;
        self.put(&self.rooms, room_key(room.id), room)
    }

    pub fn get_room(&self, id: RoomId) -> Result<RoomRecord, WorldError> {
        self.get(&self.rooms, &room_key(id))?
            .ok_or_else(|| WorldError::room_not_found(id))
    }

    pub fn room_exists(&self, id: RoomId) -> Result<bool, WorldError> {
        Ok(self.rooms.contains_key(room_key(id))?)
    }

    pub fn list_rooms(&self) -> Result<Vec<RoomRecord>, WorldError> {
        self.scan(&self.rooms)
    }

    // ----- exits -----

    pub fn get_exit(&self, id: ExitId) -> Result<ExitRecord, WorldError> {
        self.get(&self.exits, &exit_key(id))?
            .ok_or_else(|| WorldError::exit_not_found(id))
    }

    pub fn list_all_exits(&self) -> Result<Vec<ExitRecord>, WorldError> {
        self.scan(&self.exits)
    }

    pub(crate) fn outbound_index(&self, room: RoomId) -> Result<OutboundIndex, WorldError> {
        match self.exit_index.get(exits_out_key(room))? {
            Some(bytes) => decode(&bytes),
            None => Ok(OutboundIndex::new()),
        }
    }

    pub(crate) fn inbound_index(&self, room: RoomId) -> Result<InboundIndex, WorldError> {
        match self.exit_index.get(exits_in_key(room))? {
            Some(bytes) => decode(&bytes),
            None => Ok(InboundIndex::new()),
        }
    }

    // ----- item templates and characters (collaborator data) -----

    pub fn put_item_template(&self, template: ItemTemplateRecord) -> Result<(), WorldError> {
        self.put(&self.templates, template_key(template.id), template)
    }

    pub fn get_item_template(&self, id: TemplateId) -> Result<ItemTemplateRecord, WorldError> {
        self.get(&self.templates, &template_key(id))?
            .ok_or_else(|| WorldError::NotFound(format!("item template: {}", id)))
    }

    pub fn put_character(&self, character: CharacterRecord) -> Result<(), WorldError> {
        self.put(&self.characters, character_key(character.id), character)
    }

    pub fn get_character(&self, id: CharacterId) -> Result<CharacterRecord, WorldError> {
        self.get(&self.characters, &character_key(id))?
            .ok_or_else(|| WorldError::NotFound(format!("character: {}", id)))
    }

    pub fn character_exists(&self, id: CharacterId) -> Result<bool, WorldError> {
        Ok(self.characters.contains_key(character_key(id))?)
    }

    // ----- item instances -----

    pub fn get_item(&self, id: ItemInstanceId) -> Result<ItemInstanceRecord, WorldError> {
        self.find_item(id)?
            .ok_or_else(|| WorldError::item_not_found(id))
    }

    pub fn find_item(&self, id: ItemInstanceId) -> Result<Option<ItemInstanceRecord>, WorldError> {
        self.get(&self.items, &item_key(id))
    }

    pub fn list_items(&self) -> Result<Vec<ItemInstanceRecord>, WorldError> {
        self.scan(&self.items)
    }

    pub(crate) fn contents_index(&self, placement: &Placement) -> Result<ContentsIndex, WorldError> {
        match self.contents.get(contents_key(placement))? {
            Some(bytes) => decode(&bytes),
            None => Ok(ContentsIndex::new()),
        }
    }

    /// Whether the target of a placement currently exists.
    pub fn placement_target_exists(&self, placement: &Placement) -> Result<bool, WorldError> {
        match placement {
            Placement::InRoom(room) => self.room_exists(*room),
            Placement::OnCharacter(character) => self.character_exists(*character),
            Placement::InContainer(item) => Ok(self.items.contains_key(item_key(*item))?),
        }
    }

    pub fn count_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn count_exits(&self) -> usize {
        self.exits.len()
    }

    pub fn count_items(&self) -> usize {
        self.items.len()
    }
}

fn read_counter(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::types::{CharacterRecord, ItemCategory};
    use tempfile::TempDir;

    fn create_test_store() -> (WorldStore, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = WorldStoreBuilder::new(dir.path())
            .without_flush()
            .open()
            .expect("store");
        (store, dir)
    }

    #[test]
    fn ids_are_monotonic_and_skip_reserved() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.next_id().expect("id"), 1);
        assert_eq!(store.next_id().expect("id"), 2);
        store.reserve_id(40).expect("reserve");
        assert_eq!(store.next_id().expect("id"), 41);
        store.reserve_id(10).expect("reserve lower is a no-op");
        assert_eq!(store.next_id().expect("id"), 42);
    }

    #[test]
    fn room_round_trip_keeps_opaque_fields() {
        let (store, _dir) = create_test_store();
        store.put_area(AreaRecord::new(1, "Old Town", "")).expect("area");
        let room = RoomRecord::new(5, 1, "Market", "Stalls everywhere.")
            .with_flag("SHOP")
            .with_currency(12)
            .with_spawner(
                "rat",
                crate::world::types::AttributeValue::Map(BTreeMap::from([(
                    "max".to_string(),
                    crate::world::types::AttributeValue::Int(3),
                )])),
            );
        store.put_room(room.clone()).expect("put");
        let fetched = store.get_room(5).expect("get");
        assert_eq!(fetched, room);
        assert_eq!(fetched.schema_version, ROOM_SCHEMA_VERSION);
        assert!(store.next_id().expect("id") > 5);
    }

    #[test]
    fn missing_records_are_not_found() {
        let (store, _dir) = create_test_store();
        assert!(matches!(store.get_room(99), Err(WorldError::NotFound(_))));
        assert!(matches!(store.get_exit(99), Err(WorldError::NotFound(_))));
        assert!(matches!(
            store.get_item(uuid::Uuid::new_v4()),
            Err(WorldError::NotFound(_))
        ));
    }

    #[test]
    fn schema_mismatch_is_reported() {
        let (store, _dir) = create_test_store();
        let mut template = ItemTemplateRecord::new(3, "sack", ItemCategory::Container);
        template.schema_version = 9;
        let bytes = bincode::serialize(&template).expect("encode");
        store.templates.insert(template_key(3), bytes).expect("raw insert");
        match store.get_item_template(3) {
            Err(WorldError::SchemaMismatch { entity, found, .. }) => {
                assert_eq!(entity, "item template");
                assert_eq!(found, 9);
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.name)),
        }
    }

    #[test]
    fn placement_targets_are_checked_per_variant() {
        let (store, _dir) = create_test_store();
        store.put_area(AreaRecord::new(1, "Area", "")).expect("area");
        store.put_room(RoomRecord::new(2, 1, "Room", "")).expect("room");
        store
            .put_character(CharacterRecord::new(7, 1, "Ada"))
            .expect("character");
        assert!(store.placement_target_exists(&Placement::InRoom(2)).unwrap());
        assert!(!store.placement_target_exists(&Placement::InRoom(3)).unwrap());
        assert!(store.placement_target_exists(&Placement::OnCharacter(7)).unwrap());
        assert!(!store
            .placement_target_exists(&Placement::InContainer(uuid::Uuid::new_v4()))
            .unwrap());
    }
}
