use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::world::errors::WorldError;

pub const AREA_SCHEMA_VERSION: u8 = 1;
pub const ROOM_SCHEMA_VERSION: u8 = 1;
pub const EXIT_SCHEMA_VERSION: u8 = 1;
pub const TEMPLATE_SCHEMA_VERSION: u8 = 1;
pub const CHARACTER_SCHEMA_VERSION: u8 = 1;
pub const ITEM_SCHEMA_VERSION: u8 = 1;

/// Condition assigned to new item instances when none is given.
pub const FULL_CONDITION: i32 = 100;

pub type AreaId = u64;
pub type RoomId = u64;
pub type ExitId = u64;
pub type TemplateId = u64;
pub type CharacterId = u64;
pub type ItemInstanceId = Uuid;

/// Loosely-typed value for sub-records this crate stores but never interprets
/// (room spawners, template stats).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    Northeast,
    East,
    Southeast,
    South,
    Southwest,
    West,
    Northwest,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 10] = [
        Direction::North,
        Direction::Northeast,
        Direction::East,
        Direction::Southeast,
        Direction::South,
        Direction::Southwest,
        Direction::West,
        Direction::Northwest,
        Direction::Up,
        Direction::Down,
    ];

    /// The direction a reverse exit uses to point back.
    pub fn inverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Northeast => Direction::Southwest,
            Direction::Southwest => Direction::Northeast,
            Direction::Northwest => Direction::Southeast,
            Direction::Southeast => Direction::Northwest,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::Northeast => "northeast",
            Direction::East => "east",
            Direction::Southeast => "southeast",
            Direction::South => "south",
            Direction::Southwest => "southwest",
            Direction::West => "west",
            Direction::Northwest => "northwest",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dir = match s.trim().to_ascii_lowercase().as_str() {
            "n" | "north" => Direction::North,
            "ne" | "northeast" => Direction::Northeast,
            "e" | "east" => Direction::East,
            "se" | "southeast" => Direction::Southeast,
            "s" | "south" => Direction::South,
            "sw" | "southwest" => Direction::Southwest,
            "w" | "west" => Direction::West,
            "nw" | "northwest" => Direction::Northwest,
            "u" | "up" => Direction::Up,
            "d" | "down" => Direction::Down,
            _ => return Err(WorldError::InvalidDirection(s.to_string())),
        };
        Ok(dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaRecord {
    pub id: AreaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub schema_version: u8,
}

impl AreaRecord {
    pub fn new(id: AreaId, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            schema_version: AREA_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub area_id: AreaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Coins lying on the floor.
    #[serde(default)]
    pub currency: u64,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Consumed by the mob-spawning collaborator; preserved verbatim.
    #[serde(default)]
    pub spawners: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub schema_version: u8,
}

impl RoomRecord {
    pub fn new(id: RoomId, area_id: AreaId, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            area_id,
            name: name.to_string(),
            description: description.to_string(),
            currency: 0,
            flags: BTreeSet::new(),
            spawners: Attributes::new(),
            created_at: now,
            updated_at: now,
            schema_version: ROOM_SCHEMA_VERSION,
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn with_currency(mut self, currency: u64) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_spawner(mut self, key: &str, value: AttributeValue) -> Self {
        self.spawners.insert(key.to_string(), value);
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Request payload for creating a room; the id is assigned by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewRoom {
    pub area_id: AreaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub currency: u64,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub spawners: Attributes,
}

impl NewRoom {
    pub fn new(area_id: AreaId, name: &str) -> Self {
        Self {
            area_id,
            name: name.to_string(),
            description: "You see nothing special.".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoorSpec {
    pub name: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub lock_difficulty: Option<u8>,
    /// None means the lock can be picked without a specific key.
    #[serde(default)]
    pub required_key_template_id: Option<TemplateId>,
}

impl DoorSpec {
    pub fn unlocked(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_locked: false,
            lock_difficulty: None,
            required_key_template_id: None,
        }
    }

    pub fn locked(name: &str, difficulty: u8) -> Self {
        Self {
            name: name.to_string(),
            is_locked: true,
            lock_difficulty: Some(difficulty),
            required_key_template_id: None,
        }
    }

    pub fn with_key(mut self, template_id: TemplateId) -> Self {
        self.required_key_template_id = Some(template_id);
        self
    }

    pub fn validate(&self, max_difficulty: u8) -> Result<(), WorldError> {
        if self.name.trim().is_empty() {
            return Err(WorldError::InvalidDoorSpec(
                "door name must not be blank".to_string(),
            ));
        }
        match (self.is_locked, self.lock_difficulty) {
            (true, None) => Err(WorldError::InvalidDoorSpec(
                "locked door requires a lock difficulty".to_string(),
            )),
            (_, Some(d)) if d > max_difficulty => Err(WorldError::InvalidDoorSpec(format!(
                "lock difficulty {} exceeds maximum {}",
                d, max_difficulty
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrapSpec {
    pub detection_difficulty: u8,
    #[serde(default)]
    pub damage: u32,
    pub damage_type: String,
}

impl TrapSpec {
    pub fn new(detection_difficulty: u8, damage: u32, damage_type: &str) -> Self {
        Self {
            detection_difficulty,
            damage,
            damage_type: damage_type.to_string(),
        }
    }

    pub fn validate(&self, max_difficulty: u8) -> Result<(), WorldError> {
        if self.detection_difficulty > max_difficulty {
            return Err(WorldError::InvalidTrapSpec(format!(
                "detection difficulty {} exceeds maximum {}",
                self.detection_difficulty, max_difficulty
            )));
        }
        if self.damage_type.trim().is_empty() {
            return Err(WorldError::InvalidTrapSpec(
                "trap requires a damage type".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitRecord {
    pub id: ExitId,
    #[serde(rename = "source_room_id")]
    pub source: RoomId,
    pub direction: Direction,
    #[serde(rename = "destination_room_id")]
    pub destination: RoomId,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub door: Option<DoorSpec>,
    #[serde(default)]
    pub trap: Option<TrapSpec>,
    #[serde(default)]
    pub schema_version: u8,
}

impl ExitRecord {
    pub fn has_door(&self) -> bool {
        self.door.is_some()
    }

    pub fn is_trapped(&self) -> bool {
        self.trap.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExit {
    pub source: RoomId,
    pub direction: Direction,
    pub destination: RoomId,
    pub hidden: bool,
    pub door: Option<DoorSpec>,
    pub trap: Option<TrapSpec>,
    pub create_reverse: bool,
}

impl NewExit {
    pub fn new(source: RoomId, direction: Direction, destination: RoomId) -> Self {
        Self {
            source,
            direction,
            destination,
            hidden: false,
            door: None,
            trap: None,
            create_reverse: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_door(mut self, door: DoorSpec) -> Self {
        self.door = Some(door);
        self
    }

    pub fn with_trap(mut self, trap: TrapSpec) -> Self {
        self.trap = Some(trap);
        self
    }

    pub fn two_way(mut self) -> Self {
        self.create_reverse = true;
        self
    }
}

/// In-place edit of an existing exit. `None` leaves a field untouched; the
/// nested options of `door`/`trap` allow clearing the sub-record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitPatch {
    pub destination: Option<RoomId>,
    pub hidden: Option<bool>,
    pub door: Option<Option<DoorSpec>>,
    pub trap: Option<Option<TrapSpec>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCategory {
    General,
    Weapon,
    RangedWeapon,
    Ammo,
    Armor,
    Container,
    Quiver,
    Quest,
    Food,
    Drink,
    Key,
    Light,
}

impl Default for ItemCategory {
    fn default() -> Self {
        Self::General
    }
}

pub const CONTAINER_FLAG: &str = "CONTAINER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemTemplateRecord {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub category: ItemCategory,
    #[serde(default)]
    pub stats: Attributes,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub schema_version: u8,
}

impl ItemTemplateRecord {
    pub fn new(id: TemplateId, name: &str, category: ItemCategory) -> Self {
        Self {
            id,
            name: name.to_string(),
            category,
            stats: Attributes::new(),
            flags: BTreeSet::new(),
            schema_version: TEMPLATE_SCHEMA_VERSION,
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_ascii_uppercase());
        self
    }

    pub fn with_stat(mut self, key: &str, value: AttributeValue) -> Self {
        self.stats.insert(key.to_string(), value);
        self
    }

    pub fn is_container_capable(&self) -> bool {
        matches!(self.category, ItemCategory::Container | ItemCategory::Quiver)
            || self.flags.contains(CONTAINER_FLAG)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharacterRecord {
    pub id: CharacterId,
    pub player_id: u64,
    pub name: String,
    #[serde(default)]
    pub schema_version: u8,
}

impl CharacterRecord {
    pub fn new(id: CharacterId, player_id: u64, name: &str) -> Self {
        Self {
            id,
            player_id,
            name: name.to_string(),
            schema_version: CHARACTER_SCHEMA_VERSION,
        }
    }
}

/// Where an item instance physically is. Exactly one variant, so an instance
/// can never be in zero or two places.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    InRoom(RoomId),
    OnCharacter(CharacterId),
    InContainer(ItemInstanceId),
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::InRoom(id) => write!(f, "room {}", id),
            Placement::OnCharacter(id) => write!(f, "character {}", id),
            Placement::InContainer(id) => write!(f, "container {}", id),
        }
    }
}

/// Result of a ledger lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Located {
    InRoom(RoomId),
    OnCharacter(CharacterId),
    InContainer(ItemInstanceId),
    NotFound,
}

impl From<Placement> for Located {
    fn from(placement: Placement) -> Self {
        match placement {
            Placement::InRoom(id) => Located::InRoom(id),
            Placement::OnCharacter(id) => Located::OnCharacter(id),
            Placement::InContainer(id) => Located::InContainer(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemInstanceRecord {
    pub id: ItemInstanceId,
    pub template_id: TemplateId,
    #[serde(default = "default_condition")]
    pub condition: i32,
    #[serde(default)]
    pub instance_stats: BTreeMap<String, f64>,
    pub placement: Placement,
    #[serde(default)]
    pub schema_version: u8,
}

fn default_condition() -> i32 {
    FULL_CONDITION
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInstance {
    pub template_id: TemplateId,
    pub placement: Placement,
    pub condition: Option<i32>,
    pub instance_stats: BTreeMap<String, f64>,
}

impl NewInstance {
    pub fn new(template_id: TemplateId, placement: Placement) -> Self {
        Self {
            template_id,
            placement,
            condition: None,
            instance_stats: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, condition: i32) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_stat(mut self, key: &str, value: f64) -> Self {
        self.instance_stats.insert(key.to_string(), value);
        self
    }
}

/// A room together with its outbound exits, as handed to the admin console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room: RoomRecord,
    pub exits: Vec<ExitRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_is_an_involution() {
        for dir in Direction::ALL {
            assert_eq!(dir.inverse().inverse(), dir);
            assert_ne!(dir.inverse(), dir);
        }
        assert_eq!(Direction::Northwest.inverse(), Direction::Southeast);
        assert_eq!(Direction::Up.inverse(), Direction::Down);
    }

    #[test]
    fn direction_parses_short_and_long_forms() {
        assert_eq!("ne".parse::<Direction>().unwrap(), Direction::Northeast);
        assert_eq!("North".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!(" d ".parse::<Direction>().unwrap(), Direction::Down);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(WorldError::InvalidDirection(_))
        ));
    }

    #[test]
    fn direction_serializes_lowercase() {
        let json = serde_json::to_string(&Direction::Southwest).unwrap();
        assert_eq!(json, "\"southwest\"");
    }

    #[test]
    fn locked_door_requires_difficulty() {
        assert!(DoorSpec::locked("oak door", 30).validate(50).is_ok());
        let mut door = DoorSpec::locked("oak door", 30);
        door.lock_difficulty = None;
        assert!(matches!(door.validate(50), Err(WorldError::InvalidDoorSpec(_))));
        assert!(matches!(
            DoorSpec::locked("oak door", 51).validate(50),
            Err(WorldError::InvalidDoorSpec(_))
        ));
        assert!(DoorSpec::unlocked("gate").validate(50).is_ok());
        assert!(DoorSpec::unlocked("  ").validate(50).is_err());
    }

    #[test]
    fn trap_validation_checks_bounds_and_type() {
        assert!(TrapSpec::new(20, 15, "fire").validate(50).is_ok());
        assert!(TrapSpec::new(60, 15, "fire").validate(50).is_err());
        assert!(TrapSpec::new(10, 0, "").validate(50).is_err());
    }

    #[test]
    fn container_capability_from_category_or_flag() {
        assert!(ItemTemplateRecord::new(1, "sack", ItemCategory::Container).is_container_capable());
        assert!(ItemTemplateRecord::new(2, "quiver", ItemCategory::Quiver).is_container_capable());
        assert!(ItemTemplateRecord::new(3, "odd hat", ItemCategory::Armor)
            .with_flag("container")
            .is_container_capable());
        assert!(!ItemTemplateRecord::new(4, "sword", ItemCategory::Weapon).is_container_capable());
    }

    #[test]
    fn exit_json_uses_wire_field_names() {
        let exit = ExitRecord {
            id: 9,
            source: 1,
            direction: Direction::North,
            destination: 2,
            is_hidden: false,
            door: Some(DoorSpec::locked("iron gate", 30)),
            trap: None,
            schema_version: EXIT_SCHEMA_VERSION,
        };
        let value = serde_json::to_value(&exit).unwrap();
        assert_eq!(value["source_room_id"], 1);
        assert_eq!(value["destination_room_id"], 2);
        assert_eq!(value["direction"], "north");
        assert_eq!(value["door"]["lock_difficulty"], 30);
    }
}
