//! Seed data loader for data-driven world initialization.
//!
//! A seed file (see `data/seeds/world.json`) lists areas, rooms, item
//! templates, characters, exits and starting items. Areas, rooms, templates
//! and characters keep the ids written in the file so exits and placements
//! can refer to them; exits and item instances get fresh ids.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::world::errors::WorldError;
use crate::world::service::WorldService;
use crate::world::types::{
    AreaId, AreaRecord, Attributes, CharacterRecord, Direction, DoorSpec, ItemCategory,
    ItemTemplateRecord, NewExit, NewInstance, Placement, RoomId, RoomRecord, TemplateId, TrapSpec,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSeed {
    #[serde(default)]
    pub areas: Vec<AreaSeed>,
    #[serde(default)]
    pub rooms: Vec<RoomSeed>,
    #[serde(default)]
    pub item_templates: Vec<TemplateSeed>,
    #[serde(default)]
    pub characters: Vec<CharacterSeed>,
    #[serde(default)]
    pub exits: Vec<ExitSeed>,
    #[serde(default)]
    pub items: Vec<ItemSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaSeed {
    pub id: AreaId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSeed {
    pub id: RoomId,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSeed {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub category: ItemCategory,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub stats: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSeed {
    pub id: u64,
    #[serde(default)]
    pub player_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitSeed {
    pub from: RoomId,
    pub direction: String,
    pub to: RoomId,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub door: Option<DoorSpec>,
    #[serde(default)]
    pub trap: Option<TrapSpec>,
    #[serde(default)]
    pub two_way: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSeed {
    pub template_id: TemplateId,
    pub placement: Placement,
    #[serde(default)]
    pub condition: Option<i32>,
}

/// Counts of what [`apply_seed`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub areas: usize,
    pub rooms: usize,
    pub item_templates: usize,
    pub characters: usize,
    pub exits: usize,
    pub reverse_exits: usize,
    pub items: usize,
    pub warnings: Vec<String>,
}

impl fmt::Display for SeedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} areas, {} rooms, {} templates, {} characters, {} exits (+{} reverse), {} items",
            self.areas,
            self.rooms,
            self.item_templates,
            self.characters,
            self.exits,
            self.reverse_exits,
            self.items
        )?;
        if !self.warnings.is_empty() {
            write!(f, ", {} warning(s)", self.warnings.len())?;
        }
        Ok(())
    }
}

/// Load a world seed from a JSON file.
pub fn load_seed_from_json<P: AsRef<Path>>(path: P) -> Result<WorldSeed, WorldError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        WorldError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse {}: {}", path.display(), e),
        ))
    })
}

/// Apply a seed only if the world has no rooms yet. Seeded rooms keep their
/// file ids, so applying over an existing world would overwrite them.
pub fn apply_seed_to_empty(
    service: &WorldService,
    seed: &WorldSeed,
) -> Result<SeedSummary, WorldError> {
    let rooms = service.store().count_rooms();
    if rooms > 0 {
        return Err(WorldError::AlreadySeeded { rooms });
    }
    apply_seed(service, seed)
}

/// Write a seed into the world. Records are applied in dependency order
/// (areas, rooms, templates, characters, exits, items); the first hard
/// failure stops the load. Reverse exits that cannot be created are
/// collected as warnings.
pub fn apply_seed(service: &WorldService, seed: &WorldSeed) -> Result<SeedSummary, WorldError> {
    let store = service.store();
    let mut summary = SeedSummary::default();

    for area in &seed.areas {
        store.put_area(AreaRecord::new(area.id, &area.name, &area.description))?;
        summary.areas += 1;
    }

    for room in &seed.rooms {
        if !store.area_exists(room.area_id)? {
            return Err(WorldError::NotFound(format!(
                "area: {} (seed room {})",
                room.area_id, room.id
            )));
        }
        let mut record = RoomRecord::new(room.id, room.area_id, &room.name, &room.description)
            .with_currency(room.currency);
        record.flags = room.flags.clone();
        record.spawners = room.spawners.clone();
        store.put_room(record)?;
        summary.rooms += 1;
    }

    for template in &seed.item_templates {
        let mut record = ItemTemplateRecord::new(template.id, &template.name, template.category);
        for flag in &template.flags {
            record = record.with_flag(flag);
        }
        record.stats = template.stats.clone();
        store.put_item_template(record)?;
        summary.item_templates += 1;
    }

    for character in &seed.characters {
        store.put_character(CharacterRecord::new(
            character.id,
            character.player_id,
            &character.name,
        ))?;
        summary.characters += 1;
    }

    for exit in &seed.exits {
        let direction: Direction = exit.direction.parse()?;
        let request = NewExit {
            source: exit.from,
            direction,
            destination: exit.to,
            hidden: exit.hidden,
            door: exit.door.clone(),
            trap: exit.trap.clone(),
            create_reverse: exit.two_way,
        };
        let created = service.create_exit(&request)?;
        summary.exits += 1;
        if created.reverse.exit().is_some() {
            summary.reverse_exits += 1;
        }
        if let Some(warning) = created.reverse.warning() {
            warn!("seed exit {} {} -> {}: {}", exit.from, direction, exit.to, warning);
            summary.warnings.push(warning);
        }
    }

    for item in &seed.items {
        let mut request = NewInstance::new(item.template_id, item.placement);
        request.condition = item.condition;
        let record = service.create_instance(&request)?;
        debug!("seeded item {} at {}", record.id, record.placement);
        summary.items += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::storage::WorldStoreBuilder;
    use crate::world::types::Located;
    use tempfile::TempDir;

    const SEED: &str = r#"{
        "areas": [{ "id": 1, "name": "Old Town" }],
        "rooms": [
            { "id": 10, "area_id": 1, "name": "Square", "currency": 5, "flags": ["safe"] },
            { "id": 11, "area_id": 1, "name": "Gate" }
        ],
        "item_templates": [
            { "id": 100, "name": "crate", "category": "CONTAINER" },
            { "id": 101, "name": "lamp", "flags": ["light"] }
        ],
        "characters": [{ "id": 7, "player_id": 70, "name": "Warden" }],
        "exits": [
            { "from": 10, "direction": "n", "to": 11, "two_way": true,
              "door": { "name": "iron gate", "is_locked": true, "lock_difficulty": 20 } }
        ],
        "items": [
            { "template_id": 100, "placement": { "in_room": 10 } },
            { "template_id": 101, "placement": { "on_character": 7 }, "condition": 60 }
        ]
    }"#;

    fn create_service() -> (WorldService, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = WorldStoreBuilder::new(dir.path())
            .without_flush()
            .open()
            .expect("store");
        (WorldService::new(store), dir)
    }

    #[test]
    fn seed_applies_in_dependency_order() {
        let (service, _dir) = create_service();
        let seed: WorldSeed = serde_json::from_str(SEED).expect("seed json");
        let summary = apply_seed(&service, &seed).expect("apply");
        assert_eq!(summary.rooms, 2);
        assert_eq!(summary.exits, 1);
        assert_eq!(summary.reverse_exits, 1);
        assert_eq!(summary.items, 2);
        assert!(summary.warnings.is_empty());

        let back = service
            .resolve_exit(11, Direction::South)
            .expect("resolve")
            .expect("reverse exit");
        assert_eq!(back.destination, 10);
        assert_eq!(back.door.as_ref().map(|d| d.name.as_str()), Some("iron gate"));

        let carried = service.ledger().items_on_character(7).expect("items");
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].condition, 60);
        assert!(matches!(service.locate(carried[0].id).expect("locate"), Located::OnCharacter(7)));
        assert_eq!(service.room(10).expect("room").currency, 5);
    }

    #[test]
    fn generated_ids_do_not_collide_with_seeded_ones() {
        let (service, _dir) = create_service();
        let seed: WorldSeed = serde_json::from_str(SEED).expect("seed json");
        apply_seed(&service, &seed).expect("apply");
        let room = service
            .create_room(&crate::world::types::NewRoom::new(1, "Annex"))
            .expect("room");
        assert!(room.id > 11);
    }

    #[test]
    fn seeding_a_populated_world_is_refused() {
        let (service, _dir) = create_service();
        let seed: WorldSeed = serde_json::from_str(SEED).expect("seed json");
        apply_seed_to_empty(&service, &seed).expect("first seed");
        service
            .update_room(service.room(10).expect("room").with_currency(99))
            .expect("edit");

        let err = apply_seed_to_empty(&service, &seed).expect_err("second seed");
        assert!(matches!(err, WorldError::AlreadySeeded { rooms: 2 }));
        assert_eq!(service.room(10).expect("room").currency, 99);
        assert_eq!(service.store().count_exits(), 2);
    }

    #[test]
    fn room_in_unknown_area_stops_the_load() {
        let (service, _dir) = create_service();
        let seed: WorldSeed = serde_json::from_str(
            r#"{ "rooms": [{ "id": 1, "area_id": 9, "name": "Void" }] }"#,
        )
        .expect("seed json");
        assert!(matches!(apply_seed(&service, &seed), Err(WorldError::NotFound(_))));
    }

    #[test]
    fn bad_json_is_reported_with_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load_seed_from_json(&path).expect_err("parse failure");
        assert!(err.to_string().contains("broken.json"));
    }
}
