//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)]

use tempfile::TempDir;
use worldgraph::world::{
    AreaId, CharacterRecord, ItemCategory, ItemTemplateRecord, NewRoom, RoomId, WorldService,
    WorldStoreBuilder,
};

pub const CRATE: u64 = 1;
pub const SWORD: u64 = 2;
pub const QUIVER: u64 = 3;

/// A fresh world in a temp dir with one area. Keep the `TempDir` alive for
/// the duration of the test.
pub fn world() -> (WorldService, TempDir, AreaId) {
    let dir = TempDir::new().expect("tempdir");
    let store = WorldStoreBuilder::new(dir.path())
        .without_flush()
        .open()
        .expect("store");
    let service = WorldService::new(store);
    let area = service.create_area("Test Area", "For tests").expect("area").id;
    (service, dir, area)
}

#[allow(dead_code)]
pub fn rooms(service: &WorldService, area: AreaId, count: usize) -> Vec<RoomId> {
    (0..count)
        .map(|n| {
            service
                .create_room(&NewRoom::new(area, &format!("Room {}", n + 1)))
                .expect("room")
                .id
        })
        .collect()
}

/// Templates: a crate (container), a sword (plain) and a quiver; plus
/// characters 1 and 2.
#[allow(dead_code)]
pub fn stock_catalog(service: &WorldService) {
    let store = service.store();
    store
        .put_item_template(ItemTemplateRecord::new(CRATE, "crate", ItemCategory::Container))
        .expect("template");
    store
        .put_item_template(ItemTemplateRecord::new(SWORD, "sword", ItemCategory::Weapon))
        .expect("template");
    store
        .put_item_template(ItemTemplateRecord::new(QUIVER, "quiver", ItemCategory::Quiver))
        .expect("template");
    store
        .put_character(CharacterRecord::new(1, 1, "Ana"))
        .expect("character");
    store
        .put_character(CharacterRecord::new(2, 2, "Ben"))
        .expect("character");
}
