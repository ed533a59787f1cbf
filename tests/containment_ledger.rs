/// Integration tests for the containment ledger: single placement, cycle
/// rejection, container capability and removal.
mod common;

use common::{CRATE, QUIVER, SWORD};
use worldgraph::world::{Located, NewInstance, Placement, WorldError};

#[test]
fn cycle_is_rejected_and_nothing_moves() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let room = common::rooms(&world, area, 1)[0];

    let b = world
        .create_instance(&NewInstance::new(CRATE, Placement::InRoom(room)))
        .expect("b");
    let a = world
        .create_instance(&NewInstance::new(CRATE, Placement::InContainer(b.id)))
        .expect("a");

    let err = world.place_in_container(b.id, a.id).expect_err("cycle");
    assert!(matches!(
        err,
        WorldError::CyclicContainment { item, container } if item == b.id && container == a.id
    ));
    assert_eq!(world.locate(a.id).expect("locate"), Located::InContainer(b.id));
    assert_eq!(world.locate(b.id).expect("locate"), Located::InRoom(room));
    assert!(world.audit().expect("audit").is_clean());
}

#[test]
fn cycle_wins_over_missing_capability() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let room = common::rooms(&world, area, 1)[0];

    let outer = world
        .create_instance(&NewInstance::new(CRATE, Placement::InRoom(room)))
        .expect("outer");
    let sword = world
        .create_instance(&NewInstance::new(SWORD, Placement::InContainer(outer.id)))
        .expect("sword");

    assert!(matches!(
        world.place_in_container(outer.id, sword.id),
        Err(WorldError::CyclicContainment { .. })
    ));
    let other = world
        .create_instance(&NewInstance::new(SWORD, Placement::InRoom(room)))
        .expect("other");
    assert!(matches!(
        world.place_in_container(other.id, sword.id),
        Err(WorldError::NotAContainer(id)) if id == sword.id
    ));
}

#[test]
fn every_move_leaves_exactly_one_location() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let ids = common::rooms(&world, area, 2);

    let quiver = world
        .create_instance(&NewInstance::new(QUIVER, Placement::OnCharacter(1)))
        .expect("quiver");
    let sword = world
        .create_instance(&NewInstance::new(SWORD, Placement::InRoom(ids[0])))
        .expect("sword");

    world.place_on_character(sword.id, 2).expect("pick up");
    world.place_in_container(sword.id, quiver.id).expect("stow");
    world.place_in_room(sword.id, ids[1]).expect("drop");

    assert_eq!(world.locate(sword.id).expect("locate"), Located::InRoom(ids[1]));
    assert!(world.ledger().items_in_room(ids[0]).expect("room 1").is_empty());
    assert!(world.ledger().items_on_character(2).expect("ben").is_empty());
    assert!(world.ledger().contents_of(quiver.id).expect("quiver").is_empty());
    let floor = world.ledger().items_in_room(ids[1]).expect("room 2");
    assert_eq!(floor.len(), 1);
    assert_eq!(floor[0].id, sword.id);
}

#[test]
fn missing_targets_are_unknown() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let room = common::rooms(&world, area, 1)[0];
    let sword = world
        .create_instance(&NewInstance::new(SWORD, Placement::InRoom(room)))
        .expect("sword");

    assert!(matches!(world.place_in_room(sword.id, 777), Err(WorldError::UnknownTarget(_))));
    assert!(matches!(world.place_on_character(sword.id, 99), Err(WorldError::UnknownTarget(_))));
    assert!(matches!(
        world.place_in_container(sword.id, uuid::Uuid::new_v4()),
        Err(WorldError::UnknownTarget(_))
    ));
    assert!(matches!(
        world.create_instance(&NewInstance::new(SWORD, Placement::OnCharacter(99))),
        Err(WorldError::UnknownTarget(_))
    ));
    assert_eq!(world.locate(sword.id).expect("locate"), Located::InRoom(room));
}

#[test]
fn locate_unknown_item_is_not_found() {
    let (world, _dir, _area) = common::world();
    assert_eq!(
        world.locate(uuid::Uuid::new_v4()).expect("locate"),
        Located::NotFound
    );
}

#[test]
fn removal_requires_cascade_for_full_containers() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let room = common::rooms(&world, area, 1)[0];

    let chest = world
        .create_instance(&NewInstance::new(CRATE, Placement::InRoom(room)))
        .expect("chest");
    let inner = world
        .create_instance(&NewInstance::new(CRATE, Placement::InContainer(chest.id)))
        .expect("inner");
    let blade = world
        .create_instance(&NewInstance::new(SWORD, Placement::InContainer(inner.id)).with_condition(40))
        .expect("blade");
    assert_eq!(blade.condition, 40);

    assert!(matches!(
        world.remove_instance(chest.id, false),
        Err(WorldError::ContainerNotEmpty(id)) if id == chest.id
    ));
    assert_eq!(world.ledger().descendants(chest.id).expect("desc"), vec![inner.id, blade.id]);
    assert_eq!(
        world.ledger().outermost(blade.id).expect("outermost"),
        Placement::InRoom(room)
    );

    let removed = world.remove_instance(chest.id, true).expect("cascade");
    assert_eq!(removed, vec![blade.id, inner.id, chest.id]);
    for id in [chest.id, inner.id, blade.id] {
        assert_eq!(world.locate(id).expect("locate"), Located::NotFound);
    }
    assert!(world.ledger().items_in_room(room).expect("floor").is_empty());
    assert_eq!(world.store().count_items(), 0);
}

#[test]
fn guarded_moves_check_the_current_holder() {
    let (world, _dir, area) = common::world();
    common::stock_catalog(&world);
    let ids = common::rooms(&world, area, 2);
    let sword = world
        .create_instance(&NewInstance::new(SWORD, Placement::InRoom(ids[0])))
        .expect("sword");

    assert!(matches!(
        world.pick_up(1, sword.id, ids[1]),
        Err(WorldError::NotInRoom { room, .. }) if room == ids[1]
    ));
    world.pick_up(1, sword.id, ids[0]).expect("pick up");
    assert!(matches!(
        world.give_item(2, 1, sword.id),
        Err(WorldError::NotCarried { character: 2, .. })
    ));
    world.give_item(1, 2, sword.id).expect("give");
    world.drop_item(2, sword.id, ids[1]).expect("drop");
    assert_eq!(world.locate(sword.id).expect("locate"), Located::InRoom(ids[1]));
}
