/// Integration tests for the exit graph: slot uniqueness, reverse pairing,
/// door and trap validation, and deletion.
mod common;

use worldgraph::world::{
    Direction, DoorSpec, ExitPatch, NewExit, ReverseOutcome, RoomSnapshot, TrapSpec, WorldError,
};

#[test]
fn two_way_exit_creates_mirror_and_blocks_duplicates() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 3);
    let (r1, r2, r3) = (ids[0], ids[1], ids[2]);

    let created = world
        .create_exit(&NewExit::new(r1, Direction::North, r2).two_way())
        .expect("exit");
    assert_eq!(created.exit.direction, Direction::North);
    assert_eq!(created.exit.destination, r2);

    let reverse = match &created.reverse {
        ReverseOutcome::Created(exit) => exit.clone(),
        other => panic!("expected reverse exit, got {:?}", other),
    };
    assert_eq!(reverse.source, r2);
    assert_eq!(reverse.direction, Direction::South);
    assert_eq!(reverse.destination, r1);

    let from_two = world.list_exits(r2).expect("exits");
    assert_eq!(from_two.len(), 1);
    assert_eq!(from_two[0].direction, Direction::South);

    let err = world
        .create_exit(&NewExit::new(r1, Direction::North, r3))
        .expect_err("duplicate");
    assert!(matches!(
        err,
        WorldError::DuplicateDirection {
            direction: Direction::North,
            ..
        }
    ));
    let from_one = world.list_exits(r1).expect("exits");
    assert_eq!(from_one.len(), 1);
    assert_eq!(from_one[0].destination, r2);
    assert!(world.exit_graph().inbound_exits(r3).expect("inbound").is_empty());
    assert_eq!(world.store().count_exits(), 2);
}

#[test]
fn unknown_destination_is_rejected() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 1);
    let err = world
        .create_exit(&NewExit::new(ids[0], Direction::East, 9_999))
        .expect_err("unknown room");
    assert!(matches!(err, WorldError::UnknownRoom(9_999)));
    assert!(world.list_exits(ids[0]).expect("exits").is_empty());
}

#[test]
fn locked_door_over_difficulty_limit_is_rejected() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);

    let err = world
        .create_exit(
            &NewExit::new(ids[0], Direction::West, ids[1]).with_door(DoorSpec::locked("vault door", 60)),
        )
        .expect_err("difficulty 60");
    assert!(matches!(err, WorldError::InvalidDoorSpec(_)));
    assert_eq!(world.store().count_exits(), 0);

    let ok = world
        .create_exit(
            &NewExit::new(ids[0], Direction::West, ids[1])
                .with_door(DoorSpec::locked("vault door", 50).with_key(7)),
        )
        .expect("difficulty 50");
    let door = ok.exit.door.expect("door");
    assert!(door.is_locked);
    assert_eq!(door.required_key_template_id, Some(7));
}

#[test]
fn locked_door_needs_difficulty_but_not_key() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);

    let keyless = DoorSpec {
        name: "cellar hatch".to_string(),
        is_locked: true,
        lock_difficulty: Some(30),
        required_key_template_id: None,
    };
    let created = world
        .create_exit(&NewExit::new(ids[0], Direction::Down, ids[1]).with_door(keyless.clone()))
        .expect("locked door without key");
    let door = created.exit.door.expect("door");
    assert!(door.is_locked);
    assert_eq!(door.lock_difficulty, Some(30));
    assert_eq!(door.required_key_template_id, None);
    assert_eq!(world.store().count_exits(), 1);

    let no_difficulty = DoorSpec {
        lock_difficulty: None,
        ..keyless
    };
    let err = world
        .create_exit(&NewExit::new(ids[0], Direction::Up, ids[1]).with_door(no_difficulty))
        .expect_err("locked door without difficulty");
    assert!(matches!(err, WorldError::InvalidDoorSpec(_)));
    assert!(world.resolve_exit(ids[0], Direction::Up).expect("resolve").is_none());
    assert_eq!(world.store().count_exits(), 1);
}

#[test]
fn trap_validation_and_reverse_without_trap() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);

    let err = world
        .create_exit(&NewExit::new(ids[0], Direction::Up, ids[1]).with_trap(TrapSpec::new(51, 5, "fire")))
        .expect_err("detection 51");
    assert!(matches!(err, WorldError::InvalidTrapSpec(_)));

    let err = world
        .create_exit(&NewExit::new(ids[0], Direction::Up, ids[1]).with_trap(TrapSpec::new(10, 5, "  ")))
        .expect_err("blank damage type");
    assert!(matches!(err, WorldError::InvalidTrapSpec(_)));

    let created = world
        .create_exit(
            &NewExit::new(ids[0], Direction::Up, ids[1])
                .with_trap(TrapSpec::new(20, 5, "fire"))
                .hidden()
                .two_way(),
        )
        .expect("trapped exit");
    assert!(created.exit.is_trapped());
    let reverse = created.reverse.exit().expect("reverse");
    assert_eq!(reverse.direction, Direction::Down);
    assert!(reverse.is_hidden);
    assert!(!reverse.is_trapped());
}

#[test]
fn reverse_collision_keeps_primary_and_warns() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 3);
    let (r1, r2, r3) = (ids[0], ids[1], ids[2]);
    world
        .create_exit(&NewExit::new(r2, Direction::South, r3))
        .expect("occupying exit");

    let created = world
        .create_exit(&NewExit::new(r1, Direction::North, r2).two_way())
        .expect("primary survives");
    assert!(created.reverse.is_warning());
    assert!(matches!(
        created.reverse,
        ReverseOutcome::Failed(WorldError::DuplicateDirection { .. })
    ));
    assert!(created.reverse.warning().expect("warning").contains("reverse"));

    let south = world
        .resolve_exit(r2, Direction::South)
        .expect("resolve")
        .expect("still there");
    assert_eq!(south.destination, r3);
    assert!(world.resolve_exit(r1, Direction::North).expect("resolve").is_some());
}

#[test]
fn delete_with_reverse_removes_both_halves() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);
    let created = world
        .create_exit(&NewExit::new(ids[0], Direction::Southeast, ids[1]).two_way())
        .expect("exit");

    let deleted = world.delete_exit(created.exit.id, true).expect("delete");
    assert_eq!(deleted.removed.id, created.exit.id);
    assert!(matches!(deleted.reverse, ReverseOutcome::Removed(_)));
    assert!(world.list_exits(ids[0]).expect("exits").is_empty());
    assert!(world.list_exits(ids[1]).expect("exits").is_empty());

    assert!(matches!(
        world.delete_exit(created.exit.id, false),
        Err(WorldError::NotFound(_))
    ));
}

#[test]
fn delete_without_reverse_leaves_mirror() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);
    let created = world
        .create_exit(&NewExit::new(ids[0], Direction::Northwest, ids[1]).two_way())
        .expect("exit");
    let deleted = world.delete_exit(created.exit.id, false).expect("delete");
    assert!(matches!(deleted.reverse, ReverseOutcome::NotRequested));
    assert_eq!(world.list_exits(ids[1]).expect("exits").len(), 1);

    let mirror = world.list_exits(ids[1]).expect("exits")[0].clone();
    let again = world.delete_exit(mirror.id, true).expect("delete mirror");
    assert!(matches!(again.reverse, ReverseOutcome::Absent));
}

#[test]
fn list_exits_is_ordered_and_requires_room() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);
    for dir in [Direction::Down, Direction::North, Direction::West, Direction::East] {
        world
            .create_exit(&NewExit::new(ids[0], dir, ids[1]))
            .expect("exit");
    }
    let order: Vec<Direction> = world
        .list_exits(ids[0])
        .expect("exits")
        .into_iter()
        .map(|e| e.direction)
        .collect();
    assert_eq!(
        order,
        vec![Direction::North, Direction::East, Direction::West, Direction::Down]
    );
    assert!(matches!(world.list_exits(4_242), Err(WorldError::NotFound(_))));
    assert_eq!(world.exit_graph().inbound_exits(ids[1]).expect("inbound").len(), 4);
}

#[test]
fn update_exit_can_clear_door_and_retarget() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 3);
    let created = world
        .create_exit(&NewExit::new(ids[0], Direction::East, ids[1]).with_door(DoorSpec::unlocked("gate")))
        .expect("exit");

    let patch = ExitPatch {
        destination: Some(ids[2]),
        door: Some(None),
        ..Default::default()
    };
    let updated = world.update_exit(created.exit.id, &patch).expect("update");
    assert_eq!(updated.destination, ids[2]);
    assert!(!updated.has_door());
    assert!(world.exit_graph().inbound_exits(ids[1]).expect("inbound").is_empty());
    assert!(world.audit().expect("audit").is_clean());
}

#[test]
fn room_snapshot_round_trips_through_json() {
    let (world, _dir, area) = common::world();
    let ids = common::rooms(&world, area, 2);
    world
        .create_exit(
            &NewExit::new(ids[0], Direction::North, ids[1])
                .with_door(DoorSpec::locked("oak door", 15))
                .two_way(),
        )
        .expect("exit");

    let snapshot = world.room_snapshot(ids[0]).expect("snapshot");
    let json = serde_json::to_string(&snapshot).expect("serialize");
    assert!(json.contains("\"source_room_id\""));
    assert!(json.contains("\"north\""));
    let back: RoomSnapshot = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, snapshot);
}
