use rusqlite::Connection;
use unithub_core::db::open_db_in_memory;
use unithub_core::model::orbat::NewSection;
use unithub_core::model::ordering::{
    is_contiguous, ORDERED_TABLES, PLATOONS, SECTIONS, SECTION_SLOTS,
};
use unithub_core::repo::orbat_repo::{OrbatRepository, SqliteOrbatRepository};
use unithub_core::{OrderingError, OrderingRepository, ScopeKey, SqliteOrderingRepository};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

/// Creates a section holding `count` slots and returns (section id, slot ids).
fn section_with_slots(conn: &Connection, name: &str, count: usize) -> (i64, Vec<i64>) {
    let orbat = SqliteOrbatRepository::try_new(conn).unwrap();
    let section = orbat
        .create_section(&NewSection::new(name, &name[..1], 10))
        .unwrap();
    let slots = (1..=count)
        .map(|index| {
            orbat
                .create_slot(section.id, &format!("Slot {index}"), None)
                .unwrap()
                .id
        })
        .collect();
    (section.id, slots)
}

fn slot_orders(conn: &Connection, section_id: i64) -> Vec<(i64, i64)> {
    let repo = SqliteOrderingRepository::try_new(conn).unwrap();
    repo.list_scope(SECTION_SLOTS, &ScopeKey::of(section_id))
        .unwrap()
        .into_iter()
        .map(|item| (item.id, item.sort_order))
        .collect()
}

#[test]
fn created_rows_are_appended_to_their_scope() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 3);

    assert_eq!(
        slot_orders(&conn, section_id),
        vec![(slots[0], 1), (slots[1], 2), (slots[2], 3)]
    );

    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();
    assert_eq!(
        repo.assign_initial_order(SECTION_SLOTS, &ScopeKey::of(section_id))
            .unwrap(),
        4
    );
    assert_eq!(
        repo.assign_initial_order(SECTION_SLOTS, &ScopeKey::of(9_999))
            .unwrap(),
        1
    );
}

#[test]
fn move_up_swaps_with_previous_slot() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 3);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    assert!(repo.move_up(SECTION_SLOTS, slots[2]).unwrap());

    assert_eq!(
        slot_orders(&conn, section_id),
        vec![(slots[0], 1), (slots[2], 2), (slots[1], 3)]
    );
}

#[test]
fn moves_at_scope_boundaries_are_no_ops() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 3);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();
    let before = slot_orders(&conn, section_id);

    assert!(!repo.move_up(SECTION_SLOTS, slots[0]).unwrap());
    assert!(!repo.move_down(SECTION_SLOTS, slots[2]).unwrap());

    assert_eq!(slot_orders(&conn, section_id), before);
}

#[test]
fn move_down_only_touches_its_own_scope() {
    let conn = setup();
    let (alpha, alpha_slots) = section_with_slots(&conn, "Alpha", 2);
    let (bravo, _) = section_with_slots(&conn, "Bravo", 2);
    let bravo_before = slot_orders(&conn, bravo);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    assert!(repo.move_down(SECTION_SLOTS, alpha_slots[0]).unwrap());

    assert_eq!(
        slot_orders(&conn, alpha),
        vec![(alpha_slots[1], 1), (alpha_slots[0], 2)]
    );
    assert_eq!(slot_orders(&conn, bravo), bravo_before);
}

#[test]
fn move_to_shifts_rows_between_old_and_new_position() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 4);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    assert!(repo.move_to(SECTION_SLOTS, slots[3], 1).unwrap());
    assert_eq!(
        slot_orders(&conn, section_id),
        vec![(slots[3], 1), (slots[0], 2), (slots[1], 3), (slots[2], 4)]
    );

    // Targets past the end are clamped to the last position.
    assert!(repo.move_to(SECTION_SLOTS, slots[3], 99).unwrap());
    assert_eq!(
        slot_orders(&conn, section_id),
        vec![(slots[0], 1), (slots[1], 2), (slots[2], 3), (slots[3], 4)]
    );
    assert!(!repo.move_to(SECTION_SLOTS, slots[3], 4).unwrap());
}

#[test]
fn remove_closes_the_gap() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 3);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    repo.remove(SECTION_SLOTS, slots[1]).unwrap();

    assert_eq!(
        slot_orders(&conn, section_id),
        vec![(slots[0], 1), (slots[2], 2)]
    );
    match repo.remove(SECTION_SLOTS, slots[1]) {
        Err(OrderingError::NotFound { table, id }) => {
            assert_eq!(table, "section_slots");
            assert_eq!(id, slots[1]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn missing_rows_make_moves_no_ops() {
    let conn = setup();
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    assert!(!repo.move_up(SECTION_SLOTS, 404).unwrap());
    assert!(!repo.move_down(SECTION_SLOTS, 404).unwrap());
    assert!(!repo.move_to(SECTION_SLOTS, 404, 1).unwrap());
    assert_eq!(repo.position_of(SECTION_SLOTS, 404).unwrap(), None);
}

#[test]
fn unattached_sections_share_the_null_scope() {
    let conn = setup();
    let orbat = SqliteOrbatRepository::try_new(&conn).unwrap();
    let platoon = orbat.create_platoon("1st Platoon", "").unwrap();
    let loose_a = orbat
        .create_section(&NewSection::new("Reserve", "R", 10))
        .unwrap();
    let attached = orbat
        .create_section(&NewSection::new("Alpha", "A", 10).in_platoon(platoon.id))
        .unwrap();
    let loose_b = orbat
        .create_section(&NewSection::new("Depot", "D", 10))
        .unwrap();

    assert_eq!(loose_a.sort_order, 1);
    assert_eq!(attached.sort_order, 1);
    assert_eq!(loose_b.sort_order, 2);

    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();
    assert!(repo.move_up(SECTIONS, loose_b.id).unwrap());
    let null_scope: Vec<i64> = repo
        .list_scope(SECTIONS, &ScopeKey::nullable(None))
        .unwrap()
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(null_scope, vec![loose_b.id, loose_a.id]);
    assert_eq!(
        repo.position_of(SECTIONS, attached.id).unwrap(),
        Some((ScopeKey::of(platoon.id), 1))
    );
}

#[test]
fn move_to_scope_appends_and_renumbers_old_scope() {
    let conn = setup();
    let (alpha, alpha_slots) = section_with_slots(&conn, "Alpha", 3);
    let (bravo, bravo_slots) = section_with_slots(&conn, "Bravo", 1);
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    let position = repo
        .move_to_scope(SECTION_SLOTS, alpha_slots[0], &ScopeKey::of(bravo))
        .unwrap();

    assert_eq!(position, 2);
    assert_eq!(
        slot_orders(&conn, alpha),
        vec![(alpha_slots[1], 1), (alpha_slots[2], 2)]
    );
    assert_eq!(
        slot_orders(&conn, bravo),
        vec![(bravo_slots[0], 1), (alpha_slots[0], 2)]
    );
}

#[test]
fn fix_ordering_repairs_out_of_band_edits() {
    let conn = setup();
    let (alpha, alpha_slots) = section_with_slots(&conn, "Alpha", 3);
    let (bravo, _) = section_with_slots(&conn, "Bravo", 2);
    conn.execute(
        "UPDATE section_slots SET sort_order = 7 WHERE id = ?1;",
        [alpha_slots[0]],
    )
    .unwrap();
    conn.execute(
        "UPDATE section_slots SET sort_order = 3 WHERE section_id = ?1;",
        [bravo],
    )
    .unwrap();
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    let written = repo.fix_ordering(SECTION_SLOTS, None).unwrap();
    assert!(written > 0);

    assert_eq!(
        slot_orders(&conn, alpha),
        vec![(alpha_slots[1], 1), (alpha_slots[2], 2), (alpha_slots[0], 3)]
    );
    // Equal positions fall back to id order.
    let bravo_orders: Vec<i64> = slot_orders(&conn, bravo)
        .into_iter()
        .map(|(_, order)| order)
        .collect();
    assert!(is_contiguous(&bravo_orders));
}

#[test]
fn fix_ordering_is_idempotent() {
    let conn = setup();
    let (section_id, slots) = section_with_slots(&conn, "Alpha", 4);
    conn.execute(
        "UPDATE section_slots SET sort_order = sort_order * 10 WHERE section_id = ?1;",
        [section_id],
    )
    .unwrap();
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    let first = repo
        .fix_ordering(SECTION_SLOTS, Some(&ScopeKey::of(section_id)))
        .unwrap();
    let after_first = slot_orders(&conn, section_id);
    let second = repo
        .fix_ordering(SECTION_SLOTS, Some(&ScopeKey::of(section_id)))
        .unwrap();

    assert_eq!(first, 4);
    assert_eq!(second, 0);
    assert_eq!(slot_orders(&conn, section_id), after_first);
    assert_eq!(after_first[0], (slots[0], 1));
}

#[test]
fn mixed_operations_leave_every_scope_contiguous() {
    let conn = setup();
    let (alpha, alpha_slots) = section_with_slots(&conn, "Alpha", 5);
    let (bravo, bravo_slots) = section_with_slots(&conn, "Bravo", 3);
    let orbat = SqliteOrbatRepository::try_new(&conn).unwrap();
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    repo.move_down(SECTION_SLOTS, alpha_slots[0]).unwrap();
    repo.remove(SECTION_SLOTS, alpha_slots[2]).unwrap();
    repo.move_to_scope(SECTION_SLOTS, bravo_slots[1], &ScopeKey::of(alpha))
        .unwrap();
    orbat.create_slot(bravo, "Late", None).unwrap();
    repo.move_to(SECTION_SLOTS, alpha_slots[4], 1).unwrap();
    orbat.delete_slot(bravo_slots[0]).unwrap();

    for table in ORDERED_TABLES {
        repo.fix_ordering(*table, None).unwrap();
    }
    for section_id in [alpha, bravo] {
        let orders: Vec<i64> = slot_orders(&conn, section_id)
            .into_iter()
            .map(|(_, order)| order)
            .collect();
        assert!(is_contiguous(&orders), "scope {section_id}: {orders:?}");
    }
    assert_eq!(slot_orders(&conn, alpha).len(), 5);
    assert_eq!(slot_orders(&conn, bravo).len(), 2);
}

#[test]
fn platoons_share_one_global_order() {
    let conn = setup();
    let orbat = SqliteOrbatRepository::try_new(&conn).unwrap();
    let first = orbat.create_platoon("1st Platoon", "").unwrap();
    let second = orbat.create_platoon("2nd Platoon", "").unwrap();
    let repo = SqliteOrderingRepository::try_new(&conn).unwrap();

    assert!(repo.move_up(PLATOONS, second.id).unwrap());

    let names: Vec<String> = orbat
        .list_platoons()
        .unwrap()
        .into_iter()
        .map(|platoon| platoon.name)
        .collect();
    assert_eq!(names, vec!["2nd Platoon", "1st Platoon"]);
    assert_eq!(
        repo.position_of(PLATOONS, first.id).unwrap(),
        Some((ScopeKey::global(), 2))
    );
}
