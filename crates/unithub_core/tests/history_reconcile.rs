use chrono::NaiveDate;
use rusqlite::Connection;
use unithub_core::db::open_db_in_memory;
use unithub_core::model::history::DateInterval;
use unithub_core::model::orbat::{NewRole, NewSection};
use unithub_core::repo::history_repo::HistoryError;
use unithub_core::repo::orbat_repo::{OrbatRepository, SqliteOrbatRepository};
use unithub_core::repo::user_repo::{SqliteUserRepository, UserRepository};
use unithub_core::{
    HistoryKind, HistoryPayload, HistoryRecord, HistoryRepository, SaveOutcome,
    SqliteHistoryRepository, User, UserId, UserStatus,
};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn insert_user(conn: &Connection, name: &str) -> UserId {
    let repo = SqliteUserRepository::try_new(conn).unwrap();
    let user = User::new(name, name.to_lowercase());
    repo.create_user(&user).unwrap()
}

fn insert_section(conn: &Connection, name: &str) -> i64 {
    let repo = SqliteOrbatRepository::try_new(conn).unwrap();
    repo.create_section(&NewSection::new(name, &name[..1], 8))
        .unwrap()
        .id
}

fn role_record(
    user_id: UserId,
    role_id: i64,
    name: &str,
    section_id: i64,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> HistoryRecord {
    let mut record = HistoryRecord::new(
        user_id,
        start,
        HistoryPayload::RoleAssignment {
            role_id: Some(role_id),
            role_name_at_assignment: name.to_string(),
            section_id,
        },
    );
    record.end_date = end;
    record
}

fn section_record(
    user_id: UserId,
    section_id: i64,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> HistoryRecord {
    let mut record = HistoryRecord::new(
        user_id,
        start,
        HistoryPayload::SectionAssignment { section_id },
    );
    record.end_date = end;
    record
}

fn intervals(
    repo: &SqliteHistoryRepository<'_>,
    user_id: UserId,
    kind: HistoryKind,
) -> Vec<(NaiveDate, Option<NaiveDate>)> {
    let mut stored: Vec<_> = repo
        .list_for_user(user_id, kind)
        .unwrap()
        .into_iter()
        .map(|record| (record.start_date, record.end_date))
        .collect();
    stored.sort();
    stored
}

fn assert_disjoint_and_non_degenerate(stored: &[(NaiveDate, Option<NaiveDate>)]) {
    for (index, (start, end)) in stored.iter().enumerate() {
        assert_ne!(Some(*start), *end, "degenerate interval stored");
        for (other_start, other_end) in &stored[index + 1..] {
            let a = DateInterval::new(*start, *end);
            let b = DateInterval::new(*other_start, *other_end);
            assert!(!a.overlaps(&b), "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn later_open_record_trims_earlier_open_record() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let sergeant = SqliteOrbatRepository::try_new(&conn)
        .unwrap()
        .create_role(&NewRole::rank("Sergeant", "SGT"))
        .unwrap()
        .id;
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();

    let first = repo
        .save(&role_record(user_id, sergeant, "Sergeant", section_id, day(1, 1), None))
        .unwrap();
    let second = repo
        .save(&role_record(user_id, sergeant, "Sergeant", section_id, day(1, 10), None))
        .unwrap();

    assert!(matches!(first.outcome, SaveOutcome::Inserted(_)));
    assert_eq!(second.trimmed, 1);
    assert_eq!(
        intervals(&repo, user_id, HistoryKind::RoleAssignment),
        vec![(day(1, 1), Some(day(1, 9))), (day(1, 10), None)]
    );
}

#[test]
fn same_day_record_is_pruned() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();

    let report = repo
        .save(&section_record(user_id, section_id, day(2, 1), Some(day(2, 1))))
        .unwrap();

    assert_eq!(report.outcome, SaveOutcome::Pruned);
    assert_eq!(report.record_id(), None);
    assert!(repo
        .list_for_user(user_id, HistoryKind::SectionAssignment)
        .unwrap()
        .is_empty());
}

#[test]
fn updating_stored_record_to_degenerate_deletes_it() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    let id = repo
        .save(&section_record(user_id, section_id, day(3, 1), None))
        .unwrap()
        .record_id()
        .unwrap();

    let stored = repo
        .get(HistoryKind::SectionAssignment, id)
        .unwrap()
        .unwrap();
    let report = repo.save(&stored.ending(day(3, 1))).unwrap();

    assert_eq!(report.outcome, SaveOutcome::Pruned);
    assert_eq!(report.deleted, 1);
    assert_eq!(repo.get(HistoryKind::SectionAssignment, id).unwrap(), None);
}

#[test]
fn covering_record_deletes_existing_record() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    let inner = repo
        .save(&section_record(user_id, section_id, day(3, 5), Some(day(3, 20))))
        .unwrap()
        .record_id()
        .unwrap();

    let report = repo
        .save(&section_record(user_id, section_id, day(3, 1), Some(day(3, 31))))
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.trimmed, 0);
    assert_eq!(repo.get(HistoryKind::SectionAssignment, inner).unwrap(), None);
    assert_eq!(
        intervals(&repo, user_id, HistoryKind::SectionAssignment),
        vec![(day(3, 1), Some(day(3, 31)))]
    );
}

#[test]
fn inner_record_splits_existing_record() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let alpha = insert_section(&conn, "Alpha");
    let bravo = insert_section(&conn, "Bravo");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    repo.save(&section_record(user_id, alpha, day(1, 1), Some(day(1, 31))))
        .unwrap();

    let report = repo
        .save(&section_record(user_id, bravo, day(1, 10), Some(day(1, 20))))
        .unwrap();

    assert_eq!(report.split, 1);
    let records = repo
        .list_for_user(user_id, HistoryKind::SectionAssignment)
        .unwrap();
    let sections: Vec<_> = records
        .iter()
        .map(|record| (record.start_date, record.end_date, record.payload.clone()))
        .collect();
    assert_eq!(
        sections,
        vec![
            (
                day(1, 21),
                Some(day(1, 31)),
                HistoryPayload::SectionAssignment { section_id: alpha }
            ),
            (
                day(1, 10),
                Some(day(1, 20)),
                HistoryPayload::SectionAssignment { section_id: bravo }
            ),
            (
                day(1, 1),
                Some(day(1, 9)),
                HistoryPayload::SectionAssignment { section_id: alpha }
            ),
        ]
    );
}

#[test]
fn exclusive_kind_merges_records_sharing_start_date() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    let first = repo
        .save(&HistoryRecord::new(
            user_id,
            day(4, 1),
            HistoryPayload::UserStatus {
                status: UserStatus::Active,
            },
        ))
        .unwrap()
        .record_id()
        .unwrap();

    let report = repo
        .save(&HistoryRecord::new(
            user_id,
            day(4, 1),
            HistoryPayload::UserStatus {
                status: UserStatus::Loa,
            },
        ))
        .unwrap();

    assert_eq!(report.outcome, SaveOutcome::Merged(first));
    let records = repo.list_for_user(user_id, HistoryKind::UserStatus).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].payload,
        HistoryPayload::UserStatus {
            status: UserStatus::Loa
        }
    );
}

#[test]
fn different_roles_may_overlap() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let orbat = SqliteOrbatRepository::try_new(&conn).unwrap();
    let corporal = orbat.create_role(&NewRole::rank("Corporal", "CPL")).unwrap();
    let medic = orbat.create_role(&NewRole::duty("Medic", "MED")).unwrap();
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();

    repo.save(&role_record(user_id, corporal.id, "Corporal", section_id, day(5, 1), None))
        .unwrap();
    let report = repo
        .save(&role_record(user_id, medic.id, "Medic", section_id, day(5, 3), None))
        .unwrap();

    assert_eq!(report.trimmed + report.deleted + report.split, 0);
    let active = repo
        .active_on(user_id, HistoryKind::RoleAssignment, day(5, 10))
        .unwrap();
    assert_eq!(active.len(), 2);
}

#[test]
fn record_starting_inside_new_interval_is_pushed_back() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    repo.save(&HistoryRecord::new(
        user_id,
        day(6, 5),
        HistoryPayload::Username {
            username: "later".to_string(),
        },
    ))
    .unwrap();

    repo.save(
        &HistoryRecord::new(
            user_id,
            day(6, 1),
            HistoryPayload::Username {
                username: "earlier".to_string(),
            },
        )
        .ending(day(6, 10)),
    )
    .unwrap();

    assert_eq!(
        intervals(&repo, user_id, HistoryKind::Username),
        vec![(day(6, 1), Some(day(6, 10))), (day(6, 11), None)]
    );
}

#[test]
fn inverted_range_is_rejected() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();

    let err = repo
        .save(
            &HistoryRecord::new(
                user_id,
                day(7, 10),
                HistoryPayload::UserStatus {
                    status: UserStatus::Reserves,
                },
            )
            .ending(day(7, 1)),
        )
        .unwrap_err();

    assert!(matches!(err, HistoryError::InvalidRange { .. }));
    assert!(repo
        .list_for_user(user_id, HistoryKind::UserStatus)
        .unwrap()
        .is_empty());
}

#[test]
fn updating_unknown_record_is_not_found() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let section_id = insert_section(&conn, "Alpha");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    let mut record = section_record(user_id, section_id, day(1, 1), None);
    record.id = Some(77);

    let err = repo.save(&record).unwrap_err();
    assert!(matches!(err, HistoryError::NotFound { id: 77, .. }));
}

#[test]
fn arbitrary_insert_sequence_keeps_intervals_disjoint() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let alpha = insert_section(&conn, "Alpha");
    let bravo = insert_section(&conn, "Bravo");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();

    let inserts = [
        (alpha, day(1, 1), None),
        (bravo, day(2, 1), Some(day(2, 28))),
        (alpha, day(1, 15), Some(day(3, 15))),
        (bravo, day(3, 1), Some(day(3, 2))),
        (alpha, day(2, 10), Some(day(2, 10))),
        (bravo, day(1, 20), None),
        (alpha, day(4, 1), Some(day(4, 30))),
        (bravo, day(4, 10), Some(day(4, 12))),
    ];
    for (section_id, start, end) in inserts {
        repo.save(&section_record(user_id, section_id, start, end))
            .unwrap();
        assert_disjoint_and_non_degenerate(&intervals(
            &repo,
            user_id,
            HistoryKind::SectionAssignment,
        ));
    }
}

#[test]
fn active_on_and_open_records_use_whole_days() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let alpha = insert_section(&conn, "Alpha");
    let bravo = insert_section(&conn, "Bravo");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    repo.save(&section_record(user_id, alpha, day(1, 1), Some(day(1, 31))))
        .unwrap();
    repo.save(&section_record(user_id, bravo, day(2, 1), None))
        .unwrap();

    let on_last_day = repo
        .active_on(user_id, HistoryKind::SectionAssignment, day(1, 31))
        .unwrap();
    assert_eq!(on_last_day.len(), 1);
    assert!(on_last_day[0].is_active(day(1, 31)));
    assert_eq!(
        on_last_day[0].payload,
        HistoryPayload::SectionAssignment { section_id: alpha }
    );

    let open = repo
        .open_records(user_id, HistoryKind::SectionAssignment)
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(
        open[0].payload,
        HistoryPayload::SectionAssignment { section_id: bravo }
    );
    assert!(repo
        .active_on(user_id, HistoryKind::SectionAssignment, day(12, 31))
        .unwrap()
        .iter()
        .all(|record| record.end_date.is_none()));
}

#[test]
fn delete_removes_record_and_reports_missing_ids() {
    let conn = setup();
    let user_id = insert_user(&conn, "Miller");
    let repo = SqliteHistoryRepository::try_new(&conn).unwrap();
    let id = repo
        .save(&HistoryRecord::new(
            user_id,
            day(1, 1),
            HistoryPayload::Username {
                username: "miller".to_string(),
            },
        ))
        .unwrap()
        .record_id()
        .unwrap();

    repo.delete(HistoryKind::Username, id).unwrap();

    assert!(matches!(
        repo.delete(HistoryKind::Username, id),
        Err(HistoryError::NotFound { .. })
    ));
}
