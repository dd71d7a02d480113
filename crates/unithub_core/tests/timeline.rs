use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;
use unithub_core::db::open_db_in_memory;
use unithub_core::model::timeline::{
    group_by_day, NewTimelineEntry, TimelineEventType, TimelineQuery,
};
use unithub_core::repo::timeline_repo::{SqliteTimelineRepository, TimelineRepository};
use unithub_core::repo::user_repo::{SqliteUserRepository, UserRepository};
use unithub_core::{User, UserId};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

fn insert_user(conn: &Connection, name: &str) -> UserId {
    SqliteUserRepository::try_new(conn)
        .unwrap()
        .create_user(&User::new(name, name.to_lowercase()))
        .unwrap()
}

fn record(
    repo: &SqliteTimelineRepository<'_>,
    user_id: UserId,
    event_type: TimelineEventType,
    occurred_at: DateTime<Utc>,
) -> i64 {
    repo.add_entry(&NewTimelineEntry::new(user_id, event_type, occurred_at).snapshot("PVT Miller"))
        .unwrap()
        .id
}

#[test]
fn entries_round_trip_and_list_newest_first() {
    let conn = setup();
    let repo = SqliteTimelineRepository::try_new(&conn).unwrap();
    let miller = insert_user(&conn, "Miller");

    let stored = repo
        .add_entry(
            &NewTimelineEntry::new(miller, TimelineEventType::AwardReceived, at(2, 20))
                .snapshot("CPL Miller")
                .described("Good Conduct"),
        )
        .unwrap();
    record(&repo, miller, TimelineEventType::UnitJoined, at(1, 9));

    let entries = repo.list_for_user(miller).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], stored);
    assert_eq!(entries[0].snapshot_name.as_deref(), Some("CPL Miller"));
    assert_eq!(entries[0].description, "Good Conduct");
    assert_eq!(entries[1].event_type, TimelineEventType::UnitJoined);
}

#[test]
fn orbat_view_hides_training_and_respects_limit() {
    let conn = setup();
    let repo = SqliteTimelineRepository::try_new(&conn).unwrap();
    let miller = insert_user(&conn, "Miller");
    record(&repo, miller, TimelineEventType::UnitJoined, at(1, 9));
    record(&repo, miller, TimelineEventType::TrainingCompleted, at(2, 9));
    record(&repo, miller, TimelineEventType::SectionJoined, at(3, 9));
    record(&repo, miller, TimelineEventType::RoleAssigned, at(4, 9));

    let all = repo.list_entries(&TimelineQuery::orbat()).unwrap();
    let types: Vec<TimelineEventType> = all.iter().map(|entry| entry.event_type).collect();
    assert_eq!(
        types,
        vec![
            TimelineEventType::RoleAssigned,
            TimelineEventType::SectionJoined,
            TimelineEventType::UnitJoined,
        ]
    );

    let limited = repo
        .list_entries(&TimelineQuery {
            limit: Some(2),
            ..TimelineQuery::orbat()
        })
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].event_type, TimelineEventType::RoleAssigned);
}

#[test]
fn training_view_starts_at_the_cutoff() {
    let conn = setup();
    let repo = SqliteTimelineRepository::try_new(&conn).unwrap();
    let miller = insert_user(&conn, "Miller");
    record(&repo, miller, TimelineEventType::TrainingCompleted, at(1, 9));
    let kept = record(&repo, miller, TimelineEventType::TrainingCompleted, at(3, 9));
    record(&repo, miller, TimelineEventType::SectionLeft, at(4, 9));

    let entries = repo
        .list_entries(&TimelineQuery::training_since(at(3, 9)))
        .unwrap();

    let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![kept]);
}

#[test]
fn user_filter_and_day_grouping() {
    let conn = setup();
    let repo = SqliteTimelineRepository::try_new(&conn).unwrap();
    let miller = insert_user(&conn, "Miller");
    let reyes = insert_user(&conn, "Reyes");
    let okafor = insert_user(&conn, "Okafor");
    record(&repo, miller, TimelineEventType::UnitJoined, at(1, 9));
    record(&repo, reyes, TimelineEventType::UnitJoined, at(1, 18));
    record(&repo, okafor, TimelineEventType::UnitJoined, at(2, 9));
    record(&repo, miller, TimelineEventType::SectionJoined, at(3, 9));

    let entries = repo
        .list_entries(&TimelineQuery {
            user_ids: vec![miller, reyes],
            ..TimelineQuery::default()
        })
        .unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.user_id != okafor));

    let groups = group_by_day(entries);
    let days: Vec<(NaiveDate, usize)> = groups
        .iter()
        .map(|(day, items)| (*day, items.len()))
        .collect();
    assert_eq!(
        days,
        vec![
            (NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(), 1),
            (NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 2),
        ]
    );
    assert_eq!(groups[1].1[0].user_id, reyes);
}
