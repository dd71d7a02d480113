use chrono::NaiveDate;
use rusqlite::Connection;
use unithub_core::db::open_db_in_memory;
use unithub_core::model::timeline::{TimelineEventType, TimelineQuery};
use unithub_core::model::training::Qualification;
use unithub_core::repo::timeline_repo::{SqliteTimelineRepository, TimelineRepository};
use unithub_core::repo::training_repo::SqliteTrainingRepository;
use unithub_core::repo::user_repo::{SqliteUserRepository, UserRepository};
use unithub_core::service::training_service::TrainingServiceError;
use unithub_core::{TrainingService, User, UserId};

type Training<'c> = TrainingService<
    SqliteTrainingRepository<'c>,
    SqliteUserRepository<'c>,
    SqliteTimelineRepository<'c>,
>;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).unwrap()
}

fn service(conn: &Connection) -> Training<'_> {
    TrainingService::new(
        SqliteTrainingRepository::try_new(conn).unwrap(),
        SqliteUserRepository::try_new(conn).unwrap(),
        SqliteTimelineRepository::try_new(conn).unwrap(),
    )
}

fn insert_user(conn: &Connection, name: &str) -> UserId {
    SqliteUserRepository::try_new(conn)
        .unwrap()
        .create_user(&User::new(name, name.to_lowercase()))
        .unwrap()
}

fn marksman(training: &Training<'_>) -> Qualification {
    let qualification = training
        .create_qualification("Marksman", "Designated marksman course")
        .unwrap();
    for name in ["Zeroing", "Range estimation", "Moving targets"] {
        training
            .add_criterion(qualification.id, name, "")
            .unwrap();
    }
    qualification
}

#[test]
fn criteria_are_kept_in_position_order() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);

    let criteria = training.criteria(qualification.id).unwrap();
    let positions: Vec<(String, i64)> = criteria
        .iter()
        .map(|criterion| (criterion.name.clone(), criterion.sort_order))
        .collect();
    assert_eq!(
        positions,
        vec![
            ("Zeroing".to_string(), 1),
            ("Range estimation".to_string(), 2),
            ("Moving targets".to_string(), 3),
        ]
    );

    training.remove_criterion(criteria[0].id).unwrap();
    let orders: Vec<i64> = training
        .criteria(qualification.id)
        .unwrap()
        .into_iter()
        .map(|criterion| criterion.sort_order)
        .collect();
    assert_eq!(orders, vec![1, 2]);
}

#[test]
fn award_completes_every_criterion_and_records_timeline() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);
    let trainee = insert_user(&conn, "Miller");
    let instructor = insert_user(&conn, "Reyes");

    let outcome = training
        .award_to_user(trainee, qualification.id, Some(instructor), day(3, 1))
        .unwrap();

    assert!(outcome.newly_awarded);
    assert_eq!(outcome.completed_criteria.len(), 3);
    assert_eq!(outcome.user_qualification.date_awarded, Some(day(3, 1)));
    assert_eq!(outcome.user_qualification.awarded_by, Some(instructor));
    assert!(training.missing_criteria(trainee).unwrap().is_empty());

    let entries = SqliteTimelineRepository::try_new(&conn)
        .unwrap()
        .list_for_user(trainee)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, TimelineEventType::TrainingCompleted);
    assert_eq!(entries[0].description, "Marksman");
}

#[test]
fn repeat_award_only_moves_latest_passed() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);
    let trainee = insert_user(&conn, "Miller");
    let first_instructor = insert_user(&conn, "Reyes");
    let second_instructor = insert_user(&conn, "Okafor");
    training
        .award_to_user(trainee, qualification.id, Some(first_instructor), day(3, 1))
        .unwrap();

    let outcome = training
        .award_to_user(trainee, qualification.id, Some(second_instructor), day(9, 1))
        .unwrap();

    assert!(!outcome.newly_awarded);
    assert!(outcome.completed_criteria.is_empty());
    assert_eq!(outcome.user_qualification.date_awarded, Some(day(3, 1)));
    assert_eq!(outcome.user_qualification.latest_passed, Some(day(9, 1)));
    assert_eq!(outcome.user_qualification.awarded_by, Some(first_instructor));
    let stored = training.qualifications_for_user(trainee).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], outcome.user_qualification);

    let training_entries = SqliteTimelineRepository::try_new(&conn)
        .unwrap()
        .list_entries(&TimelineQuery {
            user_ids: vec![trainee],
            event_types: vec![TimelineEventType::TrainingCompleted],
            ..TimelineQuery::default()
        })
        .unwrap();
    assert_eq!(training_entries.len(), 1);
}

#[test]
fn partial_progress_reports_missing_criteria() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);
    let trainee = insert_user(&conn, "Miller");
    let criteria = training.criteria(qualification.id).unwrap();

    assert!(training.complete_criterion(trainee, criteria[1].id).unwrap());
    assert!(!training.complete_criterion(trainee, criteria[1].id).unwrap());

    let missing: Vec<String> = training
        .missing_criteria(trainee)
        .unwrap()
        .into_iter()
        .map(|criterion| criterion.name)
        .collect();
    assert_eq!(missing, vec!["Zeroing", "Moving targets"]);
    let records = training.qualifications_for_user(trainee).unwrap();
    assert_eq!(records[0].date_awarded, None);
}

#[test]
fn bulk_award_is_all_or_nothing() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);
    let first = insert_user(&conn, "Miller");
    let second = insert_user(&conn, "Reyes");

    let err = training
        .award_bulk(
            &[first, uuid::Uuid::new_v4()],
            qualification.id,
            None,
            day(4, 1),
        )
        .unwrap_err();
    assert!(matches!(err, TrainingServiceError::UserNotFound(_)));
    assert!(training.qualifications_for_user(first).unwrap().is_empty());

    let outcomes = training
        .award_bulk(&[first, second], qualification.id, None, day(4, 1))
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|outcome| outcome.newly_awarded));
}

#[test]
fn retired_qualification_cannot_be_awarded() {
    let conn = setup();
    let training = service(&conn);
    let qualification = marksman(&training);
    let trainee = insert_user(&conn, "Miller");
    training
        .set_qualification_active(qualification.id, false)
        .unwrap();

    let err = training
        .award_to_user(trainee, qualification.id, None, day(5, 1))
        .unwrap_err();

    assert!(matches!(err, TrainingServiceError::QualificationInactive(_)));
}

#[test]
fn input_is_validated() {
    let conn = setup();
    let training = service(&conn);
    let trainee = insert_user(&conn, "Miller");

    assert!(matches!(
        training.create_qualification(" ", ""),
        Err(TrainingServiceError::InvalidName)
    ));
    assert!(matches!(
        training.add_criterion(404, "Zeroing", ""),
        Err(TrainingServiceError::QualificationNotFound(404))
    ));
    assert!(matches!(
        training.complete_criterion(trainee, 404),
        Err(TrainingServiceError::CriterionNotFound(404))
    ));
    assert!(matches!(
        training.remove_criterion(404),
        Err(TrainingServiceError::CriterionNotFound(404))
    ));
}
