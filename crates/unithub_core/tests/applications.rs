use rusqlite::Connection;
use unithub_core::db::open_db_in_memory;
use unithub_core::model::application::ApplicantDetails;
use unithub_core::model::orbat::NewSection;
use unithub_core::repo::application_repo::SqliteApplicationRepository;
use unithub_core::repo::orbat_repo::{OrbatRepository, SqliteOrbatRepository};
use unithub_core::repo::user_repo::{SqliteUserRepository, UserRepository};
use unithub_core::service::application_service::ApplicationServiceError;
use unithub_core::{ApplicationService, ApplicationStatus, User, UserId};

type Applications<'c> = ApplicationService<
    SqliteApplicationRepository<'c>,
    SqliteUserRepository<'c>,
    SqliteOrbatRepository<'c>,
>;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn service(conn: &Connection) -> Applications<'_> {
    ApplicationService::new(
        SqliteApplicationRepository::try_new(conn).unwrap(),
        SqliteUserRepository::try_new(conn).unwrap(),
        SqliteOrbatRepository::try_new(conn).unwrap(),
    )
}

fn insert_user(conn: &Connection, name: &str) -> UserId {
    SqliteUserRepository::try_new(conn)
        .unwrap()
        .create_user(&User::new(name, name.to_lowercase()))
        .unwrap()
}

/// Creates a section with one slot per name and returns (section id, slot ids).
fn section_with_slots(conn: &Connection, name: &str, slots: &[&str]) -> (i64, Vec<i64>) {
    let orbat = SqliteOrbatRepository::try_new(conn).unwrap();
    let section = orbat
        .create_section(&NewSection::new(name, &name[..1], 8))
        .unwrap();
    let ids = slots
        .iter()
        .map(|slot| orbat.create_slot(section.id, slot, None).unwrap().id)
        .collect();
    (section.id, ids)
}

#[test]
fn unit_application_walks_through_onboarding_to_passed() {
    let conn = setup();
    let applications = service(&conn);
    let staff = insert_user(&conn, "Hale");

    let application = applications
        .submit_unit_application("  recruit#0001 ")
        .unwrap();
    assert_eq!(application.applicant_handle, "recruit#0001");
    assert_eq!(application.status, ApplicationStatus::Unclaimed);

    applications
        .set_unit_status(application.id, ApplicationStatus::WaitingReply, Some(staff))
        .unwrap();
    applications
        .update_details(
            application.id,
            ApplicantDetails {
                teamspeak_id: Some(4411),
                over_18: true,
            },
        )
        .unwrap();
    let recruit = insert_user(&conn, "Recruit");
    applications.link_member(application.id, recruit).unwrap();
    applications
        .set_unit_status(application.id, ApplicationStatus::BctPlanned, Some(staff))
        .unwrap();
    assert!(applications.unit_application(application.id).unwrap().is_pending());

    let passed = applications
        .set_unit_status(application.id, ApplicationStatus::Passed, Some(staff))
        .unwrap();

    assert_eq!(passed.status, ApplicationStatus::Passed);
    assert_eq!(passed.actioned_by, Some(staff));
    let stored = applications.unit_application(application.id).unwrap();
    assert!(stored.processed_at.is_some());
    assert_eq!(stored.user_id, Some(recruit));
    assert_eq!(stored.teamspeak_id, Some(4411));
    assert!(stored.over_18);
    assert!(applications.pending_unit_applications().unwrap().is_empty());
}

#[test]
fn passing_without_member_or_training_is_rejected() {
    let conn = setup();
    let applications = service(&conn);
    let application = applications.submit_unit_application("recruit#0002").unwrap();

    applications
        .set_unit_status(application.id, ApplicationStatus::BctPlanned, None)
        .unwrap();
    assert!(matches!(
        applications.set_unit_status(application.id, ApplicationStatus::Passed, None),
        Err(ApplicationServiceError::NoLinkedMember(_))
    ));

    let other = applications.submit_unit_application("recruit#0003").unwrap();
    let recruit = insert_user(&conn, "Recruit");
    applications.link_member(other.id, recruit).unwrap();
    assert!(matches!(
        applications.set_unit_status(other.id, ApplicationStatus::Passed, None),
        Err(ApplicationServiceError::Transition(_))
    ));
}

#[test]
fn denied_application_is_final() {
    let conn = setup();
    let applications = service(&conn);
    let staff = insert_user(&conn, "Hale");
    let application = applications.submit_unit_application("recruit#0004").unwrap();

    let denied = applications
        .set_unit_status(application.id, ApplicationStatus::Denied, Some(staff))
        .unwrap();
    assert!(denied.processed_at.is_some());

    assert!(matches!(
        applications.set_unit_status(application.id, ApplicationStatus::WaitingReply, None),
        Err(ApplicationServiceError::AlreadyProcessed(_))
    ));
    assert!(matches!(
        applications.update_details(application.id, ApplicantDetails::default()),
        Err(ApplicationServiceError::AlreadyProcessed(_))
    ));
}

#[test]
fn handles_and_member_links_are_unique() {
    let conn = setup();
    let applications = service(&conn);
    let first = applications.submit_unit_application("recruit#0005").unwrap();
    let second = applications.submit_unit_application("recruit#0006").unwrap();
    let recruit = insert_user(&conn, "Recruit");

    assert!(matches!(
        applications.submit_unit_application("recruit#0005"),
        Err(ApplicationServiceError::DuplicateApplicant(_))
    ));
    assert!(matches!(
        applications.submit_unit_application("   "),
        Err(ApplicationServiceError::InvalidHandle)
    ));

    applications.link_member(first.id, recruit).unwrap();
    let err = applications.link_member(second.id, recruit).unwrap_err();
    assert!(matches!(
        err,
        ApplicationServiceError::MemberAlreadyLinked { application_id, .. } if application_id == first.id
    ));

    applications.unlink_member(first.id).unwrap();
    applications.link_member(second.id, recruit).unwrap();
}

#[test]
fn pending_unit_applications_are_oldest_first() {
    let conn = setup();
    let applications = service(&conn);
    for handle in ["alpha#1", "bravo#2", "charlie#3"] {
        applications.submit_unit_application(handle).unwrap();
    }
    let bravo = applications.pending_unit_applications().unwrap()[1].id;
    applications
        .set_unit_status(bravo, ApplicationStatus::Denied, None)
        .unwrap();

    let handles: Vec<String> = applications
        .pending_unit_applications()
        .unwrap()
        .into_iter()
        .map(|application| application.applicant_handle)
        .collect();
    assert_eq!(handles, vec!["alpha#1", "charlie#3"]);
}

#[test]
fn section_requests_filter_by_section_and_record_decisions() {
    let conn = setup();
    let applications = service(&conn);
    let (alpha, alpha_slots) = section_with_slots(&conn, "Alpha", &["Lead", "Rifleman"]);
    let (_, bravo_slots) = section_with_slots(&conn, "Bravo", &["Medic"]);
    let leader = insert_user(&conn, "Hale");
    let miller = insert_user(&conn, "Miller");
    let reyes = insert_user(&conn, "Reyes");

    let rifleman = applications.apply_for_slot(miller, alpha_slots[1]).unwrap();
    applications.apply_for_slot(reyes, bravo_slots[0]).unwrap();
    assert!(matches!(
        applications.apply_for_slot(miller, alpha_slots[1]),
        Err(ApplicationServiceError::DuplicateSlotRequest(_))
    ));

    assert_eq!(applications.pending_section_applications(None).unwrap().len(), 2);
    let for_alpha = applications
        .pending_section_applications(Some(alpha))
        .unwrap();
    assert_eq!(for_alpha.len(), 1);
    assert_eq!(for_alpha[0].user_id, miller);

    let decided = applications
        .decide_section_application(rifleman.id, false, Some(leader))
        .unwrap();
    assert!(decided.denied);
    assert_eq!(decided.actioned_by, Some(leader));
    assert!(applications
        .pending_section_applications(Some(alpha))
        .unwrap()
        .is_empty());
    assert!(matches!(
        applications.decide_section_application(rifleman.id, true, Some(leader)),
        Err(ApplicationServiceError::AlreadyProcessed(_))
    ));

    applications.apply_for_slot(miller, alpha_slots[1]).unwrap();
}

#[test]
fn section_requests_need_existing_member_and_slot() {
    let conn = setup();
    let applications = service(&conn);
    let (_, slots) = section_with_slots(&conn, "Alpha", &["Lead"]);
    let miller = insert_user(&conn, "Miller");

    assert!(matches!(
        applications.apply_for_slot(miller, 9_999),
        Err(ApplicationServiceError::SlotNotFound(9_999))
    ));
    assert!(matches!(
        applications.apply_for_slot(uuid::Uuid::new_v4(), slots[0]),
        Err(ApplicationServiceError::UserNotFound(_))
    ));
}
