use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use studyhall::{
    ApiError, db,
    oracle::{OracleError, TutorBlock, TutorOracle},
    ratelimit::RateLimiter,
    rooms::{
        ask::{self, ASK_LIMIT},
        control::{self, ControlAction},
        directory::{self, MemberRole},
        hub::RoomHub,
        join, msg,
        perms::{self, PermissionUpdate},
    },
};

const TUTOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Scriptable stand-in for the tutoring backend.
struct StubOracle {
    fail: AtomicBool,
}

impl StubOracle {
    fn new() -> Arc<Self> {
        Arc::new(Self { fail: AtomicBool::new(false) })
    }

    fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl TutorOracle for StubOracle {
    fn ask(
        &self,
        prompt: &str,
        _subject: &str,
        _room_id: Uuid,
    ) -> BoxFuture<'static, Result<Vec<TutorBlock>, OracleError>> {
        let fail = self.fail.load(Ordering::SeqCst);
        let text = format!("You asked: {prompt}");
        async move {
            if fail {
                Err(OracleError::Quota)
            } else {
                Ok(vec![TutorBlock::Paragraph { text }])
            }
        }
        .boxed()
    }
}

/// Oracle whose answer never arrives.
struct HangingOracle;

impl TutorOracle for HangingOracle {
    fn ask(
        &self,
        _prompt: &str,
        _subject: &str,
        _room_id: Uuid,
    ) -> BoxFuture<'static, Result<Vec<TutorBlock>, OracleError>> {
        futures_util::future::pending().boxed()
    }
}

async fn setup() -> SqlitePool {
    // a single connection keeps every query on the same in-memory db
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn cross_school_join_is_rejected_without_enrolling() {
    let pool = setup().await;
    let hub = RoomHub::default();

    directory::upsert_profile(&pool, "teacher", "Ms. Finch", Some("Eastbrook")).await.unwrap();
    directory::upsert_profile(&pool, "student", "Sam", Some("Northgate")).await.unwrap();
    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let err = join::join(&pool, &hub, room.id, "student").await.unwrap_err();
    assert!(matches!(err, ApiError::CrossSchool));
    assert!(!directory::is_member(&pool, room.id, "student").await.unwrap());
}

#[tokio::test]
async fn join_is_permissive_when_either_side_lacks_a_school() {
    let pool = setup().await;
    let hub = RoomHub::default();

    // owner has no school on file
    directory::upsert_profile(&pool, "teacher", "Ms. Finch", None).await.unwrap();
    directory::upsert_profile(&pool, "student", "Sam", Some("Northgate")).await.unwrap();
    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let result = join::join(&pool, &hub, room.id, "student").await.unwrap();
    assert!(!result.me.is_owner);
    assert!(directory::is_member(&pool, room.id, "student").await.unwrap());

    // and a student with no profile at all joins too
    let result = join::join(&pool, &hub, room.id, "drifter").await.unwrap();
    assert_eq!(result.members.len(), 3);
}

#[tokio::test]
async fn joining_twice_does_not_duplicate_membership() {
    let pool = setup().await;
    let hub = RoomHub::default();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let first = join::join(&pool, &hub, room.id, "student").await.unwrap();
    let second = join::join(&pool, &hub, room.id, "student").await.unwrap();

    assert_eq!(first.members.len(), 2);
    assert_eq!(second.members.len(), 2);
}

#[tokio::test]
async fn join_returns_a_consistent_snapshot() {
    let pool = setup().await;
    let hub = RoomHub::default();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();
    let scene = serde_json::json!({ "elements": ["rect"] });
    studyhall::rooms::scene::save(&pool, room.id, &scene).await.unwrap();

    let result = join::join(&pool, &hub, room.id, "teacher").await.unwrap();
    assert!(result.me.is_owner);
    assert!(!result.me.has_control);
    assert_eq!(result.snapshot, Some(scene));
    assert!(!result.permissions.ask_ai_enabled);
    assert_eq!(result.control.controller_user_id, None);
    assert_eq!(result.members[0].role, MemberRole::Owner);
}

#[tokio::test]
async fn failed_oracle_leaves_no_stray_system_message() {
    let pool = setup().await;
    let hub = RoomHub::default();
    let limiter = RateLimiter::new();
    let oracle = StubOracle::new();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    oracle.fail_next(true);
    let before = msg::list(&pool, room.id).await.unwrap().len();
    let err = ask::ask(
        &pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "teacher", "what is x?",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::TutorQuota));
    assert_eq!(msg::list(&pool, room.id).await.unwrap().len(), before);

    // a successful ask appends exactly one system entry
    oracle.fail_next(false);
    ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "teacher", "what is x?")
        .await
        .unwrap();
    let after = msg::list(&pool, room.id).await.unwrap();
    assert_eq!(after.len(), before + 1);
    assert_eq!(after[before].from_user_id, msg::SYSTEM_SENDER);
}

#[tokio::test]
async fn timed_out_oracle_leaves_no_stray_system_message() {
    let pool = setup().await;
    let hub = RoomHub::default();
    let limiter = RateLimiter::new();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let err = ask::ask(
        &pool,
        &limiter,
        &hub,
        &HangingOracle,
        Duration::from_millis(20),
        room.id,
        "teacher",
        "what is x?",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::TutorTimeout));
    assert!(msg::list(&pool, room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn ask_is_rate_limited_per_user_per_room() {
    let pool = setup().await;
    let hub = RoomHub::default();
    let limiter = RateLimiter::new();
    let oracle = StubOracle::new();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();
    directory::add_member(&pool, room.id, "student").await.unwrap();
    perms::update(
        &pool,
        &room,
        PermissionUpdate { ask_ai_enabled: Some(true), ..Default::default() },
    )
    .await
    .unwrap();

    for _ in 0..ASK_LIMIT {
        ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "student", "q")
            .await
            .unwrap();
    }
    let err = ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "student", "q")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::RateLimit));

    // the teacher's own bucket is untouched
    ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "teacher", "q")
        .await
        .unwrap();
}

#[tokio::test]
async fn non_members_and_unknown_rooms_are_rejected() {
    let pool = setup().await;
    let hub = RoomHub::default();
    let limiter = RateLimiter::new();
    let oracle = StubOracle::new();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let err = ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "outsider", "q")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotMember));

    let err = ask::ask(
        &pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, Uuid::now_v7(), "teacher", "q",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::RoomNotFound));
}

#[tokio::test]
async fn granting_ask_ai_to_a_non_member_is_rejected() {
    let pool = setup().await;

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let err = perms::update(
        &pool,
        &room,
        PermissionUpdate { grant_user_id: Some("outsider".to_owned()), ..Default::default() },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn permission_updates_apply_flag_then_grant_then_revoke() {
    let pool = setup().await;

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();
    directory::add_member(&pool, room.id, "a").await.unwrap();
    directory::add_member(&pool, room.id, "b").await.unwrap();

    perms::update(
        &pool,
        &room,
        PermissionUpdate { ask_ai_enabled: Some(true), grant_user_id: Some("a".to_owned()), ..Default::default() },
    )
    .await
    .unwrap();

    // one call may grant and revoke; revoke runs last
    let updated = perms::update(
        &pool,
        &room,
        PermissionUpdate {
            ask_ai_enabled: None,
            grant_user_id: Some("b".to_owned()),
            revoke_user_id: Some("a".to_owned()),
        },
    )
    .await
    .unwrap();

    assert!(updated.ask_ai_enabled);
    assert_eq!(updated.member_ask_ai, vec!["b".to_owned()]);
}

#[tokio::test]
async fn control_transitions_are_owner_only() {
    let pool = setup().await;

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();
    directory::add_member(&pool, room.id, "student").await.unwrap();

    let err = control::apply(&pool, &room, "student", ControlAction::Take, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotOwner));

    let err = control::apply(&pool, &room, "teacher", ControlAction::Give, Some("outsider"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let control_state = control::apply(&pool, &room, "teacher", ControlAction::Take, None)
        .await
        .unwrap();
    assert_eq!(control_state.controller_user_id.as_deref(), Some("teacher"));
}

#[tokio::test]
async fn join_by_invite_code_reaches_the_same_room() {
    let pool = setup().await;
    let hub = RoomHub::default();

    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    let found = directory::find_by_invite(&pool, &room.invite_code).await.unwrap().unwrap();
    assert_eq!(found.id, room.id);

    let result = join::join(&pool, &hub, found.id, "student").await.unwrap();
    assert!(directory::is_member(&pool, room.id, "student").await.unwrap());
    assert_eq!(result.room.invite_code, room.invite_code);

    assert!(directory::find_by_invite(&pool, "nope").await.unwrap().is_none());
}

/// The guided-exercise walkthrough: a teacher hands the microphone to a
/// student, the student asks, the teacher is locked out until revoke.
#[tokio::test]
async fn control_handoff_walkthrough() {
    let pool = setup().await;
    let hub = RoomHub::default();
    let limiter = RateLimiter::new();
    let oracle = StubOracle::new();

    directory::upsert_profile(&pool, "teacher", "Ms. Finch", Some("Westview")).await.unwrap();
    directory::upsert_profile(&pool, "student", "Sam", Some("Westview")).await.unwrap();
    let room = directory::create(&pool, "teacher", "Algebra", "math").await.unwrap();

    // same school, so the student gets in
    let joined = join::join(&pool, &hub, room.id, "student").await.unwrap();
    assert!(!joined.me.is_owner);

    control::apply(&pool, &room, "teacher", ControlAction::Give, Some("student"))
        .await
        .unwrap();

    let outcome = ask::ask(
        &pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "student", "factor x^2-1",
    )
    .await
    .unwrap();
    assert_eq!(
        outcome.blocks,
        vec![TutorBlock::Paragraph { text: "You asked: factor x^2-1".to_owned() }]
    );
    assert_eq!(msg::list(&pool, room.id).await.unwrap().len(), 1);

    // the owner is locked out while the student holds control
    let err = ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "teacher", "q")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NoControl));

    control::apply(&pool, &room, "teacher", ControlAction::Revoke, None).await.unwrap();

    // back to the baseline policy: owners always pass, even with ask-ai off
    ask::ask(&pool, &limiter, &hub, &*oracle, TUTOR_TIMEOUT, room.id, "teacher", "q")
        .await
        .unwrap();
    assert_eq!(msg::list(&pool, room.id).await.unwrap().len(), 2);
}
