use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{ApiError, ApiResult};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub owner_user_id: String,
    pub invite_code: String,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    pub role: MemberRole,
}

fn invite_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

pub async fn create(
    db_pool: &SqlitePool,
    owner_user_id: &str,
    name: &str,
    subject: &str,
) -> ApiResult<Room> {
    let id = Uuid::now_v7();
    let invite_code = invite_code();

    // one transaction, so a room never exists without its owner row
    let mut tx = db_pool.begin().await?;
    let (created_at,): (String,) = sqlx::query_as(
        "INSERT INTO rooms (id,name,subject,owner_id,invite_code,created_at) \
         VALUES (?,?,?,?,?,strftime('%Y-%m-%dT%H:%M:%fZ','now')) RETURNING created_at",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(subject)
    .bind(owner_user_id)
    .bind(&invite_code)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO room_members (room_id,user_id,joined_at) \
         VALUES (?,?,strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
    )
    .bind(id.to_string())
    .bind(owner_user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(room_id = %id, owner = owner_user_id, "room created");

    Ok(Room {
        id,
        name: name.to_owned(),
        subject: subject.to_owned(),
        owner_user_id: owner_user_id.to_owned(),
        invite_code,
        created_at,
    })
}

pub async fn find(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<Option<Room>> {
    let row: Option<(String, String, String, String, String)> = sqlx::query_as(
        "SELECT name,subject,owner_id,invite_code,created_at FROM rooms WHERE id=?",
    )
    .bind(room_id.to_string())
    .fetch_optional(db_pool)
    .await?;

    Ok(row.map(|(name, subject, owner_user_id, invite_code, created_at)| Room {
        id: room_id,
        name,
        subject,
        owner_user_id,
        invite_code,
        created_at,
    }))
}

/// `find`, with absence promoted to `ROOM_NOT_FOUND`.
pub async fn require(db_pool: &SqlitePool, room_id: Uuid) -> ApiResult<Room> {
    find(db_pool, room_id).await?.ok_or(ApiError::RoomNotFound)
}

pub async fn find_by_invite(db_pool: &SqlitePool, code: &str) -> ApiResult<Option<Room>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM rooms WHERE invite_code=?")
        .bind(code)
        .fetch_optional(db_pool)
        .await?;

    match row {
        Some((id,)) => find(db_pool, Uuid::parse_str(&id).map_err(anyhow::Error::from)?).await,
        None => Ok(None),
    }
}

pub async fn is_member(db_pool: &SqlitePool, room_id: Uuid, user_id: &str) -> ApiResult<bool> {
    Ok(
        sqlx::query_as::<_, ()>("SELECT 1 FROM room_members WHERE room_id=? AND user_id=?")
            .bind(room_id.to_string())
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?
            .is_some(),
    )
}

/// Idempotent: re-adding an existing member is a no-op.
pub async fn add_member(db_pool: &SqlitePool, room_id: Uuid, user_id: &str) -> ApiResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO room_members (room_id,user_id,joined_at) \
         VALUES (?,?,strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
    )
    .bind(room_id.to_string())
    .bind(user_id)
    .execute(db_pool)
    .await?;
    Ok(())
}

pub async fn list_members(db_pool: &SqlitePool, room: &Room) -> ApiResult<Vec<Member>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT m.user_id, p.display_name FROM room_members m \
         LEFT JOIN profiles p ON p.user_id = m.user_id \
         WHERE m.room_id=? ORDER BY m.joined_at, m.user_id",
    )
    .bind(room.id.to_string())
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(user_id, display_name)| {
            let role = if user_id == room.owner_user_id {
                MemberRole::Owner
            } else {
                MemberRole::Member
            };
            Member {
                display_name: display_name.unwrap_or_else(|| user_id.clone()),
                user_id,
                role,
            }
        })
        .collect())
}

pub async fn rooms_of(db_pool: &SqlitePool, user_id: &str) -> ApiResult<Vec<Room>> {
    let rows: Vec<(String, String, String, String, String, String)> = sqlx::query_as(
        "SELECT r.id,r.name,r.subject,r.owner_id,r.invite_code,r.created_at \
         FROM rooms r JOIN room_members m ON m.room_id = r.id \
         WHERE m.user_id=? ORDER BY r.created_at",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;

    rows.into_iter()
        .map(|(id, name, subject, owner_user_id, invite_code, created_at)| {
            Ok(Room {
                id: Uuid::parse_str(&id).map_err(anyhow::Error::from)?,
                name,
                subject,
                owner_user_id,
                invite_code,
                created_at,
            })
        })
        .collect()
}

/// Identity glue written on behalf of the auth frontend. `school` is
/// what the join protocol's cross-organization rule reads.
pub async fn upsert_profile(
    db_pool: &SqlitePool,
    user_id: &str,
    display_name: &str,
    school: Option<&str>,
) -> ApiResult<()> {
    sqlx::query(
        "INSERT INTO profiles (user_id,display_name,school) VALUES (?,?,?) \
         ON CONFLICT(user_id) DO UPDATE SET display_name=excluded.display_name, school=excluded.school",
    )
    .bind(user_id)
    .bind(display_name)
    .bind(school)
    .execute(db_pool)
    .await?;
    Ok(())
}

pub async fn school_of(db_pool: &SqlitePool, user_id: &str) -> ApiResult<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT school FROM profiles WHERE user_id=?")
            .bind(user_id)
            .fetch_optional(db_pool)
            .await?;

    Ok(row.and_then(|(school,)| school))
}
