use sqlx::SqlitePool;

// profiles.user_id comes from the auth frontend; the core never mints
// user ids. The owner's room_members row is written in the same
// transaction as the room row, so an owner is always a member.
const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS profiles (
        user_id      TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        school       TEXT
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        subject     TEXT NOT NULL,
        owner_id    TEXT NOT NULL,
        invite_code TEXT NOT NULL UNIQUE,
        created_at  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room_members (
        room_id   TEXT NOT NULL,
        user_id   TEXT NOT NULL,
        joined_at TEXT NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS room_permissions (
        room_id        TEXT PRIMARY KEY,
        ask_ai_enabled INTEGER NOT NULL,
        member_ask_ai  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room_control (
        room_id       TEXT PRIMARY KEY,
        controller_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS room_messages (
        id         TEXT PRIMARY KEY,
        room_id    TEXT NOT NULL,
        sender_id  TEXT NOT NULL,
        content    TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room_snapshots (
        room_id    TEXT PRIMARY KEY,
        scene      TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for table in TABLES {
        sqlx::query(table).execute(pool).await?;
    }
    Ok(())
}
