//! Connection storage using SQLite.
//!
//! One row per (user, platform). Token columns hold [`EncryptedToken`] values
//! only; sealing and opening happen in the callers through `TokenCipher`.

use super::encryption::EncryptedToken;
use crate::platform::Platform;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection as SqliteConnection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Sync state of a linked platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Active,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Active => "active",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SyncStatus::Active),
            "syncing" => Ok(SyncStatus::Syncing),
            "error" => Ok(SyncStatus::Error),
            other => Err(anyhow!("Unknown sync status '{}'", other)),
        }
    }
}

/// A linked platform account.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub access_token: EncryptedToken,
    /// `None` when the provider never issued one; such connections cannot be refreshed
    pub refresh_token: Option<EncryptedToken>,
    pub expires_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub connected_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Fields for a freshly exchanged connection.
#[derive(Clone, Debug)]
pub struct NewConnection {
    pub user_id: String,
    pub platform: Platform,
    pub access_token: EncryptedToken,
    pub refresh_token: Option<EncryptedToken>,
    pub expires_at: DateTime<Utc>,
}

/// Equality filter over connection fields; unset fields match anything.
#[derive(Clone, Debug, Default)]
pub struct ConnectionFilter {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub platform: Option<Platform>,
}

impl ConnectionFilter {
    /// Matches connection `id` only if it belongs to `user_id`.
    pub fn owned(id: &str, user_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            user_id: Some(user_id.to_string()),
            platform: None,
        }
    }
}

/// Replacement tokens after a refresh.
#[derive(Clone, Debug)]
pub struct TokenUpdate {
    pub access_token: EncryptedToken,
    pub refresh_token: EncryptedToken,
    pub expires_at: DateTime<Utc>,
    /// Stored refresh token the update was computed from; the update is
    /// skipped if the row no longer holds it.
    pub previous_refresh_token: EncryptedToken,
}

/// Row as read from SQLite, before timestamp/enum parsing
struct RawRow {
    id: String,
    user_id: String,
    platform: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: String,
    sync_status: String,
    connected_at: String,
    last_synced_at: Option<String>,
}

impl RawRow {
    fn into_connection(self) -> Result<Connection> {
        Ok(Connection {
            platform: self
                .platform
                .parse()
                .with_context(|| format!("Invalid platform in connection {}", self.id))?,
            access_token: EncryptedToken::from_stored(self.access_token),
            refresh_token: self.refresh_token.map(EncryptedToken::from_stored),
            expires_at: parse_timestamp(&self.expires_at).context("Invalid expires_at")?,
            sync_status: self.sync_status.parse()?,
            connected_at: parse_timestamp(&self.connected_at).context("Invalid connected_at")?,
            last_synced_at: self
                .last_synced_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .context("Invalid last_synced_at")?,
            id: self.id,
            user_id: self.user_id,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

const SELECT_COLUMNS: &str = "SELECT id, user_id, platform, access_token, refresh_token, \
     expires_at, sync_status, connected_at, last_synced_at FROM connections";

/// Connection records backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE connections (
///     id TEXT PRIMARY KEY,             -- UUID v7
///     user_id TEXT NOT NULL,
///     platform TEXT NOT NULL,
///     access_token TEXT NOT NULL,      -- v1 envelope
///     refresh_token TEXT,              -- v1 envelope (optional)
///     expires_at TEXT NOT NULL,        -- RFC 3339
///     sync_status TEXT NOT NULL,
///     connected_at TEXT NOT NULL,
///     last_synced_at TEXT,
///     UNIQUE(user_id, platform)
/// );
/// ```
///
/// This is the service's own database handle, so every operation runs with
/// service privileges. Callers acting for an end user prove ownership by
/// filtering on `user_id`.
pub struct ConnectionStore {
    conn: Mutex<SqliteConnection>,
}

impl ConnectionStore {
    /// Creates or opens a connection store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = SqliteConnection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                connected_at TEXT NOT NULL,
                last_synced_at TEXT,
                UNIQUE(user_id, platform)
            )
            "#,
            [],
        )
        .context("Failed to create connections table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (tests and local runs).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Connection store lock poisoned"))
    }

    /// Stores a freshly exchanged connection.
    ///
    /// Re-linking a platform the user already has replaces its tokens and
    /// expiry and marks it active again, keeping the row id and `connected_at`.
    pub fn create(&self, new: &NewConnection) -> Result<Connection> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::now_v7().to_string();

        let conn = self.lock()?;
        let id: String = conn
            .query_row(
                r#"
                INSERT INTO connections (
                    id, user_id, platform,
                    access_token, refresh_token,
                    expires_at, sync_status, connected_at, last_synced_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(user_id, platform) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    sync_status = excluded.sync_status,
                    last_synced_at = excluded.last_synced_at
                RETURNING id
                "#,
                params![
                    id,
                    new.user_id,
                    new.platform.as_str(),
                    new.access_token.as_str(),
                    new.refresh_token.as_ref().map(|t| t.as_str()),
                    new.expires_at.to_rfc3339(),
                    SyncStatus::Active.as_str(),
                    now,
                ],
                |row| row.get(0),
            )
            .context("Failed to store connection")?;
        drop(conn);

        self.filter(&ConnectionFilter {
            id: Some(id.clone()),
            ..Default::default()
        })?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Connection {} vanished after insert", id))
    }

    /// Returns every connection matching all set fields of `filter`.
    pub fn filter(&self, filter: &ConnectionFilter) -> Result<Vec<Connection>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(id) = &filter.id {
            values.push(id.clone());
            clauses.push(format!("id = ?{}", values.len()));
        }
        if let Some(user_id) = &filter.user_id {
            values.push(user_id.clone());
            clauses.push(format!("user_id = ?{}", values.len()));
        }
        if let Some(platform) = filter.platform {
            values.push(platform.as_str().to_string());
            clauses.push(format!("platform = ?{}", values.len()));
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY connected_at, id");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: row.get(2)?,
                    access_token: row.get(3)?,
                    refresh_token: row.get(4)?,
                    expires_at: row.get(5)?,
                    sync_status: row.get(6)?,
                    connected_at: row.get(7)?,
                    last_synced_at: row.get(8)?,
                })
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<RawRow>, _>>()
            .context("Failed to read results")?;

        rows.into_iter().map(RawRow::into_connection).collect()
    }

    /// Replaces the tokens of connection `id` after a refresh.
    ///
    /// Returns `false` when the row is gone or its refresh token no longer
    /// matches `update.previous_refresh_token` (another refresh won the race).
    pub fn update_tokens(&self, id: &str, update: &TokenUpdate) -> Result<bool> {
        let rows_affected = self
            .lock()?
            .execute(
                r#"
                UPDATE connections
                SET access_token = ?1, refresh_token = ?2, expires_at = ?3
                WHERE id = ?4 AND refresh_token = ?5
                "#,
                params![
                    update.access_token.as_str(),
                    update.refresh_token.as_str(),
                    update.expires_at.to_rfc3339(),
                    id,
                    update.previous_refresh_token.as_str(),
                ],
            )
            .context("Failed to update connection tokens")?;

        Ok(rows_affected > 0)
    }

    /// Sets the sync status of connection `id`.
    pub fn set_sync_status(&self, id: &str, status: SyncStatus) -> Result<bool> {
        let rows_affected = self
            .lock()?
            .execute(
                "UPDATE connections SET sync_status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update sync status")?;

        Ok(rows_affected > 0)
    }
}
