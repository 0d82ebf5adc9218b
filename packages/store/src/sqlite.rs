//! `SQLite`-backed [`RemoteStore`].
//!
//! Uses `switchy_database` for all database operations, following the same
//! raw-SQL patterns as the rest of the workspace. Locations are stored as
//! separate `lat`/`lng` columns so viewport range filters can use the
//! composite index. Timestamps are fixed-width RFC 3339 strings in UTC, so
//! lexical order equals chronological order.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use moosicbox_json_utils::database::ToValue as _;
use safety_map_incident_models::{
    GeoPoint, Incident, IncidentCategory, Message, NewIncident, NewMessage, REGION_SLOT,
    RegionSnapshot, ViewportBounds, sort_newest_first,
};
use switchy_database::{Database, DatabaseValue};
use switchy_database_connection::init_sqlite_rusqlite;

use crate::{RemoteStore, StoreError, new_id};

/// Default path for the safety map database.
pub const DEFAULT_DB_PATH: &str = "data/safety_map.db";

/// Upper bound on `$n` placeholders in one `IN (...)` list. `SQLite` caps
/// bound variables per statement.
const ID_CHUNK: usize = 500;

const INCIDENT_COLUMNS: &str =
    "id, title, description, category, lat, lng, reported_at, reporter_id";

/// A [`RemoteStore`] persisted in a `SQLite` file.
pub struct SqliteStore {
    db: Box<dyn Database>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be created or the schema
    /// DDL fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = init_sqlite_rusqlite(Some(path)).map_err(|e| StoreError::Unavailable {
            message: format!("failed to open {}: {e}", path.display()),
        })?;

        ensure_schema(db.as_ref()).await?;
        log::debug!("Opened safety map database at {}", path.display());

        Ok(Self { db })
    }

    async fn messages_for(
        &self,
        incident_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<Message>>, StoreError> {
        let mut grouped: BTreeMap<String, Vec<Message>> = BTreeMap::new();
        if incident_ids.is_empty() {
            return Ok(grouped);
        }

        let mut rows = Vec::new();
        for chunk in incident_ids.chunks(ID_CHUNK) {
            let mut sql = String::from(
                "SELECT id, incident_id, text, author_display_name, author_id, sent_at
                 FROM messages WHERE incident_id IN (",
            );
            push_placeholders(&mut sql, 1, chunk.len());
            sql.push_str(") ORDER BY rowid");

            let params: Vec<DatabaseValue> = chunk
                .iter()
                .map(|id| DatabaseValue::String(id.clone()))
                .collect();

            rows.extend(
                self.db
                    .query_raw_params(&sql, &params)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?,
            );
        }

        for row in &rows {
            let message = row_to_message(row)?;
            grouped
                .entry(message.incident_id.clone())
                .or_default()
                .push(message);
        }

        Ok(grouped)
    }

    async fn attach_messages(
        &self,
        rows: &[switchy_database::Row],
    ) -> Result<Vec<Incident>, StoreError> {
        let mut incidents = rows
            .iter()
            .map(row_to_incident)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<String> = incidents.iter().map(|i| i.id.clone()).collect();
        let mut messages = self.messages_for(&ids).await?;

        for incident in &mut incidents {
            incident.messages = messages.remove(&incident.id).unwrap_or_default();
        }

        sort_newest_first(&mut incidents);
        Ok(incidents)
    }

    async fn region_version(&self) -> Result<u64, StoreError> {
        Ok(self.select_region().await?.map_or(0, |r| r.version))
    }
}

/// Creates all tables if they don't already exist.
async fn ensure_schema(db: &dyn Database) -> Result<(), StoreError> {
    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS incidents (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            description TEXT NOT NULL,
            category    TEXT NOT NULL,
            lat         REAL NOT NULL,
            lng         REAL NOT NULL,
            reported_at TEXT,
            reporter_id TEXT NOT NULL
        )",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_incidents_location ON incidents (lng, lat)")
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            incident_id         TEXT NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
            text                TEXT NOT NULL,
            author_display_name TEXT NOT NULL,
            author_id           TEXT NOT NULL,
            sent_at             TEXT NOT NULL
        )",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw("CREATE INDEX IF NOT EXISTS idx_messages_incident ON messages (incident_id)")
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    db.exec_raw(
        "CREATE TABLE IF NOT EXISTS current_region (
            slot         INTEGER PRIMARY KEY,
            label        TEXT NOT NULL,
            incident_ids TEXT NOT NULL,
            version      INTEGER NOT NULL
        )",
    )
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;

    // Enable foreign key enforcement (SQLite has it off by default)
    db.exec_raw("PRAGMA foreign_keys = ON")
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    Ok(())
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn select_incidents(
        &self,
        bounds: Option<ViewportBounds>,
    ) -> Result<Vec<Incident>, StoreError> {
        let rows = match bounds {
            Some(bounds) => {
                self.db
                    .query_raw_params(
                        &format!(
                            "SELECT {INCIDENT_COLUMNS} FROM incidents
                             WHERE lng >= $1 AND lng <= $2 AND lat >= $3 AND lat <= $4
                             ORDER BY reported_at IS NULL, reported_at DESC"
                        ),
                        &[
                            DatabaseValue::Real64(bounds.west()),
                            DatabaseValue::Real64(bounds.east()),
                            DatabaseValue::Real64(bounds.south()),
                            DatabaseValue::Real64(bounds.north()),
                        ],
                    )
                    .await
            }
            None => {
                self.db
                    .query_raw_params(
                        &format!(
                            "SELECT {INCIDENT_COLUMNS} FROM incidents
                             ORDER BY reported_at IS NULL, reported_at DESC"
                        ),
                        &[],
                    )
                    .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.attach_messages(&rows).await
    }

    async fn select_incidents_by_ids(&self, ids: &[String]) -> Result<Vec<Incident>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut sql = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id IN (");
            push_placeholders(&mut sql, 1, chunk.len());
            sql.push(')');

            let params: Vec<DatabaseValue> = chunk
                .iter()
                .map(|id| DatabaseValue::String(id.clone()))
                .collect();

            rows.extend(
                self.db
                    .query_raw_params(&sql, &params)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?,
            );
        }

        self.attach_messages(&rows).await
    }

    async fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        let id = new_id();

        self.db
            .exec_raw_params(
                "INSERT INTO incidents
                    (id, title, description, category, lat, lng, reported_at, reporter_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    DatabaseValue::String(id.clone()),
                    DatabaseValue::String(incident.title.clone()),
                    DatabaseValue::String(incident.description.clone()),
                    DatabaseValue::String(incident.category.to_string()),
                    DatabaseValue::Real64(incident.location.lat),
                    DatabaseValue::Real64(incident.location.lng),
                    incident
                        .reported_at
                        .map_or(DatabaseValue::Null, |at| DatabaseValue::String(format_ts(at))),
                    DatabaseValue::String(incident.reporter_id.clone()),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Incident {
            id,
            title: incident.title,
            description: incident.description,
            category: incident.category,
            location: incident.location,
            reported_at: incident.reported_at,
            reporter_id: incident.reporter_id,
            messages: Vec::new(),
        })
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let exists = self
            .db
            .query_raw_params(
                "SELECT id FROM incidents WHERE id = $1",
                &[DatabaseValue::String(message.incident_id.clone())],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if exists.is_empty() {
            return Err(StoreError::NotFound {
                entity: "incident",
                id: message.incident_id,
            });
        }

        let id = new_id();
        self.db
            .exec_raw_params(
                "INSERT INTO messages
                    (id, incident_id, text, author_display_name, author_id, sent_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    DatabaseValue::String(id.clone()),
                    DatabaseValue::String(message.incident_id.clone()),
                    DatabaseValue::String(message.text.clone()),
                    DatabaseValue::String(message.author_display_name.clone()),
                    DatabaseValue::String(message.author_id.clone()),
                    DatabaseValue::String(format_ts(message.sent_at)),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Message {
            id,
            incident_id: message.incident_id,
            text: message.text,
            author_display_name: message.author_display_name,
            author_id: message.author_id,
            sent_at: message.sent_at,
        })
    }

    async fn select_messages(&self, incident_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .messages_for(&[incident_id.to_string()])
            .await?
            .remove(incident_id)
            .unwrap_or_default())
    }

    async fn upsert_region(&self, snapshot: &RegionSnapshot) -> Result<u64, StoreError> {
        let ids = serde_json::to_string(&snapshot.incident_ids)?;

        let rows = self
            .db
            .query_raw_params(
                "INSERT INTO current_region (slot, label, incident_ids, version)
                 VALUES ($1, $2, $3, 1)
                 ON CONFLICT (slot) DO UPDATE SET
                   label = excluded.label,
                   incident_ids = excluded.incident_ids,
                   version = current_region.version + 1
                 RETURNING version",
                &[
                    DatabaseValue::Int32(REGION_SLOT),
                    DatabaseValue::String(snapshot.label.clone()),
                    DatabaseValue::String(ids),
                ],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        returning_version(&rows)
    }

    async fn upsert_region_if_version(
        &self,
        snapshot: &RegionSnapshot,
        expected: u64,
    ) -> Result<u64, StoreError> {
        let ids = serde_json::to_string(&snapshot.incident_ids)?;

        let rows = if expected == 0 {
            self.db
                .query_raw_params(
                    "INSERT INTO current_region (slot, label, incident_ids, version)
                     VALUES ($1, $2, $3, 1)
                     ON CONFLICT (slot) DO NOTHING
                     RETURNING version",
                    &[
                        DatabaseValue::Int32(REGION_SLOT),
                        DatabaseValue::String(snapshot.label.clone()),
                        DatabaseValue::String(ids),
                    ],
                )
                .await
        } else {
            self.db
                .query_raw_params(
                    "UPDATE current_region
                     SET label = $2, incident_ids = $3, version = version + 1
                     WHERE slot = $1 AND version = $4
                     RETURNING version",
                    &[
                        DatabaseValue::Int32(REGION_SLOT),
                        DatabaseValue::String(snapshot.label.clone()),
                        DatabaseValue::String(ids),
                        DatabaseValue::Int64(i64::try_from(expected).unwrap_or(i64::MAX)),
                    ],
                )
                .await
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if rows.is_empty() {
            let actual = self.region_version().await?;
            return Err(StoreError::VersionConflict { expected, actual });
        }

        returning_version(&rows)
    }

    async fn select_region(&self) -> Result<Option<RegionSnapshot>, StoreError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT slot, label, incident_ids, version FROM current_region WHERE slot = $1",
                &[DatabaseValue::Int32(REGION_SLOT)],
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let ids_json: String = row.to_value("incident_ids").unwrap_or_default();
        let version: i64 = row.to_value("version").unwrap_or(0);

        Ok(Some(RegionSnapshot {
            slot: row.to_value("slot").unwrap_or(REGION_SLOT),
            label: row.to_value("label").unwrap_or_default(),
            incident_ids: serde_json::from_str(&ids_json)?,
            version: u64::try_from(version).unwrap_or(0),
        }))
    }
}

/// Appends `$start, $start+1, ...` placeholders for `count` parameters.
fn push_placeholders(sql: &mut String, start: usize, count: usize) {
    for i in 0..count {
        if i > 0 {
            sql.push_str(", ");
        }
        write!(sql, "${}", start + i).unwrap_or(());
    }
}

fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Conversion {
            message: format!("invalid timestamp '{value}': {e}"),
        })
}

/// Extracts the version from a `RETURNING version` clause.
fn returning_version(rows: &[switchy_database::Row]) -> Result<u64, StoreError> {
    let version: i64 = rows
        .first()
        .and_then(|r| r.to_value("version").ok())
        .ok_or_else(|| StoreError::Conversion {
            message: "region upsert returned no version".to_string(),
        })?;

    u64::try_from(version).map_err(|e| StoreError::Conversion {
        message: format!("negative region version {version}: {e}"),
    })
}

/// Converts a database row into an [`Incident`] without messages.
fn row_to_incident(row: &switchy_database::Row) -> Result<Incident, StoreError> {
    let reported_at = row
        .to_value::<Option<String>>("reported_at")
        .unwrap_or(None)
        .as_deref()
        .map(parse_ts)
        .transpose()?;

    Ok(Incident {
        id: row.to_value("id").unwrap_or_default(),
        title: row.to_value("title").unwrap_or_default(),
        description: row.to_value("description").unwrap_or_default(),
        category: IncidentCategory::from_label(
            &row.to_value::<String>("category").unwrap_or_default(),
        ),
        location: GeoPoint::new_unchecked(
            row.to_value("lat").unwrap_or(0.0),
            row.to_value("lng").unwrap_or(0.0),
        ),
        reported_at,
        reporter_id: row.to_value("reporter_id").unwrap_or_default(),
        messages: Vec::new(),
    })
}

/// Converts a database row into a [`Message`].
fn row_to_message(row: &switchy_database::Row) -> Result<Message, StoreError> {
    let sent_at: String = row.to_value("sent_at").unwrap_or_default();

    Ok(Message {
        id: row.to_value("id").unwrap_or_default(),
        incident_id: row.to_value("incident_id").unwrap_or_default(),
        text: row.to_value("text").unwrap_or_default(),
        author_display_name: row.to_value("author_display_name").unwrap_or_default(),
        author_id: row.to_value("author_id").unwrap_or_default(),
        sent_at: parse_ts(&sent_at)?,
    })
}
