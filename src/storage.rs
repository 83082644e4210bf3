use crate::error::AppError;
use crate::models::{BillingLineItem, CostValue, Platform, ProjectId, ProjectMeta, ProjectMetaMap};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;

pub struct Storage {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub platform: Platform,
    pub data_version: u64,
    pub fetched_at: DateTime<Utc>,
}

fn encode_id(id: Option<&ProjectId>) -> Result<Option<String>, AppError> {
    Ok(match id {
        Some(id) => Some(serde_json::to_string(id)?),
        None => None,
    })
}

fn decode_id(raw: Option<String>, column: usize) -> rusqlite::Result<Option<ProjectId>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS line_items (
                id INTEGER PRIMARY KEY,
                platform TEXT NOT NULL,
                project_id TEXT,
                project_name TEXT NOT NULL,
                billing_year INTEGER NOT NULL,
                billing_month TEXT,
                service_description TEXT,
                sku_description TEXT,
                kind TEXT,
                cost TEXT
            );

            CREATE INDEX IF NOT EXISTS line_items_platform_year
                ON line_items (platform, billing_year);

            CREATE TABLE IF NOT EXISTS project_meta (
                platform TEXT NOT NULL,
                project_name TEXT NOT NULL,
                project_id TEXT,
                project_code TEXT,
                environment TEXT,
                owner TEXT,
                team TEXT,
                PRIMARY KEY (platform, project_name)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                platform TEXT PRIMARY KEY,
                data_version INTEGER NOT NULL,
                fetched_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn replace_snapshot(
        &mut self,
        platform: Platform,
        items: &[BillingLineItem],
        meta: &ProjectMetaMap,
        fetched_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let tx = self.conn.transaction()?;
        let key = platform.as_str();

        tx.execute("DELETE FROM line_items WHERE platform = ?", [key])?;
        tx.execute("DELETE FROM project_meta WHERE platform = ?", [key])?;

        let mut insert_item = tx.prepare(
            "INSERT INTO line_items (platform, project_id, project_name, billing_year, billing_month,
                                     service_description, sku_description, kind, cost)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for item in items {
            insert_item.execute(params![
                key,
                encode_id(item.project_id.as_ref())?,
                item.project_name,
                item.billing_year,
                item.billing_month,
                item.service_description,
                item.sku_description,
                item.kind,
                item.cost.as_ref().map(CostValue::as_raw),
            ])?;
        }

        let mut insert_meta = tx.prepare(
            "INSERT INTO project_meta (platform, project_name, project_id, project_code, environment, owner, team)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (name, m) in meta {
            insert_meta.execute(params![
                key,
                name,
                encode_id(m.id.as_ref())?,
                m.project_code,
                m.environment,
                m.owner,
                m.team,
            ])?;
        }

        let version: i64 = tx.query_row(
            "INSERT INTO snapshots (platform, data_version, fetched_at) VALUES (?1, 1, ?2)
             ON CONFLICT(platform) DO UPDATE SET data_version = data_version + 1, fetched_at = ?2
             RETURNING data_version",
            params![key, fetched_at.to_rfc3339()],
            |row| row.get(0),
        )?;

        drop(insert_item);
        drop(insert_meta);
        tx.commit()?;
        Ok(version.max(0) as u64)
    }

    pub fn load_line_items(
        &self,
        platform: Platform,
        years: &[i32],
    ) -> Result<Vec<BillingLineItem>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, project_name, billing_year, billing_month, service_description,
                    sku_description, kind, cost
             FROM line_items WHERE platform = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map([platform.as_str()], |r| {
                Ok(BillingLineItem {
                    project_id: decode_id(r.get(0)?, 0)?,
                    project_name: r.get(1)?,
                    platform: Some(platform.as_str().to_string()),
                    billing_year: r.get(2)?,
                    billing_month: r.get(3)?,
                    service_description: r.get(4)?,
                    sku_description: r.get(5)?,
                    kind: r.get(6)?,
                    cost: r.get::<_, Option<String>>(7)?.map(CostValue::Text),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if years.is_empty() {
            return Ok(rows);
        }
        Ok(rows
            .into_iter()
            .filter(|item| years.contains(&item.billing_year))
            .collect())
    }

    pub fn load_meta(&self, platform: Platform) -> Result<ProjectMetaMap, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_name, project_id, project_code, environment, owner, team
             FROM project_meta WHERE platform = ?",
        )?;
        let rows = stmt
            .query_map([platform.as_str()], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    ProjectMeta {
                        id: decode_id(r.get(1)?, 1)?,
                        project_code: r.get(2)?,
                        environment: r.get(3)?,
                        owner: r.get(4)?,
                        team: r.get(5)?,
                    },
                ))
            })?
            .collect::<Result<ProjectMetaMap, _>>()?;
        Ok(rows)
    }

    pub fn snapshot_info(&self, platform: Platform) -> Result<Option<SnapshotInfo>, AppError> {
        let row = self
            .conn
            .query_row(
                "SELECT data_version, fetched_at FROM snapshots WHERE platform = ?",
                [platform.as_str()],
                |r| {
                    let version: i64 = r.get(0)?;
                    let fetched_at = DateTime::parse_from_rfc3339(&r.get::<_, String>(1)?)
                        .map(|d| d.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                        })?;
                    Ok(SnapshotInfo {
                        platform,
                        data_version: version.max(0) as u64,
                        fetched_at,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
