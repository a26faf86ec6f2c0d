use crate::geo::{BoundingBox, NearbyCandidate};
use crate::schema::{
    Category, CitizenVote, Coordinates, DuplicateLink, Issue, IssueSnapshot, IssueStatus, NewIssue,
    PriorityBreakdown, PriorityLevel, PriorityLogEntry, TriggerReason, UrgencyLabel,
};
use crate::timefmt::now_rfc3339;
use crate::training::TrainingSample;
use crate::{Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS issues (
          id TEXT PRIMARY KEY,
          title TEXT NOT NULL,
          description TEXT NOT NULL,
          category TEXT,
          reported_priority TEXT,
          latitude REAL NOT NULL,
          longitude REAL NOT NULL,
          address TEXT NOT NULL DEFAULT '',
          status TEXT NOT NULL DEFAULT 'open',
          created_at TEXT NOT NULL,
          ai_severity_score REAL,
          priority_score REAL,
          priority_level TEXT,
          priority_breakdown_json TEXT,
          updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE INDEX IF NOT EXISTS idx_issues_lat_lng ON issues(latitude, longitude);
        CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority_score DESC);
        CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);

        CREATE TABLE IF NOT EXISTS citizen_votes (
          issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
          user_id TEXT NOT NULL,
          rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 10),
          created_at TEXT NOT NULL,
          PRIMARY KEY (issue_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS duplicate_links (
          pair_low TEXT NOT NULL,
          pair_high TEXT NOT NULL,
          issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
          duplicate_issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
          reporter_id TEXT NOT NULL,
          created_at TEXT NOT NULL,
          PRIMARY KEY (pair_low, pair_high)
        );

        CREATE INDEX IF NOT EXISTS idx_duplicate_links_high ON duplicate_links(pair_high);

        CREATE TABLE IF NOT EXISTS priority_logs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
          old_priority_score REAL,
          new_priority_score REAL NOT NULL,
          old_priority_level TEXT,
          new_priority_level TEXT NOT NULL,
          trigger_reason TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_priority_logs_issue ON priority_logs(issue_id);
        "#,
    )?;
    Ok(())
}

const ISSUE_COLUMNS: &str = "id, title, description, category, reported_priority, latitude, longitude, \
     address, status, created_at, ai_severity_score, priority_score, priority_level, priority_breakdown_json";

fn json_column<T: serde::de::DeserializeOwned>(index: usize, raw: Option<String>) -> rusqlite::Result<Option<T>> {
    raw.map(|json| {
        serde_json::from_str(&json)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
    })
    .transpose()
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let status: String = row.get(8)?;
    let level: Option<String> = row.get(12)?;
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        reported_priority: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        address: row.get(7)?,
        status: status.parse().unwrap_or(IssueStatus::Open),
        created_at: row.get(9)?,
        ai_severity_score: row.get(10)?,
        priority_score: row.get(11)?,
        priority_level: level.and_then(|raw| raw.parse().ok()),
        priority_breakdown: json_column(13, row.get(13)?)?,
    })
}

/// Inserts a validated issue. `created_at` defaults to now.
pub fn insert_issue(conn: &Connection, id: &str, issue: &NewIssue) -> Result<()> {
    let created_at = issue.created_at.clone().unwrap_or_else(now_rfc3339);
    conn.execute(
        r#"
        INSERT INTO issues (
          id, title, description, category, reported_priority,
          latitude, longitude, address, status, created_at, ai_severity_score
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?9, ?10)
        "#,
        params![
            id,
            issue.title,
            issue.description,
            issue.category,
            issue.reported_priority,
            issue.latitude,
            issue.longitude,
            issue.address,
            created_at,
            issue.ai_severity_score
        ],
    )?;
    Ok(())
}

pub fn get_issue(conn: &Connection, id: &str) -> Result<Option<Issue>> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], issue_from_row).optional()?)
}

pub fn require_issue(conn: &Connection, id: &str) -> Result<Issue> {
    get_issue(conn, id)?.ok_or_else(|| Error::NotFound(format!("issue {id}")))
}

pub fn issue_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Everything the scoring engine needs, including the current vote average.
pub fn get_snapshot(conn: &Connection, id: &str) -> Result<Option<IssueSnapshot>> {
    let Some(issue) = get_issue(conn, id)? else {
        return Ok(None);
    };
    let citizen_vote_average = vote_average(conn, id)?;
    Ok(Some(IssueSnapshot {
        category: Some(Category::parse_or_other(issue.category.as_deref())),
        coordinates: Coordinates::checked(issue.latitude, issue.longitude),
        id: issue.id,
        title: issue.title,
        description: issue.description,
        address: issue.address,
        created_at: issue.created_at,
        ai_severity_score: issue.ai_severity_score,
        citizen_vote_average,
    }))
}

/// Returns false when no such issue exists.
pub fn set_status(conn: &Connection, id: &str, status: IssueStatus) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE issues SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now_rfc3339()],
    )?;
    Ok(changed > 0)
}

/// Open issues inside the box. Callers still apply the exact distance check.
pub fn open_candidates_in_box(conn: &Connection, bbox: &BoundingBox) -> Result<Vec<NearbyCandidate>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, latitude, longitude
        FROM issues
        WHERE status != 'resolved'
          AND latitude BETWEEN ?1 AND ?2
          AND longitude BETWEEN ?3 AND ?4
        "#,
    )?;
    let rows = stmt.query_map(
        params![bbox.min_lat, bbox.max_lat, bbox.min_lng, bbox.max_lng],
        |row| {
            Ok(NearbyCandidate {
                id: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                status: IssueStatus::Open,
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// One vote per (issue, user); a repeat vote replaces the rating.
pub fn upsert_vote(conn: &Connection, vote: &CitizenVote) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO citizen_votes (issue_id, user_id, rating, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(issue_id, user_id) DO UPDATE SET
          rating=excluded.rating,
          created_at=excluded.created_at
        "#,
        params![vote.issue_id, vote.user_id, vote.rating, vote.created_at],
    )?;
    Ok(())
}

pub fn get_vote(conn: &Connection, issue_id: &str, user_id: &str) -> Result<Option<CitizenVote>> {
    Ok(conn
        .query_row(
            "SELECT issue_id, user_id, rating, created_at FROM citizen_votes WHERE issue_id = ?1 AND user_id = ?2",
            params![issue_id, user_id],
            |row| {
                Ok(CitizenVote {
                    issue_id: row.get(0)?,
                    user_id: row.get(1)?,
                    rating: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn vote_count(conn: &Connection, issue_id: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM citizen_votes WHERE issue_id = ?1",
        params![issue_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Mean rating, or `None` when nobody has voted.
pub fn vote_average(conn: &Connection, issue_id: &str) -> Result<Option<f64>> {
    Ok(conn.query_row(
        "SELECT AVG(rating) FROM citizen_votes WHERE issue_id = ?1",
        params![issue_id],
        |row| row.get(0),
    )?)
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Records the link unless the unordered pair is already linked.
///
/// Returns whether a new row was written; the first reporter is kept.
pub fn insert_duplicate_link(conn: &Connection, link: &DuplicateLink) -> Result<bool> {
    let (low, high) = ordered_pair(&link.issue_id, &link.duplicate_issue_id);
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO duplicate_links (
          pair_low, pair_high, issue_id, duplicate_issue_id, reporter_id, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![low, high, link.issue_id, link.duplicate_issue_id, link.reporter_id, link.created_at],
    )?;
    Ok(inserted > 0)
}

/// Ids linked to `issue_id` in either direction.
pub fn linked_issue_ids(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT pair_high FROM duplicate_links WHERE pair_low = ?1
        UNION
        SELECT pair_low FROM duplicate_links WHERE pair_high = ?1
        ORDER BY 1
        "#,
    )?;
    let rows = stmt.query_map(params![issue_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

pub fn duplicate_links(conn: &Connection, issue_id: &str) -> Result<Vec<DuplicateLink>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT issue_id, duplicate_issue_id, reporter_id, created_at
        FROM duplicate_links
        WHERE pair_low = ?1 OR pair_high = ?1
        ORDER BY created_at
        "#,
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(DuplicateLink {
            issue_id: row.get(0)?,
            duplicate_issue_id: row.get(1)?,
            reporter_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Stores the breakdown on the issue and appends a change-log row.
///
/// Run inside the caller's transaction so the read of the old value and both
/// writes land together.
pub fn write_priority(
    conn: &Connection,
    issue_id: &str,
    breakdown: &PriorityBreakdown,
    trigger: TriggerReason,
) -> Result<PriorityLogEntry> {
    let (old_score, old_level): (Option<f64>, Option<String>) = conn
        .query_row(
            "SELECT priority_score, priority_level FROM issues WHERE id = ?1",
            params![issue_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("issue {issue_id}")))?;

    let breakdown_json = serde_json::to_string(breakdown)?;
    conn.execute(
        r#"
        UPDATE issues SET
          priority_score = ?2,
          priority_level = ?3,
          priority_breakdown_json = ?4,
          updated_at = ?5
        WHERE id = ?1
        "#,
        params![
            issue_id,
            breakdown.final_score,
            breakdown.priority_level.as_str(),
            breakdown_json,
            breakdown.calculation_timestamp
        ],
    )?;

    let entry = PriorityLogEntry {
        issue_id: issue_id.to_string(),
        old_priority_score: old_score,
        new_priority_score: breakdown.final_score,
        old_priority_level: old_level.and_then(|raw| raw.parse().ok()),
        new_priority_level: breakdown.priority_level,
        trigger_reason: trigger.as_str().to_string(),
        created_at: breakdown.calculation_timestamp.clone(),
    };
    conn.execute(
        r#"
        INSERT INTO priority_logs (
          issue_id, old_priority_score, new_priority_score,
          old_priority_level, new_priority_level, trigger_reason, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            entry.issue_id,
            entry.old_priority_score,
            entry.new_priority_score,
            entry.old_priority_level.map(|level| level.as_str()),
            entry.new_priority_level.as_str(),
            entry.trigger_reason,
            entry.created_at
        ],
    )?;

    Ok(entry)
}

pub fn priority_logs(conn: &Connection, issue_id: &str) -> Result<Vec<PriorityLogEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT issue_id, old_priority_score, new_priority_score,
               old_priority_level, new_priority_level, trigger_reason, created_at
        FROM priority_logs
        WHERE issue_id = ?1
        ORDER BY id
        "#,
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        let old_level: Option<String> = row.get(3)?;
        let new_level: String = row.get(4)?;
        let new_priority_level = new_level.parse::<PriorityLevel>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, err.into())
        })?;
        Ok(PriorityLogEntry {
            issue_id: row.get(0)?,
            old_priority_score: row.get(1)?,
            new_priority_score: row.get(2)?,
            old_priority_level: old_level.and_then(|raw| raw.parse().ok()),
            new_priority_level,
            trigger_reason: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub category: Option<Category>,
    pub status: Option<IssueStatus>,
    pub limit: Option<usize>,
}

/// Highest priority first; unscored issues last, oldest first among equals.
pub fn priority_sorted(conn: &Connection, filter: &IssueFilter) -> Result<Vec<Issue>> {
    let sql = format!(
        r#"
        SELECT {ISSUE_COLUMNS}
        FROM issues
        WHERE (?1 IS NULL OR category = ?1)
          AND (?2 IS NULL OR status = ?2)
        ORDER BY priority_score IS NULL, priority_score DESC, created_at ASC
        LIMIT ?3
        "#
    );
    let limit = filter.limit.map(|n| n as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            filter.category.map(|c| c.as_str()),
            filter.status.map(|s| s.as_str()),
            limit
        ],
        issue_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Unresolved issues scoring at or above `min_score`, highest first.
pub fn critical_issues(conn: &Connection, min_score: f64, limit: Option<usize>) -> Result<Vec<Issue>> {
    let sql = format!(
        r#"
        SELECT {ISSUE_COLUMNS}
        FROM issues
        WHERE priority_score >= ?1 AND status != 'resolved'
        ORDER BY priority_score DESC, created_at ASC
        LIMIT ?2
        "#
    );
    let limit = limit.map(|n| n as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![min_score, limit], issue_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn unresolved_issue_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM issues WHERE status != 'resolved' ORDER BY created_at, id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

/// Labelled issues for training.
///
/// The label is the priority chosen at intake, else the stored level. Rows
/// with no usable category or label are skipped.
pub fn load_training_corpus(conn: &Connection) -> Result<Vec<TrainingSample>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT title, description, category, reported_priority, priority_level
        FROM issues
        WHERE category IS NOT NULL
        ORDER BY created_at, id
        "#,
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut samples = Vec::new();
    for row in rows {
        let (title, description, category, reported, level) = row?;
        let Ok(category) = category.parse::<Category>() else {
            continue;
        };
        let priority = reported
            .and_then(|raw| raw.parse::<UrgencyLabel>().ok())
            .or_else(|| {
                level
                    .and_then(|raw| raw.parse::<PriorityLevel>().ok())
                    .map(UrgencyLabel::from)
            });
        if let Some(priority) = priority {
            samples.push(TrainingSample {
                title,
                description,
                category,
                priority,
            });
        }
    }
    Ok(samples)
}
