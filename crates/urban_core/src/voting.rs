//! Citizen severity votes and duplicate marks, with the recomputation they trigger.
//!
//! Every recomputation reads its inputs and writes the new breakdown inside
//! one `BEGIN IMMEDIATE` transaction. SQLite holds the write lock from the
//! first read, so two updates to the same issue are applied one after the
//! other and neither is lost.

use crate::db;
use crate::geo::{BoundingBox, DuplicateDetector};
use crate::intake::validate_new_issue;
use crate::rules::RuleSet;
use crate::schema::{CitizenVote, DuplicateLink, NewIssue, PriorityBreakdown, TriggerReason};
use crate::scoring::PriorityEngine;
use crate::timefmt::format_rfc3339;
use crate::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateOutcome {
    /// False when the pair was already linked, in either direction.
    pub newly_linked: bool,
    pub issue: PriorityBreakdown,
    pub duplicate: PriorityBreakdown,
}

#[derive(Debug, Clone)]
pub struct PriorityService {
    engine: PriorityEngine,
    detector: DuplicateDetector,
}

impl PriorityService {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            detector: DuplicateDetector::new(rules.priority.duplicates.clone()),
            engine: PriorityEngine::new(rules),
        }
    }

    pub fn engine(&self) -> &PriorityEngine {
        &self.engine
    }

    pub fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    /// Scores one issue from current store contents and persists the result.
    ///
    /// Expects to run inside a write transaction.
    fn rescore(
        &self,
        conn: &Connection,
        issue_id: &str,
        trigger: TriggerReason,
        now: OffsetDateTime,
    ) -> Result<PriorityBreakdown> {
        let snapshot =
            db::get_snapshot(conn, issue_id)?.ok_or_else(|| Error::NotFound(format!("issue {issue_id}")))?;

        let candidates = match snapshot.coordinates {
            Some(origin) => db::open_candidates_in_box(conn, &BoundingBox::around(origin, self.detector.radius_meters()))?,
            None => Vec::new(),
        };
        let linked = db::linked_issue_ids(conn, issue_id)?;
        let duplicates = self.detector.find_nearby_duplicates(&snapshot, &candidates, &linked);

        let breakdown = self.engine.calculate_overall_priority_score(&snapshot, &duplicates, now);
        let entry = db::write_priority(conn, issue_id, &breakdown, trigger)?;
        debug!(
            issue_id,
            trigger = trigger.as_str(),
            old = ?entry.old_priority_score,
            new = entry.new_priority_score,
            duplicates = duplicates.duplicate_count,
            "priority recomputed"
        );
        Ok(breakdown)
    }

    /// Recomputes and stores one issue's priority in its own transaction.
    pub fn recalculate_priority(
        &self,
        conn: &mut Connection,
        issue_id: &str,
        trigger: TriggerReason,
        now: OffsetDateTime,
    ) -> Result<PriorityBreakdown> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let breakdown = self.rescore(&tx, issue_id, trigger, now)?;
        tx.commit()?;
        Ok(breakdown)
    }

    /// Validates, stores and scores a new issue.
    pub fn create_issue(
        &self,
        conn: &mut Connection,
        issue_id: &str,
        issue: &NewIssue,
        now: OffsetDateTime,
    ) -> Result<PriorityBreakdown> {
        let mut issue = validate_new_issue(issue)?;
        issue.created_at.get_or_insert_with(|| format_rfc3339(now));

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        db::insert_issue(&tx, issue_id, &issue)?;
        let breakdown = self.rescore(&tx, issue_id, TriggerReason::Manual, now)?;
        tx.commit()?;

        info!(issue_id, score = breakdown.final_score, level = %breakdown.priority_level, "issue created");
        Ok(breakdown)
    }

    /// Records (or replaces) a user's 1-10 severity rating and rescores the issue.
    pub fn submit_severity_vote(
        &self,
        conn: &mut Connection,
        issue_id: &str,
        user_id: &str,
        rating: i64,
        now: OffsetDateTime,
    ) -> Result<PriorityBreakdown> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(Error::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING} (got {rating})"
            )));
        }
        if user_id.trim().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !db::issue_exists(&tx, issue_id)? {
            return Err(Error::NotFound(format!("issue {issue_id}")));
        }
        db::upsert_vote(
            &tx,
            &CitizenVote {
                issue_id: issue_id.to_string(),
                user_id: user_id.to_string(),
                rating: rating as u8,
                created_at: format_rfc3339(now),
            },
        )?;
        let breakdown = self.rescore(&tx, issue_id, TriggerReason::SeverityVote, now)?;
        tx.commit()?;

        info!(issue_id, user_id, rating, score = breakdown.final_score, "severity vote recorded");
        Ok(breakdown)
    }

    /// Links two issues as duplicates and rescores both.
    ///
    /// Linking an already-linked pair (either direction) changes nothing but
    /// still rescores.
    pub fn mark_duplicate(
        &self,
        conn: &mut Connection,
        issue_id: &str,
        duplicate_issue_id: &str,
        user_id: &str,
        now: OffsetDateTime,
    ) -> Result<DuplicateOutcome> {
        if issue_id == duplicate_issue_id {
            return Err(Error::Validation("an issue cannot duplicate itself".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for id in [issue_id, duplicate_issue_id] {
            if !db::issue_exists(&tx, id)? {
                return Err(Error::NotFound(format!("issue {id}")));
            }
        }
        let newly_linked = db::insert_duplicate_link(
            &tx,
            &DuplicateLink {
                issue_id: issue_id.to_string(),
                duplicate_issue_id: duplicate_issue_id.to_string(),
                reporter_id: user_id.to_string(),
                created_at: format_rfc3339(now),
            },
        )?;
        let issue = self.rescore(&tx, issue_id, TriggerReason::DuplicateMark, now)?;
        let duplicate = self.rescore(&tx, duplicate_issue_id, TriggerReason::DuplicateMark, now)?;
        tx.commit()?;

        info!(issue_id, duplicate_issue_id, user_id, newly_linked, "duplicate marked");
        Ok(DuplicateOutcome {
            newly_linked,
            issue,
            duplicate,
        })
    }

    /// Rescores every unresolved issue, one transaction each.
    ///
    /// A failure on one issue is logged and counted; the batch carries on.
    pub fn recalculate_all_priorities(&self, conn: &mut Connection, now: OffsetDateTime) -> Result<BatchSummary> {
        let ids = db::unresolved_issue_ids(conn)?;
        let mut summary = BatchSummary::default();

        for id in &ids {
            match self.recalculate_priority(conn, id, TriggerReason::Batch, now) {
                Ok(_) => summary.updated += 1,
                Err(err) => {
                    warn!(issue_id = %id, error = %err, "priority recalculation failed");
                    summary.failed += 1;
                }
            }
        }

        info!(updated = summary.updated, failed = summary.failed, "batch recalculation finished");
        Ok(summary)
    }
}
