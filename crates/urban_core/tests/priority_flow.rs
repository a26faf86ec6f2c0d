use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use time::OffsetDateTime;
use time::macros::datetime;
use urban_core::db;
use urban_core::rules::RuleSet;
use urban_core::schema::{IssueStatus, NewIssue, PriorityLevel};
use urban_core::voting::PriorityService;
use urban_core::Error;

const NOW: OffsetDateTime = datetime!(2024-03-05 12:00 UTC);

fn service() -> PriorityService {
    PriorityService::new(Arc::new(RuleSet::default()))
}

fn store(dir: &Path) -> Connection {
    db::open(&dir.join("urbanfix.db")).unwrap()
}

fn report(title: &str, latitude: f64, longitude: f64) -> NewIssue {
    NewIssue {
        title: title.to_string(),
        description: "Large pothole damaging cars near the junction".to_string(),
        category: "road".to_string(),
        reported_priority: None,
        latitude,
        longitude,
        address: "Main Street".to_string(),
        created_at: Some("2024-03-01T09:00:00Z".to_string()),
        ai_severity_score: None,
    }
}

#[test]
fn vote_is_read_back_and_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    service.create_issue(&mut conn, "issue-1", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();

    for rating in 1..=10 {
        service.submit_severity_vote(&mut conn, "issue-1", "alice", rating, NOW).unwrap();
        let vote = db::get_vote(&conn, "issue-1", "alice").unwrap().unwrap();
        assert_eq!(i64::from(vote.rating), rating);
    }
    assert_eq!(db::vote_count(&conn, "issue-1").unwrap(), 1);
    assert_eq!(db::vote_average(&conn, "issue-1").unwrap(), Some(10.0));
}

#[test]
fn higher_votes_raise_severity() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    service.create_issue(&mut conn, "issue-1", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();

    let low = service.submit_severity_vote(&mut conn, "issue-1", "alice", 1, NOW).unwrap();
    let high = service.submit_severity_vote(&mut conn, "issue-1", "alice", 10, NOW).unwrap();
    assert!(high.factor_scores.severity > low.factor_scores.severity);
    assert!(high.final_score > low.final_score);

    // identical vote recomputes to the same score
    let again = service.submit_severity_vote(&mut conn, "issue-1", "alice", 10, NOW).unwrap();
    assert_eq!(again.final_score, high.final_score);

    let stored = db::require_issue(&conn, "issue-1").unwrap();
    assert_eq!(stored.priority_score, Some(again.final_score));
    assert_eq!(stored.priority_level, Some(again.priority_level));
}

#[test]
fn invalid_votes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    service.create_issue(&mut conn, "issue-1", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();

    for rating in [0, 11, -3] {
        let err = service.submit_severity_vote(&mut conn, "issue-1", "alice", rating, NOW).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "rating {rating}: {err}");
    }
    let err = service.submit_severity_vote(&mut conn, "missing", "alice", 5, NOW).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(db::vote_count(&conn, "issue-1").unwrap(), 0);
}

#[test]
fn duplicate_link_counts_once_for_both_issues() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    // far enough apart that only the explicit link relates them
    service.create_issue(&mut conn, "x", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();
    service.create_issue(&mut conn, "y", &report("Pothole by the bank", 40.7306, -73.9352), NOW).unwrap();

    let first = service.mark_duplicate(&mut conn, "x", "y", "alice", NOW).unwrap();
    assert!(first.newly_linked);
    assert_eq!(first.issue.duplicate_count, 1);
    assert_eq!(first.duplicate.duplicate_count, 1);

    let repeat = service.mark_duplicate(&mut conn, "x", "y", "bob", NOW).unwrap();
    let reciprocal = service.mark_duplicate(&mut conn, "y", "x", "carol", NOW).unwrap();
    for outcome in [&repeat, &reciprocal] {
        assert!(!outcome.newly_linked);
        assert_eq!(outcome.issue.duplicate_count, 1);
        assert_eq!(outcome.duplicate.duplicate_count, 1);
    }
    assert_eq!(reciprocal.issue.factor_scores.reports_count, first.issue.factor_scores.reports_count);
    assert_eq!(db::duplicate_links(&conn, "x").unwrap().len(), 1);
}

#[test]
fn duplicate_marks_are_validated() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    service.create_issue(&mut conn, "x", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();

    assert!(matches!(service.mark_duplicate(&mut conn, "x", "x", "alice", NOW), Err(Error::Validation(_))));
    assert!(matches!(service.mark_duplicate(&mut conn, "x", "nope", "alice", NOW), Err(Error::NotFound(_))));
    assert!(db::linked_issue_ids(&conn, "x").unwrap().is_empty());
}

#[test]
fn nearby_open_issues_count_each_other_after_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    // ~55 m apart, and a third ~1.1 km away
    service.create_issue(&mut conn, "a", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();
    service.create_issue(&mut conn, "b", &report("Pothole near Main", 40.7133, -74.0060), NOW).unwrap();
    service.create_issue(&mut conn, "c", &report("Pothole uptown", 40.7228, -74.0060), NOW).unwrap();

    let summary = service.recalculate_all_priorities(&mut conn, NOW).unwrap();
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.failed, 0);

    let count = |id: &str| {
        db::require_issue(&conn, id)
            .unwrap()
            .priority_breakdown
            .unwrap()
            .duplicate_count
    };
    assert_eq!(count("a"), 1);
    assert_eq!(count("b"), 1);
    assert_eq!(count("c"), 0);
}

#[test]
fn resolved_issues_leave_the_batch_and_neighbour_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    service.create_issue(&mut conn, "a", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();
    service.create_issue(&mut conn, "b", &report("Pothole near Main", 40.7133, -74.0060), NOW).unwrap();
    assert!(db::set_status(&conn, "b", IssueStatus::Resolved).unwrap());

    let summary = service.recalculate_all_priorities(&mut conn, NOW).unwrap();
    assert_eq!(summary.updated, 1);

    let a = db::require_issue(&conn, "a").unwrap();
    assert_eq!(a.priority_breakdown.unwrap().duplicate_count, 0);

    let triggers: Vec<String> = db::priority_logs(&conn, "a")
        .unwrap()
        .into_iter()
        .map(|entry| entry.trigger_reason)
        .collect();
    assert_eq!(triggers, vec!["manual", "batch"]);
}

#[test]
fn stored_level_matches_stored_score() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = store(dir.path());
    let service = service();
    let mut urgent = report("Live wire down on school road", 40.7128, -74.0060);
    urgent.category = "electricity".to_string();
    urgent.description = "Exposed live wire sparking next to the school gate, danger to children".to_string();
    urgent.address = "Highway 1 near Central Hospital".to_string();
    urgent.ai_severity_score = Some(9.5);

    let breakdown = service.create_issue(&mut conn, "wire", &urgent, NOW).unwrap();
    let issue = db::require_issue(&conn, "wire").unwrap();
    assert_eq!(issue.priority_level, Some(breakdown.priority_level));
    assert_eq!(service.engine().level_for(breakdown.final_score), breakdown.priority_level);
    assert!(breakdown.priority_level >= PriorityLevel::High);
}

#[test]
fn concurrent_votes_on_one_issue_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("urbanfix.db");
    let service = service();
    {
        let mut conn = db::open(&path).unwrap();
        service.create_issue(&mut conn, "issue-1", &report("Pothole on Main", 40.7128, -74.0060), NOW).unwrap();
    }

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let path = &path;
            let service = &service;
            scope.spawn(move || {
                let mut conn = db::open(path).unwrap();
                for n in 0..5 {
                    let user = format!("user-{worker}-{n}");
                    service.submit_severity_vote(&mut conn, "issue-1", &user, 7, NOW).unwrap();
                }
            });
        }
    });

    let conn = db::open(&path).unwrap();
    assert_eq!(db::vote_count(&conn, "issue-1").unwrap(), 20);
    // one creation entry plus one per vote
    assert_eq!(db::priority_logs(&conn, "issue-1").unwrap().len(), 21);
}
