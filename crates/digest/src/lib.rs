//! Markdown export of the priority dashboard: one index of maps of content
//! and one note per issue with its stored breakdown.

use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use urban_core::db::{self, IssueFilter};
use urban_core::schema::{Category, Issue, IssueStatus, PriorityLevel};

pub struct DigestPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub issues_dir: PathBuf,
}

impl DigestPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            issues_dir: root.join("Issues"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.issues_dir)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DigestOptions {
    /// Unresolved issues at or above this score are listed as critical.
    pub critical_threshold: f64,
    pub include_resolved: bool,
    /// Priority log entries shown per issue note.
    pub log_entries: usize,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            critical_threshold: 8.0,
            include_resolved: false,
            log_entries: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSummary {
    pub notes_written: usize,
    pub critical: usize,
}

pub fn build_digest(
    conn: &Connection,
    root: &Path,
    options: &DigestOptions,
    generated_at: OffsetDateTime,
) -> Result<DigestSummary> {
    let paths = DigestPaths::new(root);
    paths.ensure()?;

    let filter = IssueFilter {
        status: (!options.include_resolved).then_some(IssueStatus::Open),
        ..Default::default()
    };
    let issues = db::priority_sorted(conn, &filter)?;
    let critical = db::critical_issues(conn, options.critical_threshold, None)?;

    // 1) Issue notes
    for issue in &issues {
        write_issue_note(conn, &paths, issue, options)?;
    }

    // 2) Priority MOC
    let generated = generated_at.format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))?;
    let mut lines: Vec<String> = vec![
        "# MOC - Priority".to_string(),
        String::new(),
        format!("This index is generated ({generated}). Do not edit manually."),
        String::new(),
        "## Critical".to_string(),
        String::new(),
    ];
    if critical.is_empty() {
        lines.push("_No critical issues._".to_string());
    } else {
        lines.extend(critical.iter().map(index_line));
    }

    let mut by_level: BTreeMap<std::cmp::Reverse<Option<PriorityLevel>>, Vec<&Issue>> = BTreeMap::new();
    let mut by_category: BTreeMap<Category, usize> = BTreeMap::new();
    for issue in &issues {
        by_level
            .entry(std::cmp::Reverse(issue.priority_level))
            .or_default()
            .push(issue);
        *by_category
            .entry(Category::parse_or_other(issue.category.as_deref()))
            .or_insert(0) += 1;
    }

    for (std::cmp::Reverse(level), group) in by_level {
        lines.push(String::new());
        lines.push(format!("## {}", level.map(level_heading).unwrap_or("Unscored")));
        lines.push(String::new());
        lines.extend(group.into_iter().map(index_line));
    }

    lines.push(String::new());
    lines.push("## Categories".to_string());
    lines.push(String::new());
    if by_category.is_empty() {
        lines.push("_No issues found._".to_string());
    } else {
        for (category, count) in by_category {
            lines.push(format!("- {category} ({count})"));
        }
    }

    fs::write(paths.index_dir.join("MOC - Priority.md"), lines.join("\n"))?;

    Ok(DigestSummary {
        notes_written: issues.len(),
        critical: critical.len(),
    })
}

fn level_heading(level: PriorityLevel) -> &'static str {
    match level {
        PriorityLevel::Critical => "Critical Priority",
        PriorityLevel::High => "High Priority",
        PriorityLevel::Medium => "Medium Priority",
        PriorityLevel::Low => "Low Priority",
        PriorityLevel::VeryLow => "Very Low Priority",
    }
}

fn index_line(issue: &Issue) -> String {
    let score = issue
        .priority_score
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "-".to_string());
    format!("- [[Issues/{}|{}]] ({score})", note_name(&issue.id), issue.title)
}

/// File-safe note name for an issue id.
fn note_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_issue_note(conn: &Connection, paths: &DigestPaths, issue: &Issue, options: &DigestOptions) -> Result<()> {
    let note_path = paths.issues_dir.join(format!("{}.md", note_name(&issue.id)));

    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", issue.id));
    md.push_str(&format!("status: {}\n", issue.status.as_str()));
    md.push_str(&format!(
        "category: {}\n",
        Category::parse_or_other(issue.category.as_deref())
    ));
    md.push_str(&format!("created_at: {}\n", issue.created_at));
    if let Some(score) = issue.priority_score {
        md.push_str(&format!("priority_score: {score}\n"));
    }
    if let Some(level) = issue.priority_level {
        md.push_str(&format!("priority_level: {level}\n"));
    }
    if let Some(breakdown) = &issue.priority_breakdown {
        md.push_str("breakdown_json: |\n");
        md.push_str(&indent_yaml_block(&serde_json::to_string_pretty(breakdown)?));
    }
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", issue.title));
    md.push_str(&format!("- Address: {}\n", issue.address));
    md.push_str(&format!("- Location: `{:.6}, {:.6}`\n", issue.latitude, issue.longitude));
    md.push_str(&format!("- Reported: `{}`\n", issue.created_at));
    if let Some(votes) = db::vote_average(conn, &issue.id)? {
        md.push_str(&format!(
            "- Citizen severity: {votes:.1} from {} votes\n",
            db::vote_count(conn, &issue.id)?
        ));
    }
    md.push('\n');

    md.push_str("## Description\n");
    md.push_str(&issue.description);
    md.push_str("\n\n");

    md.push_str("## Priority Factors\n");
    match &issue.priority_breakdown {
        Some(b) => {
            md.push_str("| Factor | Score | Weight |\n|---|---|---|\n");
            let rows = [
                ("Severity", b.factor_scores.severity, b.weights.severity),
                ("Location", b.factor_scores.location, b.weights.location),
                ("Reports", b.factor_scores.reports_count, b.weights.reports_count),
                ("Age", b.factor_scores.age, b.weights.age),
                ("Safety impact", b.factor_scores.safety_impact, b.weights.safety_impact),
            ];
            for (name, score, weight) in rows {
                md.push_str(&format!("| {name} | {score:.2} | {weight:.2} |\n"));
            }
            md.push_str(&format!(
                "\n**{:.2}** ({}), computed `{}`\n",
                b.final_score, b.priority_level, b.calculation_timestamp
            ));
        }
        None => md.push_str("_Not scored yet._\n"),
    }
    md.push('\n');

    let links = db::linked_issue_ids(conn, &issue.id)?;
    if !links.is_empty() {
        md.push_str("## Linked Duplicates\n");
        for id in links {
            md.push_str(&format!("- [[Issues/{}]]\n", note_name(&id)));
        }
        md.push('\n');
    }

    let logs = db::priority_logs(conn, &issue.id)?;
    if !logs.is_empty() {
        md.push_str("## Priority History\n");
        for entry in logs.iter().rev().take(options.log_entries) {
            let old = entry
                .old_priority_score
                .map(|s| format!("{s:.2}"))
                .unwrap_or_else(|| "-".to_string());
            md.push_str(&format!(
                "- `{}` {} {old} -> {:.2} ({})\n",
                entry.created_at, entry.trigger_reason, entry.new_priority_score, entry.new_priority_level
            ));
        }
    }

    fs::write(note_path, md)?;
    Ok(())
}

fn indent_yaml_block(s: &str) -> String {
    s.lines().map(|line| format!("  {line}\n")).collect()
}
