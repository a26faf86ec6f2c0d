//! Validation of new issue reports before they reach the store.

use crate::schema::{Category, Coordinates, NewIssue, UrgencyLabel};
use crate::timefmt::{format_rfc3339, parse_timestamp};
use crate::{Error, Result};

pub const TITLE_CHARS: (usize, usize) = (5, 200);
pub const DESCRIPTION_CHARS: (usize, usize) = (10, 5000);
pub const ADDRESS_MAX_CHARS: usize = 500;

fn check_length(field: &str, value: &str, (min, max): (usize, usize), problems: &mut Vec<String>) {
    let len = value.chars().count();
    if len < min || len > max {
        problems.push(format!("{field} must be {min}-{max} characters (got {len})"));
    }
}

/// Checks every field and returns the issue in canonical form.
///
/// Text is trimmed, the category and reported priority are rewritten to their
/// canonical names, and `created_at` is normalised to RFC 3339. All failing
/// fields are reported together in one [`Error::Validation`].
pub fn validate_new_issue(issue: &NewIssue) -> Result<NewIssue> {
    let mut problems = Vec::new();

    let title = issue.title.trim().to_string();
    let description = issue.description.trim().to_string();
    let address = issue.address.trim().to_string();
    check_length("title", &title, TITLE_CHARS, &mut problems);
    check_length("description", &description, DESCRIPTION_CHARS, &mut problems);
    if address.chars().count() > ADDRESS_MAX_CHARS {
        problems.push(format!("address must be at most {ADDRESS_MAX_CHARS} characters"));
    }

    if !(-90.0..=90.0).contains(&issue.latitude) {
        problems.push(format!("latitude out of range: {}", issue.latitude));
    }
    if !(-180.0..=180.0).contains(&issue.longitude) {
        problems.push(format!("longitude out of range: {}", issue.longitude));
    }
    if issue.latitude == 0.0 && issue.longitude == 0.0 {
        problems.push("coordinates (0, 0) are not a real location".to_string());
    }

    let category = match issue.category.parse::<Category>() {
        Ok(category) => category.as_str().to_string(),
        Err(err) => {
            problems.push(err);
            String::new()
        }
    };

    let reported_priority = match issue.reported_priority.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<UrgencyLabel>() {
            Ok(label) => Some(label.as_str().to_string()),
            Err(err) => {
                problems.push(err);
                None
            }
        },
    };

    let created_at = match issue.created_at.as_deref() {
        None => None,
        Some(raw) => match parse_timestamp(raw) {
            Some(at) => Some(format_rfc3339(at)),
            None => {
                problems.push(format!("created_at is not a timestamp: {raw}"));
                None
            }
        },
    };

    if let Some(score) = issue.ai_severity_score.filter(|score| !(0.0..=10.0).contains(score)) {
        problems.push(format!("ai_severity_score must be within 0-10 (got {score})"));
    }

    if !problems.is_empty() {
        return Err(Error::Validation(problems.join("; ")));
    }

    Ok(NewIssue {
        title,
        description,
        category,
        reported_priority,
        latitude: issue.latitude,
        longitude: issue.longitude,
        address,
        created_at,
        ai_severity_score: issue.ai_severity_score,
    })
}

/// Coordinates of a validated issue.
pub fn coordinates(issue: &NewIssue) -> Option<Coordinates> {
    Coordinates::checked(issue.latitude, issue.longitude)
}
