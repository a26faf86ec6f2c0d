//! Great-circle distance and co-location duplicate detection.

use crate::rules::DuplicateRules;
use crate::schema::{Coordinates, IssueSnapshot, IssueStatus};
use std::collections::BTreeSet;
use std::f64::consts::PI;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

impl Coordinates {
    /// Returns `None` for out-of-range, non-finite, or the `(0, 0)` "no location" sentinel.
    pub fn checked(latitude: f64, longitude: f64) -> Option<Self> {
        let coords = Self { latitude, longitude };
        coords.is_valid().then_some(coords)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Haversine distance between two points in meters.
pub fn haversine_distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let to_rad = |deg: f64| deg * PI / 180.0;

    let dlat = to_rad(b.latitude - a.latitude);
    let dlng = to_rad(b.longitude - a.longitude);

    let h = (dlat / 2.0).sin().powi(2)
        + to_rad(a.latitude).cos() * to_rad(b.latitude).cos() * (dlng / 2.0).sin().powi(2);

    // clamp guards against h drifting a hair above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}

/// Lat/lng rectangle that contains every point within `radius_meters` of a centre.
///
/// Used as an indexed prefilter before the exact haversine check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn around(center: Coordinates, radius_meters: f64) -> Self {
        // pad by 10% so rounding never drops a point sitting on the radius
        let padded = radius_meters * 1.1;
        let dlat = padded / METERS_PER_DEGREE_LAT;
        let min_lat = center.latitude - dlat;
        let max_lat = center.latitude + dlat;

        let cos_lat = center.latitude.to_radians().cos();
        let full_width = min_lat <= -90.0 || max_lat >= 90.0 || cos_lat < 1e-6;
        let dlng = if full_width {
            180.0
        } else {
            padded / (METERS_PER_DEGREE_LAT * cos_lat)
        };
        let (min_lng, max_lng) = if full_width
            || center.longitude - dlng < -180.0
            || center.longitude + dlng > 180.0
        {
            // the antimeridian case just widens to every longitude
            (-180.0, 180.0)
        } else {
            (center.longitude - dlng, center.longitude + dlng)
        };

        Self {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            min_lng,
            max_lng,
        }
    }

    pub fn contains(&self, point: Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lng..=self.max_lng).contains(&point.longitude)
    }
}

/// Another issue considered during the duplicate scan.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyCandidate {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: IssueStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateReport {
    pub score: f64,
    pub duplicate_count: usize,
    pub duplicate_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    rules: DuplicateRules,
}

impl DuplicateDetector {
    pub fn new(rules: DuplicateRules) -> Self {
        Self { rules }
    }

    pub fn radius_meters(&self) -> f64 {
        self.rules.radius_meters
    }

    /// Counts distinct duplicates of `issue` and maps the count to a factor score.
    ///
    /// A duplicate is an open candidate with valid coordinates inside the radius,
    /// or any issue in `linked_ids`. Issues in both sets are counted once. An
    /// issue without valid coordinates only picks up linked duplicates.
    pub fn find_nearby_duplicates(
        &self,
        issue: &IssueSnapshot,
        candidates: &[NearbyCandidate],
        linked_ids: &[String],
    ) -> DuplicateReport {
        let mut ids: BTreeSet<&str> = BTreeSet::new();

        if let Some(origin) = issue.coordinates.filter(Coordinates::is_valid) {
            for candidate in candidates {
                if candidate.id == issue.id || candidate.status != IssueStatus::Open {
                    continue;
                }
                let Some(point) = Coordinates::checked(candidate.latitude, candidate.longitude) else {
                    continue;
                };
                if haversine_distance_meters(origin, point) <= self.rules.radius_meters {
                    ids.insert(candidate.id.as_str());
                }
            }
        }

        for linked in linked_ids {
            if *linked != issue.id {
                ids.insert(linked.as_str());
            }
        }

        let duplicate_count = ids.len();
        DuplicateReport {
            score: self.score_for_count(duplicate_count),
            duplicate_count,
            duplicate_ids: ids.into_iter().map(str::to_string).collect(),
        }
    }

    /// Monotonic step function from duplicate count to a 0-10 score.
    pub fn score_for_count(&self, count: usize) -> f64 {
        self.rules
            .steps
            .iter()
            .find(|step| count <= step.max_count)
            .map(|step| step.score)
            .unwrap_or(self.rules.overflow_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates { latitude, longitude }
    }

    fn snapshot(id: &str, coords: Option<Coordinates>) -> IssueSnapshot {
        IssueSnapshot {
            id: id.to_string(),
            title: String::new(),
            description: String::new(),
            category: None,
            coordinates: coords,
            address: String::new(),
            created_at: String::new(),
            ai_severity_score: None,
            citizen_vote_average: None,
        }
    }

    fn candidate(id: &str, lat: f64, lng: f64, status: IssueStatus) -> NearbyCandidate {
        NearbyCandidate {
            id: id.to_string(),
            latitude: lat,
            longitude: lng,
            status,
        }
    }

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(DuplicateRules::default())
    }

    #[test]
    fn test_haversine_meters() {
        let d = haversine_distance_meters(at(44.9778, -93.2650), at(44.9537, -93.0900));
        assert!(d > 10_000.0 && d < 20_000.0, "Expected ~14km, got {d}m");
    }

    #[test]
    fn test_haversine_symmetric() {
        let pairs = [
            (at(17.385, 78.4867), at(17.3855, 78.4871)),
            (at(-33.86, 151.21), at(51.5, -0.12)),
            (at(89.9, 10.0), at(-89.9, -170.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(haversine_distance_meters(a, b), haversine_distance_meters(b, a));
        }
    }

    #[test]
    fn test_zero_distance() {
        let p = at(12.97, 77.59);
        assert_eq!(haversine_distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_sentinel_is_not_a_location() {
        assert!(Coordinates::checked(0.0, 0.0).is_none());
        assert!(Coordinates::checked(91.0, 0.0).is_none());
        assert!(Coordinates::checked(f64::NAN, 1.0).is_none());
        assert!(Coordinates::checked(0.0, 1.0).is_some());
    }

    #[test]
    fn test_step_function() {
        let d = detector();
        let expected = [(0, 1.0), (1, 3.0), (2, 3.0), (3, 6.0), (5, 6.0), (6, 8.0), (10, 8.0), (11, 10.0), (500, 10.0)];
        for (count, score) in expected {
            assert_eq!(d.score_for_count(count), score, "count {count}");
        }
    }

    #[test]
    fn test_counts_open_issues_within_radius() {
        let origin = at(17.3850, 78.4867);
        let candidates = vec![
            // ~55m north
            candidate("near", 17.3855, 78.4867, IssueStatus::Open),
            // ~55m north but resolved
            candidate("resolved", 17.3855, 78.4867, IssueStatus::Resolved),
            // ~1.1km away
            candidate("far", 17.3950, 78.4867, IssueStatus::Open),
            candidate("sentinel", 0.0, 0.0, IssueStatus::Open),
            candidate("self", 17.3850, 78.4867, IssueStatus::Open),
        ];
        let report = detector().find_nearby_duplicates(&snapshot("self", Some(origin)), &candidates, &[]);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(report.duplicate_ids, vec!["near".to_string()]);
        assert_eq!(report.score, 3.0);
    }

    #[test]
    fn test_pair_within_radius_counts_each_other() {
        let a = candidate("a", 40.7128, -74.0060, IssueStatus::Open);
        let b = candidate("b", 40.7135, -74.0060, IssueStatus::Open);
        let all = vec![a.clone(), b.clone()];
        let d = detector();
        let from_a = d.find_nearby_duplicates(&snapshot("a", Some(at(a.latitude, a.longitude))), &all, &[]);
        let from_b = d.find_nearby_duplicates(&snapshot("b", Some(at(b.latitude, b.longitude))), &all, &[]);
        assert_eq!(from_a.duplicate_ids, vec!["b".to_string()]);
        assert_eq!(from_b.duplicate_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_coordinates_skip_scan_but_keep_links() {
        let candidates = vec![candidate("near", 0.0001, 0.0001, IssueStatus::Open)];
        let linked = vec!["linked".to_string()];
        let report = detector().find_nearby_duplicates(&snapshot("x", Some(at(0.0, 0.0))), &candidates, &linked);
        assert_eq!(report.duplicate_count, 1);
        assert_eq!(report.duplicate_ids, vec!["linked".to_string()]);
    }

    #[test]
    fn test_linked_and_nearby_count_once() {
        let origin = at(17.3850, 78.4867);
        let candidates = vec![candidate("near", 17.3855, 78.4867, IssueStatus::Open)];
        let linked = vec!["near".to_string(), "other".to_string()];
        let report = detector().find_nearby_duplicates(&snapshot("x", Some(origin)), &candidates, &linked);
        assert_eq!(report.duplicate_count, 2);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let center = at(51.5, -0.12);
        let bbox = BoundingBox::around(center, 100.0);
        // ~99m east at this latitude
        let east = at(51.5, -0.12 + 99.0 / (111_320.0 * 51.5f64.to_radians().cos()));
        assert!(bbox.contains(east));
        assert!(!bbox.contains(at(51.51, -0.12)));
    }

    #[test]
    fn test_bounding_box_wraps_at_antimeridian() {
        let bbox = BoundingBox::around(at(10.0, 179.9999), 100.0);
        assert_eq!((bbox.min_lng, bbox.max_lng), (-180.0, 180.0));
    }
}
