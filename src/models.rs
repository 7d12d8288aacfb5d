use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geofence::square_bounds;

#[cfg(test)]
mod tests {
    use super::*;

    fn circle_input(radius_m: f64) -> BoundaryInput {
        BoundaryInput {
            name: "worksite".to_string(),
            shape: "circle".to_string(),
            center_lat: 42.8746,
            center_lon: 74.5698,
            radius_m: Some(radius_m),
            half_size_m: None,
        }
    }

    #[test]
    fn test_size_policy_accepts_range_ends() {
        // [50, 1000] m is inclusive on both ends
        assert!(GeoBoundary::from_input(circle_input(50.0)).is_ok());
        assert!(GeoBoundary::from_input(circle_input(1000.0)).is_ok());
    }

    #[test]
    fn test_size_policy_rejects_out_of_range() {
        assert!(GeoBoundary::from_input(circle_input(49.9)).is_err());
        assert!(GeoBoundary::from_input(circle_input(1000.1)).is_err());
        assert!(GeoBoundary::from_input(circle_input(f64::NAN)).is_err());
    }

    #[test]
    fn test_rejects_non_finite_center() {
        let mut input = circle_input(200.0);
        input.center_lat = f64::NAN;
        assert!(GeoBoundary::from_input(input).is_err());

        let mut input = circle_input(200.0);
        input.center_lon = f64::INFINITY;
        assert!(GeoBoundary::from_input(input).is_err());
    }

    #[test]
    fn test_rejects_missing_size_field() {
        let mut circle = circle_input(200.0);
        circle.radius_m = None;
        assert!(GeoBoundary::from_input(circle).is_err());

        // A square declared with only a radius is equally incomplete
        let mut square = circle_input(200.0);
        square.shape = "square".to_string();
        square.half_size_m = None;
        assert!(GeoBoundary::from_input(square).is_err());
    }

    #[test]
    fn test_rejects_unknown_shape() {
        let mut input = circle_input(200.0);
        input.shape = "hexagon".to_string();
        assert!(GeoBoundary::from_input(input).is_err());
    }

    #[test]
    fn test_square_input_derives_bounds_around_center() {
        let mut input = circle_input(200.0);
        input.shape = "square".to_string();
        input.radius_m = None;
        input.half_size_m = Some(300.0);

        let boundary = GeoBoundary::from_input(input).unwrap();
        match boundary.zone {
            BoundaryZone::Square {
                north,
                south,
                east,
                west,
                ..
            } => {
                assert!(north > boundary.center_lat && south < boundary.center_lat);
                assert!(east > boundary.center_lon && west < boundary.center_lon);
            }
            _ => panic!("expected square"),
        }
    }
}

/// Policy range for boundary size, enforced at creation only.
pub const MIN_BOUNDARY_SIZE_M: f64 = 50.0;
pub const MAX_BOUNDARY_SIZE_M: f64 = 1000.0;

/// Zone geometry, tagged by shape on the wire.
/// Square bounds are derived once at creation, not re-derived per check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum BoundaryZone {
    Circle {
        radius_m: f64,
    },
    Square {
        half_size_m: f64,
        north: f64,
        south: f64,
        east: f64,
        west: f64,
    },
}

/// A named geofence: circular or square zone around a work location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoBoundary {
    pub id: Uuid,
    pub name: String,
    pub center_lat: f64,
    pub center_lon: f64,
    #[serde(flatten)]
    pub zone: BoundaryZone,
}

/// Boundary creation input from API
#[derive(Debug, Deserialize)]
pub struct BoundaryInput {
    pub name: String,
    pub shape: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: Option<f64>,
    pub half_size_m: Option<f64>,
}

impl GeoBoundary {
    /// Validate a creation request and derive square bounds from the center.
    /// Size policy ([50, 1000] m) applies here, never at evaluation time.
    pub fn from_input(input: BoundaryInput) -> Result<Self, String> {
        if !input.center_lat.is_finite() || !input.center_lon.is_finite() {
            return Err("center coordinates must be finite".to_string());
        }

        let zone = match input.shape.as_str() {
            "circle" => {
                let radius_m = input
                    .radius_m
                    .ok_or_else(|| "circle boundary requires radius_m".to_string())?;
                check_size_policy(radius_m)?;
                BoundaryZone::Circle { radius_m }
            }
            "square" => {
                let half_size_m = input
                    .half_size_m
                    .ok_or_else(|| "square boundary requires half_size_m".to_string())?;
                check_size_policy(half_size_m)?;
                let (north, south, east, west) =
                    square_bounds(input.center_lat, input.center_lon, half_size_m);
                BoundaryZone::Square {
                    half_size_m,
                    north,
                    south,
                    east,
                    west,
                }
            }
            other => return Err(format!("unknown boundary shape: {}", other)),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            name: input.name,
            center_lat: input.center_lat,
            center_lon: input.center_lon,
            zone,
        })
    }
}

fn check_size_policy(size_m: f64) -> Result<(), String> {
    if !size_m.is_finite() || size_m < MIN_BOUNDARY_SIZE_M || size_m > MAX_BOUNDARY_SIZE_M {
        return Err(format!(
            "boundary size must be between {} and {} meters",
            MIN_BOUNDARY_SIZE_M, MAX_BOUNDARY_SIZE_M
        ));
    }
    Ok(())
}

/// One GPS sample in a work session's route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub recorded_at: DateTime<Utc>,
}

impl TrackPoint {
    /// One bad GPS sample must never invalidate a whole session,
    /// so callers skip non-finite points instead of failing.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    Exit,
    NeverEntered,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Exit => "exit",
            ViolationKind::NeverEntered => "never-entered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exit" => Some(ViolationKind::Exit),
            "never-entered" => Some(ViolationKind::NeverEntered),
            _ => None,
        }
    }
}

/// A detected out-of-zone event. Emitted by the evaluator, persisted by
/// the HTTP layer, never mutated after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub session_id: String,
    pub boundary_id: Uuid,
    pub kind: ViolationKind,
    /// Always measured from the boundary center, even for squares.
    pub distance_m: f64,
    pub at: DateTime<Utc>,
}

/// Aggregate over one session's ordered route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStatistics {
    pub total_distance_m: f64,
    pub time_in_zone_min: f64,
    pub time_out_zone_min: f64,
    pub gps_point_count: usize,
}

impl RouteStatistics {
    pub fn zero() -> Self {
        Self {
            total_distance_m: 0.0,
            time_in_zone_min: 0.0,
            time_out_zone_min: 0.0,
            gps_point_count: 0,
        }
    }
}

/// Full evaluation output for one session.
/// `boundary_present: false` marks an unmonitored session so downstream
/// consumers never read "no geofence configured" as verified compliance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteReport {
    pub boundary_present: bool,
    pub statistics: RouteStatistics,
    pub violations: Vec<ViolationEvent>,
    pub skipped_point_count: usize,
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}
