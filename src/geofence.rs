use crate::models::{
    BoundaryZone, GeoBoundary, RouteReport, RouteStatistics, TrackPoint, ViolationEvent,
    ViolationKind,
};


/// Mean Earth radius for the spherical model, meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Flat-earth approximation constant: meters per degree of latitude.
/// Good enough at sub-kilometer geofence scales, wrong near the poles.
const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Great-circle distance between two coordinates (haversine).
/// NaN input propagates; callers reject non-finite coordinates first.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Derive (north, south, east, west) bounds for a square zone from its
/// center and half-size. Longitude degrees shrink with latitude.
pub fn square_bounds(center_lat: f64, center_lon: f64, half_size_m: f64) -> (f64, f64, f64, f64) {
    let lat_delta = half_size_m / METERS_PER_DEGREE_LAT;
    let lon_delta = half_size_m / (METERS_PER_DEGREE_LAT * center_lat.to_radians().cos());
    (
        center_lat + lat_delta,
        center_lat - lat_delta,
        center_lon + lon_delta,
        center_lon - lon_delta,
    )
}

/// Containment check. Circle edge is inclusive; square bounds were
/// precomputed at creation, so this is a plain interval test.
pub fn is_inside(boundary: &GeoBoundary, lat: f64, lon: f64) -> bool {
    match boundary.zone {
        BoundaryZone::Circle { radius_m } => {
            distance_meters(boundary.center_lat, boundary.center_lon, lat, lon) <= radius_m
        }
        BoundaryZone::Square {
            north,
            south,
            east,
            west,
            ..
        } => lat >= south && lat <= north && lon >= west && lon <= east,
    }
}

/// Aggregate distance and in/out time over an ordered route.
///
/// Each consecutive pair forms a segment; the EARLIER point's containment
/// decides whether the segment's duration counts as in-zone or out
/// (tie-break convention, no crossing split). With no boundary all time
/// counts as in-zone; the caller surfaces that via `boundary_present`.
pub fn aggregate_route(boundary: Option<&GeoBoundary>, points: &[TrackPoint]) -> RouteStatistics {
    let valid: Vec<&TrackPoint> = points.iter().filter(|p| p.is_valid()).collect();

    let mut stats = RouteStatistics::zero();
    stats.gps_point_count = valid.len();

    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);

        stats.total_distance_m += distance_meters(a.lat, a.lon, b.lat, b.lon);

        // Negative deltas clamp to zero rather than crash; chronological
        // ordering is the caller's job
        let minutes =
            ((b.recorded_at - a.recorded_at).num_milliseconds() as f64 / 60_000.0).max(0.0);

        let inside = boundary.map_or(true, |zone| is_inside(zone, a.lat, a.lon));
        if inside {
            stats.time_in_zone_min += minutes;
        } else {
            stats.time_out_zone_min += minutes;
        }
    }

    stats
}

/// One exit event per out-of-zone point, no debouncing of continuous
/// excursions. Distance is measured from the boundary center for both
/// shapes. Bucketing is the caller's policy decision.
pub fn detect_violations(
    boundary: &GeoBoundary,
    points: &[TrackPoint],
    session_id: &str,
) -> Vec<ViolationEvent> {
    points
        .iter()
        .filter(|p| p.is_valid())
        .filter(|p| !is_inside(boundary, p.lat, p.lon))
        .map(|p| ViolationEvent {
            session_id: session_id.to_string(),
            boundary_id: boundary.id,
            kind: ViolationKind::Exit,
            distance_m: distance_meters(boundary.center_lat, boundary.center_lon, p.lat, p.lon),
            at: p.recorded_at,
        })
        .collect()
}

/// Combined entry point for the HTTP layer: statistics, violations,
/// skipped-point count and the boundary-present flag in one result.
///
/// If no valid point ever fell inside the zone, the session never
/// entered at all and its violations are reclassified accordingly.
pub fn evaluate_route(
    boundary: Option<&GeoBoundary>,
    points: &[TrackPoint],
    session_id: &str,
) -> RouteReport {
    let skipped_point_count = points.iter().filter(|p| !p.is_valid()).count();

    let statistics = aggregate_route(boundary, points);
    let mut violations = match boundary {
        Some(b) => detect_violations(b, points, session_id),
        None => Vec::new(),
    };

    if let Some(b) = boundary {
        let entered = points
            .iter()
            .filter(|p| p.is_valid())
            .any(|p| is_inside(b, p.lat, p.lon));
        if !entered {
            for v in &mut violations {
                v.kind = ViolationKind::NeverEntered;
            }
        }
    }

    RouteReport {
        boundary_present: boundary.is_some(),
        statistics,
        violations,
        skipped_point_count,
    }
}
