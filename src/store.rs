use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::{BoundaryZone, GeoBoundary, TrackPoint, ViolationEvent, ViolationKind};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn open_temp() -> (NamedTempFile, Store) {
        let file = NamedTempFile::new().unwrap();
        let store = Store::open(file.path()).unwrap();
        (file, store)
    }

    fn circle(name: &str) -> GeoBoundary {
        GeoBoundary {
            id: Uuid::new_v4(),
            name: name.to_string(),
            center_lat: 42.8746,
            center_lon: 74.5698,
            zone: BoundaryZone::Circle { radius_m: 200.0 },
        }
    }

    #[test]
    fn test_boundary_roundtrip() {
        let (_file, store) = open_temp();
        let boundary = circle("factory");
        store.insert_boundary(&boundary).unwrap();

        let loaded = store.get_boundary(boundary.id).unwrap().unwrap();
        assert_eq!(loaded.name, "factory");
        assert_eq!(loaded.center_lat, 42.8746);
        match loaded.zone {
            BoundaryZone::Circle { radius_m } => assert_eq!(radius_m, 200.0),
            _ => panic!("expected circle"),
        }
    }

    #[test]
    fn test_square_boundary_keeps_derived_bounds() {
        let (_file, store) = open_temp();
        let boundary = GeoBoundary {
            id: Uuid::new_v4(),
            name: "yard".to_string(),
            center_lat: 42.8746,
            center_lon: 74.5698,
            zone: BoundaryZone::Square {
                half_size_m: 300.0,
                north: 42.8773,
                south: 42.8719,
                east: 74.5735,
                west: 74.5661,
            },
        };
        store.insert_boundary(&boundary).unwrap();

        let loaded = store.get_boundary(boundary.id).unwrap().unwrap();
        match loaded.zone {
            BoundaryZone::Square { north, west, .. } => {
                assert_eq!(north, 42.8773);
                assert_eq!(west, 74.5661);
            }
            _ => panic!("expected square"),
        }
    }

    #[test]
    fn test_points_append_only_and_ordered() {
        let (_file, mut store) = open_temp();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        // Insert out of chronological order across two batches
        let late = TrackPoint {
            lat: 42.88,
            lon: 74.57,
            recorded_at: start + Duration::minutes(10),
        };
        let early = TrackPoint {
            lat: 42.87,
            lon: 74.57,
            recorded_at: start,
        };
        store.append_points("s1", &[late]).unwrap();
        store.append_points("s1", &[early]).unwrap();

        let points = store.points_for_session("s1").unwrap();
        assert_eq!(points.len(), 2);
        assert!(points[0].recorded_at < points[1].recorded_at);

        // Other sessions stay separate
        assert!(store.points_for_session("s2").unwrap().is_empty());
    }

    #[test]
    fn test_violation_roundtrip() {
        let (_file, mut store) = open_temp();
        let boundary_id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();

        let events = vec![ViolationEvent {
            session_id: "s1".to_string(),
            boundary_id,
            kind: ViolationKind::NeverEntered,
            distance_m: 512.5,
            at,
        }];
        store.replace_violations("s1", boundary_id, &events).unwrap();

        let loaded = store.violations_for_session("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].kind, ViolationKind::NeverEntered);
        assert_eq!(loaded[0].distance_m, 512.5);
        assert_eq!(loaded[0].boundary_id, boundary_id);
    }

    #[test]
    fn test_rerunning_a_report_does_not_duplicate_violations() {
        // The report endpoint re-evaluates the stored route on every
        // query; persisting the same result twice must not inflate the
        // violation history.
        let (_file, mut store) = open_temp();
        let boundary_id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();

        let events = vec![ViolationEvent {
            session_id: "s1".to_string(),
            boundary_id,
            kind: ViolationKind::Exit,
            distance_m: 900.0,
            at,
        }];
        store.replace_violations("s1", boundary_id, &events).unwrap();
        store.replace_violations("s1", boundary_id, &events).unwrap();

        let loaded = store.violations_for_session("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].distance_m, 900.0);
    }

    #[test]
    fn test_replacement_only_touches_its_own_pair() {
        let (_file, mut store) = open_temp();
        let boundary_a = Uuid::new_v4();
        let boundary_b = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();

        let event = |boundary_id| ViolationEvent {
            session_id: "s1".to_string(),
            boundary_id,
            kind: ViolationKind::Exit,
            distance_m: 700.0,
            at,
        };
        store
            .replace_violations("s1", boundary_a, &[event(boundary_a)])
            .unwrap();
        store
            .replace_violations("s1", boundary_b, &[event(boundary_b)])
            .unwrap();

        // A rerun against boundary_b leaves boundary_a's rows alone
        store
            .replace_violations("s1", boundary_b, &[event(boundary_b)])
            .unwrap();

        let loaded = store.violations_for_session("s1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|v| v.boundary_id == boundary_a));
        assert!(loaded.iter().any(|v| v.boundary_id == boundary_b));
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS boundaries (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    shape       TEXT NOT NULL,
    center_lat  REAL NOT NULL,
    center_lon  REAL NOT NULL,
    radius_m    REAL,
    half_size_m REAL,
    north       REAL,
    south       REAL,
    east        REAL,
    west        REAL
);
CREATE TABLE IF NOT EXISTS track_points (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    lat         REAL NOT NULL,
    lon         REAL NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_track_points_session
    ON track_points (session_id, recorded_at);
CREATE TABLE IF NOT EXISTS violations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    boundary_id TEXT NOT NULL,
    kind        TEXT NOT NULL,
    distance_m  REAL NOT NULL,
    occurred_at TEXT NOT NULL
);
";

/// SQLite store behind the HTTP layer: boundary records, append-only
/// track points per session, and persisted violation rows.
/// The evaluator itself never touches this.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn insert_boundary(&self, boundary: &GeoBoundary) -> rusqlite::Result<()> {
        let (shape, radius_m, half_size_m, north, south, east, west) = match boundary.zone {
            BoundaryZone::Circle { radius_m } => {
                ("circle", Some(radius_m), None, None, None, None, None)
            }
            BoundaryZone::Square {
                half_size_m,
                north,
                south,
                east,
                west,
            } => (
                "square",
                None,
                Some(half_size_m),
                Some(north),
                Some(south),
                Some(east),
                Some(west),
            ),
        };

        self.conn.execute(
            "INSERT INTO boundaries
             (id, name, shape, center_lat, center_lon, radius_m, half_size_m, north, south, east, west)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                boundary.id.to_string(),
                boundary.name,
                shape,
                boundary.center_lat,
                boundary.center_lon,
                radius_m,
                half_size_m,
                north,
                south,
                east,
                west,
            ],
        )?;
        Ok(())
    }

    pub fn get_boundary(&self, id: Uuid) -> rusqlite::Result<Option<GeoBoundary>> {
        self.conn
            .query_row(
                "SELECT id, name, shape, center_lat, center_lon,
                        radius_m, half_size_m, north, south, east, west
                 FROM boundaries WHERE id = ?1",
                params![id.to_string()],
                boundary_from_row,
            )
            .optional()
    }

    pub fn list_boundaries(&self) -> rusqlite::Result<Vec<GeoBoundary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, shape, center_lat, center_lon,
                    radius_m, half_size_m, north, south, east, west
             FROM boundaries ORDER BY name",
        )?;
        let rows = stmt.query_map([], boundary_from_row)?;
        rows.collect()
    }

    /// Append a batch of samples to a session's route. Append-only by
    /// construction: there is no update or delete path for track points.
    pub fn append_points(
        &mut self,
        session_id: &str,
        points: &[TrackPoint],
    ) -> rusqlite::Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO track_points (session_id, lat, lon, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for point in points {
                stmt.execute(params![session_id, point.lat, point.lon, point.recorded_at])?;
            }
        }
        tx.commit()?;
        Ok(points.len())
    }

    /// Read a session's route in chronological order. Aggregation depends
    /// on consecutive-pair differencing, so the order matters here.
    pub fn points_for_session(&self, session_id: &str) -> rusqlite::Result<Vec<TrackPoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT lat, lon, recorded_at FROM track_points
             WHERE session_id = ?1 ORDER BY recorded_at, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(TrackPoint {
                lat: row.get(0)?,
                lon: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Persist one report run's violations for a (session, boundary) pair,
    /// replacing whatever an earlier run stored for that pair. Re-running a
    /// report over an unchanged route leaves the history unchanged; events
    /// themselves are still never mutated, only superseded as a set.
    pub fn replace_violations(
        &mut self,
        session_id: &str,
        boundary_id: Uuid,
        events: &[ViolationEvent],
    ) -> rusqlite::Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM violations WHERE session_id = ?1 AND boundary_id = ?2",
            params![session_id, boundary_id.to_string()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO violations (session_id, boundary_id, kind, distance_m, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.session_id,
                    event.boundary_id.to_string(),
                    event.kind.as_str(),
                    event.distance_m,
                    event.at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn violations_for_session(&self, session_id: &str) -> rusqlite::Result<Vec<ViolationEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, boundary_id, kind, distance_m, occurred_at
             FROM violations WHERE session_id = ?1 ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(ViolationEvent {
                session_id: row.get(0)?,
                boundary_id: parse_uuid(row, 1)?,
                kind: parse_kind(row, 2)?,
                distance_m: row.get(3)?,
                at: row.get(4)?,
            })
        })?;
        rows.collect()
    }
}

fn boundary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeoBoundary> {
    let shape: String = row.get(2)?;
    let zone = match shape.as_str() {
        "circle" => BoundaryZone::Circle {
            radius_m: row.get(5)?,
        },
        "square" => BoundaryZone::Square {
            half_size_m: row.get(6)?,
            north: row.get(7)?,
            south: row.get(8)?,
            east: row.get(9)?,
            west: row.get(10)?,
        },
        other => {
            return Err(conversion_error(2, format!("unknown shape: {}", other)));
        }
    };

    Ok(GeoBoundary {
        id: parse_uuid(row, 0)?,
        name: row.get(1)?,
        center_lat: row.get(3)?,
        center_lon: row.get(4)?,
        zone,
    })
}

fn parse_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_kind(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<ViolationKind> {
    let raw: String = row.get(idx)?;
    ViolationKind::parse(&raw)
        .ok_or_else(|| conversion_error(idx, format!("unknown violation kind: {}", raw)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
