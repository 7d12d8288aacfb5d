use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

mod geofence;
mod models;
mod store;

use geofence::evaluate_route;
use models::{ApiResponse, BoundaryInput, GeoBoundary, RouteReport, TrackPoint};
use store::Store;

/// Geofence evaluation HTTP API
/// Track points are append-only; reports are derived fresh per query
/// from the stored route, never cached
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<Store>>,
}

#[tokio::main]
async fn main() {
    // Initialize state
    let store = Store::open(std::path::Path::new("geofence.db")).unwrap();
    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/boundaries", post(create_boundary))
        .route("/boundaries", get(list_boundaries))
        .route("/sessions/:session_id/points", post(append_points))
        .route("/sessions/:session_id/report", get(session_report))
        .route("/sessions/:session_id/violations", get(list_violations))
        .route("/evaluate", post(evaluate))
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
    println!("🚀 Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn root() -> &'static str {
    "Geofence Evaluator API v0.1.0"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Create a new boundary
/// Size policy and square-bound derivation happen here, once
async fn create_boundary(
    State(state): State<AppState>,
    Json(input): Json<BoundaryInput>,
) -> Result<Json<ApiResponse>, StatusCode> {
    let boundary = match GeoBoundary::from_input(input) {
        Ok(boundary) => boundary,
        Err(e) => {
            eprintln!("Rejected boundary: {}", e);
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    };

    let store = lock_store(&state)?;
    match store.insert_boundary(&boundary) {
        Ok(_) => Ok(Json(ApiResponse {
            status: "success".to_string(),
            message: format!("Boundary created: {}", boundary.name),
            data: Some(serde_json::json!({ "boundary": boundary })),
        })),
        Err(e) => {
            eprintln!("Error writing boundary: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// List all boundaries (read-only)
async fn list_boundaries(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let store = lock_store(&state)?;
    match store.list_boundaries() {
        Ok(boundaries) => Ok(Json(serde_json::json!({
            "boundaries": boundaries,
            "count": boundaries.len(),
        }))),
        Err(e) => {
            eprintln!("Error reading boundaries: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PointsBatch {
    points: Vec<TrackPoint>,
}

/// Append GPS samples to a session's route (append-only, never edit)
/// A non-finite sample is rejected individually, not the whole batch
async fn append_points(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(batch): Json<PointsBatch>,
) -> Result<Json<ApiResponse>, StatusCode> {
    let (valid, rejected): (Vec<TrackPoint>, Vec<TrackPoint>) =
        batch.points.into_iter().partition(|p| p.is_valid());

    let mut store = lock_store(&state)?;
    match store.append_points(&session_id, &valid) {
        Ok(accepted) => Ok(Json(ApiResponse {
            status: "success".to_string(),
            message: format!("Appended {} points to session {}", accepted, session_id),
            data: Some(serde_json::json!({
                "session_id": session_id,
                "accepted": accepted,
                "rejected": rejected.len(),
            })),
        })),
        Err(e) => {
            eprintln!("Error writing points: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    boundary: Option<Uuid>,
}

/// Evaluate a session's stored route against a boundary and persist
/// any violations found. The report itself is never stored.
async fn session_report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<ReportParams>,
) -> Result<Json<RouteReport>, StatusCode> {
    let mut store = lock_store(&state)?;

    let boundary = match params.boundary {
        Some(id) => match store.get_boundary(id) {
            Ok(Some(boundary)) => Some(boundary),
            Ok(None) => return Err(StatusCode::NOT_FOUND),
            Err(e) => {
                eprintln!("Error reading boundary: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        },
        None => None,
    };

    let points = match store.points_for_session(&session_id) {
        Ok(points) => points,
        Err(e) => {
            eprintln!("Error reading route: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let report = evaluate_route(boundary.as_ref(), &points, &session_id);

    // Replace, don't append: re-querying an unchanged route must not
    // duplicate its violations in the history
    if let Some(boundary) = &boundary {
        if let Err(e) = store.replace_violations(&session_id, boundary.id, &report.violations) {
            eprintln!("Error writing violations: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    Ok(Json(report))
}

/// List a session's persisted violations (read-only)
async fn list_violations(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let store = lock_store(&state)?;
    match store.violations_for_session(&session_id) {
        Ok(violations) => Ok(Json(serde_json::json!({
            "session_id": session_id,
            "violations": violations,
            "count": violations.len(),
        }))),
        Err(e) => {
            eprintln!("Error reading violations: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    session_id: String,
    boundary: Option<BoundaryInput>,
    points: Vec<TrackPoint>,
}

/// Stateless evaluation of a boundary + point batch from the request
/// body. Nothing is persisted; batch callers run one session per call.
async fn evaluate(
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<RouteReport>, StatusCode> {
    let boundary = match request.boundary {
        Some(input) => match GeoBoundary::from_input(input) {
            Ok(boundary) => Some(boundary),
            Err(e) => {
                eprintln!("Rejected boundary: {}", e);
                return Err(StatusCode::UNPROCESSABLE_ENTITY);
            }
        },
        None => None,
    };

    let report = evaluate_route(boundary.as_ref(), &request.points, &request.session_id);
    Ok(Json(report))
}

// Helper functions

fn lock_store(state: &AppState) -> Result<MutexGuard<'_, Store>, StatusCode> {
    state.store.lock().map_err(|_| {
        eprintln!("Store lock poisoned");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
