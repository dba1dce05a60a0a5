//! Request handlers for the API endpoints.
//!
//! Every handler runs its node calls on tokio's blocking pool: proxy and
//! driver-backed batteries block on I/O for a full round trip.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use tokio::task;

use super::AppState;
use super::types::{ApiError, CurrentRequest};
use crate::bos::Bos;
use crate::policy::PolicyReport;
use crate::telemetry::{self, StatusRow};

/// Runs `f` against the node on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Bos) -> crate::error::Result<T> + Send + 'static,
{
    let bos = state.bos.clone();
    Ok(task::spawn_blocking(move || f(&bos)).await??)
}

/// `GET /batteries` → 200 + `Vec<StatusRow>` JSON
pub async fn list_batteries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<StatusRow>>, ApiError> {
    let rows = blocking(&state, |bos| Ok(telemetry::snapshot(bos))).await?;
    Ok(Json(rows))
}

/// `GET /batteries/{name}` → 200 + `StatusRow`, 404 for unknown names
pub async fn get_battery(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<StatusRow>, ApiError> {
    let row = blocking(&state, move |bos| telemetry::status_row(bos, &name)).await?;
    Ok(Json(row))
}

/// Sets the current and returns the status read back afterwards.
///
/// `POST /batteries/{name}/current` → 200 + `StatusRow`
/// Out-of-range currents → 400, exhausted partitions → 422
pub async fn set_current(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<CurrentRequest>,
) -> Result<Json<StatusRow>, ApiError> {
    let row = blocking(&state, move |bos| {
        bos.set_current(&name, req.current)?;
        telemetry::status_row(bos, &name)
    })
    .await?;
    Ok(Json(row))
}

/// `POST /batteries/{name}/refresh` → 200 + `StatusRow`
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<StatusRow>, ApiError> {
    let row = blocking(&state, move |bos| {
        bos.refresh(&name)?;
        telemetry::status_row(bos, &name)
    })
    .await?;
    Ok(Json(row))
}

/// `GET /policies/{name}` → 200 + `PolicyReport`
pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<PolicyReport>, ApiError> {
    let report = blocking(&state, move |bos| bos.policy_report(&name)).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::battery::BatteryStatus;
    use crate::bos::Bos;
    use crate::clock::DummyClock;
    use crate::net::NodeServer;
    use crate::policy::PolicyKind;

    fn make_test_state() -> Arc<AppState> {
        let (_clock, shared) = DummyClock::shared(0.0);
        let bos = Bos::with_clock(shared, Duration::from_secs(1));
        bos.make_pseudo("a", BatteryStatus::new(7000.0, 0.0, 500.0, 1000.0, 12.0, 12.0))
            .unwrap();
        bos.make_splitter_policy("split", PolicyKind::Proportional, "a", Some("a0"))
            .unwrap();
        Arc::new(AppState { bos: Arc::new(bos) })
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_current(name: &str, current: f64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/batteries/{name}/current"))
            .header("content-type", "application/json")
            .body(Body::from(format!("{{\"current\": {current}}}")))
            .unwrap()
    }

    #[tokio::test]
    async fn batteries_lists_every_battery() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/batteries")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["name"].as_str())
            .collect();
        assert_eq!(names, vec!["a", "a0"]);
    }

    #[tokio::test]
    async fn unknown_battery_returns_404() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/batteries/ghost")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn set_current_drives_the_partition() {
        let state = make_test_state();
        let resp = router(state.clone())
            .oneshot(post_current("a0", 3.0))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["current"], 3.0);
        assert_eq!(state.bos.get_status("a").unwrap().current, 3.0);
    }

    #[tokio::test]
    async fn out_of_range_current_returns_400() {
        let resp = router(make_test_state())
            .oneshot(post_current("a0", 50.0))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn policy_report_lists_parts() {
        let app = router(make_test_state());
        let req = Request::builder()
            .uri("/policies/split")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["source"], "a");
        assert_eq!(json["parts"][0]["name"], "a0");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn proxy_reads_run_off_the_runtime_thread() {
        let (_remote_clock, remote_shared) = DummyClock::shared(0.0);
        let remote = Bos::with_clock(remote_shared, Duration::from_secs(1));
        remote
            .make_pseudo("pack", BatteryStatus::new(7000.0, 0.0, 300.0, 1000.0, 12.0, 12.0))
            .unwrap();
        let server = NodeServer::bind("127.0.0.1:0", Arc::new(remote))
            .unwrap()
            .spawn()
            .unwrap();

        let state = make_test_state();
        state
            .bos
            .make_network("proxy", "pack", server.local_addr())
            .unwrap();

        let resp = router(state.clone())
            .oneshot(post_current("proxy", 2.0))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "network");
        assert_eq!(json["current"], 2.0);
        assert_eq!(json["state_of_charge"], 300.0);

        server.shutdown().unwrap();
    }

    #[tokio::test]
    async fn refresh_returns_status() {
        let app = router(make_test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/batteries/a/refresh")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["state_of_charge"], 500.0);
    }
}
