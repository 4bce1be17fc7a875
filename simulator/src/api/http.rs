use axum::{
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use raffle_types::{ChannelName, ParticipantPresence, RaffleId, RecordPatch};
use serde::Serialize;
use std::sync::Arc;

use crate::{Simulator, StoreError};

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
    channels: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub(super) async fn healthz(AxumState(simulator): AxumState<Arc<Simulator>>) -> impl IntoResponse {
    Json(HealthzResponse {
        ok: true,
        channels: simulator.bus().channel_count(),
    })
}

pub(super) async fn get_record(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(id): Path<u64>,
) -> Response {
    match simulator.store().fetch_one(RaffleId(id)).await {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, StoreError::NotFound(RaffleId(id))),
    }
}

pub(super) async fn update_record(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(id): Path<u64>,
    Json(patch): Json<RecordPatch>,
) -> Response {
    match simulator.store().update_where(RaffleId(id), &patch).await {
        Ok(record) => Json(record).into_response(),
        Err(err @ StoreError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, err),
        Err(err @ StoreError::InvalidPatch(_)) => {
            tracing::warn!(raffle = id, ?patch, "rejected record patch: {err}");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err)
        }
    }
}

pub(super) async fn channel_presence(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(name): Path<String>,
) -> Json<Vec<ParticipantPresence>> {
    Json(simulator.bus().presence(&ChannelName::new(name)))
}

#[cfg(test)]
mod tests {
    use crate::{Api, Simulator, SimulatorConfig};
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use raffle_types::{RaffleRecord, RaffleState};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> axum::Router {
        Api::new(Arc::new(Simulator::new(SimulatorConfig::default()))).router()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn patch(id: u64, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::PATCH)
            .uri(format!("/records/{id}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_record() {
        let response = router()
            .oneshot(Request::get("/records/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: RaffleRecord = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(record.state(), RaffleState::Waiting);
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let response = router()
            .oneshot(Request::get("/records/2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_record() {
        let response = router()
            .oneshot(patch(1, r#"{"state":"DRAWING","winner":null}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "DRAWING");
        assert_eq!(body["winner"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_patch_rejects_invalid_outcome() {
        let response = router()
            .oneshot(patch(1, r#"{"state":"DRAWN","winner":null}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("no winner"));
    }

    #[tokio::test]
    async fn test_patch_missing_record() {
        let response = router()
            .oneshot(patch(5, r#"{"state":"WAITING"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);
    }
}
