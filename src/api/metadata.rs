use crate::api::AppState;
use crate::metadata::MetadataKind;
use crate::types::ImageId;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/metadata", delete(clear_session))
		.route("/metadata/{kind}", get(metadata_entry))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataParameters {
	image_id: ImageId,
}

#[instrument(skip_all)]
async fn metadata_entry(
	State(state): State<AppState>,
	Path(kind): Path<MetadataKind>,
	Query(MetadataParameters { image_id }): Query<MetadataParameters>,
) -> impl IntoResponse {
	match state.store.get(kind, &image_id) {
		Some(entry) => Json(entry).into_response(),
		None => (
			StatusCode::NOT_FOUND,
			format!("No {kind} metadata for {image_id}"),
		)
			.into_response(),
	}
}

async fn clear_session(State(state): State<AppState>) -> StatusCode {
	info!("Clearing {} metadata entries", state.store.len());
	state.store.clear();
	StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
	use crate::api::tests::{json, send, state, ROOT};
	use crate::calibration::CalibratedPixelSpacing;
	use crate::metadata::MetadataEntry;
	use axum::body::Body;
	use axum::http::{Method, Request, StatusCode};
	use serde_json::json;

	fn get(uri: String) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	fn encode(image_id: &str) -> String {
		url::form_urlencoded::byte_serialize(image_id.as_bytes()).collect()
	}

	#[tokio::test]
	async fn serve_stored_entries() {
		let state = state(Vec::new());
		let image_id = format!("wadors:{ROOT}/studies/1/series/2/instances/3/frames/1");
		state.store.add(
			image_id.as_str(),
			MetadataEntry::CalibratedPixelSpacing(CalibratedPixelSpacing {
				row_pixel_spacing: 0.25,
				column_pixel_spacing: 0.5,
			}),
		);

		let response = send(
			&state,
			get(format!(
				"/metadata/calibratedPixelSpacing?imageId={}",
				encode(&image_id)
			)),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(
			json(response).await,
			json!({ "rowPixelSpacing": 0.25, "columnPixelSpacing": 0.5 })
		);

		let response = send(
			&state,
			get(format!("/metadata/suvScaling?imageId={}", encode(&image_id))),
		)
		.await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn reject_unknown_kind() {
		let state = state(Vec::new());
		let response = send(&state, get(String::from("/metadata/thumbnail?imageId=x"))).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn clear_session_store() {
		let state = state(Vec::new());
		state.store.add(
			"wadors:a",
			MetadataEntry::CalibratedPixelSpacing(CalibratedPixelSpacing {
				row_pixel_spacing: 1.0,
				column_pixel_spacing: 1.0,
			}),
		);

		let request = Request::builder()
			.method(Method::DELETE)
			.uri("/metadata")
			.body(Body::empty())
			.unwrap();
		let response = send(&state, request).await;

		assert_eq!(response.status(), StatusCode::NO_CONTENT);
		assert!(state.store.is_empty());
	}
}
