use crate::api::AppState;
use crate::archive::FetchError;
use crate::resolver::{ResolveError, ResolveRequest};
use crate::types::{ImageId, UI};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

pub fn routes() -> Router<AppState> {
	Router::new().route(
		"/studies/{study}/series/{series}/image-ids",
		get(series_image_ids),
	)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageIdsParameters {
	/// SOPInstanceUID of the only instance to resolve.
	instance: Option<UI>,
	convert_multiframe: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageIdsResponse {
	image_ids: Vec<ImageId>,
}

impl IntoResponse for ResolveError {
	fn into_response(self) -> Response {
		let status = match &self {
			Self::NoInstances { .. } | Self::Fetch(FetchError::NotFound { .. }) => {
				StatusCode::NOT_FOUND
			}
			Self::Fetch(FetchError::InvalidUid(_)) => StatusCode::BAD_REQUEST,
			Self::Fetch(_) => {
				error!("{self}");
				StatusCode::BAD_GATEWAY
			}
		};
		(status, self.to_string()).into_response()
	}
}

#[instrument(skip_all)]
async fn series_image_ids(
	State(state): State<AppState>,
	Path((study, series)): Path<(UI, UI)>,
	Query(parameters): Query<ImageIdsParameters>,
) -> Result<Json<ImageIdsResponse>, ResolveError> {
	let mut request = ResolveRequest::new(study, series).with_convert_multiframe(
		parameters
			.convert_multiframe
			.unwrap_or(state.convert_multiframe),
	);
	if let Some(instance) = parameters.instance {
		request = request.with_instance(instance);
	}

	let image_ids = state.resolver.resolve(&request, &state.store).await?;
	Ok(Json(ImageIdsResponse { image_ids }))
}

#[cfg(test)]
mod tests {
	use crate::api::tests::{json, send, state};
	use crate::metadata::MetadataKind;
	use axum::body::Body;
	use axum::http::{Request, StatusCode};
	use serde_json::json;

	fn ct(sop_instance_uid: &str, frames: u32) -> crate::metadata::InstanceRecord {
		json!({
			"00080018": { "vr": "UI", "Value": [sop_instance_uid] },
			"00080060": { "vr": "CS", "Value": ["CT"] },
			"00280008": { "vr": "IS", "Value": [frames] }
		})
		.as_object()
		.unwrap()
		.clone()
	}

	fn get(uri: &str) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	#[tokio::test]
	async fn resolve_series() {
		let state = state(vec![ct("1.2.3.1", 1), ct("1.2.3.2", 2)]);

		let response = send(&state, get("/studies/1.2/series/1.2.3/image-ids")).await;
		assert_eq!(response.status(), StatusCode::OK);

		let body = json(response).await;
		let prefix = "wadors:http://pacs/dicomweb/studies/1.2/series/1.2.3/instances";
		assert_eq!(
			body,
			json!({ "imageIds": [
				format!("{prefix}/1.2.3.1/frames/1"),
				format!("{prefix}/1.2.3.2/frames/1"),
				format!("{prefix}/1.2.3.2/frames/2"),
			] })
		);
		assert!(state.store.contains(
			MetadataKind::Instance,
			&format!("{prefix}/1.2.3.2/frames/2")
		));
	}

	#[tokio::test]
	async fn honor_query_parameters() {
		let state = state(vec![ct("1.2.3.1", 1), ct("1.2.3.2", 2)]);

		let response = send(
			&state,
			get("/studies/1.2/series/1.2.3/image-ids?instance=1.2.3.2&convertMultiframe=false"),
		)
		.await;
		assert_eq!(response.status(), StatusCode::OK);

		let body = json(response).await;
		assert_eq!(body["imageIds"].as_array().map(Vec::len), Some(1));
	}

	#[tokio::test]
	async fn map_errors_to_status_codes() {
		let state = state(vec![ct("1.2.3.1", 1)]);

		let response = send(
			&state,
			get("/studies/1.2/series/1.2.3/image-ids?instance=9.9"),
		)
		.await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);

		let response = send(&state, get("/studies/1.2/series/7.7/image-ids")).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);

		let response = send(&state, get("/studies/1.2/series/5.5/image-ids")).await;
		assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
	}
}
