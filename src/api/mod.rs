use crate::metadata::MetadataStore;
use crate::resolver::SeriesMetadataResolver;
use axum::Router;
use std::sync::Arc;

mod image_ids;
mod metadata;

#[derive(Clone)]
pub struct AppState {
	pub resolver: Arc<SeriesMetadataResolver>,
	/// The metadata of the current viewing session.
	pub store: Arc<MetadataStore>,
	/// Used when a request does not ask for a specific frame conversion.
	pub convert_multiframe: bool,
}

pub fn routes() -> Router<AppState> {
	Router::new()
		.merge(image_ids::routes())
		.merge(metadata::routes())
}
