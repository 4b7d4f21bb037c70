use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    extract::{
        Multipart, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
    },
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SlotQuery {
    /// Slot name, e.g. `tom`. Case and surrounding whitespace are ignored.
    pub name: Option<String>,
}

impl SlotQuery {
    fn raw_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

fn query_error(rejection: QueryRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImageResponse {
    pub file: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// `uploaded` for a previously empty slot, `replaced` otherwise
    pub action: String,
    pub file: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[utoipa::path(
    get,
    path = "/api/getImage",
    params(SlotQuery),
    responses(
        (status = 200, description = "Slot has an image", body = ImageResponse),
        (status = 400, description = "Missing or unknown name", body = ErrorResponse),
        (status = 404, description = "Slot is empty", body = ErrorResponse)
    ),
    tag = "images"
)]
pub async fn get_image(
    State(state): State<AppState>,
    query: Result<Query<SlotQuery>, QueryRejection>,
) -> Result<Json<ImageResponse>, AppError> {
    let Query(query) = query.map_err(query_error)?;
    let asset = state.store.lookup(query.raw_name()).await?;

    Ok(Json(ImageResponse {
        file: asset.file_name(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/upload",
    params(SlotQuery),
    request_body(
        content = Object,
        description = "Image file in the `image` field",
        content_type = "multipart/form-data"
    ),
    responses(
        (status = 200, description = "Slot content stored", body = UploadResponse),
        (
            status = 400,
            description = "Unknown name, missing file or non-image upload",
            body = ErrorResponse
        ),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    ),
    tag = "images"
)]
pub async fn upload_image(
    State(state): State<AppState>,
    query: Result<Query<SlotQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let validated = query
        .map_err(query_error)
        .and_then(|Query(query)| {
            state
                .store
                .validate(query.raw_name())
                .map_err(AppError::from)
        });
    let slot = match validated {
        Ok(slot) => slot,
        Err(e) => {
            if let Ok(mut multipart) = multipart {
                drain(&mut multipart).await;
            }
            return Err(e);
        }
    };

    let field_name = state.config.upload_field.as_str();
    let missing_file = || {
        AppError::BadRequest(format!("No file uploaded. Field must be '{}'.", field_name))
    };
    let mut multipart = multipart.map_err(|_| missing_file())?;

    let result: Result<Json<UploadResponse>, AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(field_name) {
                continue;
            }

            let content_type = field.content_type().map(|s| s.to_string());
            let reader = StreamReader::new(field.map_err(std::io::Error::other));

            let replaced = state
                .store
                .replace_slot(&slot, reader, content_type.as_deref())
                .await?;

            return Ok(Json(UploadResponse {
                action: replaced.action().to_string(),
                file: replaced.file_name(),
            }));
        }

        Err(missing_file())
    }
    .await;

    if let Err(e) = &result {
        // Drain the rest of the body so the client gets the response instead of a reset.
        tracing::warn!("Upload for '{}' failed: {}. Consuming remaining stream...", slot, e);
        drain(&mut multipart).await;
    }

    result
}

async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}
