use crate::{errors::ApiError, services::PageRequest, ApiResponse, AppState, PaginatedResponse};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

/// JSON body that is deserialized and validated before the handler runs.
///
/// Malformed JSON, a wrong content type or a missing required field is a 400,
/// as is any `validator` failure (reported in `details`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::BadRequest(rejection.body_text()))?;
        validate_input(&value)?;
        Ok(Self(value))
    }
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(e.to_string()))
}

/// 200 with the standard envelope
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 201 with the standard envelope
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// 202 with a message and no data
pub fn accepted_response(message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::<()>::message(message)),
    )
        .into_response()
}

pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

pub fn paginated_response<T: Serialize>(page: crate::services::Page<T>) -> Response {
    success_response(PaginatedResponse::from(page))
}

impl AppState {
    /// Clamps the query's paging parameters to the configured bounds.
    pub fn page_request(&self, page: Option<u64>, per_page: Option<u64>) -> PageRequest {
        PageRequest::new(
            page,
            per_page,
            self.config.api_default_page_size,
            self.config.api_max_page_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::post, Router};
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, Validate)]
    struct Payload {
        #[validate(length(min = 1))]
        name: String,
    }

    fn app() -> Router {
        Router::new().route(
            "/",
            post(|ValidatedJson(payload): ValidatedJson<Payload>| async move { payload.name }),
        )
    }

    async fn post_json(body: &str) -> StatusCode {
        app()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn missing_field_is_a_bad_request() {
        assert_eq!(post_json("{}").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        assert_eq!(post_json("{\"name\":").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_validation_is_a_bad_request() {
        assert_eq!(post_json("{\"name\":\"\"}").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_payload_reaches_the_handler() {
        assert_eq!(post_json("{\"name\":\"bolts\"}").await, StatusCode::OK);
    }
}
