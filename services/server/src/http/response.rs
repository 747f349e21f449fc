use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cue_protocol::ApiMessage;
use std::fmt::Display;

pub(crate) fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (
        status,
        Json(ApiMessage {
            message: text.into(),
        }),
    )
        .into_response()
}

pub fn ok_message(text: impl Into<String>) -> Response {
    message(StatusCode::OK, text)
}

pub fn bad_request(text: impl Into<String>) -> Response {
    message(StatusCode::BAD_REQUEST, text)
}

pub fn unauthorized() -> Response {
    message(StatusCode::UNAUTHORIZED, "Unauthorized")
}

pub fn forbidden(text: impl Into<String>) -> Response {
    message(StatusCode::FORBIDDEN, text)
}

pub fn not_found(text: impl Into<String>) -> Response {
    message(StatusCode::NOT_FOUND, text)
}

pub fn internal_error(err: impl Display) -> Response {
    message(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
