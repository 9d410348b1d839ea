use axum::{extract::FromRequest, Json};

use crate::error::ApiError;

/// `Json` whose rejections render as the API's JSON error body.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);
