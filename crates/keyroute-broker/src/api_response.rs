// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Uniform error bodies for the HTTP surface: `{"error": "..."}`, with
//! numeric fields added where they help the caller act (402).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
	pub error: String,
}

#[derive(Debug, Serialize)]
pub struct InsufficientCreditsBody {
	pub error: String,
	pub balance: f64,
	pub estimated_cost: f64,
	pub cost_per_hour: f64,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
	(
		status,
		Json(ErrorBody {
			error: message.into(),
		}),
	)
		.into_response()
}

pub fn bad_request(message: impl Into<String>) -> Response {
	error_response(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized(message: impl Into<String>) -> Response {
	error_response(StatusCode::UNAUTHORIZED, message)
}

pub fn forbidden(message: impl Into<String>) -> Response {
	error_response(StatusCode::FORBIDDEN, message)
}

pub fn not_found(message: impl Into<String>) -> Response {
	error_response(StatusCode::NOT_FOUND, message)
}

pub fn service_unavailable(message: impl Into<String>) -> Response {
	error_response(StatusCode::SERVICE_UNAVAILABLE, message)
}

pub fn payment_required(balance: f64, estimated_cost: f64, cost_per_hour: f64) -> Response {
	(
		StatusCode::PAYMENT_REQUIRED,
		Json(InsufficientCreditsBody {
			error: "Insufficient credits".to_string(),
			balance,
			estimated_cost,
			cost_per_hour,
		}),
	)
		.into_response()
}
