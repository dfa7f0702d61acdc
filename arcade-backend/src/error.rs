use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::view::Navigation;

pub const SEAT_OCCUPIED_MESSAGE: &str =
  "Selected seat is already occupied. Please choose another seat.";

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub kind: &'static str,
  pub error: String,
  pub messages: Vec<String>,
  /// Where the client should go next, set when a check-in is rejected
  #[serde(skip_serializing_if = "Option::is_none")]
  pub navigate: Option<Navigation>,
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  /// Bad user input, caught before any store access
  Validation(Vec<String>),
  /// Identity provider rejected the credentials, or no valid session
  Auth(String),
  /// Seat held by a different user
  SeatOccupied,
  /// Store failure
  RemoteIo(arcade_db::DbError),
  NotFound(String),
  /// Signed in but not allowed to manage arcades
  Forbidden,
}

impl AppError {
  pub fn sign_in_required() -> Self {
    AppError::Auth("Sign in required".to_string())
  }

  pub fn kind(&self) -> &'static str {
    match self {
      AppError::Validation(_) => "validation",
      AppError::Auth(_) => "auth",
      AppError::SeatOccupied => "seat_occupied",
      AppError::RemoteIo(_) => "remote_io",
      AppError::NotFound(_) => "not_found",
      AppError::Forbidden => "forbidden",
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::SeatOccupied => StatusCode::CONFLICT,
      AppError::RemoteIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Forbidden => StatusCode::FORBIDDEN,
    }
  }

  /// User-facing messages. Internal store errors are never exposed.
  pub fn messages(&self) -> Vec<String> {
    match self {
      AppError::Validation(messages) => messages.clone(),
      AppError::Auth(msg) | AppError::NotFound(msg) => vec![msg.clone()],
      AppError::SeatOccupied => vec![SEAT_OCCUPIED_MESSAGE.to_string()],
      AppError::RemoteIo(_) => {
        vec!["An internal error occurred. Please try again later.".to_string()]
      }
      AppError::Forbidden => vec!["Only admins can manage arcades".to_string()],
    }
  }

  /// Build the response, optionally telling the client where to navigate.
  pub fn into_response_with(self, navigate: Option<Navigation>) -> Response {
    match &self {
      AppError::RemoteIo(db_err) => {
        // Log the detailed error server-side
        tracing::error!(?db_err, "Database error occurred");
      }
      AppError::Validation(messages) => {
        tracing::warn!(validation_error = ?messages, "Validation failed");
      }
      AppError::Auth(msg) => tracing::debug!(auth_error = %msg, "Authentication failed"),
      AppError::SeatOccupied => tracing::debug!("Seat claim rejected"),
      AppError::NotFound(_) | AppError::Forbidden => {}
    }

    let messages = self.messages();
    let error_response = ErrorResponse {
      kind: self.kind(),
      error: messages.first().cloned().unwrap_or_default(),
      messages,
      navigate,
    };
    (self.status(), Json(error_response)).into_response()
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    self.into_response_with(None)
  }
}

impl From<arcade_db::DbError> for AppError {
  fn from(err: arcade_db::DbError) -> Self {
    match err {
      arcade_db::DbError::ArcadeNotFound => AppError::NotFound("Arcade not found".to_string()),
      arcade_db::DbError::SeatOccupied { .. } => AppError::SeatOccupied,
      arcade_db::DbError::EmailInUse => {
        AppError::Auth("The email address is already in use by another account".to_string())
      }
      arcade_db::DbError::Sqlite(_) | arcade_db::DbError::Connection(_) => AppError::RemoteIo(err),
    }
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::Validation(err.messages())
  }
}
