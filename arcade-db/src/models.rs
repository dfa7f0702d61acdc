use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tokio_rusqlite::rusqlite;
use tokio_rusqlite::rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// One of the four seat slots every arcade has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeatColor {
  Red,
  Blue,
  Green,
  Yellow,
}

impl SeatColor {
  /// All colors in display order.
  pub const ALL: [SeatColor; 4] = [SeatColor::Red, SeatColor::Blue, SeatColor::Green, SeatColor::Yellow];

  pub fn as_str(&self) -> &'static str {
    match self {
      SeatColor::Red => "red",
      SeatColor::Blue => "blue",
      SeatColor::Green => "green",
      SeatColor::Yellow => "yellow",
    }
  }
}

impl fmt::Display for SeatColor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown seat color '{0}'")]
pub struct UnknownSeatColor(pub String);

impl FromStr for SeatColor {
  type Err = UnknownSeatColor;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "red" => Ok(SeatColor::Red),
      "blue" => Ok(SeatColor::Blue),
      "green" => Ok(SeatColor::Green),
      "yellow" => Ok(SeatColor::Yellow),
      other => Err(UnknownSeatColor(other.to_string())),
    }
  }
}

impl ToSql for SeatColor {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.as_str()))
  }
}

impl FromSql for SeatColor {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    value
      .as_str()?
      .parse()
      .map_err(|e| FromSqlError::Other(Box::new(e)))
  }
}

/// A named arcade location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arcade {
  /// Decimal string derived from the arcade counter
  pub id: String,
  pub name: String,
}

/// Occupancy of one seat slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
  pub arcade_id: String,
  pub color: SeatColor,
  /// Empty when the seat has been vacated
  pub user_id: String,
  /// Unix timestamp in milliseconds of the last claim or vacate
  pub timestamp: i64,
}

impl Seat {
  /// True when nobody holds the seat.
  pub fn is_free(&self) -> bool {
    self.user_id.is_empty()
  }

  /// True when the seat is free or already held by `user_id`.
  pub fn is_claimable_by(&self, user_id: &str) -> bool {
    self.is_free() || self.user_id == user_id
  }
}

/// A successful claim and the login event written with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatClaim {
  pub seat: Seat,
  pub event: LoginEvent,
}

/// Audit record written on every successful seat claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEvent {
  /// `{timestamp}_{user_id}`
  pub key: String,
  pub user_id: String,
  pub arcade_id: String,
  pub player_seat: SeatColor,
  pub timestamp: i64,
}

impl LoginEvent {
  pub fn key_for(timestamp: i64, user_id: &str) -> String {
    format!("{timestamp}_{user_id}")
  }
}

/// An account known to the identity provider.
#[derive(Debug, Clone)]
pub struct User {
  /// Opaque, stable user id
  pub uid: String,
  pub email: String,
  /// Salted SHA-256 of the password; None for federated-only accounts
  pub password_hash: Option<String>,
  pub salt: Option<String>,
  pub created_at: i64,
}
