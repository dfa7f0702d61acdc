mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{Arcade, LoginEvent, Seat, SeatClaim, SeatColor, UnknownSeatColor, User};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, params};
use tracing::{debug, info};

/// Counter row holding the last assigned arcade id.
const ARCADE_COUNTER: &str = "arcadeCounter";

/// Database wrapper for all arcade check-in records.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

fn seat_from_row(row: &Row<'_>) -> rusqlite::Result<Seat> {
  Ok(Seat {
    arcade_id: row.get(0)?,
    color: row.get(1)?,
    user_id: row.get(2)?,
    timestamp: row.get(3)?,
  })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    uid: row.get(0)?,
    email: row.get(1)?,
    password_hash: row.get(2)?,
    salt: row.get(3)?,
    created_at: row.get(4)?,
  })
}

/// Append a login event keyed by `{now}_{user_id}`.
///
/// A second event for the same user in the same millisecond replaces the first.
fn insert_login_event(
  conn: &rusqlite::Connection,
  user_id: &str,
  arcade_id: &str,
  player_seat: SeatColor,
  now: i64,
) -> rusqlite::Result<LoginEvent> {
  let key = LoginEvent::key_for(now, user_id);
  conn
    .prepare_cached(
      "INSERT OR REPLACE INTO login_events (key, user_id, arcade_id, player_seat, timestamp)
       VALUES (?1, ?2, ?3, ?4, ?5)",
    )?
    .execute(params![&key, user_id, arcade_id, player_seat, now])?;

  Ok(LoginEvent {
    key,
    user_id: user_id.to_string(),
    arcade_id: arcade_id.to_string(),
    player_seat,
    timestamp: now,
  })
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| -> rusqlite::Result<()> {
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    -- Arcade locations; ids come from the counter below
                    CREATE TABLE IF NOT EXISTS arcades (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL
                    );

                    -- Monotonic counters (only 'arcadeCounter' today)
                    CREATE TABLE IF NOT EXISTS counters (
                        name TEXT PRIMARY KEY,
                        value INTEGER NOT NULL
                    );

                    -- Seat occupancy. No foreign key to arcades: deleting an
                    -- arcade leaves its seats behind.
                    CREATE TABLE IF NOT EXISTS seats (
                        arcade_id TEXT NOT NULL,
                        color TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        timestamp INTEGER NOT NULL,
                        PRIMARY KEY (arcade_id, color)
                    );

                    -- Append-only audit log of successful claims
                    CREATE TABLE IF NOT EXISTS login_events (
                        key TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL,
                        arcade_id TEXT NOT NULL,
                        player_seat TEXT NOT NULL,
                        timestamp INTEGER NOT NULL
                    );

                    -- Identity provider accounts
                    CREATE TABLE IF NOT EXISTS users (
                        uid TEXT PRIMARY KEY,
                        email TEXT NOT NULL UNIQUE,
                        password_hash TEXT,
                        salt TEXT,
                        created_at INTEGER NOT NULL
                    );

                    -- External identities linked to accounts
                    CREATE TABLE IF NOT EXISTS federated_identities (
                        provider TEXT NOT NULL,
                        subject TEXT NOT NULL,
                        uid TEXT NOT NULL REFERENCES users(uid) ON DELETE CASCADE,
                        PRIMARY KEY (provider, subject)
                    );

                    CREATE INDEX IF NOT EXISTS idx_login_events_user ON login_events(user_id);
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Arcades
  // ========================================================================

  /// List all arcades ordered by numeric id.
  pub async fn list_arcades(&self) -> Result<Vec<Arcade>> {
    let arcades = self
      .conn
      .call(|conn| -> rusqlite::Result<Vec<Arcade>> {
        let mut stmt =
          conn.prepare_cached("SELECT id, name FROM arcades ORDER BY CAST(id AS INTEGER), id")?;

        let arcades = stmt
          .query_map([], |row| {
            Ok(Arcade {
              id: row.get(0)?,
              name: row.get(1)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(arcades)
      })
      .await?;

    Ok(arcades)
  }

  /// Get an arcade by id.
  pub async fn get_arcade(&self, id: String) -> Result<Option<Arcade>> {
    let arcade = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<Arcade>> {
        conn
          .prepare_cached("SELECT id, name FROM arcades WHERE id = ?1")?
          .query_row(params![&id], |row| {
            Ok(Arcade {
              id: row.get(0)?,
              name: row.get(1)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(arcade)
  }

  /// Create an arcade at the next counter value.
  /// The counter read, the insert and the counter update share one transaction.
  pub async fn create_arcade(&self, name: String) -> Result<Arcade> {
    let arcade = self
      .conn
      .call(move |conn| -> rusqlite::Result<Arcade> {
        let tx = conn.transaction()?;

        let previous: i64 = tx
          .prepare_cached("SELECT value FROM counters WHERE name = ?1")?
          .query_row(params![ARCADE_COUNTER], |row| row.get(0))
          .optional()?
          .unwrap_or(0);
        let next = previous + 1;
        let id = next.to_string();

        tx.prepare_cached("INSERT INTO arcades (id, name) VALUES (?1, ?2)")?
          .execute(params![&id, &name])?;

        tx.prepare_cached(
          "INSERT INTO counters (name, value) VALUES (?1, ?2)
           ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )?
        .execute(params![ARCADE_COUNTER, next])?;

        tx.commit()?;
        Ok(Arcade { id, name })
      })
      .await?;

    debug!(%arcade.id, %arcade.name, "created arcade");
    Ok(arcade)
  }

  /// Overwrite the name of an existing arcade.
  pub async fn rename_arcade(&self, id: String, name: String) -> Result<Arcade> {
    let arcade = self
      .conn
      .call(move |conn| -> rusqlite::Result<Result<Arcade>> {
        let updated = conn
          .prepare_cached("UPDATE arcades SET name = ?2 WHERE id = ?1")?
          .execute(params![&id, &name])?;

        if updated == 0 {
          return Ok(Err(DbError::ArcadeNotFound));
        }

        Ok(Ok(Arcade { id, name }))
      })
      .await??;

    debug!(%arcade.id, %arcade.name, "renamed arcade");
    Ok(arcade)
  }

  /// Delete an arcade. Seats and login events for it are left in place.
  pub async fn delete_arcade(&self, id: String) -> Result<()> {
    let id_log = id.clone();

    self
      .conn
      .call(move |conn| -> rusqlite::Result<Result<()>> {
        let deleted = conn
          .prepare_cached("DELETE FROM arcades WHERE id = ?1")?
          .execute(params![&id])?;

        if deleted == 0 {
          return Ok(Err(DbError::ArcadeNotFound));
        }

        Ok(Ok(()))
      })
      .await??;

    debug!(arcade_id = %id_log, "deleted arcade");
    Ok(())
  }

  /// Current value of the arcade counter (0 if no arcade was ever created).
  #[cfg(test)]
  async fn arcade_counter(&self) -> Result<i64> {
    let value = self
      .conn
      .call(|conn| -> rusqlite::Result<i64> {
        let value = conn
          .prepare_cached("SELECT value FROM counters WHERE name = ?1")?
          .query_row(params![ARCADE_COUNTER], |row| row.get(0))
          .optional()?;
        Ok(value.unwrap_or(0))
      })
      .await?;

    Ok(value)
  }

  // ========================================================================
  // Seats
  // ========================================================================

  /// Get a seat. None if it was never written.
  pub async fn get_seat(&self, arcade_id: String, color: SeatColor) -> Result<Option<Seat>> {
    let seat = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<Seat>> {
        conn
          .prepare_cached(
            "SELECT arcade_id, color, user_id, timestamp FROM seats WHERE arcade_id = ?1 AND color = ?2",
          )?
          .query_row(params![&arcade_id, color], seat_from_row)
          .optional()
      })
      .await?;

    Ok(seat)
  }

  /// All four seats of an arcade in display order.
  pub async fn list_seats(&self, arcade_id: String) -> Result<Vec<(SeatColor, Option<Seat>)>> {
    let seats = self
      .conn
      .call(move |conn| -> rusqlite::Result<Vec<Seat>> {
        let mut stmt = conn.prepare_cached(
          "SELECT arcade_id, color, user_id, timestamp FROM seats WHERE arcade_id = ?1",
        )?;

        let seats = stmt
          .query_map(params![&arcade_id], seat_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(seats)
      })
      .await?;

    Ok(
      SeatColor::ALL
        .into_iter()
        .map(|color| (color, seats.iter().find(|s| s.color == color).cloned()))
        .collect(),
    )
  }

  /// Claim a seat for `user_id` and record the login event.
  ///
  /// The arcade must exist. A seat held by a different user is left untouched
  /// and `DbError::SeatOccupied` is returned; a seat that is free or already
  /// held by the caller is written with the new timestamp. The check, the
  /// seat write and the event write run in one transaction, so a claim is
  /// never left behind without its event and two claims can't both succeed.
  pub async fn claim_seat(
    &self,
    arcade_id: String,
    color: SeatColor,
    user_id: String,
    now: i64,
  ) -> Result<SeatClaim> {
    let claim = self
      .conn
      .call(move |conn| -> rusqlite::Result<Result<SeatClaim>> {
        let tx = conn.transaction()?;

        let arcade_exists: bool = tx
          .prepare_cached("SELECT EXISTS(SELECT 1 FROM arcades WHERE id = ?1)")?
          .query_row(params![&arcade_id], |row| row.get(0))?;

        if !arcade_exists {
          return Ok(Err(DbError::ArcadeNotFound));
        }

        let current: Option<Seat> = tx
          .prepare_cached(
            "SELECT arcade_id, color, user_id, timestamp FROM seats WHERE arcade_id = ?1 AND color = ?2",
          )?
          .query_row(params![&arcade_id, color], seat_from_row)
          .optional()?;

        if let Some(current) = current {
          if !current.is_claimable_by(&user_id) {
            return Ok(Err(DbError::SeatOccupied {
              holder: current.user_id,
            }));
          }
        }

        tx.prepare_cached(
          "INSERT INTO seats (arcade_id, color, user_id, timestamp) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(arcade_id, color) DO UPDATE SET user_id = excluded.user_id, timestamp = excluded.timestamp",
        )?
        .execute(params![&arcade_id, color, &user_id, now])?;

        let event = insert_login_event(&tx, &user_id, &arcade_id, color, now)?;

        tx.commit()?;
        Ok(Ok(SeatClaim {
          seat: Seat {
            arcade_id,
            color,
            user_id,
            timestamp: now,
          },
          event,
        }))
      })
      .await??;

    debug!(
      arcade_id = %claim.seat.arcade_id,
      color = %claim.seat.color,
      user_id = %claim.seat.user_id,
      "claimed seat"
    );
    Ok(claim)
  }

  /// Mark a seat as free regardless of who holds it.
  pub async fn vacate_seat(&self, arcade_id: String, color: SeatColor, now: i64) -> Result<Seat> {
    let seat = self
            .conn
            .call(move |conn| -> rusqlite::Result<Seat> {
                conn.prepare_cached(
                    "INSERT INTO seats (arcade_id, color, user_id, timestamp) VALUES (?1, ?2, '', ?3)
                     ON CONFLICT(arcade_id, color) DO UPDATE SET user_id = '', timestamp = excluded.timestamp",
                )?
                    .execute(params![&arcade_id, color, now])?;

                Ok(Seat {
                    arcade_id,
                    color,
                    user_id: String::new(),
                    timestamp: now,
                })
            })
            .await?;

    debug!(%seat.arcade_id, %seat.color, "vacated seat");
    Ok(seat)
  }

  /// Free a seat only if `user_id` holds it. Returns whether anything changed.
  pub async fn release_seat(
    &self,
    arcade_id: String,
    color: SeatColor,
    user_id: String,
    now: i64,
  ) -> Result<bool> {
    let released = self
      .conn
      .call(move |conn| -> rusqlite::Result<bool> {
        let updated = conn
          .prepare_cached(
            "UPDATE seats SET user_id = '', timestamp = ?4 WHERE arcade_id = ?1 AND color = ?2 AND user_id = ?3",
          )?
          .execute(params![&arcade_id, color, &user_id, now])?;
        Ok(updated > 0)
      })
      .await?;

    if released {
      debug!(%color, "released seat");
    }
    Ok(released)
  }

  // ========================================================================
  // Login Events
  // ========================================================================

  /// Login events of a user, newest first.
  pub async fn login_events_for_user(&self, user_id: String) -> Result<Vec<LoginEvent>> {
    let events = self
      .conn
      .call(move |conn| -> rusqlite::Result<Vec<LoginEvent>> {
        let mut stmt = conn.prepare_cached(
          "SELECT key, user_id, arcade_id, player_seat, timestamp FROM login_events
           WHERE user_id = ?1 ORDER BY timestamp DESC",
        )?;

        let events = stmt
          .query_map(params![&user_id], |row| {
            Ok(LoginEvent {
              key: row.get(0)?,
              user_id: row.get(1)?,
              arcade_id: row.get(2)?,
              player_seat: row.get(3)?,
              timestamp: row.get(4)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
      })
      .await?;

    Ok(events)
  }

  // ========================================================================
  // Users
  // ========================================================================

  /// Create a password account. Fails with `EmailInUse` if the email is taken.
  pub async fn create_user(
    &self,
    uid: String,
    email: String,
    password_hash: String,
    salt: String,
    now: i64,
  ) -> Result<User> {
    let user = self
            .conn
            .call(move |conn| -> rusqlite::Result<Result<User>> {
                let tx = conn.transaction()?;

                let exists: bool = tx
                    .prepare_cached("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)")?
                    .query_row(params![&email], |row| row.get(0))?;

                if exists {
                    return Ok(Err(DbError::EmailInUse));
                }

                tx.prepare_cached(
                    "INSERT INTO users (uid, email, password_hash, salt, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                    .execute(params![&uid, &email, &password_hash, &salt, now])?;

                tx.commit()?;
                Ok(Ok(User {
                    uid,
                    email,
                    password_hash: Some(password_hash),
                    salt: Some(salt),
                    created_at: now,
                }))
            })
            .await??;

    debug!(%user.uid, "created user");
    Ok(user)
  }

  /// Get a user by email.
  pub async fn get_user_by_email(&self, email: String) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<User>> {
        conn
          .prepare_cached(
            "SELECT uid, email, password_hash, salt, created_at FROM users WHERE email = ?1",
          )?
          .query_row(params![&email], user_from_row)
          .optional()
      })
      .await?;

    Ok(user)
  }

  /// Get a user by uid.
  pub async fn get_user(&self, uid: String) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| -> rusqlite::Result<Option<User>> {
        conn
          .prepare_cached("SELECT uid, email, password_hash, salt, created_at FROM users WHERE uid = ?1")?
          .query_row(params![&uid], user_from_row)
          .optional()
      })
      .await?;

    Ok(user)
  }

  /// Resolve an external identity to an account.
  ///
  /// A known `(provider, subject)` returns its linked account. Otherwise the
  /// identity is linked to the account owning `email`, or to a new
  /// password-less account created with `new_uid`.
  pub async fn federated_user(
    &self,
    provider: String,
    subject: String,
    email: String,
    new_uid: String,
    now: i64,
  ) -> Result<User> {
    let user = self
            .conn
            .call(move |conn| -> rusqlite::Result<User> {
                let tx = conn.transaction()?;

                let linked: Option<User> = tx
                    .prepare_cached(
                        "SELECT u.uid, u.email, u.password_hash, u.salt, u.created_at
                         FROM federated_identities f JOIN users u ON u.uid = f.uid
                         WHERE f.provider = ?1 AND f.subject = ?2",
                    )?
                    .query_row(params![&provider, &subject], user_from_row)
                    .optional()?;

                if let Some(user) = linked {
                    return Ok(user);
                }

                let existing: Option<User> = tx
                    .prepare_cached(
                        "SELECT uid, email, password_hash, salt, created_at FROM users WHERE email = ?1",
                    )?
                    .query_row(params![&email], user_from_row)
                    .optional()?;

                let user = match existing {
                    Some(user) => user,
                    None => {
                        tx.prepare_cached(
                            "INSERT INTO users (uid, email, password_hash, salt, created_at) VALUES (?1, ?2, NULL, NULL, ?3)",
                        )?
                            .execute(params![&new_uid, &email, now])?;
                        User {
                            uid: new_uid,
                            email,
                            password_hash: None,
                            salt: None,
                            created_at: now,
                        }
                    }
                };

                tx.prepare_cached(
                    "INSERT INTO federated_identities (provider, subject, uid) VALUES (?1, ?2, ?3)",
                )?
                    .execute(params![&provider, &subject, &user.uid])?;

                tx.commit()?;
                Ok(user)
            })
            .await?;

    debug!(%user.uid, "resolved federated user");
    Ok(user)
  }
}
