//! Seat assignment workflow.
//!
//! ```text
//! Unauthenticated ──► Authenticating ──► SeatCheck ──► Assigned
//!        ▲                  │                │
//!        └──── Rejected ◄───┴────────────────┘
//! ```
//!
//! A check-in validates the scanned arcade and seat, authenticates, then
//! claims the seat. Any failure ends in `Rejected` and the caller is sent back
//! to the entry screen; a session created during the attempt is signed out
//! again so a rejected user is never left half signed in.

use arcade_db::{Database, LoginEvent, Seat, SeatClaim, SeatColor};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::helpers;
use crate::session::{Identity, SeatContext, SessionStore, SignedIn};
use crate::validation;
use crate::view::{Navigation, Screen};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinState {
    Unauthenticated,
    Authenticating,
    SeatCheck,
    Assigned,
    Rejected,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Password {
        email: String,
        password: String,
    },
    Register {
        email: String,
        password: String,
    },
    Federated {
        federation_key: Option<String>,
        provider: String,
        subject: String,
        email: String,
    },
}

#[derive(Debug, Clone)]
pub struct CheckinRequest {
    pub credentials: Credentials,
    pub arcade_id: Option<String>,
    pub player_seat: Option<String>,
}

/// A seat successfully assigned to a signed-in user.
#[derive(Debug)]
pub struct Assignment {
    pub token: String,
    pub identity: Identity,
    pub seat: Seat,
    pub event: LoginEvent,
    pub navigation: Navigation,
}

/// A seat change from `Assigned`.
#[derive(Debug)]
pub struct SeatChange {
    pub seat: Seat,
    pub event: LoginEvent,
    /// The seat given up, if one was held and released
    pub released: Option<SeatContext>,
}

/// Why a check-in ended in `Rejected`, and where the user goes next.
#[derive(Debug)]
pub struct Rejection {
    pub error: AppError,
    pub navigation: Navigation,
}

pub struct CheckinWorkflow<'a> {
    db: &'a Database,
    sessions: &'a SessionStore,
    state: CheckinState,
}

impl<'a> CheckinWorkflow<'a> {
    pub fn new(db: &'a Database, sessions: &'a SessionStore) -> Self {
        Self {
            db,
            sessions,
            state: CheckinState::Unauthenticated,
        }
    }

    pub fn state(&self) -> CheckinState {
        self.state
    }

    fn transition(&mut self, next: CheckinState) {
        debug!(from = ?self.state, to = ?next, "check-in transition");
        self.state = next;
    }

    fn reject(&mut self, request: &CheckinRequest, error: AppError) -> Rejection {
        warn!(kind = error.kind(), "check-in rejected");
        self.transition(CheckinState::Rejected);
        let navigation = Navigation::back_to_entry(
            request.arcade_id.clone(),
            request.player_seat.clone(),
            error.messages(),
        );
        self.transition(CheckinState::Unauthenticated);
        Rejection { error, navigation }
    }

    /// Run a full check-in: validate, authenticate, claim, record.
    pub async fn check_in(&mut self, request: CheckinRequest) -> Result<Assignment, Rejection> {
        // Input checks never reach the store
        let (arcade_id, player_seat) = match validation::validate_seat_context(
            request.arcade_id.as_deref(),
            request.player_seat.as_deref(),
        ) {
            Ok(context) => context,
            Err(err) => return Err(self.reject(&request, err.into())),
        };
        if let Credentials::Register { password, .. } = &request.credentials {
            if let Err(err) = validation::validate_new_password(password) {
                return Err(self.reject(&request, err.into()));
            }
        }

        self.transition(CheckinState::Authenticating);
        let signed_in = match self.authenticate(&request.credentials).await {
            Ok(signed_in) => signed_in,
            Err(err) => return Err(self.reject(&request, err)),
        };

        self.transition(CheckinState::SeatCheck);
        match self
            .assign(&signed_in, arcade_id.clone(), player_seat)
            .await
        {
            Ok(claim) => {
                self.transition(CheckinState::Assigned);
                info!(uid = %signed_in.identity.uid, %arcade_id, seat = %player_seat, "seat assigned");
                Ok(Assignment {
                    token: signed_in.token,
                    identity: signed_in.identity,
                    seat: claim.seat,
                    event: claim.event,
                    navigation: Navigation::to(Screen::LoggedIn),
                })
            }
            Err(err) => {
                if let Err(sign_out_err) = self.sessions.sign_out(&signed_in.token).await {
                    warn!(error = ?sign_out_err, "failed to end session after rejected check-in");
                }
                Err(self.reject(&request, err))
            }
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<SignedIn, AppError> {
        match credentials {
            Credentials::Password { email, password } => {
                self.sessions.sign_in_with_password(email, password).await
            }
            Credentials::Register { email, password } => {
                self.sessions.register(email, password).await
            }
            Credentials::Federated {
                federation_key,
                provider,
                subject,
                email,
            } => {
                self.sessions
                    .sign_in_federated(federation_key.as_deref(), provider, subject, email)
                    .await
            }
        }
    }

    /// Claim the seat with its login event and remember the seat context.
    ///
    /// If the session ended while claiming, the claim is released again.
    async fn assign(
        &self,
        signed_in: &SignedIn,
        arcade_id: String,
        player_seat: SeatColor,
    ) -> Result<SeatClaim, AppError> {
        let uid = signed_in.identity.uid.clone();

        let claim = self
            .db
            .claim_seat(arcade_id.clone(), player_seat, uid.clone(), helpers::now())
            .await?;

        let context = SeatContext {
            arcade_id,
            player_seat,
        };
        if !self
            .sessions
            .save_context(&signed_in.token, context.clone())
            .await
        {
            self.sessions.release_seat(&uid, context).await?;
            return Err(AppError::sign_in_required());
        }

        Ok(claim)
    }

    /// Move an assigned user to another seat.
    ///
    /// The new seat is claimed first and becomes the session's context; the
    /// old one is released afterwards as a separate write, and only if no
    /// session of the user still sits on it.
    pub async fn change_seat(
        &mut self,
        token: &str,
        arcade_id: Option<&str>,
        player_seat: Option<&str>,
    ) -> Result<SeatChange, AppError> {
        let session = self
            .sessions
            .session(token)
            .await
            .ok_or_else(AppError::sign_in_required)?;
        if session.context.is_some() {
            self.state = CheckinState::Assigned;
        }

        let (arcade_id, player_seat) = validation::validate_seat_context(arcade_id, player_seat)?;
        let uid = session.identity.uid.clone();

        self.transition(CheckinState::SeatCheck);
        let claim = match self
            .db
            .claim_seat(arcade_id.clone(), player_seat, uid.clone(), helpers::now())
            .await
        {
            Ok(claim) => claim,
            Err(err) => {
                // Still holding the previous seat, if any
                let previous = if session.context.is_some() {
                    CheckinState::Assigned
                } else {
                    CheckinState::Unauthenticated
                };
                self.transition(previous);
                return Err(err.into());
            }
        };

        let new_context = SeatContext {
            arcade_id,
            player_seat,
        };
        if !self.sessions.save_context(token, new_context.clone()).await {
            self.sessions.release_seat(&uid, new_context).await?;
            self.transition(CheckinState::Unauthenticated);
            return Err(AppError::sign_in_required());
        }
        self.transition(CheckinState::Assigned);

        let mut released = None;
        if let Some(old) = session.context.filter(|old| *old != new_context) {
            match self.sessions.release_seat(&uid, old.clone()).await {
                Ok(true) => released = Some(old),
                Ok(false) => {}
                Err(err) => warn!(error = ?err, "failed to release previous seat"),
            }
        }

        Ok(SeatChange {
            seat: claim.seat,
            event: claim.event,
            released,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SEAT_OCCUPIED_MESSAGE;
    use crate::session::SessionEvent;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    async fn setup() -> (Database, SessionStore) {
        let db = Database::open_in_memory().await.unwrap();
        db.create_arcade("Main Hall".to_string()).await.unwrap();
        let sessions = SessionStore::new(db.clone(), None, Duration::from_secs(3600));
        (db, sessions)
    }

    fn register(email: &str, arcade_id: &str, seat: &str) -> CheckinRequest {
        CheckinRequest {
            credentials: Credentials::Register {
                email: email.to_string(),
                password: "secret1".to_string(),
            },
            arcade_id: Some(arcade_id.to_string()),
            player_seat: Some(seat.to_string()),
        }
    }

    #[tokio::test]
    async fn test_check_in_assigns_seat() {
        let (db, sessions) = setup().await;
        let mut workflow = CheckinWorkflow::new(&db, &sessions);
        let before = helpers::now();

        let assignment = workflow
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();

        assert_eq!(workflow.state(), CheckinState::Assigned);
        assert_eq!(assignment.seat.user_id, assignment.identity.uid);
        assert!(assignment.seat.timestamp >= before);
        assert_eq!(assignment.navigation.screen, Screen::LoggedIn);
        assert_eq!(
            sessions.load_context(&assignment.token).await,
            Some(SeatContext {
                arcade_id: "1".to_string(),
                player_seat: SeatColor::Red
            })
        );

        let events = db
            .login_events_for_user(assignment.identity.uid.clone())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].player_seat, SeatColor::Red);
    }

    #[tokio::test]
    async fn test_missing_seat_context_never_authenticates() {
        let (db, sessions) = setup().await;
        let mut workflow = CheckinWorkflow::new(&db, &sessions);

        let mut request = register("alice@example.com", "1", "red");
        request.player_seat = None;
        let rejection = workflow.check_in(request).await.unwrap_err();

        assert!(matches!(rejection.error, AppError::Validation(_)));
        assert_eq!(
            rejection.navigation.errors,
            vec!["Arcade ID and Player Seat are required.", "Scan the QR code again!"]
        );
        assert_eq!(workflow.state(), CheckinState::Unauthenticated);
        // Registration never happened
        assert!(
            db.get_user_by_email("alice@example.com".to_string())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_short_password_on_register() {
        let (db, sessions) = setup().await;
        let mut workflow = CheckinWorkflow::new(&db, &sessions);

        let mut request = register("alice@example.com", "1", "red");
        request.credentials = Credentials::Register {
            email: "alice@example.com".to_string(),
            password: "123".to_string(),
        };
        let rejection = workflow.check_in(request).await.unwrap_err();
        assert_eq!(
            rejection.navigation.errors,
            vec!["Password should be at least 6 characters long"]
        );
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_provider_message() {
        let (db, sessions) = setup().await;
        let mut workflow = CheckinWorkflow::new(&db, &sessions);

        let rejection = workflow
            .check_in(CheckinRequest {
                credentials: Credentials::Password {
                    email: "ghost@example.com".to_string(),
                    password: "whatever".to_string(),
                },
                arcade_id: Some("1".to_string()),
                player_seat: Some("red".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, AppError::Auth(_)));
        assert_eq!(rejection.navigation.errors, vec!["Invalid email or password"]);
    }

    #[tokio::test]
    async fn test_occupied_seat_rejects_and_signs_out() {
        let (db, sessions) = setup().await;
        let alice = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();

        let mut workflow = CheckinWorkflow::new(&db, &sessions);
        let mut events = sessions.subscribe();
        let rejection = workflow
            .check_in(register("bob@example.com", "1", "red"))
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AppError::SeatOccupied));
        assert_eq!(rejection.navigation.screen, Screen::Entry);
        assert_eq!(rejection.navigation.errors, vec![SEAT_OCCUPIED_MESSAGE]);
        assert_eq!(rejection.navigation.arcade_id.as_deref(), Some("1"));
        assert_eq!(workflow.state(), CheckinState::Unauthenticated);

        // Seat still belongs to alice
        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert_eq!(seat.user_id, alice.identity.uid);

        // Bob's session was started then ended again
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn { .. }));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedOut { .. }));
    }

    #[tokio::test]
    async fn test_same_user_can_check_in_again() {
        let (db, sessions) = setup().await;
        CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "blue"))
            .await
            .unwrap();

        let again = CheckinWorkflow::new(&db, &sessions)
            .check_in(CheckinRequest {
                credentials: Credentials::Password {
                    email: "alice@example.com".to_string(),
                    password: "secret1".to_string(),
                },
                arcade_id: Some("1".to_string()),
                player_seat: Some("blue".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(again.seat.user_id, again.identity.uid);
    }

    #[tokio::test]
    async fn test_check_in_to_missing_arcade() {
        let (db, sessions) = setup().await;
        let rejection = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "99", "red"))
            .await
            .unwrap_err();
        assert!(matches!(rejection.error, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_change_seat_releases_previous() {
        let (db, sessions) = setup().await;
        let alice = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();

        let mut workflow = CheckinWorkflow::new(&db, &sessions);
        let change = workflow
            .change_seat(&alice.token, Some("1"), Some("green"))
            .await
            .unwrap();

        assert_eq!(workflow.state(), CheckinState::Assigned);
        assert_eq!(change.seat.color, SeatColor::Green);
        assert_eq!(
            change.released,
            Some(SeatContext {
                arcade_id: "1".to_string(),
                player_seat: SeatColor::Red
            })
        );
        assert!(
            db.get_seat("1".to_string(), SeatColor::Red)
                .await
                .unwrap()
                .unwrap()
                .is_free()
        );
        assert_eq!(
            sessions.load_context(&alice.token).await.unwrap().player_seat,
            SeatColor::Green
        );
    }

    #[tokio::test]
    async fn test_change_to_occupied_seat_keeps_old_seat() {
        let (db, sessions) = setup().await;
        let alice = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();
        CheckinWorkflow::new(&db, &sessions)
            .check_in(register("bob@example.com", "1", "blue"))
            .await
            .unwrap();

        let mut workflow = CheckinWorkflow::new(&db, &sessions);
        let result = workflow
            .change_seat(&alice.token, Some("1"), Some("blue"))
            .await;
        assert!(matches!(result, Err(AppError::SeatOccupied)));
        assert_eq!(workflow.state(), CheckinState::Assigned);

        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert_eq!(seat.user_id, alice.identity.uid);
    }

    #[tokio::test]
    async fn test_change_seat_requires_session() {
        let (db, sessions) = setup().await;
        let result = CheckinWorkflow::new(&db, &sessions)
            .change_seat("arcade-st-unknown", Some("1"), Some("red"))
            .await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    /// File-backed database so a second connection can alter its schema.
    async fn file_setup() -> (Database, SessionStore, PathBuf) {
        let path = std::env::temp_dir().join(format!("arcade-{}.db", helpers::generate_uid()));
        let db = Database::open(&path).await.unwrap();
        db.create_arcade("Main Hall".to_string()).await.unwrap();
        let sessions = SessionStore::new(db.clone(), None, Duration::from_secs(3600));
        (db, sessions, path)
    }

    /// Make every login event write fail from now on.
    async fn break_event_log(path: &Path) {
        let conn = tokio_rusqlite::Connection::open(path).await.unwrap();
        conn.call(|conn| conn.execute_batch("DROP TABLE login_events"))
            .await
            .unwrap();
    }

    fn remove_db_files(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_failed_event_write_leaves_seat_free() {
        let (db, sessions, path) = file_setup().await;
        break_event_log(&path).await;
        let mut events = sessions.subscribe();

        let rejection = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AppError::RemoteIo(_)));
        assert!(db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().is_none());
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedIn { .. }));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::SignedOut { .. }));
        remove_db_files(&path);
    }

    #[tokio::test]
    async fn test_failed_seat_change_keeps_old_seat() {
        let (db, sessions, path) = file_setup().await;
        let alice = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();
        break_event_log(&path).await;

        let result = CheckinWorkflow::new(&db, &sessions)
            .change_seat(&alice.token, Some("1"), Some("blue"))
            .await;

        assert!(matches!(result, Err(AppError::RemoteIo(_))));
        assert!(db.get_seat("1".to_string(), SeatColor::Blue).await.unwrap().is_none());
        let red = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert_eq!(red.user_id, alice.identity.uid);
        assert_eq!(
            sessions.load_context(&alice.token).await.unwrap().player_seat,
            SeatColor::Red
        );
        remove_db_files(&path);
    }

    #[tokio::test]
    async fn test_claim_released_when_session_ended_meanwhile() {
        let (db, sessions) = setup().await;
        let signed_in = sessions.register("alice@example.com", "secret1").await.unwrap();
        sessions.sign_out(&signed_in.token).await.unwrap();

        let result = CheckinWorkflow::new(&db, &sessions)
            .assign(&signed_in, "1".to_string(), SeatColor::Red)
            .await;

        assert!(matches!(result, Err(AppError::Auth(_))));
        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert!(seat.is_free());
    }

    #[tokio::test]
    async fn test_change_seat_keeps_seat_shared_with_other_device() {
        let (db, sessions) = setup().await;
        let phone = CheckinWorkflow::new(&db, &sessions)
            .check_in(register("alice@example.com", "1", "red"))
            .await
            .unwrap();
        let tablet = CheckinWorkflow::new(&db, &sessions)
            .check_in(CheckinRequest {
                credentials: Credentials::Password {
                    email: "alice@example.com".to_string(),
                    password: "secret1".to_string(),
                },
                arcade_id: Some("1".to_string()),
                player_seat: Some("red".to_string()),
            })
            .await
            .unwrap();

        let change = CheckinWorkflow::new(&db, &sessions)
            .change_seat(&phone.token, Some("1"), Some("green"))
            .await
            .unwrap();

        // The tablet still sits on red
        assert!(change.released.is_none());
        let red = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert_eq!(red.user_id, tablet.identity.uid);
    }
}
