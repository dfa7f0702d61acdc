//! Session store wrapping the identity provider.
//!
//! Sessions are ephemeral and live only in memory, keyed by the SHA-256 of
//! the bearer token. Each session remembers the seat it was assigned so a
//! reloading client can restore its context. Sessions expire after a fixed
//! lifetime; expired sessions are invisible at once and swept later, which
//! releases their seats. Sign-in and sign-out are broadcast to subscribers.

use arcade_db::{Database, SeatColor, User};
use scc::HashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::helpers;
use crate::validation;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self {
            uid: user.uid,
            email: user.email,
        }
    }
}

/// The arcade and seat a session was last assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatContext {
    pub arcade_id: String,
    pub player_seat: SeatColor,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub context: Option<SeatContext>,
    pub created_at: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64, ttl: Duration) -> bool {
        now - self.created_at > ttl.as_millis() as i64
    }
}

/// Result of a successful sign-in. The token is only ever returned here.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub token: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    SignedIn { uid: String },
    SignedOut { uid: String },
}

impl SessionEvent {
    pub fn uid(&self) -> &str {
        match self {
            SessionEvent::SignedIn { uid } | SessionEvent::SignedOut { uid } => uid,
        }
    }
}

pub struct SessionStore {
    db: Database,
    sessions: HashMap<String, Session>,
    events: broadcast::Sender<SessionEvent>,
    federation_key_hash: Option<String>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Database, federation_key: Option<&str>, ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            sessions: HashMap::new(),
            events,
            federation_key_hash: federation_key.map(helpers::hash_token),
            ttl,
        }
    }

    /// Create a password account and sign it in.
    pub async fn register(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
        let email = validation::validate_email(email)?;
        validation::validate_new_password(password)?;

        let salt = helpers::generate_salt();
        let password_hash = helpers::hash_password(password, &salt);
        let user = self
            .db
            .create_user(helpers::generate_uid(), email, password_hash, salt, helpers::now())
            .await?;

        info!(uid = %user.uid, "registered user");
        Ok(self.start_session(user.into()).await)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedIn, AppError> {
        let email = validation::validate_email(email)?;
        validation::validate_password(password)?;

        let user = self
            .db
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::Auth(INVALID_CREDENTIALS.to_string()))?;

        let verified = match (&user.password_hash, &user.salt) {
            (Some(hash), Some(salt)) => helpers::verify_password(password, salt, hash),
            // Federated-only account
            _ => false,
        };
        if !verified {
            return Err(AppError::Auth(INVALID_CREDENTIALS.to_string()));
        }

        Ok(self.start_session(user.into()).await)
    }

    /// Sign in with an identity asserted by a trusted federation proxy.
    ///
    /// The proxy authenticates with the configured federation key.
    pub async fn sign_in_federated(
        &self,
        federation_key: Option<&str>,
        provider: &str,
        subject: &str,
        email: &str,
    ) -> Result<SignedIn, AppError> {
        let expected = self
            .federation_key_hash
            .as_deref()
            .ok_or_else(|| AppError::Auth("Federated sign-in is not enabled".to_string()))?;
        if federation_key.map(helpers::hash_token).as_deref() != Some(expected) {
            return Err(AppError::Auth("Federated sign-in was not authorized".to_string()));
        }

        validation::validate_federated_identity(provider, subject)?;
        let email = validation::validate_email(email)?;

        let user = self
            .db
            .federated_user(
                provider.trim().to_string(),
                subject.trim().to_string(),
                email,
                helpers::generate_uid(),
                helpers::now(),
            )
            .await?;

        Ok(self.start_session(user.into()).await)
    }

    async fn start_session(&self, identity: Identity) -> SignedIn {
        let token = helpers::generate_session_token();
        let session = Session {
            identity: identity.clone(),
            context: None,
            created_at: helpers::now(),
        };
        // A fresh 32 character token can't collide with a live one
        let _ = self
            .sessions
            .insert_async(helpers::hash_token(&token), session)
            .await;

        debug!(uid = %identity.uid, "session started");
        let _ = self.events.send(SessionEvent::SignedIn {
            uid: identity.uid.clone(),
        });
        SignedIn { token, identity }
    }

    pub async fn session(&self, token: &str) -> Option<Session> {
        let now = helpers::now();
        self.sessions
            .read_async(&helpers::hash_token(token), |_, session| {
                (!session.is_expired(now, self.ttl)).then(|| session.clone())
            })
            .await
            .flatten()
    }

    pub async fn current_user(&self, token: &str) -> Option<Identity> {
        let now = helpers::now();
        self.sessions
            .read_async(&helpers::hash_token(token), |_, session| {
                (!session.is_expired(now, self.ttl)).then(|| session.identity.clone())
            })
            .await
            .flatten()
    }

    /// Remember the seat assigned to this session. Returns false if the
    /// session no longer exists or has expired.
    pub async fn save_context(&self, token: &str, context: SeatContext) -> bool {
        let now = helpers::now();
        self.sessions
            .update_async(&helpers::hash_token(token), |_, session| {
                if session.is_expired(now, self.ttl) {
                    return false;
                }
                session.context = Some(context);
                true
            })
            .await
            .unwrap_or(false)
    }

    pub async fn load_context(&self, token: &str) -> Option<SeatContext> {
        self.session(token).await.and_then(|session| session.context)
    }

    /// Free a seat of `uid` unless another live session of that user is
    /// still assigned to it. Returns whether the seat was freed.
    pub async fn release_seat(&self, uid: &str, context: SeatContext) -> Result<bool, AppError> {
        let now = helpers::now();
        let still_held = self
            .sessions
            .any_async(|_, session| {
                session.identity.uid == uid
                    && session.context.as_ref() == Some(&context)
                    && !session.is_expired(now, self.ttl)
            })
            .await
            .is_some();
        if still_held {
            debug!(%uid, seat = %context.player_seat, "seat kept for another session");
            return Ok(false);
        }

        let released = self
            .db
            .release_seat(context.arcade_id, context.player_seat, uid.to_string(), now)
            .await?;
        Ok(released)
    }

    /// End a session and release the seat it holds.
    ///
    /// The session is gone even if releasing the seat fails. Unknown tokens
    /// are a no-op.
    pub async fn sign_out(&self, token: &str) -> Result<Option<Identity>, AppError> {
        self.end_session(&helpers::hash_token(token)).await
    }

    async fn end_session(&self, token_hash: &str) -> Result<Option<Identity>, AppError> {
        let Some((_, session)) = self.sessions.remove_async(token_hash).await else {
            return Ok(None);
        };

        let uid = session.identity.uid.clone();
        let _ = self.events.send(SessionEvent::SignedOut { uid: uid.clone() });
        debug!(%uid, "session ended");

        if let Some(context) = session.context {
            self.release_seat(&uid, context).await?;
        }

        Ok(Some(session.identity))
    }

    /// End every expired session. Returns how many were ended.
    pub async fn expire_sessions(&self) -> usize {
        let now = helpers::now();
        let mut expired = Vec::new();
        self.sessions
            .iter_async(|token_hash, session| {
                if session.is_expired(now, self.ttl) {
                    expired.push(token_hash.clone());
                }
                true
            })
            .await;

        let mut ended = 0;
        for token_hash in expired {
            match self.end_session(&token_hash).await {
                Ok(Some(_)) => ended += 1,
                Ok(None) => {}
                Err(err) => {
                    ended += 1;
                    warn!(error = ?err, "failed to release seat of expired session");
                }
            }
        }
        ended
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    async fn store() -> SessionStore {
        let db = Database::open_in_memory().await.unwrap();
        SessionStore::new(db, Some("fed-key"), TTL)
    }

    fn red_seat() -> SeatContext {
        SeatContext {
            arcade_id: "1".to_string(),
            player_seat: SeatColor::Red,
        }
    }

    #[tokio::test]
    async fn test_register_then_sign_in() {
        let store = store().await;

        let registered = store.register("alice@example.com", "secret1").await.unwrap();
        assert_eq!(registered.identity.email, "alice@example.com");

        let signed_in = store
            .sign_in_with_password("Alice@Example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(signed_in.identity, registered.identity);
        assert_ne!(signed_in.token, registered.token);
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let store = store().await;
        let result = store.register("alice@example.com", "12345").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let store = store().await;
        store.register("alice@example.com", "secret1").await.unwrap();
        let result = store.register("alice@example.com", "secret2").await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let store = store().await;
        store.register("alice@example.com", "secret1").await.unwrap();

        let result = store.sign_in_with_password("alice@example.com", "secret2").await;
        assert!(matches!(result, Err(AppError::Auth(msg)) if msg == INVALID_CREDENTIALS));

        let result = store.sign_in_with_password("nobody@example.com", "secret1").await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_current_user_and_sign_out() {
        let store = store().await;
        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();

        assert_eq!(
            store.current_user(&signed_in.token).await,
            Some(signed_in.identity.clone())
        );

        let ended = store.sign_out(&signed_in.token).await.unwrap();
        assert_eq!(ended, Some(signed_in.identity));
        assert!(store.current_user(&signed_in.token).await.is_none());

        // Signing out twice is harmless
        assert!(store.sign_out(&signed_in.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_context_lifecycle() {
        let store = store().await;
        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();
        assert!(store.load_context(&signed_in.token).await.is_none());

        let context = SeatContext {
            arcade_id: "1".to_string(),
            player_seat: SeatColor::Green,
        };
        assert!(store.save_context(&signed_in.token, context.clone()).await);
        assert_eq!(store.load_context(&signed_in.token).await, Some(context.clone()));

        store.sign_out(&signed_in.token).await.unwrap();
        assert!(store.load_context(&signed_in.token).await.is_none());
        assert!(!store.save_context(&signed_in.token, context).await);
    }

    #[tokio::test]
    async fn test_sign_out_releases_held_seat() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SessionStore::new(db.clone(), None, TTL);
        db.create_arcade("Main Hall".to_string()).await.unwrap();

        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();
        db.claim_seat(
            "1".to_string(),
            SeatColor::Red,
            signed_in.identity.uid.clone(),
            helpers::now(),
        )
        .await
        .unwrap();
        store
            .save_context(
                &signed_in.token,
                SeatContext {
                    arcade_id: "1".to_string(),
                    player_seat: SeatColor::Red,
                },
            )
            .await;

        store.sign_out(&signed_in.token).await.unwrap();

        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert!(seat.is_free());
    }

    #[tokio::test]
    async fn test_sign_in_events_are_broadcast() {
        let store = store().await;
        let mut events = store.subscribe();

        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();
        store.sign_out(&signed_in.token).await.unwrap();

        let uid = signed_in.identity.uid;
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedIn { uid: uid.clone() }
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut { uid });
    }

    #[tokio::test]
    async fn test_federated_sign_in() {
        let store = store().await;

        let first = store
            .sign_in_federated(Some("fed-key"), "google", "sub-1", "carol@example.com")
            .await
            .unwrap();
        let second = store
            .sign_in_federated(Some("fed-key"), "google", "sub-1", "carol@example.com")
            .await
            .unwrap();
        assert_eq!(first.identity.uid, second.identity.uid);

        let denied = store
            .sign_in_federated(Some("wrong"), "google", "sub-1", "carol@example.com")
            .await;
        assert!(matches!(denied, Err(AppError::Auth(_))));

        // Federated-only accounts have no password
        let result = store.sign_in_with_password("carol@example.com", "anything").await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_federated_sign_in_disabled_without_key() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SessionStore::new(db, None, TTL);
        let result = store
            .sign_in_federated(Some("anything"), "google", "sub-1", "carol@example.com")
            .await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_sign_out_keeps_seat_held_by_other_session() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SessionStore::new(db.clone(), None, TTL);
        db.create_arcade("Main Hall".to_string()).await.unwrap();

        // alice sits on red from two devices
        let phone = store.register("alice@example.com", "secret1").await.unwrap();
        let tablet = store
            .sign_in_with_password("alice@example.com", "secret1")
            .await
            .unwrap();
        db.claim_seat(
            "1".to_string(),
            SeatColor::Red,
            phone.identity.uid.clone(),
            helpers::now(),
        )
        .await
        .unwrap();
        store.save_context(&phone.token, red_seat()).await;
        store.save_context(&tablet.token, red_seat()).await;

        store.sign_out(&phone.token).await.unwrap();

        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert_eq!(seat.user_id, phone.identity.uid);
        assert_eq!(store.load_context(&tablet.token).await, Some(red_seat()));

        // The last session out frees it
        store.sign_out(&tablet.token).await.unwrap();
        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert!(seat.is_free());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_swept() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SessionStore::new(db.clone(), None, Duration::from_millis(1));
        db.create_arcade("Main Hall".to_string()).await.unwrap();

        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();
        db.claim_seat(
            "1".to_string(),
            SeatColor::Red,
            signed_in.identity.uid.clone(),
            helpers::now(),
        )
        .await
        .unwrap();
        store.save_context(&signed_in.token, red_seat()).await;
        let mut events = store.subscribe();

        tokio::time::sleep(Duration::from_millis(20)).await;

        // Expired sessions are gone before the sweep runs
        assert!(store.session(&signed_in.token).await.is_none());
        assert!(store.current_user(&signed_in.token).await.is_none());
        assert!(!store.save_context(&signed_in.token, red_seat()).await);

        assert_eq!(store.expire_sessions().await, 1);
        assert_eq!(store.expire_sessions().await, 0);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SignedOut {
                uid: signed_in.identity.uid.clone()
            }
        );
        let seat = db.get_seat("1".to_string(), SeatColor::Red).await.unwrap().unwrap();
        assert!(seat.is_free());
    }

    #[tokio::test]
    async fn test_live_sessions_survive_sweep() {
        let store = store().await;
        let signed_in = store.register("alice@example.com", "secret1").await.unwrap();

        assert_eq!(store.expire_sessions().await, 0);
        assert!(store.current_user(&signed_in.token).await.is_some());
    }
}
