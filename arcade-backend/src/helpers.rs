use rand::distr::{Alphanumeric, SampleString};
use rand::rng;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bearer token handed out on sign-in. Only its hash is kept server side.
pub fn generate_session_token() -> String {
  format!("arcade-st-{}", Alphanumeric.sample_string(&mut rng(), 32))
}

/// Opaque user id, same shape as the ids the hosted identity provider issued.
pub fn generate_uid() -> String {
  Alphanumeric.sample_string(&mut rng(), 28)
}

pub fn generate_salt() -> String {
  Alphanumeric.sample_string(&mut rng(), 16)
}

pub fn hash_token(token: &str) -> String {
  format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub fn hash_password(password: &str, salt: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(salt.as_bytes());
  hasher.update(b":");
  hasher.update(password.as_bytes());
  format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
  constant_time_eq(hash_password(password, salt).as_bytes(), expected_hash.as_bytes())
}

/// Compare without returning early on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// Current time in milliseconds since the Unix epoch.
pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or_default()
}
