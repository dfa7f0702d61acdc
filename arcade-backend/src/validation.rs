/// Input validation for all backend routes. Nothing here touches the database.
use arcade_db::SeatColor;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
const MAX_EMAIL_LEN: usize = 254;
const MAX_ARCADE_NAME_LEN: usize = 100;
const MAX_FEDERATED_FIELD_LEN: usize = 255;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Arcade ID and Player Seat are required.")]
    SeatContextMissing,

    #[error("Unknown player seat '{0}' (expected red, blue, green or yellow)")]
    UnknownSeat(String),

    #[error("Email cannot be empty")]
    EmailEmpty,

    #[error("Email address is badly formatted")]
    EmailInvalid,

    #[error("Email too long (max 254 characters, got {0})")]
    EmailTooLong(usize),

    #[error("Password cannot be empty")]
    PasswordEmpty,

    #[error("Password should be at least 6 characters long")]
    PasswordTooShort,

    #[error("Arcade name cannot be empty")]
    ArcadeNameEmpty,

    #[error("Arcade name too long (max 100 characters, got {0})")]
    ArcadeNameTooLong(usize),

    #[error("Federated identity needs a provider and a subject")]
    FederatedIdentityIncomplete,
}

impl ValidationError {
    /// Messages shown to the user, first one being the error itself.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ValidationError::SeatContextMissing => {
                vec![self.to_string(), "Scan the QR code again!".to_string()]
            }
            _ => vec![self.to_string()],
        }
    }
}

/// Validates the arcade and seat a check-in targets
///
/// Rules:
/// - Both values must be present and non-blank
/// - The seat must be one of red, blue, green, yellow
pub fn validate_seat_context(
    arcade_id: Option<&str>,
    player_seat: Option<&str>,
) -> Result<(String, SeatColor), ValidationError> {
    let arcade_id = arcade_id.map(str::trim).unwrap_or_default();
    let player_seat = player_seat.map(str::trim).unwrap_or_default();

    if arcade_id.is_empty() || player_seat.is_empty() {
        return Err(ValidationError::SeatContextMissing);
    }

    Ok((arcade_id.to_string(), parse_seat_color(player_seat)?))
}

pub fn parse_seat_color(seat: &str) -> Result<SeatColor, ValidationError> {
    seat.parse()
        .map_err(|_| ValidationError::UnknownSeat(seat.to_string()))
}

/// Validates an email address and returns it normalized (trimmed, lowercase)
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::EmailEmpty);
    }

    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::EmailTooLong(email.len()));
    }

    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(email.to_lowercase())
        }
        _ => Err(ValidationError::EmailInvalid),
    }
}

/// Password for sign-in: only needs to be present
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::PasswordEmpty);
    }
    Ok(())
}

/// Password for registration: at least 6 characters
pub fn validate_new_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// Validates an arcade name and returns it trimmed
pub fn validate_arcade_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::ArcadeNameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_ARCADE_NAME_LEN {
        return Err(ValidationError::ArcadeNameTooLong(len));
    }

    Ok(name.to_string())
}

pub fn validate_federated_identity(provider: &str, subject: &str) -> Result<(), ValidationError> {
    let valid = |field: &str| !field.trim().is_empty() && field.len() <= MAX_FEDERATED_FIELD_LEN;
    if !valid(provider) || !valid(subject) {
        return Err(ValidationError::FederatedIdentityIncomplete);
    }
    Ok(())
}
