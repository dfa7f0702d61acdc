//! Screen routing and view models.
//!
//! The client renders three screens: the entry form (`/`), the main screen
//! once a seat is assigned (`/loggedin`) and the admin screen (`/admin`).
//! This module decides which screen a request may see and builds the data
//! each screen shows. Rendering itself stays on the client.

use arcade_db::{Arcade, LoginEvent, Seat, SeatColor};
use serde::Serialize;

use crate::session::SeatContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Entry,
    LoggedIn,
    Admin,
}

impl Screen {
    pub fn path(&self) -> &'static str {
        match self {
            Screen::Entry => "/",
            Screen::LoggedIn => "/loggedin",
            Screen::Admin => "/admin",
        }
    }

    /// Screen to redirect to instead of this one, if any.
    ///
    /// A signed-in user never sees the entry form, a signed-out user never
    /// sees anything else.
    pub fn redirect_for(&self, signed_in: bool) -> Option<Screen> {
        match (self, signed_in) {
            (Screen::Entry, true) => Some(Screen::LoggedIn),
            (Screen::LoggedIn | Screen::Admin, false) => Some(Screen::Entry),
            _ => None,
        }
    }
}

impl Serialize for Screen {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.path())
    }
}

/// A navigation instruction: target screen, query parameters and error payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Navigation {
    pub screen: Screen,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arcade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_seat: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Navigation {
    pub fn to(screen: Screen) -> Self {
        Self {
            screen,
            arcade_id: None,
            player_seat: None,
            errors: Vec::new(),
        }
    }

    /// Back to the entry form, keeping the seat the user scanned.
    pub fn back_to_entry(
        arcade_id: Option<String>,
        player_seat: Option<String>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            screen: Screen::Entry,
            arcade_id,
            player_seat,
            errors,
        }
    }
}

/// Logo asset matching a seat color; the plain logo for no or unknown seat.
pub fn logo_for(player_seat: Option<&str>) -> &'static str {
    match player_seat.and_then(|seat| seat.parse::<SeatColor>().ok()) {
        Some(SeatColor::Red) => "logo-red.png",
        Some(SeatColor::Blue) => "logo-blue.png",
        Some(SeatColor::Green) => "logo-green.png",
        Some(SeatColor::Yellow) => "logo-yellow.png",
        None => "logo.png",
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArcadeView {
    pub id: String,
    pub name: String,
}

impl From<Arcade> for ArcadeView {
    fn from(arcade: Arcade) -> Self {
        Self {
            id: arcade.id,
            name: arcade.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeatView {
    pub color: &'static str,
    pub occupied: bool,
    /// Last claim or vacate in epoch millis; absent if never written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SeatView {
    pub fn new(color: SeatColor, seat: Option<&Seat>) -> Self {
        Self {
            color: color.as_str(),
            occupied: seat.is_some_and(|s| !s.is_free()),
            timestamp: seat.map(|s| s.timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginEventView {
    pub key: String,
    pub arcade_id: String,
    pub player_seat: &'static str,
    pub timestamp: i64,
}

impl From<LoginEvent> for LoginEventView {
    fn from(event: LoginEvent) -> Self {
        Self {
            key: event.key,
            arcade_id: event.arcade_id,
            player_seat: event.player_seat.as_str(),
            timestamp: event.timestamp,
        }
    }
}

/// Entry form: login/register with the scanned arcade and seat prefilled.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub arcade_id: Option<String>,
    pub player_seat: Option<String>,
    pub logo: &'static str,
    pub errors: Vec<String>,
    pub arcades: Vec<ArcadeView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedInView {
    pub email: String,
    pub arcade_id: Option<String>,
    pub player_seat: Option<String>,
    pub logo: &'static str,
}

impl LoggedInView {
    pub fn new(email: String, context: Option<SeatContext>) -> Self {
        let (arcade_id, player_seat) = match context {
            Some(ctx) => (Some(ctx.arcade_id), Some(ctx.player_seat.as_str().to_string())),
            None => (None, None),
        };
        let logo = logo_for(player_seat.as_deref());
        Self {
            email,
            arcade_id,
            player_seat,
            logo,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminView {
    pub arcades: Vec<ArcadeView>,
}

/// Either the screen's data or where to go instead.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewResponse<T> {
    View(T),
    Redirect(Navigation),
}
