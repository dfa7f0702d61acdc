use crate::error::AppError;
use crate::helpers::now;
use crate::session::Identity;
use crate::validation;
use crate::view::{
    AdminView, ArcadeView, EntryView, LoggedInView, LoginEventView, Navigation, Screen, SeatView,
    ViewResponse, logo_for,
};
use crate::workflow::{CheckinRequest, CheckinWorkflow, Credentials};
use crate::AppState;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    Json,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use headers::authorization::Bearer;
use headers::Authorization;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

fn bearer(auth: &BearerHeader) -> Option<&str> {
    auth.as_ref().map(|TypedHeader(auth)| auth.token())
}

/// Identity of the bearer, or 401.
async fn require_user(state: &AppState, auth: &BearerHeader) -> Result<Identity, AppError> {
    let token = bearer(auth).ok_or_else(AppError::sign_in_required)?;
    state
        .sessions
        .current_user(token)
        .await
        .ok_or_else(AppError::sign_in_required)
}

/// Identity of the bearer if it may manage arcades, 401/403 otherwise.
async fn require_admin(state: &AppState, auth: &BearerHeader) -> Result<Identity, AppError> {
    let identity = require_user(state, auth).await?;
    if !state.is_admin(&identity.email) {
        return Err(AppError::Forbidden);
    }
    Ok(identity)
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Deserialize)]
pub(crate) struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub(crate) struct FederatedRequest {
    provider: String,
    subject: String,
    email: String,
}

#[derive(Serialize)]
pub(crate) struct SignInResponse {
    token: String,
    user: Identity,
}

#[debug_handler]
pub(crate) async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .sessions
        .register(&payload.email, &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignInResponse {
            token: signed_in.token,
            user: signed_in.identity,
        }),
    ))
}

pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .sessions
        .sign_in_with_password(&payload.email, &payload.password)
        .await?;

    Ok(Json(SignInResponse {
        token: signed_in.token,
        user: signed_in.identity,
    }))
}

pub(crate) async fn federated(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<FederatedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .sessions
        .sign_in_federated(
            bearer(&auth),
            &payload.provider,
            &payload.subject,
            &payload.email,
        )
        .await?;

    Ok(Json(SignInResponse {
        token: signed_in.token,
        user: signed_in.identity,
    }))
}

pub(crate) async fn logout(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = bearer(&auth) {
        state.sessions.sign_out(token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    user: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    arcade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    player_seat: Option<&'static str>,
}

pub(crate) async fn session_info(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer(&auth).ok_or_else(AppError::sign_in_required)?;
    let session = state
        .sessions
        .session(token)
        .await
        .ok_or_else(AppError::sign_in_required)?;

    let (arcade_id, player_seat) = match session.context {
        Some(ctx) => (Some(ctx.arcade_id), Some(ctx.player_seat.as_str())),
        None => (None, None),
    };
    Ok(Json(SessionResponse {
        user: session.identity,
        arcade_id,
        player_seat,
    }))
}

/// Sign-in and sign-out notifications for the bearer's own account.
pub(crate) async fn session_events(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let uid = require_user(&state, &auth).await?.uid;

    let stream = BroadcastStream::new(state.sessions.subscribe()).filter_map(move |event| {
        match event {
            Ok(event) if event.uid() == uid => Event::default().json_data(&event).ok().map(Ok),
            // Lagged receivers and other users' events are skipped
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Check-in
// ============================================================================

#[derive(Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(crate) enum CheckinCredentials {
    Login {
        email: String,
        password: String,
    },
    Register {
        email: String,
        password: String,
    },
    Federated {
        provider: String,
        subject: String,
        email: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckinBody {
    #[serde(flatten)]
    credentials: CheckinCredentials,
    arcade_id: Option<String>,
    player_seat: Option<String>,
}

/// Seat context from the scanned QR link.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeatQuery {
    arcade_id: Option<String>,
    player_seat: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckinResponse {
    token: String,
    user: Identity,
    arcade_id: String,
    player_seat: &'static str,
    timestamp: i64,
    navigate: Navigation,
}

/// Check in from the entry form. Body values win over query parameters.
pub(crate) async fn checkin(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Query(query): Query<SeatQuery>,
    Json(payload): Json<CheckinBody>,
) -> Response {
    let credentials = match payload.credentials {
        CheckinCredentials::Login { email, password } => Credentials::Password { email, password },
        CheckinCredentials::Register { email, password } => Credentials::Register { email, password },
        CheckinCredentials::Federated {
            provider,
            subject,
            email,
        } => Credentials::Federated {
            federation_key: bearer(&auth).map(str::to_string),
            provider,
            subject,
            email,
        },
    };
    let request = CheckinRequest {
        credentials,
        arcade_id: payload.arcade_id.or(query.arcade_id),
        player_seat: payload.player_seat.or(query.player_seat),
    };

    let mut workflow = CheckinWorkflow::new(&state.db, &state.sessions);
    match workflow.check_in(request).await {
        Ok(assignment) => Json(CheckinResponse {
            token: assignment.token,
            user: assignment.identity,
            arcade_id: assignment.seat.arcade_id,
            player_seat: assignment.seat.color.as_str(),
            timestamp: assignment.seat.timestamp,
            navigate: assignment.navigation,
        })
        .into_response(),
        Err(rejection) => rejection
            .error
            .into_response_with(Some(rejection.navigation)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeatChangeRequest {
    arcade_id: Option<String>,
    player_seat: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeatChangeResponse {
    arcade_id: String,
    player_seat: &'static str,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    released: Option<ReleasedSeat>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReleasedSeat {
    arcade_id: String,
    player_seat: &'static str,
}

pub(crate) async fn change_seat(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<SeatChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer(&auth).ok_or_else(AppError::sign_in_required)?;

    let mut workflow = CheckinWorkflow::new(&state.db, &state.sessions);
    let change = workflow
        .change_seat(
            token,
            payload.arcade_id.as_deref(),
            payload.player_seat.as_deref(),
        )
        .await?;

    Ok(Json(SeatChangeResponse {
        arcade_id: change.seat.arcade_id,
        player_seat: change.seat.color.as_str(),
        timestamp: change.seat.timestamp,
        released: change.released.map(|ctx| ReleasedSeat {
            arcade_id: ctx.arcade_id,
            player_seat: ctx.player_seat.as_str(),
        }),
    }))
}

// ============================================================================
// Arcades
// ============================================================================

#[derive(Deserialize)]
pub(crate) struct UpsertArcadeRequest {
    id: Option<String>,
    name: String,
}

#[derive(Deserialize)]
pub(crate) struct RenameArcadeRequest {
    name: String,
}

pub(crate) async fn list_arcades(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let arcades: Vec<ArcadeView> = state
        .db
        .list_arcades()
        .await?
        .into_iter()
        .map(ArcadeView::from)
        .collect();
    Ok(Json(arcades))
}

pub(crate) async fn get_arcade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let arcade = state
        .db
        .get_arcade(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Arcade not found".to_string()))?;
    Ok(Json(ArcadeView::from(arcade)))
}

/// Create an arcade, or rename one when an id is given.
pub(crate) async fn upsert_arcade(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(payload): Json<UpsertArcadeRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &auth).await?;
    let name = validation::validate_arcade_name(&payload.name)?;

    let id = payload.id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
    let (status, arcade) = match id {
        Some(id) => (StatusCode::OK, state.db.rename_arcade(id, name).await?),
        None => (StatusCode::CREATED, state.db.create_arcade(name).await?),
    };

    tracing::info!(arcade_id = %arcade.id, "arcade saved");
    Ok((status, Json(ArcadeView::from(arcade))))
}

pub(crate) async fn rename_arcade(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Path(id): Path<String>,
    Json(payload): Json<RenameArcadeRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &auth).await?;
    let name = validation::validate_arcade_name(&payload.name)?;

    let arcade = state.db.rename_arcade(id, name).await?;
    Ok(Json(ArcadeView::from(arcade)))
}

pub(crate) async fn delete_arcade(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &auth).await?;

    state.db.delete_arcade(id.clone()).await?;
    tracing::info!(arcade_id = %id, "arcade deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Seats of an arcade. Also answers for deleted arcades whose seats remain.
pub(crate) async fn list_seats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let seats: Vec<SeatView> = state
        .db
        .list_seats(id)
        .await?
        .iter()
        .map(|(color, seat)| SeatView::new(*color, seat.as_ref()))
        .collect();
    Ok(Json(seats))
}

pub(crate) async fn vacate_seat(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Path((id, color)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &auth).await?;
    let color = validation::parse_seat_color(&color)?;

    let seat = state.db.vacate_seat(id, color, now()).await?;
    Ok(Json(SeatView::new(color, Some(&seat))))
}

/// Check-in history of one user, newest first.
pub(crate) async fn user_login_events(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &auth).await?;

    if state.db.get_user(uid.clone()).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    let events: Vec<LoginEventView> = state
        .db
        .login_events_for_user(uid)
        .await?
        .into_iter()
        .map(LoginEventView::from)
        .collect();
    Ok(Json(events))
}

// ============================================================================
// Views
// ============================================================================

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntryQuery {
    arcade_id: Option<String>,
    player_seat: Option<String>,
    error: Option<String>,
}

fn redirect(screen: Screen) -> ViewResponse<()> {
    ViewResponse::Redirect(Navigation::to(screen))
}

pub(crate) async fn entry_view(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Query(query): Query<EntryQuery>,
) -> Result<Response, AppError> {
    let signed_in = match bearer(&auth) {
        Some(token) => state.sessions.current_user(token).await.is_some(),
        None => false,
    };
    if let Some(target) = Screen::Entry.redirect_for(signed_in) {
        return Ok(Json(redirect(target)).into_response());
    }

    let arcades = state
        .db
        .list_arcades()
        .await?
        .into_iter()
        .map(ArcadeView::from)
        .collect();
    let logo = logo_for(query.player_seat.as_deref());
    let view = EntryView {
        arcade_id: query.arcade_id,
        player_seat: query.player_seat,
        logo,
        errors: query.error.into_iter().collect(),
        arcades,
    };
    Ok(Json(ViewResponse::View(view)).into_response())
}

pub(crate) async fn loggedin_view(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<Response, AppError> {
    let session = match bearer(&auth) {
        Some(token) => state.sessions.session(token).await,
        None => None,
    };
    let Some(session) = session else {
        return Ok(Json(redirect(Screen::Entry)).into_response());
    };

    let view = LoggedInView::new(session.identity.email, session.context);
    Ok(Json(ViewResponse::View(view)).into_response())
}

pub(crate) async fn admin_view(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<Response, AppError> {
    let identity = match bearer(&auth) {
        Some(token) => state.sessions.current_user(token).await,
        None => None,
    };
    if let Some(target) = Screen::Admin.redirect_for(identity.is_some()) {
        return Ok(Json(redirect(target)).into_response());
    }
    require_admin(&state, &auth).await?;

    let arcades = state
        .db
        .list_arcades()
        .await?
        .into_iter()
        .map(ArcadeView::from)
        .collect();
    Ok(Json(ViewResponse::View(AdminView { arcades })).into_response())
}
