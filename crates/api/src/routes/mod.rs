pub mod ws;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use careline_domain::chat::{ChatMessage, ChatThread, SendOutcome, ThreadRef};
use careline_domain::roles::SenderRole;

use crate::error::{map_domain_error, validate_payload, ApiError};
use crate::middleware::AuthContext;
use crate::realtime::{Room, ServerEvent};
use crate::{middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/chat/threads", get(admin_list_threads))
        .route(
            "/admin/chat/threads/:thread_id/messages",
            get(admin_list_messages).post(admin_send_message),
        )
        .route("/admin/chat/threads/:thread_id/read", post(admin_mark_read))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::require_admin_middleware,
        ));

    let user = Router::new()
        .route("/chat/thread", get(user_get_thread))
        .route(
            "/chat/messages",
            get(user_list_messages).post(user_send_message),
        )
        .route("/chat/read", post(user_mark_read));

    let protected = admin
        .merge(user)
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/chat", get(ws::chat_socket))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> impl IntoResponse {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ThreadListQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct MessageListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessageRequest {
    #[validate(length(min = 1, max = 2_000))]
    content: String,
}

#[derive(Serialize)]
struct ThreadListItem {
    #[serde(flatten)]
    thread: ChatThread,
    patient_email: Option<String>,
    patient_name: Option<String>,
}

#[derive(Serialize)]
struct MarkReadResponse {
    thread_id: String,
    updated_count: u64,
}

async fn admin_list_threads(
    State(state): State<AppState>,
    Query(query): Query<ThreadListQuery>,
) -> Result<Json<Vec<ThreadListItem>>, ApiError> {
    let threads = state
        .chat
        .list_threads(query.page, query.page_size)
        .await
        .map_err(map_domain_error)?;

    let mut items = Vec::with_capacity(threads.len());
    for thread in threads {
        let profile = state
            .profiles
            .profile_of(&thread.patient_id)
            .await
            .map_err(map_domain_error)?;
        items.push(ThreadListItem {
            patient_email: profile.as_ref().map(|profile| profile.email.clone()),
            patient_name: profile.map(|profile| profile.full_name),
            thread,
        });
    }
    Ok(Json(items))
}

async fn admin_list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    state
        .chat
        .get_thread(&thread_id)
        .await
        .map_err(map_domain_error)?;
    let messages = state
        .chat
        .list_messages(&thread_id, query.limit)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(messages))
}

async fn admin_send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    validate_payload(&payload)?;
    let (admin_id, _) = actor(&auth)?;
    let outcome = state
        .chat
        .send_message(
            ThreadRef::Thread(&thread_id),
            &admin_id,
            SenderRole::Admin,
            &payload.content,
        )
        .await
        .map_err(map_domain_error)?;
    let message = outcome.message.clone();
    broadcast_new_message(&state, outcome).await;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn admin_mark_read(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated_count = state
        .chat
        .mark_patient_messages_read(&thread_id)
        .await
        .map_err(map_domain_error)?;
    state
        .realtime
        .publish(
            &Room::Admins,
            ServerEvent::MessagesRead {
                thread_id: thread_id.clone(),
                updated_count,
            },
        )
        .await;
    Ok(Json(MarkReadResponse {
        thread_id,
        updated_count,
    }))
}

async fn user_get_thread(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ChatThread>, ApiError> {
    let (user_id, _) = actor(&auth)?;
    let thread = state
        .chat
        .get_or_create_thread(&user_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(thread))
}

async fn user_list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let (user_id, _) = actor(&auth)?;
    let thread = state
        .chat
        .get_or_create_thread(&user_id)
        .await
        .map_err(map_domain_error)?;
    let messages = state
        .chat
        .list_messages(&thread.thread_id, query.limit)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(messages))
}

async fn user_send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    validate_payload(&payload)?;
    let (user_id, _) = actor(&auth)?;
    let outcome = state
        .chat
        .send_message(
            ThreadRef::Patient(&user_id),
            &user_id,
            SenderRole::Patient,
            &payload.content,
        )
        .await
        .map_err(map_domain_error)?;
    let message = outcome.message.clone();
    broadcast_new_message(&state, outcome).await;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn user_mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let (user_id, _) = actor(&auth)?;
    let thread = state
        .chat
        .get_or_create_thread(&user_id)
        .await
        .map_err(map_domain_error)?;
    let updated_count = state
        .chat
        .mark_admin_messages_read(&thread.thread_id)
        .await
        .map_err(map_domain_error)?;
    state
        .realtime
        .publish(
            &Room::Admins,
            ServerEvent::MessagesRead {
                thread_id: thread.thread_id.clone(),
                updated_count,
            },
        )
        .await;
    Ok(Json(MarkReadResponse {
        thread_id: thread.thread_id,
        updated_count,
    }))
}

fn actor(auth: &AuthContext) -> Result<(String, String), ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    let email = auth.email.clone().unwrap_or_else(|| user_id.clone());
    Ok((user_id.clone(), email))
}

/// Fanout for a freshly persisted message, shared by both transports:
/// the admin pool sees every message, the patient sees their own thread.
pub(crate) async fn broadcast_new_message(state: &AppState, outcome: SendOutcome) {
    let patient_room = Room::Patient(outcome.thread.patient_id.clone());
    let event = ServerEvent::NewMessage {
        message: outcome.message,
        thread: outcome.thread,
    };
    state.realtime.publish(&Room::Admins, event.clone()).await;
    state.realtime.publish(&patient_room, event).await;
}
