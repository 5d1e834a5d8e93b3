use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use careline_domain::chat::ThreadRef;
use careline_domain::identity::ConnectionSession;
use careline_domain::roles::{Role, SenderRole};

use crate::gatekeeper::{self, HandshakeQuery};
use crate::realtime::{Room, ServerEvent};
use crate::routes::broadcast_new_message;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientEvent {
    JoinChat,
    JoinThread { thread_id: String },
    SendMessage {
        content: String,
        thread_id: Option<String>,
    },
    TypingStart { thread_id: Option<String> },
    TypingStop { thread_id: Option<String> },
    MarkRead { thread_id: Option<String> },
}

/// Socket endpoint. Authentication happens here, on the upgrade request,
/// so a socket that fails the gate is refused with a plain 401 body and
/// never reaches the event loop.
pub async fn chat_socket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match gatekeeper::authenticate(&state, &headers, &query).await {
        Ok(session) => ws.on_upgrade(move |socket| handle_socket(socket, state, session)),
        Err(err) => err.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, session: ConnectionSession) {
    let room = match session.effective_role {
        Role::Admin => Room::Admins,
        Role::User => Room::Patient(session.user_id.clone()),
    };
    let mut updates = state.realtime.subscribe(&room).await;
    let (mut sink, mut incoming) = socket.split();

    tracing::info!(
        user_id = %session.user_id,
        role = session.effective_role.as_str(),
        room = room.kind(),
        "websocket connected"
    );

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(event) => {
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        user_id = %session.user_id,
                        skipped,
                        "websocket subscriber lagged"
                    );
                    let notice = ServerEvent::Error {
                        message: "missed realtime updates; refetch messages".to_string(),
                    };
                    if !send_event(&mut sink, &notice).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "realtime channel closed".into(),
                        })))
                        .await;
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&state, &session, &text, &mut sink).await;
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(error = %err, "websocket receive error");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(updates);
    state.realtime.prune(&room).await;
    tracing::info!(user_id = %session.user_id, "websocket disconnected");
}

async fn handle_client_frame(
    state: &AppState,
    session: &ConnectionSession,
    text: &str,
    sink: &mut SplitSink<WebSocket, Message>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(error = %err, "unrecognized client event");
            let notice = ServerEvent::Error {
                message: "unrecognized event".to_string(),
            };
            send_event(sink, &notice).await;
            return;
        }
    };

    if let Err(message) = dispatch(state, session, event, sink).await {
        // Failures stay on this socket; nothing is broadcast for them.
        let notice = ServerEvent::Error { message };
        send_event(sink, &notice).await;
    }
}

async fn dispatch(
    state: &AppState,
    session: &ConnectionSession,
    event: ClientEvent,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), String> {
    match event {
        ClientEvent::JoinChat => {
            if session.effective_role.is_admin() {
                return Err("admins join individual threads".to_string());
            }
            let thread = state
                .chat
                .get_or_create_thread(&session.user_id)
                .await
                .map_err(|err| err.to_string())?;
            send_event(sink, &ServerEvent::ChatJoined { thread }).await;
            Ok(())
        }
        ClientEvent::JoinThread { thread_id } => {
            if !session.effective_role.is_admin() {
                return Err("patients have a single thread; use join_chat".to_string());
            }
            let thread = state
                .chat
                .get_thread(&thread_id)
                .await
                .map_err(|err| err.to_string())?;
            send_event(sink, &ServerEvent::ChatJoined { thread }).await;
            Ok(())
        }
        ClientEvent::SendMessage { content, thread_id } => {
            let outcome = if session.effective_role.is_admin() {
                let thread_id =
                    thread_id.ok_or_else(|| "thread_id is required for admins".to_string())?;
                state
                    .chat
                    .send_message(
                        ThreadRef::Thread(&thread_id),
                        &session.user_id,
                        SenderRole::Admin,
                        &content,
                    )
                    .await
                    .map_err(|err| err.to_string())?
            } else {
                state
                    .chat
                    .send_message(
                        ThreadRef::Patient(&session.user_id),
                        &session.user_id,
                        SenderRole::Patient,
                        &content,
                    )
                    .await
                    .map_err(|err| err.to_string())?
            };
            broadcast_new_message(state, outcome).await;
            Ok(())
        }
        ClientEvent::TypingStart { thread_id } => {
            relay_typing(state, session, thread_id, true).await
        }
        ClientEvent::TypingStop { thread_id } => {
            relay_typing(state, session, thread_id, false).await
        }
        ClientEvent::MarkRead { thread_id } => {
            let (thread_id, updated_count) = if session.effective_role.is_admin() {
                let thread_id =
                    thread_id.ok_or_else(|| "thread_id is required for admins".to_string())?;
                let count = state
                    .chat
                    .mark_patient_messages_read(&thread_id)
                    .await
                    .map_err(|err| err.to_string())?;
                (thread_id, count)
            } else {
                let thread = state
                    .chat
                    .get_or_create_thread(&session.user_id)
                    .await
                    .map_err(|err| err.to_string())?;
                let count = state
                    .chat
                    .mark_admin_messages_read(&thread.thread_id)
                    .await
                    .map_err(|err| err.to_string())?;
                (thread.thread_id, count)
            };
            state
                .realtime
                .publish(
                    &Room::Admins,
                    ServerEvent::MessagesRead {
                        thread_id,
                        updated_count,
                    },
                )
                .await;
            Ok(())
        }
    }
}

/// Typing indicators cross the role boundary: a typing patient is shown to
/// the admin pool, a typing admin is shown to the thread's patient.
async fn relay_typing(
    state: &AppState,
    session: &ConnectionSession,
    thread_id: Option<String>,
    is_typing: bool,
) -> Result<(), String> {
    let (room, thread_id) = if session.effective_role.is_admin() {
        let thread_id = thread_id.ok_or_else(|| "thread_id is required for admins".to_string())?;
        let thread = state
            .chat
            .get_thread(&thread_id)
            .await
            .map_err(|err| err.to_string())?;
        (Room::Patient(thread.patient_id), thread_id)
    } else {
        let thread = state
            .chat
            .get_or_create_thread(&session.user_id)
            .await
            .map_err(|err| err.to_string())?;
        (Room::Admins, thread.thread_id)
    };

    state
        .realtime
        .publish(
            &room,
            ServerEvent::UserTyping {
                thread_id,
                user_id: session.user_id.clone(),
                email: session.email.clone(),
                is_typing,
            },
        )
        .await;
    Ok(())
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize server event");
            return true;
        }
    };
    sink.send(Message::Text(payload)).await.is_ok()
}
