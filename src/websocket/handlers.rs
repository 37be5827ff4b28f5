use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::gateway;
use crate::presence::ConnectionHandle;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{MessagePipeline, SendRequest};
use crate::services::read_state_service::ReadStateService;
use crate::state::AppState;
use crate::websocket::message_types::{ClientCommand, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

fn bearer_token<'a>(params: &'a WsParams, headers: &'a HeaderMap) -> Option<&'a str> {
    params.token.as_deref().or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
    })
}

/// Upgrade endpoint. Authentication happens before the upgrade completes, so
/// a refused connection never enters the presence registry or receives a
/// single event.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credential = bearer_token(&params, &headers);
    let snapshot =
        match gateway::authenticate(&state.config, &*state.accounts, credential).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(reason = e.reason(), "websocket connection refused");
                return e.into_response();
            }
        };

    ws.on_upgrade(move |socket| handle_socket(state, snapshot.id, socket))
}

async fn handle_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    let (handle, mut rx) = ConnectionHandle::new(user_id);
    let handle_id = handle.id;

    let went_online = state.presence.register(handle.clone()).await;
    crate::metrics::WS_CONNECTIONS.inc();
    if went_online {
        crate::metrics::ONLINE_USERS.inc();
        state.presence.broadcast_presence(user_id, true).await;
    }
    info!(%user_id, handle = %handle_id, went_online, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let mut shutdown = state.shutdown_signal();

    loop {
        tokio::select! {
            // Server shutdown closes every socket so the graceful-shutdown
            // wait in main can complete and the drain sequence runs.
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if sink.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // Handle dropped from the registry (reaper), stop the task.
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&state, &handle, &text).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%user_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    let remaining = state.presence.unregister(user_id, handle_id).await;
    crate::metrics::WS_CONNECTIONS.dec();
    if remaining == 0 {
        crate::metrics::ONLINE_USERS.dec();
        state.presence.broadcast_presence(user_id, false).await;
        if let Err(e) = state.accounts.mark_offline(user_id).await {
            warn!(%user_id, error = %e, "failed to record last-seen on disconnect");
        }
    }
    info!(%user_id, handle = %handle_id, remaining, "websocket disconnected");
}

async fn handle_text_frame(state: &AppState, handle: &ConnectionHandle, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(user_id = %handle.user_id, error = %e, "unparseable client frame");
            handle.send(&ServerEvent::Error {
                reason: "bad_request".into(),
            });
            return;
        }
    };
    dispatch_command(state, handle, command).await;
}

/// Exhaustive command dispatch. Failures are scoped to the issuing handle:
/// an error event (or rejection) goes back on this connection and the
/// connection stays up.
async fn dispatch_command(state: &AppState, handle: &ConnectionHandle, command: ClientCommand) {
    match command {
        ClientCommand::Join { conversation_id } => {
            match ConversationService::authorize(&*state.store, conversation_id, handle.user_id)
                .await
            {
                Ok(_) => {
                    handle.subscribe(conversation_id).await;
                    handle.send(&ServerEvent::Joined { conversation_id });
                }
                Err(e) => {
                    handle.send(&ServerEvent::Error {
                        reason: e.reason().into(),
                    });
                }
            }
        }

        ClientCommand::Leave { conversation_id } => {
            handle.unsubscribe(conversation_id).await;
        }

        ClientCommand::Send {
            conversation_id,
            receiver_id,
            content,
            kind,
            correlation_id,
        } => {
            let request = SendRequest {
                conversation_id,
                receiver_id,
                content,
                kind,
                correlation_id: correlation_id.clone(),
            };
            match MessagePipeline::send(state, handle.user_id, request).await {
                Ok((conversation, message)) => {
                    MessagePipeline::fan_out(
                        &state.presence,
                        &conversation,
                        &message,
                        correlation_id,
                        Some(handle.id),
                    )
                    .await;
                }
                Err(e) => {
                    crate::metrics::MESSAGES_REJECTED_TOTAL
                        .with_label_values(&[e.reason()])
                        .inc();
                    handle.send(&ServerEvent::MessageRejected {
                        reason: e.reason().into(),
                        correlation_id,
                    });
                }
            }
        }

        // Typing is advisory: malformed ids, unjoined channels and lookup
        // failures are all dropped without a reply.
        ClientCommand::Typing { conversation_id } => {
            relay_typing(state, handle, &conversation_id, true).await;
        }
        ClientCommand::StopTyping { conversation_id } => {
            relay_typing(state, handle, &conversation_id, false).await;
        }

        ClientCommand::MarkRead { conversation_id } => {
            if let Err(e) =
                ReadStateService::mark_read(state, conversation_id, handle.user_id).await
            {
                handle.send(&ServerEvent::Error {
                    reason: e.reason().into(),
                });
            }
        }
    }
}

async fn relay_typing(state: &AppState, handle: &ConnectionHandle, raw_id: &str, started: bool) {
    let conversation_id = match Uuid::parse_str(raw_id) {
        Ok(id) => id,
        Err(_) => return,
    };
    if !handle.is_subscribed(conversation_id).await {
        return;
    }
    let conv = match ConversationService::authorize(&*state.store, conversation_id, handle.user_id)
        .await
    {
        Ok(conv) => conv,
        Err(_) => return,
    };
    let Some(counterpart) = conv.other_participant(handle.user_id) else {
        return;
    };

    let event = if started {
        ServerEvent::TypingStarted {
            conversation_id,
            user_id: handle.user_id,
        }
    } else {
        ServerEvent::TypingStopped {
            conversation_id,
            user_id: handle.user_id,
        }
    };
    for other in state.presence.handles_for(counterpart).await {
        if other.is_subscribed(conversation_id).await {
            other.send(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::accounts::MemoryAccountDirectory;
    use crate::config::Config;
    use crate::services::conversation_service::ConversationService;
    use crate::storage::MemoryChatStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_state() -> (AppState, Arc<MemoryAccountDirectory>) {
        let accounts = Arc::new(MemoryAccountDirectory::new());
        let state = AppState::new(
            Arc::new(MemoryChatStore::new()),
            accounts.clone(),
            Arc::new(Config::test_defaults()),
        );
        (state, accounts)
    }

    fn recv(rx: &mut UnboundedReceiver<String>) -> Option<serde_json::Value> {
        rx.try_recv()
            .ok()
            .map(|p| serde_json::from_str(&p).unwrap())
    }

    #[tokio::test]
    async fn joining_a_foreign_conversation_yields_an_error_event() {
        let (state, accounts) = test_state();
        let a = accounts.add_entitled_user().await;
        let b = accounts.add_entitled_user().await;
        let outsider = accounts.add_entitled_user().await;
        let conv = ConversationService::get_or_create(&*state.store, a, b)
            .await
            .unwrap();

        let (handle, mut rx) = ConnectionHandle::new(outsider);
        dispatch_command(
            &state,
            &handle,
            ClientCommand::Join {
                conversation_id: conv.id,
            },
        )
        .await;

        let event = recv(&mut rx).unwrap();
        assert_eq!(event["type"], "error");
        assert_eq!(event["reason"], "not_a_participant");
        assert!(!handle.is_subscribed(conv.id).await);
    }

    #[tokio::test]
    async fn a_rejected_send_echoes_the_correlation_token() {
        let (state, accounts) = test_state();
        let free = accounts.add_free_user().await;
        let other = accounts.add_entitled_user().await;

        let (handle, mut rx) = ConnectionHandle::new(free);
        dispatch_command(
            &state,
            &handle,
            ClientCommand::Send {
                conversation_id: None,
                receiver_id: Some(other),
                content: "hi".into(),
                kind: Default::default(),
                correlation_id: Some("c7".into()),
            },
        )
        .await;

        let event = recv(&mut rx).unwrap();
        assert_eq!(event["type"], "message.rejected");
        assert_eq!(event["reason"], "not_entitled");
        assert_eq!(event["correlation_id"], "c7");
    }

    #[tokio::test]
    async fn typing_with_a_malformed_id_is_silently_dropped() {
        let (state, accounts) = test_state();
        let user = accounts.add_entitled_user().await;
        let (handle, mut rx) = ConnectionHandle::new(user);

        dispatch_command(
            &state,
            &handle,
            ClientCommand::Typing {
                conversation_id: "not-a-uuid".into(),
            },
        )
        .await;
        assert!(recv(&mut rx).is_none());
    }

    #[tokio::test]
    async fn typing_reaches_only_subscribed_counterpart_handles() {
        let (state, accounts) = test_state();
        let a = accounts.add_entitled_user().await;
        let b = accounts.add_entitled_user().await;
        let conv = ConversationService::get_or_create(&*state.store, a, b)
            .await
            .unwrap();

        let (sender, _sender_rx) = ConnectionHandle::new(a);
        sender.subscribe(conv.id).await;

        let (joined, mut joined_rx) = ConnectionHandle::new(b);
        joined.subscribe(conv.id).await;
        let (idle, mut idle_rx) = ConnectionHandle::new(b);
        state.presence.register(joined).await;
        state.presence.register(idle).await;

        dispatch_command(
            &state,
            &sender,
            ClientCommand::Typing {
                conversation_id: conv.id.to_string(),
            },
        )
        .await;

        let event = recv(&mut joined_rx).unwrap();
        assert_eq!(event["type"], "typing.started");
        assert_eq!(event["user_id"], a.to_string());
        assert!(recv(&mut idle_rx).is_none());
    }

    #[tokio::test]
    async fn typing_from_an_unjoined_connection_is_dropped() {
        let (state, accounts) = test_state();
        let a = accounts.add_entitled_user().await;
        let b = accounts.add_entitled_user().await;
        let conv = ConversationService::get_or_create(&*state.store, a, b)
            .await
            .unwrap();

        let (sender, _sender_rx) = ConnectionHandle::new(a);
        let (counterpart, mut counterpart_rx) = ConnectionHandle::new(b);
        counterpart.subscribe(conv.id).await;
        state.presence.register(counterpart).await;

        dispatch_command(
            &state,
            &sender,
            ClientCommand::Typing {
                conversation_id: conv.id.to_string(),
            },
        )
        .await;
        assert!(recv(&mut counterpart_rx).is_none());
    }

    #[tokio::test]
    async fn an_unparseable_frame_gets_a_bad_request_error() {
        let (state, accounts) = test_state();
        let user = accounts.add_entitled_user().await;
        let (handle, mut rx) = ConnectionHandle::new(user);

        handle_text_frame(&state, &handle, "{\"type\":\"fly\"}").await;

        let event = recv(&mut rx).unwrap();
        assert_eq!(event["type"], "error");
        assert_eq!(event["reason"], "bad_request");
    }
}
