//! WebSocket Handler for Transfer Status Updates
//!
//! Streams [`StatusEvent`]s from the broadcast notifier, either all of them
//! or only those for one destination address.

use alloy_primitives::Address;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::middleware::parse_address;
use super::server::SharedAppState;
use crate::notify::BroadcastNotifier;
use crate::types::StatusEvent;

/// Route: /ws/transactions/:dest_addr
pub async fn ws_address_handler(
    ws: WebSocketUpgrade,
    Path(dest_addr): Path<String>,
    State(state): State<SharedAppState>,
) -> Response {
    match parse_address(&dest_addr, "dest_addr") {
        Ok(addr) => {
            let events = state.events.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, events, Some(addr)))
        }
        Err(e) => e.into_response(),
    }
}

/// Route: /ws/transactions
pub async fn ws_all_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedAppState>,
) -> impl IntoResponse {
    let events = state.events.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, events, None))
}

fn wanted(event: &StatusEvent, filter: Option<Address>) -> bool {
    filter.map_or(true, |addr| event.deposit_key.dest_addr == addr)
}

async fn handle_socket(socket: WebSocket, events: BroadcastNotifier, filter: Option<Address>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(target: "xbridge::api", skipped, "websocket subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !wanted(&event, filter) {
                continue;
            }
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Only close and errors matter from the client side
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositKey, TransactionStatus};
    use alloy_primitives::B256;

    #[test]
    fn test_address_filter() {
        let event = StatusEvent::new(
            DepositKey {
                dest_addr: Address::repeat_byte(1),
                network_id: 0,
                tx_hash: B256::ZERO,
            },
            TransactionStatus::Created,
            TransactionStatus::PendingUserClaim,
            1,
        );
        assert!(wanted(&event, None));
        assert!(wanted(&event, Some(Address::repeat_byte(1))));
        assert!(!wanted(&event, Some(Address::repeat_byte(2))));
    }
}
