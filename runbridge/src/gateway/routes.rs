//! WebSocket route.

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, future};
use log::{debug, info, warn};

use super::AppState;
use crate::bridge::{FrameSink, InboundStream};
use crate::error::ChannelError;

/// Build the router for `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&state.route, get(run_handler))
        .with_state(state)
}

async fn run_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// What an inbound message means to the relay.
#[derive(Debug, PartialEq)]
enum Inbound {
    Line(String),
    Ignore,
    End(Option<String>),
}

fn classify(msg: Result<Message, axum::Error>) -> Inbound {
    match msg {
        Ok(Message::Text(text)) => Inbound::Line(text),
        Ok(Message::Binary(data)) => Inbound::Line(String::from_utf8_lossy(&data).into_owned()),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Inbound::Ignore,
        Ok(Message::Close(_)) => Inbound::End(None),
        Err(e) => Inbound::End(Some(e.to_string())),
    }
}

fn to_relay_item(inbound: Inbound) -> Option<Result<String, ChannelError>> {
    match inbound {
        Inbound::Line(line) => Some(Ok(line)),
        Inbound::Ignore => None,
        Inbound::End(None) => Some(Err(ChannelError::Disconnected)),
        Inbound::End(Some(reason)) => Some(Err(ChannelError::Receive(reason))),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // First data message is the program source
    let source = loop {
        match ws_stream.next().await.map(classify) {
            Some(Inbound::Line(source)) => break source,
            Some(Inbound::Ignore) => continue,
            Some(Inbound::End(reason)) => {
                debug!("connection closed before source: {:?}", reason);
                return;
            }
            None => return,
        }
    };

    let (sink, mut frames) = FrameSink::channel(state.bridge.config().outbound_capacity);

    // Sole writer to the socket
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let terminal = frame.is_terminal();
            if ws_sink.send(Message::Text(frame.to_string())).await.is_err() {
                debug!("socket closed, dropping remaining frames");
                break;
            }
            if terminal {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let inbound: InboundStream = ws_stream
        .filter_map(|msg| future::ready(to_relay_item(classify(msg))))
        .boxed();

    let outcome = state.bridge.run(&source, inbound, sink).await;
    info!("run finished: {}", outcome);

    if let Err(e) = writer.await {
        warn!("socket writer failed: {}", e);
    }
}
