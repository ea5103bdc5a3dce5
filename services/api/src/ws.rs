//! WebSocket channel handlers.
//!
//! Each connection splits its socket and hands the write half to a dedicated
//! writer task; the registry only ever holds the writer's channel sender, so
//! a directed send or broadcast never awaits a peer's socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use canvas_core::error::CoreError;
use canvas_core::provider::ImageSource;
use canvas_core::registry::{ChannelKind, MessageSender};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::AppState;
use crate::messages::{
    AnalysisReply, DrawingFrame, DrawingHandshake, ImageForward, StatusMessage, VoiceChannelFrame,
    VoiceMessage,
};

/// How often the voice channel drains the pending-text relay.
const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Spawns the writer task for one connection and returns the sender half the
/// registry will hold. The task ends when the sender side is dropped or the
/// socket rejects a write.
fn spawn_writer(mut sink: SplitSink<WebSocket, Message>) -> MessageSender {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });
    tx
}

fn send_json<T: Serialize>(sender: &MessageSender, message: &T) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = sender.send(json);
        }
        Err(err) => warn!(error = %err, "failed to serialize outbound message"),
    }
}

/// `GET /ws/drawing/{robot_id}/{canvas_id}` — the session's spoken channel.
pub async fn voice_ws(
    ws: WebSocketUpgrade,
    Path((robot_id, canvas_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| voice_channel(socket, state, robot_id, canvas_id))
}

async fn voice_channel(
    socket: WebSocket,
    state: Arc<AppState>,
    robot_id: String,
    canvas_id: String,
) {
    info!(robot_id, canvas_id, "voice channel connected");
    let (sink, mut stream) = socket.split();
    let sender = spawn_writer(sink);
    let id = state
        .registry
        .register(&canvas_id, ChannelKind::Voice, sender.clone());

    let mut poll = tokio::time::interval(PENDING_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(text) = state.registry.take_text(&canvas_id) {
                    send_json(&sender, &VoiceMessage::relay(text));
                }
            }
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                match frame {
                    Message::Text(text) => {
                        if handle_voice_frame(&state, &canvas_id, &sender, text.as_str())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.registry.unregister(&canvas_id, ChannelKind::Voice, id);
    info!(canvas_id, "voice channel closed");
}

/// Processes one inbound voice-channel frame. A returned error is fatal for
/// the connection (the unrecoverable apology-synthesis case); everything else
/// is answered in-band and the loop continues.
async fn handle_voice_frame(
    state: &AppState,
    canvas_id: &str,
    sender: &MessageSender,
    raw: &str,
) -> Result<(), CoreError> {
    let frame = match serde_json::from_str::<VoiceChannelFrame>(raw) {
        Ok(frame) => frame,
        Err(_) => {
            send_json(sender, &StatusMessage::error("Invalid JSON format"));
            return Ok(());
        }
    };

    match frame {
        VoiceChannelFrame::Voice { audio_data } => {
            let Ok(audio) = BASE64.decode(audio_data.as_bytes()) else {
                send_json(sender, &StatusMessage::error("Invalid audio encoding"));
                return Ok(());
            };
            match state.orchestrator.process_voice_turn(canvas_id, &audio).await {
                Ok(reply) => {
                    if let Some(user_text) = &reply.user_text {
                        send_json(sender, &VoiceMessage::user(user_text));
                    }
                    send_json(
                        sender,
                        &VoiceMessage::assistant(&reply.text, BASE64.encode(&reply.audio)),
                    );
                    Ok(())
                }
                Err(err @ CoreError::SessionNotFound(_)) => {
                    send_json(sender, &StatusMessage::error(err.to_string()));
                    Ok(())
                }
                Err(err) => {
                    error!(canvas_id, error = %err, "unrecoverable voice turn failure");
                    Err(err)
                }
            }
        }
        VoiceChannelFrame::Image { image_data } => {
            let Ok(bytes) = BASE64.decode(image_data.as_bytes()) else {
                send_json(sender, &StatusMessage::error("Invalid image encoding"));
                return Ok(());
            };
            match state
                .orchestrator
                .process_image_turn(canvas_id, ImageSource::Png(bytes))
                .await
            {
                Ok(turn) => {
                    // spoken feedback goes session-wide: this voice slot plus
                    // every broadcast member
                    if let Some(feedback) = turn.feedback {
                        let message = VoiceMessage::assistant(
                            &feedback.text,
                            BASE64.encode(&feedback.audio),
                        );
                        if let Ok(json) = serde_json::to_string(&message) {
                            state.registry.send_voice(canvas_id, &json);
                            state.registry.broadcast(canvas_id, &json);
                        }
                    }
                    Ok(())
                }
                Err(err) => {
                    send_json(sender, &StatusMessage::error(err.to_string()));
                    Ok(())
                }
            }
        }
    }
}

/// `GET /drawing/send` — the analysis channel. The first frame is a
/// `{ canvas_id }` handshake; after the acknowledgement the connection joins
/// the session's broadcast list.
pub async fn analysis_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| analysis_channel(socket, state))
}

async fn analysis_channel(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let sender = spawn_writer(sink);

    let canvas_id = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<DrawingHandshake>(text.as_str()) {
                    Ok(handshake) => break handshake.canvas_id,
                    Err(_) => {
                        send_json(&sender, &StatusMessage::error("Invalid JSON format"));
                    }
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };
    send_json(&sender, &StatusMessage::success());
    let id = state
        .registry
        .register(&canvas_id, ChannelKind::Broadcast, sender.clone());
    info!(canvas_id, "analysis channel joined");

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                handle_analysis_frame(&state, &canvas_id, &sender, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state
        .registry
        .unregister(&canvas_id, ChannelKind::Broadcast, id);
    info!(canvas_id, "analysis channel closed");
}

async fn handle_analysis_frame(
    state: &AppState,
    canvas_id: &str,
    sender: &MessageSender,
    raw: &str,
) {
    let frame = match serde_json::from_str::<DrawingFrame>(raw) {
        Ok(frame) => frame,
        Err(_) => {
            send_json(sender, &StatusMessage::error("Invalid JSON format"));
            return;
        }
    };

    if let Some(image_data) = frame.image_data {
        // raw canvas snapshots go straight to the session's voice channel
        forward_image_to_voice(state, canvas_id, ImageForward::new(image_data));
        send_json(sender, &StatusMessage::success_with("Image forwarded"));
    } else if let Some(image_url) = frame.image_url {
        match state
            .orchestrator
            .process_image_turn(canvas_id, ImageSource::Url(image_url))
            .await
        {
            Ok(turn) => {
                send_json(sender, &AnalysisReply::from(&turn.analysis));
                if let Some(feedback) = turn.feedback {
                    let message =
                        VoiceMessage::assistant(&feedback.text, BASE64.encode(&feedback.audio));
                    if let Ok(json) = serde_json::to_string(&message) {
                        state.registry.broadcast(canvas_id, &json);
                    }
                    // the voice channel picks the text up on its next poll
                    state.registry.deposit_text(canvas_id, feedback.text);
                }
            }
            Err(err) => send_json(sender, &StatusMessage::error(err.to_string())),
        }
    } else {
        send_json(sender, &StatusMessage::success_with("Message received"));
    }
}

fn forward_image_to_voice(state: &AppState, canvas_id: &str, message: ImageForward) {
    match serde_json::to_string(&message) {
        Ok(json) => {
            if !state.registry.send_voice(canvas_id, &json) {
                warn!(canvas_id, "no voice connection to forward the image to");
            }
        }
        Err(err) => warn!(error = %err, "failed to serialize image forward"),
    }
}
