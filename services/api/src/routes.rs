//! REST route handlers. Every handler answers JSON; orchestration failures
//! are mapped through `error_response` and never leak stack traces.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use canvas_core::error::CoreError;
use canvas_core::orchestrator::NewSessionRequest;
use serde_json::json;

use crate::AppState;
use crate::messages::{ChatBody, ChatQuery, DoneDrawingBody, NewDrawingBody, VoiceMessage};

const DEFAULT_CHAT_MESSAGE: &str =
    "안녕하세요, 저는 AI 어시스턴트입니다. 무엇을 도와드릴까요?";

fn chat_message(query: ChatQuery) -> String {
    query
        .message
        .unwrap_or_else(|| DEFAULT_CHAT_MESSAGE.to_string())
}

/// `POST /drawing/new` — creates the session, returns the greeting and the
/// voice-chat page URL the robot should open.
pub async fn create_drawing(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewDrawingBody>,
) -> Response {
    let request = NewSessionRequest {
        robot_id: body.robot_id.clone(),
        name: body.name.clone(),
        age: body.age,
        canvas_id: body.canvas_id.clone(),
    };
    match state.orchestrator.handle_new_session(request).await {
        Ok(greeting) => {
            let mut redirect_url = format!(
                "/static/voice_chat.html?robot_id={}&canvas_id={}&name={}",
                body.robot_id, body.canvas_id, body.name
            );
            if let Some(age) = body.age {
                redirect_url.push_str(&format!("&age={age}"));
            }
            Json(json!({
                "status": "success",
                "redirect_url": redirect_url,
                "initial_audio": BASE64.encode(&greeting.audio),
                "initial_text": greeting.text,
            }))
            .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /drawing/done` — runs the completion pipeline and, on full success,
/// speaks the closing message through the session's voice channel.
pub async fn complete_drawing(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DoneDrawingBody>,
) -> Response {
    match state
        .orchestrator
        .complete_session(&body.canvas_id, &body.image_url)
        .await
    {
        Ok(report) => {
            if let Some(closing) = &report.closing {
                let message =
                    VoiceMessage::assistant(&closing.text, BASE64.encode(&closing.audio));
                if let Ok(json) = serde_json::to_string(&message) {
                    state.registry.send_voice(&body.canvas_id, &json);
                }
            }
            Json(json!({
                "status": "success",
                "analysis": report.analysis,
                "summary": report.summary,
                "conversation_history": report.conversation_history,
                "background_image": report.background_image,
                "title": report.title,
            }))
            .into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `GET /drawing/history/{canvas_id}` — the ordered conversation so far.
pub async fn drawing_history(
    State(state): State<Arc<AppState>>,
    Path(canvas_id): Path<String>,
) -> Response {
    match state.orchestrator.history(&canvas_id) {
        Ok(turns) => Json(json!({
            "status": "success",
            "canvas_id": canvas_id,
            "history": turns,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn chat_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Response {
    chat_reply(&state, &chat_message(query)).await
}

pub async fn chat_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Response {
    chat_reply(&state, &body.message).await
}

/// Stateless chat passthrough shared by both `/chat` methods.
async fn chat_reply(state: &AppState, message: &str) -> Response {
    match state.orchestrator.chat(message).await {
        Ok(response) => Json(json!({ "response": response })).into_response(),
        Err(err) => error_response(err),
    }
}

/// Maps the error taxonomy onto HTTP: bad input is the caller's fault, a
/// missing session is addressable, everything else is an upstream failure.
pub fn error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "status": "error", "message": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_without_a_message_uses_the_assistant_greeting() {
        let message = chat_message(ChatQuery { message: None });
        assert_eq!(
            message,
            "안녕하세요, 저는 AI 어시스턴트입니다. 무엇을 도와드릴까요?"
        );
    }

    #[test]
    fn chat_with_a_message_passes_it_through() {
        let message = chat_message(ChatQuery {
            message: Some("그림 그리기 좋아해?".to_string()),
        });
        assert_eq!(message, "그림 그리기 좋아해?");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let response = error_response(CoreError::Validation("missing name".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_session_maps_to_not_found() {
        let response = error_response(CoreError::SessionNotFound("canvas_123".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn capability_failures_map_to_internal_error() {
        for err in [
            CoreError::Transcription("x".to_string()),
            CoreError::Synthesis("x".to_string()),
            CoreError::ChatCompletion("x".to_string()),
            CoreError::VisionAnalysis("x".to_string()),
            CoreError::ImageGeneration("x".to_string()),
            CoreError::Download("x".to_string()),
        ] {
            let response = error_response(err);
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
