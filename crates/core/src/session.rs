use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::analysis::AnalysisRecord;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-attributed message in a session's conversation. Created exactly
/// once by the orchestrator and never mutated after append.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Where a session is in its lifecycle. Recorded by the orchestrator; the
/// terminal `Completed` phase is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Greeted,
    InConversation,
    Completed,
}

/// Identity attributes supplied when a session is created.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub robot_id: String,
    pub name: String,
    pub age: Option<u8>,
}

/// The unit of state for one child's drawing interaction, keyed by its
/// canvas id. Every field is owned by the store; other components only ever
/// see clones obtained by key lookup.
#[derive(Debug, Clone)]
pub struct Session {
    pub canvas_id: String,
    pub robot_id: String,
    pub name: String,
    pub age: Option<u8>,
    pub phase: SessionPhase,
    /// Append-only, insertion-ordered conversation history.
    pub conversation: Vec<Turn>,
    /// Latest system-generated greeting/prompt text.
    pub prompt: String,
    /// Most recently synthesized audio, overwritten on each synthesis.
    pub audio: Vec<u8>,
    /// Latest image reference associated with the session.
    pub image_url: Option<String>,
    /// Append-only vision-analysis results.
    pub analyses: Vec<AnalysisRecord>,
    /// Terminal fields, populated only by the completion turn. A failed
    /// completion step leaves an `error: <message>` string behind.
    pub final_analysis: String,
    pub summary: String,
    pub title: String,
    pub background_image: String,
}

impl Session {
    fn new(canvas_id: &str, identity: SessionIdentity) -> Self {
        Self {
            canvas_id: canvas_id.to_string(),
            robot_id: identity.robot_id,
            name: identity.name,
            age: identity.age,
            phase: SessionPhase::Created,
            conversation: Vec::new(),
            prompt: String::new(),
            audio: Vec::new(),
            image_url: None,
            analyses: Vec::new(),
            final_analysis: String::new(),
            summary: String::new(),
            title: String::new(),
            background_image: String::new(),
        }
    }

    pub fn push_turn(&mut self, role: Role, text: impl Into<String>) {
        self.conversation.push(Turn::new(role, text));
    }
}

/// In-memory session store, sole owner of session lifecycle.
///
/// Constructed once at startup and passed to whoever needs it — never a
/// process-wide singleton. Re-creating an existing key replaces the prior
/// session; that is documented behavior, not an error. No deletion is
/// exposed, so sessions persist until the process exits.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, canvas_id: &str, identity: SessionIdentity) -> Session {
        let session = Session::new(canvas_id, identity);
        self.sessions
            .lock()
            .insert(canvas_id.to_string(), session.clone());
        session
    }

    /// Clone-out read; absence is a normal, checked outcome.
    pub fn get(&self, canvas_id: &str) -> Option<Session> {
        self.sessions.lock().get(canvas_id).cloned()
    }

    /// Applies `mutate` atomically under the store lock, so concurrent voice
    /// and image turns interleave whole updates instead of losing appends.
    pub fn mutate<R>(
        &self,
        canvas_id: &str,
        mutate: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, CoreError> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(canvas_id) {
            Some(session) => Ok(mutate(session)),
            None => Err(CoreError::SessionNotFound(canvas_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> SessionIdentity {
        SessionIdentity {
            robot_id: "robot_123".to_string(),
            name: name.to_string(),
            age: Some(5),
        }
    }

    #[test]
    fn created_session_is_retrievable_by_key() {
        let store = SessionStore::new();
        store.create("canvas_123", identity("아이"));

        let session = store.get("canvas_123").unwrap();
        assert_eq!(session.name, "아이");
        assert_eq!(session.phase, SessionPhase::Created);
        assert!(session.conversation.is_empty());
    }

    #[test]
    fn recreating_a_key_replaces_prior_state() {
        let store = SessionStore::new();
        store.create("canvas_123", identity("첫째"));
        store
            .mutate("canvas_123", |s| s.push_turn(Role::User, "안녕"))
            .unwrap();

        store.create("canvas_123", identity("둘째"));
        let session = store.get("canvas_123").unwrap();
        assert_eq!(session.name, "둘째");
        assert!(session.conversation.is_empty());
    }

    #[test]
    fn mutate_appends_in_order() {
        let store = SessionStore::new();
        store.create("canvas_123", identity("아이"));
        store
            .mutate("canvas_123", |s| s.push_turn(Role::User, "첫 번째"))
            .unwrap();
        store
            .mutate("canvas_123", |s| s.push_turn(Role::Assistant, "두 번째"))
            .unwrap();

        let session = store.get("canvas_123").unwrap();
        assert_eq!(session.conversation.len(), 2);
        assert_eq!(session.conversation[0].role, Role::User);
        assert_eq!(session.conversation[1].role, Role::Assistant);
    }

    #[test]
    fn mutate_on_unknown_key_reports_not_found() {
        let store = SessionStore::new();
        let result = store.mutate("missing", |s| s.prompt = "x".to_string());
        assert!(matches!(result, Err(CoreError::SessionNotFound(_))));
    }

    #[test]
    fn get_on_unknown_key_is_none() {
        let store = SessionStore::new();
        assert!(store.get("missing").is_none());
    }
}
