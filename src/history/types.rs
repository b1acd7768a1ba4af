use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Tolerant decode for role strings coming off the wire or out of
    /// storage. Anything unrecognized maps to `Assistant` so future role
    /// extensions never break an established conversation.
    pub fn from_wire(value: &str) -> Role {
        match value.to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "user" => Role::User,
            _ => Role::Assistant,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message within a session. Immutable once persisted: turns are only
/// ever appended, never edited or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A single ongoing conversation owned by one user identifier.
///
/// The store owns the canonical record; a `Session` held by the
/// orchestrator is a transient, possibly-stale copy for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: title.into(),
            created_at: now,
            last_message_at: now,
            turns: Vec::new(),
        }
    }

    /// Turns sorted by timestamp. Storage is not trusted to return them
    /// pre-sorted; every backend request is built from this view.
    pub fn sorted_turns(&self) -> Vec<Turn> {
        let mut turns = self.turns.clone();
        turns.sort_by_key(|turn| turn.timestamp);
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_round_trips_canonical_names() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::from_wire(role.as_str()), role);
        }
    }

    #[test]
    fn role_from_wire_is_case_insensitive() {
        assert_eq!(Role::from_wire("USER"), Role::User);
        assert_eq!(Role::from_wire("System"), Role::System);
    }

    #[test]
    fn unknown_role_defaults_to_assistant() {
        assert_eq!(Role::from_wire("tool"), Role::Assistant);
        assert_eq!(Role::from_wire(""), Role::Assistant);
        assert_eq!(Role::from_wire("function_call"), Role::Assistant);
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn turn_new_assigns_id_and_timestamp() {
        let turn = Turn::new(Role::User, "hello");
        assert!(!turn.id.is_empty());
        assert_eq!(turn.content, "hello");
        assert!(turn.metadata.is_none());
    }

    #[test]
    fn turn_metadata_is_arbitrary_json() {
        let turn = Turn::new(Role::Assistant, "hi")
            .with_metadata(serde_json::json!({"eval_count": 42, "nested": {"ok": true}}));
        let meta = turn.metadata.unwrap();
        assert_eq!(meta["eval_count"], 42);
        assert_eq!(meta["nested"]["ok"], true);
    }

    #[test]
    fn sorted_turns_orders_by_timestamp_not_insertion() {
        let mut session = Session::new("u1", "test");
        let mut late = Turn::new(Role::User, "second");
        late.timestamp = Utc::now() + Duration::seconds(10);
        let early = Turn::new(Role::System, "first");
        session.turns.push(late);
        session.turns.push(early);

        let sorted = session.sorted_turns();
        assert_eq!(sorted[0].content, "first");
        assert_eq!(sorted[1].content, "second");
    }
}
