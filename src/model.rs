use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug, Hash, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Hash, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartyId(pub String);

impl PartyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for PartyId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PartyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyStatus {
    Waiting,
    Called,
    Served,
    Left,
    NoShow,
    Kicked,
}

impl PartyStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Served | Self::Left | Self::NoShow | Self::Kicked
        )
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Called)
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    pub session_id: SessionId,
    pub short_code: String,
    pub status: QueueStatus,
    pub event_name: String,
    pub max_guests: i32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub requires_auth: bool,
}

#[derive(Debug, Clone)]
pub struct Party {
    pub id: PartyId,
    pub session_id: SessionId,
    pub name: Option<String>,
    pub size: i32,
    pub status: PartyStatus,
    pub identity: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub nearby: bool,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_wait_ms: Option<i64>,
    pub position_at_leave: Option<i32>,
    pub wait_ms_at_leave: Option<i64>,
}

/// One entry in a broadcast snapshot's waiting list.
#[derive(Debug, Clone, Serialize)]
pub struct WaitingEntry {
    pub party_id: PartyId,
    pub name: Option<String>,
    pub size: i32,
    pub status: PartyStatus,
    pub nearby: bool,
    pub joined_at: DateTime<Utc>,
    pub position: u32,
    pub estimated_wait_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub session_id: SessionId,
    pub version: u64,
    pub status: QueueStatus,
    pub max_guests: i32,
    pub now_serving: Option<PartyId>,
    pub call_deadline: Option<DateTime<Utc>>,
    pub waiting: Vec<WaitingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    QueueCreated,
    QueueMemberJoined,
    QueueMemberLeft,
    QueueMemberCalled,
    QueueMemberKicked,
    QueueMemberServed,
    QueueMemberNoShow,
    QueueClosed,
}
