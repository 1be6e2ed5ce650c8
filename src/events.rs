use crate::{
    db::{EventRow, PersistentStorage},
    model::{PartyId, SessionId},
};
use serde::Serialize;
use tracing::warn;

/// Fire-and-forget analytics append: spawns the write so a slow or failing
/// analytics sink can never add latency to, or fail, the caller's request.
/// Failures are logged and otherwise swallowed.
pub fn emit(storage: PersistentStorage, event: EventRow) {
    tokio::spawn(async move {
        if let Err(err) = storage.append_event(event).await {
            warn!(?err, "failed to append analytics event");
        }
    });
}

fn details<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

pub fn party_lifecycle(
    storage: &PersistentStorage,
    session_id: SessionId,
    party_id: Option<PartyId>,
    kind: &str,
) {
    emit(
        storage.clone(),
        EventRow {
            session_id: Some(session_id),
            party_id,
            kind: kind.to_owned(),
            details_json: None,
        },
    );
}

/// Join-funnel markers emitted from the HTTP surface rather than the
/// coordinator, since they track browser-side milestones (scanning a QR
/// code, starting the join form) that happen before a party exists.
pub fn funnel_marker(storage: &PersistentStorage, session_id: SessionId, marker: &str) {
    emit(
        storage.clone(),
        EventRow {
            session_id: Some(session_id),
            party_id: None,
            kind: marker.to_owned(),
            details_json: None,
        },
    );
}

#[derive(Serialize)]
pub struct PushOutcomeDetails<'a> {
    pub kind: &'a str,
    pub outcome: &'a str,
}

pub fn push_outcome(
    storage: &PersistentStorage,
    session_id: SessionId,
    party_id: PartyId,
    kind: &str,
    outcome: &str,
) {
    emit(
        storage.clone(),
        EventRow {
            session_id: Some(session_id),
            party_id: Some(party_id),
            kind: "push_sent".to_owned(),
            details_json: details(&PushOutcomeDetails { kind, outcome }),
        },
    );
}
