use crate::{
    constants::PUSH_TTL_SECS,
    db::PersistentStorage,
    events,
    model::{PartyId, SessionId},
    util::Secret,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use url::Url;
use web_push::{
    ContentEncoding, SubscriptionInfo, SubscriptionKeys, VapidSignatureBuilder, WebPushClient,
    WebPushMessageBuilder,
};

#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct Options {
    /// VAPID private key, base64url encoded, used to sign Web Push requests.
    #[clap(long, env)]
    pub vapid_private_key: Option<Secret>,

    /// VAPID public key, base64url encoded, handed to clients so they can
    /// create a push subscription against this server's key pair.
    #[clap(long, env)]
    pub vapid_public_key: Option<String>,

    /// VAPID subject, typically a `mailto:` contact address.
    #[clap(long, env, default_value = "mailto:support@example.com")]
    pub vapid_subject: String,
}

#[derive(Clone, Copy, Debug)]
pub enum NotificationKind {
    JoinConfirm,
    Called,
    PositionThreshold(&'static str),
    Test,
}

impl NotificationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinConfirm => "join_confirm",
            Self::Called => "called",
            Self::PositionThreshold(kind) => kind,
            Self::Test => "test",
        }
    }
}

#[derive(Debug)]
pub struct NotificationEvent {
    pub session_id: SessionId,
    pub party_id: PartyId,
    pub short_code: String,
    pub call_deadline: Option<DateTime<Utc>>,
    pub kind: NotificationKind,
}

/// `Test` pushes are a diagnostic tool an admin fires on demand to confirm a
/// subscription is actually reachable; deduping them against `has_push_sent`
/// would mean the second poke a host sends never arrives.
fn should_dedup(kind: NotificationKind) -> bool {
    !matches!(kind, NotificationKind::Test)
}

/// Handle held by coordinator actors to fire notifications without
/// blocking on delivery; the dispatcher task owns the actual send.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl NotificationSender {
    pub fn send(&self, event: NotificationEvent) {
        if self.tx.send(event).is_err() {
            warn!("notification dispatcher has shut down, dropping event");
        }
    }
}

#[derive(Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: String,
    url: String,
    kind: &'a str,
}

fn build_payload<'a>(event: &'a NotificationEvent, app_base_url: &Url) -> PushPayload<'a> {
    let url = format!("{}queue/{}", app_base_url, event.short_code);
    let (title, body) = match event.kind {
        NotificationKind::JoinConfirm => (
            "You're in line",
            "We'll send you a push when it's almost your turn.".to_owned(),
        ),
        NotificationKind::Called => {
            let minutes = event
                .call_deadline
                .map(|deadline| {
                    let remaining = deadline.signed_duration_since(Utc::now()).num_seconds().max(0);
                    (remaining + 59) / 60
                })
                .unwrap_or(0);
            (
                "You're up!",
                format!("Head to the front now \u{2014} you have {minutes} minute(s) to check in."),
            )
        }
        NotificationKind::PositionThreshold("pos_2") => {
            ("Almost your turn", "You're now 2nd in line.".to_owned())
        }
        NotificationKind::PositionThreshold("pos_5") => {
            ("Getting closer", "You're now 5th in line.".to_owned())
        }
        NotificationKind::PositionThreshold(other) => {
            ("Queue update", format!("Your position changed: {other}."))
        }
        NotificationKind::Test => (
            "Test notification",
            "This is a test push from the queue you're hosting.".to_owned(),
        ),
    };
    PushPayload {
        title,
        body,
        url,
        kind: event.kind.as_str(),
    }
}

/// Spawns the dispatcher task and returns a sender that producers (mainly
/// coordinator actors) use to enqueue notifications.
pub fn spawn_dispatcher(
    options: Options,
    storage: PersistentStorage,
    app_base_url: Url,
) -> NotificationSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();
    let options = Arc::new(options);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(err) = dispatch_one(&options, &storage, &app_base_url, event).await {
                error!(?err, "failed to dispatch notification");
            }
        }
    });

    NotificationSender { tx }
}

async fn dispatch_one(
    options: &Options,
    storage: &PersistentStorage,
    app_base_url: &Url,
    event: NotificationEvent,
) -> eyre::Result<()> {
    let kind = event.kind.as_str();
    let dedup = should_dedup(event.kind);

    if dedup
        && storage
            .has_push_sent(&event.session_id, &event.party_id, kind)
            .await?
    {
        return Ok(());
    }

    let subs = storage
        .get_push_subscriptions_for_party(&event.session_id, &event.party_id)
        .await?;
    if subs.is_empty() {
        return Ok(());
    }

    let Some(private_key) = &options.vapid_private_key else {
        warn!("no VAPID private key configured, skipping push delivery");
        return Ok(());
    };

    let payload = serde_json::to_vec(&build_payload(&event, app_base_url))?;

    let client = WebPushClient::new()?;

    for sub in subs {
        let subscription = SubscriptionInfo {
            endpoint: sub.endpoint.clone(),
            keys: SubscriptionKeys {
                p256dh: sub.p256dh.clone(),
                auth: sub.auth.clone(),
            },
        };

        let mut sig_builder =
            VapidSignatureBuilder::from_base64(
                private_key.get_secret(),
                base64::URL_SAFE_NO_PAD,
                &subscription,
            )?;
        sig_builder.add_claim("sub", options.vapid_subject.clone());
        let signature = sig_builder.build()?;

        let mut message_builder = WebPushMessageBuilder::new(&subscription)?;
        message_builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
        message_builder.set_vapid_signature(signature);
        message_builder.set_ttl(PUSH_TTL_SECS);

        match client.send(message_builder.build()?).await {
            Ok(()) => {
                info!(endpoint = %sub.endpoint, kind, "push delivered");
                events::push_outcome(storage, event.session_id.clone(), event.party_id.clone(), kind, "delivered");
            }
            Err(web_push::WebPushError::EndpointNotValid)
            | Err(web_push::WebPushError::EndpointNotFound) => {
                warn!(endpoint = %sub.endpoint, "push subscription stale, removing");
                events::push_outcome(storage, event.session_id.clone(), event.party_id.clone(), kind, "stale");
                storage.delete_push_subscription(&sub.endpoint).await?;
                continue;
            }
            Err(err) => {
                error!(?err, endpoint = %sub.endpoint, "push delivery failed");
                events::push_outcome(storage, event.session_id.clone(), event.party_id.clone(), kind, "failed");
                continue;
            }
        }
    }

    if dedup {
        storage
            .record_push_sent(&event.session_id, &event.party_id, kind)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_exempt_from_dedup() {
        assert!(!should_dedup(NotificationKind::Test));
    }

    #[test]
    fn other_kinds_are_deduped() {
        assert!(should_dedup(NotificationKind::JoinConfirm));
        assert!(should_dedup(NotificationKind::Called));
        assert!(should_dedup(NotificationKind::PositionThreshold("pos_2")));
    }
}
