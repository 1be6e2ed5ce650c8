use crate::{
    constants::{
        ETA_EWMA_ALPHA, ETA_HISTORY_WINDOW, ETA_MAX_MS, ETA_MIN_MS, ETA_PRIOR_MS,
        MAILBOX_HIGH_WATER_MARK, POSITION_THRESHOLDS,
    },
    db::PersistentStorage,
    events,
    model::{Party, PartyId, PartyStatus, Queue, QueueSnapshot, QueueStatus, SessionId, WaitingEntry},
    notifications::{NotificationEvent, NotificationKind, NotificationSender},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::error;

/// Call-window timeout is a test seam: production runs at the default 120s,
/// tests shrink it to exercise the no_show transition without sleeping.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
pub struct Options {
    /// Seconds a called party has to check in before being marked no_show.
    #[clap(long, env, default_value = "120")]
    pub call_window_secs: i64,
}

#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    #[error("queue is closed")]
    QueueClosed,
    #[error("queue is full")]
    QueueFull,
    #[error("party not found")]
    PartyNotFound,
    #[error("party is not in a waiting or called state")]
    TerminalState,
    #[error("coordinator is busy, try again")]
    Busy,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("party has already joined this queue")]
    AlreadyJoined,
}

impl From<sqlx::Error> for CoordinatorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<crate::db::StorageError> for CoordinatorError {
    fn from(err: crate::db::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

enum CoordinatorMsg {
    Join {
        name: Option<String>,
        size: i32,
        identity: Option<String>,
        reply: oneshot::Sender<Result<PartyId, CoordinatorError>>,
    },
    DeclareNearby {
        party_id: PartyId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Leave {
        party_id: PartyId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Advance {
        next_party: Option<PartyId>,
        reply: oneshot::Sender<Result<Option<PartyId>, CoordinatorError>>,
    },
    Kick {
        party_id: PartyId,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Close {
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<(QueueSnapshot, broadcast::Receiver<QueueSnapshot>)>,
    },
    CallWindowExpired {
        party_id: PartyId,
    },
}

/// Cheap-to-clone handle to a live per-queue actor. Holding one keeps the
/// actor's mailbox sender alive; it does not keep the actor's task running
/// once the registry drops the handle and the receiver side closes.
#[derive(Clone)]
pub struct CoordinatorHandle {
    session_id: SessionId,
    mailbox: mpsc::Sender<CoordinatorMsg>,
}

impl CoordinatorHandle {
    async fn send<T>(
        &self,
        make_msg: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMsg,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .try_send(make_msg(tx))
            .map_err(|_| CoordinatorError::Busy)?;
        rx.await.map_err(|_| CoordinatorError::Busy)
    }

    pub async fn join(
        &self,
        name: Option<String>,
        size: i32,
        identity: Option<String>,
    ) -> Result<PartyId, CoordinatorError> {
        self.send(|reply| CoordinatorMsg::Join {
            name,
            size,
            identity,
            reply,
        })
        .await?
    }

    pub async fn declare_nearby(&self, party_id: PartyId) -> Result<(), CoordinatorError> {
        self.send(|reply| CoordinatorMsg::DeclareNearby { party_id, reply })
            .await?
    }

    pub async fn leave(&self, party_id: PartyId) -> Result<(), CoordinatorError> {
        self.send(|reply| CoordinatorMsg::Leave { party_id, reply })
            .await?
    }

    pub async fn advance(
        &self,
        next_party: Option<PartyId>,
    ) -> Result<Option<PartyId>, CoordinatorError> {
        self.send(|reply| CoordinatorMsg::Advance { next_party, reply })
            .await?
    }

    pub async fn kick(&self, party_id: PartyId) -> Result<(), CoordinatorError> {
        self.send(|reply| CoordinatorMsg::Kick { party_id, reply })
            .await?
    }

    pub async fn close(&self) -> Result<(), CoordinatorError> {
        self.send(|reply| CoordinatorMsg::Close { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .try_send(CoordinatorMsg::Snapshot { reply: tx })
            .map_err(|_| CoordinatorError::Busy)?;
        rx.await.map_err(|_| CoordinatorError::Busy)
    }

    pub async fn subscribe(
        &self,
    ) -> Result<(QueueSnapshot, broadcast::Receiver<QueueSnapshot>), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .try_send(CoordinatorMsg::Subscribe { reply: tx })
            .map_err(|_| CoordinatorError::Busy)?;
        rx.await.map_err(|_| CoordinatorError::Busy)
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

struct Actor {
    queue: Queue,
    parties: Vec<Party>,
    version: u64,
    eta_history: VecDeque<i64>,
    storage: PersistentStorage,
    notifications: NotificationSender,
    broadcast: broadcast::Sender<QueueSnapshot>,
    mailbox: mpsc::Receiver<CoordinatorMsg>,
    self_sender: mpsc::Sender<CoordinatorMsg>,
    call_window_secs: i64,
}

/// Spawns the actor task for a queue that was just created, returning a
/// handle the caller can register immediately.
pub fn spawn_new(
    queue: Queue,
    storage: PersistentStorage,
    notifications: NotificationSender,
    call_window_secs: i64,
) -> CoordinatorHandle {
    spawn_with_parties(queue, Vec::new(), storage, notifications, call_window_secs)
}

/// Spawns the actor task for a queue recovered from durable storage at
/// cold start, replaying its persisted parties and reconstructing any
/// in-flight call-window timer from the persisted `called_at` timestamp.
pub fn spawn_from_storage(
    queue: Queue,
    parties: Vec<Party>,
    storage: PersistentStorage,
    notifications: NotificationSender,
    call_window_secs: i64,
) -> CoordinatorHandle {
    spawn_with_parties(queue, parties, storage, notifications, call_window_secs)
}

fn spawn_with_parties(
    queue: Queue,
    parties: Vec<Party>,
    storage: PersistentStorage,
    notifications: NotificationSender,
    call_window_secs: i64,
) -> CoordinatorHandle {
    let session_id = queue.session_id.clone();
    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_HIGH_WATER_MARK);
    let (broadcast_tx, _) = broadcast::channel(64);

    let mut actor = Actor {
        queue,
        parties,
        version: 0,
        eta_history: VecDeque::with_capacity(ETA_HISTORY_WINDOW),
        storage,
        notifications,
        broadcast: broadcast_tx,
        mailbox: mailbox_rx,
        self_sender: mailbox_tx.clone(),
        call_window_secs,
    };

    // Reconstruct a call-window timer for any party that was `called`
    // before the process restarted.
    if let Some(called) = actor
        .parties
        .iter()
        .find(|p| p.status == PartyStatus::Called)
    {
        let deadline = called
            .called_at
            .map(|ts| ts + ChronoDuration::seconds(actor.call_window_secs))
            .unwrap_or_else(Utc::now);
        actor.arm_call_window(called.id.clone(), deadline);
    }

    tokio::spawn(actor.run());

    CoordinatorHandle {
        session_id,
        mailbox: mailbox_tx,
    }
}

impl Actor {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            self.handle(msg).await;
        }
    }

    async fn handle(&mut self, msg: CoordinatorMsg) {
        match msg {
            CoordinatorMsg::Join {
                name,
                size,
                identity,
                reply,
            } => {
                let result = self.join(name, size, identity).await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::DeclareNearby { party_id, reply } => {
                let result = self.declare_nearby(party_id).await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::Leave { party_id, reply } => {
                let result = self.leave(party_id).await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::Advance { next_party, reply } => {
                let result = self.advance(next_party).await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::Kick { party_id, reply } => {
                let result = self.kick(party_id).await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::Close { reply } => {
                let result = self.close().await;
                let _ = reply.send(result);
            }
            CoordinatorMsg::Snapshot { reply } => {
                let _ = reply.send(self.build_snapshot());
            }
            CoordinatorMsg::Subscribe { reply } => {
                let _ = reply.send((self.build_snapshot(), self.broadcast.subscribe()));
            }
            CoordinatorMsg::CallWindowExpired { party_id } => {
                self.expire_call_window(party_id).await;
            }
        }
    }

    fn waiting_parties(&self) -> impl Iterator<Item = &Party> {
        self.parties.iter().filter(|p| p.status == PartyStatus::Waiting)
    }

    fn active_count(&self) -> i32 {
        self.parties
            .iter()
            .filter(|p| p.status.is_active())
            .map(|p| p.size)
            .sum()
    }

    async fn join(
        &mut self,
        name: Option<String>,
        size: i32,
        identity: Option<String>,
    ) -> Result<PartyId, CoordinatorError> {
        if self.queue.status != QueueStatus::Active {
            return Err(CoordinatorError::QueueClosed);
        }
        if let Some(identity) = &identity {
            let already_in_line = self
                .parties
                .iter()
                .any(|p| p.status.is_active() && p.identity.as_deref() == Some(identity.as_str()));
            if already_in_line {
                return Err(CoordinatorError::AlreadyJoined);
            }
        }
        if self.active_count() + size > self.queue.max_guests {
            return Err(CoordinatorError::QueueFull);
        }

        // 1-based position this party will land at in the waiting line.
        let position = self.waiting_parties().count() as i64 + 1;

        let party = Party {
            id: PartyId::new(),
            session_id: self.queue.session_id.clone(),
            name,
            size,
            status: PartyStatus::Waiting,
            identity,
            joined_at: Utc::now(),
            nearby: false,
            called_at: None,
            completed_at: None,
            estimated_wait_ms: Some(self.estimated_wait_ms_for(position)),
            position_at_leave: None,
            wait_ms_at_leave: None,
        };

        self.storage.insert_party(&party).await?;
        events::party_lifecycle(
            &self.storage,
            self.queue.session_id.clone(),
            Some(party.id.clone()),
            "queue_member_joined",
        );

        let party_id = party.id.clone();
        self.parties.push(party);
        self.publish();
        Ok(party_id)
    }

    async fn declare_nearby(&mut self, party_id: PartyId) -> Result<(), CoordinatorError> {
        let party = self.find_active_mut(&party_id)?;
        party.nearby = true;
        let updated = party.clone();
        self.storage.update_party(&updated).await?;
        self.publish();
        Ok(())
    }

    async fn leave(&mut self, party_id: PartyId) -> Result<(), CoordinatorError> {
        let position = self.position_of(&party_id);
        let party = self.find_active_mut(&party_id)?;
        let wait_ms = Utc::now()
            .signed_duration_since(party.joined_at)
            .num_milliseconds();
        party.status = PartyStatus::Left;
        party.completed_at = Some(Utc::now());
        party.position_at_leave = position;
        party.wait_ms_at_leave = Some(wait_ms);
        let updated = party.clone();
        self.storage.update_party(&updated).await?;
        events::party_lifecycle(
            &self.storage,
            self.queue.session_id.clone(),
            Some(party_id),
            "queue_member_left",
        );
        self.publish();
        self.check_position_thresholds();
        Ok(())
    }

    async fn advance(
        &mut self,
        next_party: Option<PartyId>,
    ) -> Result<Option<PartyId>, CoordinatorError> {
        if self.queue.status != QueueStatus::Active {
            return Err(CoordinatorError::QueueClosed);
        }

        // Resolve whoever is currently called: mark served and fold their
        // wait time into the ETA history before calling the next party.
        if let Some(index) = self
            .parties
            .iter()
            .position(|p| p.status == PartyStatus::Called)
        {
            let served_ms = {
                let party = &mut self.parties[index];
                party.status = PartyStatus::Served;
                party.completed_at = Some(Utc::now());
                party
                    .called_at
                    .map(|ts| Utc::now().signed_duration_since(ts).num_milliseconds())
            };
            let served_party = self.parties[index].clone();
            self.storage.update_party(&served_party).await?;
            events::party_lifecycle(
                &self.storage,
                self.queue.session_id.clone(),
                Some(served_party.id.clone()),
                "queue_member_served",
            );
            if let Some(ms) = served_ms {
                self.push_eta_sample(ms);
            }
            self.refresh_waiting_etas().await;
        }

        // An explicit next party must itself still be waiting; otherwise
        // fall back to the head of the waiting order.
        let next = next_party
            .as_ref()
            .and_then(|id| {
                self.parties
                    .iter()
                    .position(|p| &p.id == id && p.status == PartyStatus::Waiting)
            })
            .or_else(|| {
                self.parties
                    .iter()
                    .position(|p| p.status == PartyStatus::Waiting)
            });

        let Some(index) = next else {
            self.publish();
            return Ok(None);
        };

        let party_id = self.parties[index].id.clone();
        self.parties[index].status = PartyStatus::Called;
        self.parties[index].called_at = Some(Utc::now());
        let called_party = self.parties[index].clone();
        self.storage.update_party(&called_party).await?;
        events::party_lifecycle(
            &self.storage,
            self.queue.session_id.clone(),
            Some(party_id.clone()),
            "queue_member_called",
        );

        let call_deadline = Utc::now() + ChronoDuration::seconds(self.call_window_secs);
        self.notify_called(party_id.clone(), call_deadline);
        self.arm_call_window(party_id.clone(), call_deadline);
        self.publish();
        self.check_position_thresholds();
        Ok(Some(party_id))
    }

    async fn kick(&mut self, party_id: PartyId) -> Result<(), CoordinatorError> {
        let party = self.find_active_mut(&party_id)?;
        party.status = PartyStatus::Kicked;
        party.completed_at = Some(Utc::now());
        let updated = party.clone();
        self.storage.update_party(&updated).await?;
        events::party_lifecycle(
            &self.storage,
            self.queue.session_id.clone(),
            Some(party_id),
            "queue_member_kicked",
        );
        self.publish();
        self.check_position_thresholds();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CoordinatorError> {
        self.queue.status = QueueStatus::Closed;
        self.storage.close_queue(&self.queue.session_id).await?;
        events::party_lifecycle(&self.storage, self.queue.session_id.clone(), None, "queue_closed");
        self.publish();
        Ok(())
    }

    async fn expire_call_window(&mut self, party_id: PartyId) {
        let Some(party) = self.parties.iter_mut().find(|p| p.id == party_id) else {
            return;
        };
        if party.status != PartyStatus::Called {
            return;
        }
        party.status = PartyStatus::NoShow;
        party.completed_at = Some(Utc::now());
        let updated = party.clone();
        if let Err(err) = self.storage.update_party(&updated).await {
            error!(?err, %party_id, "failed to persist no_show transition");
            return;
        }
        events::party_lifecycle(
            &self.storage,
            self.queue.session_id.clone(),
            Some(party_id),
            "queue_member_no_show",
        );
        self.publish();
    }

    fn find_active_mut(&mut self, party_id: &PartyId) -> Result<&mut Party, CoordinatorError> {
        let party = self
            .parties
            .iter_mut()
            .find(|p| &p.id == party_id)
            .ok_or(CoordinatorError::PartyNotFound)?;
        if party.status.is_terminal() {
            return Err(CoordinatorError::TerminalState);
        }
        Ok(party)
    }

    fn position_of(&self, party_id: &PartyId) -> Option<i32> {
        self.waiting_parties()
            .position(|p| &p.id == party_id)
            .map(|i| i as i32 + 1)
    }

    fn arm_call_window(&self, party_id: PartyId, deadline: DateTime<Utc>) {
        let remaining = deadline
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = sender.send(CoordinatorMsg::CallWindowExpired { party_id }).await;
        });
    }

    fn push_eta_sample(&mut self, sample_ms: i64) {
        if self.eta_history.len() == ETA_HISTORY_WINDOW {
            self.eta_history.pop_front();
        }
        self.eta_history.push_back(sample_ms);
    }

    /// Exponentially weighted moving average over recent service durations,
    /// clamped to `[ETA_MIN_MS, ETA_MAX_MS]` and seeded with `ETA_PRIOR_MS`
    /// when no history exists yet. This is the per-party service time, not
    /// an estimated wait; callers scale it by queue position.
    fn eta_mu_ms(&self) -> i64 {
        let base = if self.eta_history.is_empty() {
            ETA_PRIOR_MS as f64
        } else {
            let mut iter = self.eta_history.iter();
            let mut ewma = *iter.next().unwrap() as f64;
            for sample in iter {
                ewma = ETA_EWMA_ALPHA * (*sample as f64) + (1.0 - ETA_EWMA_ALPHA) * ewma;
            }
            ewma
        };
        (base as i64).clamp(ETA_MIN_MS, ETA_MAX_MS)
    }

    /// Estimated wait for a party at 1-based waiting `position`: the bound
    /// EWMA service time times how many parties are served ahead of them.
    fn estimated_wait_ms_for(&self, position: i64) -> i64 {
        self.eta_mu_ms() * position
    }

    /// Recomputes and persists `estimated_wait_ms` for every still-waiting
    /// party so their displayed estimate tightens as the queue is served.
    async fn refresh_waiting_etas(&mut self) {
        let mu = self.eta_mu_ms();
        let mut updated = Vec::new();
        for (index, party) in self
            .parties
            .iter_mut()
            .filter(|p| p.status == PartyStatus::Waiting)
            .enumerate()
        {
            party.estimated_wait_ms = Some(mu * (index as i64 + 1));
            updated.push(party.clone());
        }
        for party in updated {
            if let Err(err) = self.storage.update_party(&party).await {
                error!(?err, party_id = %party.id, "failed to persist refreshed eta");
            }
        }
    }

    fn check_position_thresholds(&self) {
        for (position, party) in self.waiting_parties().enumerate() {
            let position = position as u32 + 1;
            for (threshold, kind) in POSITION_THRESHOLDS {
                if position == threshold {
                    self.notify(party.id.clone(), NotificationKind::PositionThreshold(kind));
                }
            }
        }
    }

    fn notify(&self, party_id: PartyId, kind: NotificationKind) {
        self.notifications.send(NotificationEvent {
            session_id: self.queue.session_id.clone(),
            short_code: self.queue.short_code.clone(),
            party_id,
            call_deadline: None,
            kind,
        });
    }

    fn notify_called(&self, party_id: PartyId, call_deadline: DateTime<Utc>) {
        self.notifications.send(NotificationEvent {
            session_id: self.queue.session_id.clone(),
            short_code: self.queue.short_code.clone(),
            party_id,
            call_deadline: Some(call_deadline),
            kind: NotificationKind::Called,
        });
    }

    fn build_snapshot(&self) -> QueueSnapshot {
        let now_serving = self
            .parties
            .iter()
            .find(|p| p.status == PartyStatus::Called)
            .map(|p| p.id.clone());
        let call_deadline = self
            .parties
            .iter()
            .find(|p| p.status == PartyStatus::Called)
            .and_then(|p| p.called_at)
            .map(|ts| ts + ChronoDuration::seconds(self.call_window_secs));

        let waiting = self
            .waiting_parties()
            .enumerate()
            .map(|(i, p)| WaitingEntry {
                party_id: p.id.clone(),
                name: p.name.clone(),
                size: p.size,
                status: p.status,
                nearby: p.nearby,
                joined_at: p.joined_at,
                position: i as u32 + 1,
                estimated_wait_ms: p.estimated_wait_ms,
            })
            .collect();

        QueueSnapshot {
            session_id: self.queue.session_id.clone(),
            version: self.version,
            status: self.queue.status,
            max_guests: self.queue.max_guests,
            now_serving,
            call_deadline,
            waiting,
        }
    }

    /// Persistence happens before this is called for every state-mutating
    /// operation above; this only ever fans out a snapshot of state that is
    /// already durable.
    fn publish(&mut self) {
        self.version += 1;
        let snapshot = self.build_snapshot();
        // No subscribers is not an error; the channel just drops the value.
        let _ = self.broadcast.send(snapshot);
    }
}
