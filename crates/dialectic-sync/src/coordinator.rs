use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::driver::{AbortHandle, DriverEvent, StreamDriver, Terminal};
use crate::errors::{StorageError, StreamFailure, SyncError};
use crate::gate::{GateOutcome, ReconciliationGate};
use crate::history::{HistoryEntry, HistoryStore};
use crate::model::{AgentId, AgentSpec, SyncConfig};
use crate::state::{LaneEvent, StreamState};
use crate::transcript::{self, TranscriptLane};
use crate::transport::{ChatRequest, ChatTransport};
use crate::view::AgentView;

const BASELINE_ATTEMPTS: u32 = 3;

/// One user submission shared by every agent.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Exchange {
    pub id: uuid::Uuid,
    pub input_text: String,
    pub submitted_at: DateTime<Utc>,
}

struct LaneSlot {
    /// Bumped by submit, reset and delete; work tagged with an older epoch is
    /// discarded.
    epoch: u64,
    state: StreamState,
    gate: ReconciliationGate,
    abort: Option<AbortHandle>,
}

impl LaneSlot {
    fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }

    fn clear(&mut self) {
        self.cancel();
        self.state = StreamState::Idle;
        self.gate.clear();
    }
}

struct Lane {
    spec: AgentSpec,
    slot: Mutex<LaneSlot>,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, LaneSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn view(&self) -> AgentView {
        let slot = self.lock();
        let carried = slot
            .gate
            .carried()
            .iter()
            .map(|pending| pending.final_text.clone())
            .collect();
        AgentView::from_lane(&self.spec, &slot.state, carried)
    }
}

struct CoordinatorInner {
    lanes: Vec<Lane>,
    driver: StreamDriver,
    history: Arc<dyn HistoryStore>,
    config: SyncConfig,
    exchange: Mutex<Option<Exchange>>,
    revision: watch::Sender<u64>,
}

impl CoordinatorInner {
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn lock_exchange(&self) -> MutexGuard<'_, Option<Exchange>> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lane_index(&self, agent: &AgentId) -> Option<usize> {
        self.lanes.iter().position(|lane| &lane.spec.id == agent)
    }

    fn can_submit(&self) -> bool {
        self.lanes.iter().all(|lane| !lane.lock().state.is_streaming())
    }

    /// Runs `f` on the lane if `epoch` is still current and notifies
    /// subscribers. Returns `None` for stale work.
    fn with_lane<R>(&self, index: usize, epoch: u64, f: impl FnOnce(&mut LaneSlot) -> R) -> Option<R> {
        let lane = &self.lanes[index];
        let result = {
            let mut slot = lane.lock();
            if slot.epoch != epoch {
                debug!(agent = %lane.spec.id, epoch, current = slot.epoch, "discarding work from superseded exchange");
                return None;
            }
            f(&mut slot)
        };
        self.bump();
        Some(result)
    }

    fn apply(&self, index: usize, epoch: u64, event: LaneEvent) -> bool {
        let agent = &self.lanes[index].spec.id;
        self.with_lane(index, epoch, |slot| {
            if let Err(err) = slot.state.apply(event) {
                warn!(agent = %agent, error = %err, "ignored lane event");
            }
        })
        .is_some()
    }

    fn feed_history(
        &self,
        index: usize,
        epoch: Option<u64>,
        entries: &[HistoryEntry],
    ) -> Option<GateOutcome> {
        let lane = &self.lanes[index];
        let outcome = {
            let mut guard = lane.lock();
            if epoch.is_some_and(|epoch| epoch != guard.epoch) {
                debug!(agent = %lane.spec.id, "discarding history snapshot from superseded exchange");
                return None;
            }
            let slot = &mut *guard;
            slot.gate.on_history_updated(&mut slot.state, entries)
        };
        self.bump();
        Some(outcome)
    }

    /// No reply of this lane is waiting for persisted history.
    fn is_settled(&self, index: usize) -> bool {
        let slot = self.lanes[index].lock();
        slot.state.pending().is_none() && slot.gate.carried().is_empty()
    }

    /// Persisted length this exchange's reply will be matched after. The
    /// length is always read fresh; a guessed baseline could release the reply
    /// against an older identical answer.
    async fn baseline_history_len(&self, index: usize) -> Result<usize, StorageError> {
        let agent = &self.lanes[index].spec.id;
        let mut attempt = 1;
        loop {
            match self.history.len(agent).await {
                Ok(len) => return Ok(len),
                Err(err) if attempt >= BASELINE_ATTEMPTS => return Err(err),
                Err(err) => {
                    debug!(agent = %agent, attempt, error = %err, "history length unavailable, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.history_poll_interval).await;
                }
            }
        }
    }

    /// Streams one reply into the lane. Returns false once the lane belongs to
    /// a newer exchange.
    async fn stream_reply(&self, index: usize, epoch: u64, exchange: &Exchange) -> bool {
        let agent = &self.lanes[index].spec.id;
        let baseline = match self.baseline_history_len(index).await {
            Ok(len) => len,
            Err(err) => {
                warn!(agent = %agent, error = %err, "history length unavailable, not opening stream");
                let failure = StreamFailure::HistoryUnavailable {
                    agent: agent.to_string(),
                    message: err.to_string(),
                };
                return self.apply(index, epoch, LaneEvent::Failed(failure));
            }
        };

        let request = ChatRequest {
            exchange_id: exchange.id,
            agent: agent.clone(),
            input_text: exchange.input_text.clone(),
            generation: self.config.generation.clone(),
        };
        let mut stream = match self.driver.start(request) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(agent = %agent, error = %err, "stream could not start");
                let failure = StreamFailure::Protocol {
                    agent: agent.to_string(),
                    message: err.to_string(),
                };
                return self.apply(index, epoch, LaneEvent::Failed(failure));
            }
        };
        let abort = stream.abort_handle();
        if self
            .with_lane(index, epoch, |slot| slot.abort = Some(abort))
            .is_none()
        {
            stream.abort();
            return false;
        }

        while let Some(event) = stream.next_event().await {
            match event {
                DriverEvent::Delta { text, .. } => {
                    if !self.apply(index, epoch, LaneEvent::Delta(text)) {
                        stream.abort();
                        return false;
                    }
                }
                DriverEvent::Terminal(Terminal::Done { accumulated_text }) => {
                    let entered = self.with_lane(index, epoch, |slot| {
                        slot.abort = None;
                        slot.gate
                            .enter_pending(&mut slot.state, &accumulated_text, baseline)
                    });
                    match entered {
                        Some(Ok(())) => return true,
                        Some(Err(err)) => {
                            warn!(agent = %agent, error = %err, "completed stream could not enter pending");
                            return true;
                        }
                        None => return false,
                    }
                }
                DriverEvent::Terminal(Terminal::Error { failure }) => {
                    warn!(agent = %agent, exchange_id = %exchange.id, error = %failure, "stream failed");
                    return self.apply(index, epoch, LaneEvent::Failed(failure));
                }
                DriverEvent::Terminal(Terminal::Aborted) => {
                    return self.apply(index, epoch, LaneEvent::Failed(StreamFailure::Cancelled));
                }
            }
        }
        true
    }

    /// Refreshes history while the current reply or a carried one is still
    /// unsaved, at most `history_poll_attempts` times.
    async fn poll_until_settled(&self, index: usize, epoch: u64) {
        let agent = &self.lanes[index].spec.id;
        let attempts = self.config.history_poll_attempts.max(1);
        for attempt in 0..attempts {
            if self.is_settled(index) {
                return;
            }
            if attempt > 0 {
                tokio::time::sleep(self.config.history_poll_interval).await;
            }
            match self.history.fetch(agent).await {
                Ok(entries) => {
                    if self.feed_history(index, Some(epoch), &entries).is_none() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(agent = %agent, attempt, error = %err, "history refresh failed");
                }
            }
        }
        if !self.is_settled(index) {
            debug!(agent = %agent, attempts, "replies still pending persistence after background refreshes");
        }
    }
}

async fn drive_lane(inner: Arc<CoordinatorInner>, index: usize, epoch: u64, exchange: Exchange) {
    if inner.stream_reply(index, epoch, &exchange).await {
        inner.poll_until_settled(index, epoch).await;
    }
}

/// Fans one submission out to every agent and tracks when input may be
/// accepted again.
///
/// Lanes are independent: a failure, cancellation race or persistence mismatch
/// in one lane never changes another lane's state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(
        agents: Vec<AgentSpec>,
        transport: Arc<dyn ChatTransport>,
        history: Arc<dyn HistoryStore>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        if agents.is_empty() {
            return Err(SyncError::Config("at least one agent is required".into()));
        }
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.id.clone()) {
                return Err(SyncError::Config(format!(
                    "duplicate agent registration: {}",
                    agent.id
                )));
            }
        }
        config.validate()?;

        let lanes = agents
            .into_iter()
            .map(|spec| Lane {
                slot: Mutex::new(LaneSlot {
                    epoch: 0,
                    state: StreamState::Idle,
                    gate: ReconciliationGate::new(spec.id.clone()),
                    abort: None,
                }),
                spec,
            })
            .collect();
        let (revision, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                lanes,
                driver: StreamDriver::from_config(transport, &config),
                history,
                config,
                exchange: Mutex::new(None),
                revision,
            }),
        })
    }

    pub fn agents(&self) -> Vec<AgentSpec> {
        self.inner.lanes.iter().map(|lane| lane.spec.clone()).collect()
    }

    /// True when no agent is streaming, even if replies are still pending
    /// persistence.
    pub fn can_submit(&self) -> bool {
        self.inner.can_submit()
    }

    pub fn current_exchange(&self) -> Option<Exchange> {
        self.inner.lock_exchange().clone()
    }

    /// Sends `text` to every agent at once.
    ///
    /// Returns `None` without side effects when the trimmed text is empty or a
    /// lane is still streaming. Must be called inside a tokio runtime.
    pub fn submit(&self, text: &str) -> Option<Exchange> {
        let input_text = text.trim();
        if input_text.is_empty() {
            debug!("submit ignored: empty input");
            return None;
        }

        let mut current = self.inner.lock_exchange();
        if !self.inner.can_submit() {
            debug!("submit ignored: an agent is still streaming");
            return None;
        }
        let exchange = Exchange {
            id: uuid::Uuid::new_v4(),
            input_text: input_text.to_string(),
            submitted_at: Utc::now(),
        };

        let mut epochs = Vec::with_capacity(self.inner.lanes.len());
        for lane in &self.inner.lanes {
            let mut guard = lane.lock();
            let slot = &mut *guard;
            slot.gate.carry_over(&slot.state);
            slot.cancel();
            slot.state = StreamState::Idle;
            if let Err(err) = slot.state.apply(LaneEvent::Begin) {
                warn!(agent = %lane.spec.id, error = %err, "lane could not begin");
            }
            epochs.push(slot.epoch);
        }
        *current = Some(exchange.clone());
        drop(current);
        self.inner.bump();
        info!(exchange_id = %exchange.id, agents = epochs.len(), "exchange submitted");

        for (index, epoch) in epochs.into_iter().enumerate() {
            tokio::spawn(drive_lane(
                self.inner.clone(),
                index,
                epoch,
                exchange.clone(),
            ));
        }
        Some(exchange)
    }

    /// Cancels every in-flight stream and returns all lanes to `Idle`.
    pub fn reset_exchange(&self) {
        let mut current = self.inner.lock_exchange();
        for lane in &self.inner.lanes {
            lane.lock().clear();
        }
        let exchange_id = current.take().map(|exchange| exchange.id);
        drop(current);
        self.inner.bump();
        info!(exchange_id = ?exchange_id, "exchange reset");
    }

    /// Deletes every agent's persisted history and clears local state.
    ///
    /// Lanes are cleared whatever the per-agent outcome; failures are returned
    /// and logged per agent.
    pub async fn delete_history(&self) -> Vec<(AgentId, Result<(), StorageError>)> {
        for lane in &self.inner.lanes {
            lane.lock().clear();
        }
        self.inner.bump();

        let results = join_all(self.inner.lanes.iter().map(|lane| async move {
            let agent = lane.spec.id.clone();
            let result = self.inner.history.delete(&agent).await;
            (agent, result)
        }))
        .await;

        for (agent, result) in &results {
            match result {
                Ok(()) => info!(agent = %agent, "history deleted"),
                Err(err) => warn!(agent = %agent, error = %err, "history delete failed"),
            }
        }
        self.inner.bump();
        results
    }

    /// Fetches every agent's history now and feeds it to the reconciliation
    /// gates.
    pub async fn refresh_history(&self) -> Vec<(AgentId, Result<GateOutcome, StorageError>)> {
        let inner = &self.inner;
        join_all(inner.lanes.iter().enumerate().map(|(index, lane)| async move {
            let agent = lane.spec.id.clone();
            let epoch = lane.lock().epoch;
            let outcome = match inner.history.fetch(&agent).await {
                Ok(entries) => Ok(inner
                    .feed_history(index, Some(epoch), &entries)
                    .unwrap_or(GateOutcome::NotPending)),
                Err(err) => {
                    warn!(agent = %agent, error = %err, "history refresh failed");
                    Err(err)
                }
            };
            (agent, outcome)
        }))
        .await
    }

    /// Feeds an externally obtained history snapshot (for example a push
    /// notification) to one agent's gate.
    pub fn apply_history(
        &self,
        agent: &AgentId,
        entries: &[HistoryEntry],
    ) -> Result<GateOutcome, SyncError> {
        let index = self
            .inner
            .lane_index(agent)
            .ok_or_else(|| SyncError::AgentNotFound {
                agent: agent.clone(),
            })?;
        Ok(self
            .inner
            .feed_history(index, None, entries)
            .unwrap_or(GateOutcome::NotPending))
    }

    pub fn state(&self, agent: &AgentId) -> Option<StreamState> {
        let index = self.inner.lane_index(agent)?;
        Some(self.inner.lanes[index].lock().state.clone())
    }

    pub fn view(&self, agent: &AgentId) -> Option<AgentView> {
        let index = self.inner.lane_index(agent)?;
        Some(self.inner.lanes[index].view())
    }

    pub fn views(&self) -> Vec<AgentView> {
        self.inner.lanes.iter().map(Lane::view).collect()
    }

    /// Revision counter bumped on every observable change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Resolves once `predicate` holds for the current views.
    pub async fn wait_for(&self, predicate: impl Fn(&[AgentView]) -> bool) {
        let mut rx = self.subscribe();
        loop {
            if predicate(self.views().as_slice()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolves once no agent is streaming.
    pub async fn wait_until_ready(&self) {
        self.wait_for(|views| views.iter().all(|view| !view.is_streaming))
            .await;
    }

    /// Renders the persisted comparison plus any reply not yet persisted.
    pub async fn transcript(&self, generated_at: DateTime<Utc>) -> Result<String, SyncError> {
        let inner = &self.inner;
        let fetched = join_all(
            inner
                .lanes
                .iter()
                .map(|lane| async move { inner.history.fetch(&lane.spec.id).await }),
        )
        .await;

        let mut lanes = Vec::with_capacity(inner.lanes.len());
        for (lane, entries) in inner.lanes.iter().zip(fetched) {
            let entries = entries?;
            let slot = lane.lock();
            let mut unsaved: Vec<String> = slot
                .gate
                .carried()
                .iter()
                .map(|pending| pending.final_text.clone())
                .collect();
            if let Some(pending) = slot.state.pending() {
                unsaved.push(pending.final_text.clone());
            }
            lanes.push(TranscriptLane {
                name: lane.spec.name.clone(),
                entries,
                unsaved,
            });
        }
        Ok(transcript::render_comparison(&lanes, generated_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::history::MemoryHistory;
    use crate::transport::{ChatStreamHandle, TransportEvent};
    use futures::stream;

    struct EchoTransport;

    #[async_trait::async_trait]
    impl ChatTransport for EchoTransport {
        async fn open_stream(
            &self,
            request: ChatRequest,
        ) -> Result<ChatStreamHandle, TransportError> {
            let reply = format!("{} says: {}", request.agent, request.input_text);
            Ok(ChatStreamHandle::new(stream::iter(vec![
                Ok(TransportEvent::TextDelta { text: reply }),
                Ok(TransportEvent::EndOfStream),
            ])))
        }
    }

    fn coordinator(agents: Vec<AgentSpec>) -> Result<Coordinator, SyncError> {
        Coordinator::new(
            agents,
            Arc::new(EchoTransport),
            Arc::new(MemoryHistory::new()),
            SyncConfig::default(),
        )
    }

    #[test]
    fn rejects_empty_and_duplicate_agents() {
        assert!(matches!(coordinator(vec![]), Err(SyncError::Config(_))));
        let dup = coordinator(vec![
            AgentSpec::new("plato", "Plato"),
            AgentSpec::new("plato", "Plato again"),
        ]);
        assert!(matches!(dup, Err(SyncError::Config(msg)) if msg.contains("duplicate")));
    }

    #[tokio::test]
    async fn blank_submit_is_a_no_op() {
        let coordinator = coordinator(vec![AgentSpec::new("plato", "Plato")]).expect("coordinator");
        assert!(coordinator.submit("  \n").is_none());
        assert!(coordinator.current_exchange().is_none());
        assert_eq!(
            coordinator.state(&AgentId::new("plato")),
            Some(StreamState::Idle)
        );
    }

    #[tokio::test]
    async fn submit_trims_input_and_starts_every_lane() {
        let coordinator = coordinator(vec![
            AgentSpec::new("plato", "Plato"),
            AgentSpec::new("hume", "Hume"),
        ])
        .expect("coordinator");
        let exchange = coordinator.submit("  What is virtue?  ").expect("submitted");
        assert_eq!(exchange.input_text, "What is virtue?");
        assert!(!coordinator.can_submit());
        assert!(coordinator.views().iter().all(|view| view.is_streaming));

        coordinator.wait_until_ready().await;
        for view in coordinator.views() {
            assert!(view.is_pending_persistence);
            assert!(view.display_text.ends_with("What is virtue?"));
        }
    }

    #[tokio::test]
    async fn apply_history_for_unknown_agent_fails() {
        let coordinator = coordinator(vec![AgentSpec::new("plato", "Plato")]).expect("coordinator");
        let err = coordinator
            .apply_history(&AgentId::new("kant"), &[])
            .expect_err("unknown agent");
        assert!(matches!(err, SyncError::AgentNotFound { .. }));
    }
}
