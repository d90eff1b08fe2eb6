use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::db::SnapshotStore;
use crate::models::{Participant, PresenceState};
use super::collab::CollaborationSession;
use super::error::SessionError;

enum Phase {
    Unloaded,
    Active(CollaborationSession),
    /// Evicted; whoever still holds this slot must look the document up again
    Closed,
}

struct SlotState {
    phase: Phase,
    /// Merged changes not yet written to the snapshot store
    dirty: bool,
    /// Debounce deadline; `None` means no persist is pending
    deadline: Option<Instant>,
    timer_running: bool,
}

impl SlotState {
    fn session(&self, document_id: &str) -> Result<&CollaborationSession, SessionError> {
        match &self.phase {
            Phase::Active(session) => Ok(session),
            _ => Err(SessionError::Closed(document_id.to_string())),
        }
    }

    fn session_mut(&mut self, document_id: &str) -> Result<&mut CollaborationSession, SessionError> {
        match &mut self.phase {
            Phase::Active(session) => Ok(session),
            _ => Err(SessionError::Closed(document_id.to_string())),
        }
    }
}

/// Per-document synchronization point.
///
/// Lock order is `persist` before `state`. Merges only take `state`;
/// writes to the store hold `persist` so they land in the order their
/// snapshots were taken.
struct DocSlot {
    document_id: String,
    state: Arc<AsyncMutex<SlotState>>,
    persist: AsyncMutex<()>,
}

impl DocSlot {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            state: Arc::new(AsyncMutex::new(SlotState {
                phase: Phase::Unloaded,
                dirty: false,
                deadline: None,
                timer_running: false,
            })),
            persist: AsyncMutex::new(()),
        }
    }
}

/// A reference to the live session of one document
#[derive(Clone)]
pub struct SessionHandle {
    slot: Arc<DocSlot>,
}

impl SessionHandle {
    /// The updates a peer holding `state_vector` is missing
    pub async fn diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, SessionError> {
        let state = self.slot.state.lock().await;
        state.session(&self.slot.document_id)?.diff(state_vector)
    }
}

/// What a joining client needs to render the document
pub struct JoinOutcome {
    pub snapshot: Vec<u8>,
    pub state_vector: Vec<u8>,
    /// Everyone in the session, the joiner included, oldest first
    pub participants: Vec<Participant>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RegistryStats {
    pub sessions: u32,
    pub participants: u32,
    pub dirty: u32,
    pub pending_persists: u32,
}

/// Owns every live `CollaborationSession`.
///
/// All mutations of a document go through here, serialized per document.
/// Sessions load lazily from the snapshot store, write back after a quiet
/// period, and are evicted once empty and persisted.
pub struct SessionRegistry {
    store: Arc<dyn SnapshotStore>,
    debounce: Duration,
    slots: Mutex<HashMap<String, Arc<DocSlot>>>,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SnapshotStore>, debounce: Duration) -> Arc<Self> {
        info!("Session registry initialized (persistence debounce {:?})", debounce);
        Arc::new_cyclic(|this| Self {
            store,
            debounce,
            slots: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    fn slot(&self, document_id: &str) -> Arc<DocSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(DocSlot::new(document_id)))
            .clone()
    }

    fn existing_slot(&self, document_id: &str) -> Option<Arc<DocSlot>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(document_id).cloned()
    }

    fn remove_slot(&self, slot: &Arc<DocSlot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(&slot.document_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&slot.document_id);
        }
    }

    /// Lock the document's slot with its session loaded.
    ///
    /// Concurrent first accesses queue on the slot lock, so only one of them
    /// loads. A slot closed while we waited is skipped in favour of a fresh one.
    async fn acquire(&self, document_id: &str) -> Result<(Arc<DocSlot>, OwnedMutexGuard<SlotState>), SessionError> {
        loop {
            let slot = self.slot(document_id);
            let mut state = slot.state.clone().lock_owned().await;
            if matches!(state.phase, Phase::Active(_)) {
                return Ok((slot, state));
            }
            if matches!(state.phase, Phase::Closed) {
                continue;
            }
            match self.load(document_id).await {
                Ok(session) => {
                    state.phase = Phase::Active(session);
                    return Ok((slot, state));
                }
                Err(e) => {
                    // Waiters see Closed and retry on their own slot
                    state.phase = Phase::Closed;
                    self.remove_slot(&slot);
                    return Err(e);
                }
            }
        }
    }

    async fn load(&self, document_id: &str) -> Result<CollaborationSession, SessionError> {
        match self.store.find_snapshot_by_id(document_id).await? {
            Some(snapshot) => {
                info!(
                    "Loaded snapshot for {} ({} bytes, updated {})",
                    snapshot.document_id,
                    snapshot.state.len(),
                    snapshot.updated_at
                );
                CollaborationSession::new(document_id, Some(&snapshot.state))
            }
            None => {
                info!("No snapshot for {}, starting an empty document", document_id);
                CollaborationSession::new(document_id, None)
            }
        }
    }

    /// The live session for a document, loading it on first access
    pub async fn get_session(&self, document_id: &str) -> Result<SessionHandle, SessionError> {
        let (slot, _state) = self.acquire(document_id).await?;
        Ok(SessionHandle { slot })
    }

    /// Register a participant and return the state it should start from
    pub async fn join(&self, document_id: &str, participant: Participant) -> Result<JoinOutcome, SessionError> {
        let (_slot, mut state) = self.acquire(document_id).await?;
        let session = state.session_mut(document_id)?;
        let snapshot = session.snapshot()?;
        debug!("{} joined {} via {}", participant.user_id, document_id, participant.connection_id);
        session.add_participant(participant);

        let mut participants: Vec<Participant> = session.participants().cloned().collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(JoinOutcome {
            snapshot,
            state_vector: session.state_vector(),
            participants,
        })
    }

    /// Close one connection of a participant.
    ///
    /// Never loads a session. Returns true only when that was the user's
    /// last connection, so the user has left the document.
    pub async fn leave(&self, document_id: &str, user_id: &str, connection_id: &str) -> Result<bool, SessionError> {
        let Some(slot) = self.existing_slot(document_id) else {
            return Ok(false);
        };
        let mut state = slot.state.lock().await;
        let Phase::Active(session) = &mut state.phase else {
            return Ok(false);
        };
        if !session.remove_participant(user_id, connection_id) {
            debug!("{} closed {} on {}, other connections remain", user_id, connection_id, document_id);
            return Ok(false);
        }
        debug!("{} left {} ({} remaining)", user_id, document_id, session.participant_count());
        Ok(true)
    }

    /// Store a participant's presence payload on the session
    pub async fn update_presence(
        &self,
        document_id: &str,
        user_id: &str,
        connection_id: &str,
        presence_state: PresenceState,
    ) -> Result<Option<Participant>, SessionError> {
        let Some(slot) = self.existing_slot(document_id) else {
            return Ok(None);
        };
        let mut state = slot.state.lock().await;
        let Phase::Active(session) = &mut state.phase else {
            return Ok(None);
        };
        if !session.has_connection(user_id, connection_id) {
            return Ok(None);
        }
        Ok(session.set_presence_state(user_id, presence_state).cloned())
    }

    /// Merge an update and restart the quiet period before it is written
    pub async fn apply_update(&self, document_id: &str, update: &[u8], origin: &str) -> Result<(), SessionError> {
        {
            let (_slot, mut state) = self.acquire(document_id).await?;
            state.session_mut(document_id)?.apply_update(update, origin)?;
            state.dirty = true;
        }
        self.schedule_persistence(document_id).await;
        Ok(())
    }

    /// Restart the quiet period for a loaded document. A closed or unknown document is left alone.
    pub async fn schedule_persistence(&self, document_id: &str) {
        let Some(slot) = self.existing_slot(document_id) else {
            return;
        };
        let mut state = slot.state.lock().await;
        if matches!(state.phase, Phase::Active(_)) {
            self.arm_timer(&slot, &mut state);
        }
    }

    fn arm_timer(&self, slot: &Arc<DocSlot>, state: &mut SlotState) {
        state.deadline = Some(Instant::now() + self.debounce);
        if !state.timer_running {
            state.timer_running = true;
            tokio::spawn(run_persist_timer(self.this.clone(), slot.clone()));
        }
    }

    /// Write the current snapshot now, cancelling any pending timer.
    ///
    /// Nothing to write (unknown document, no changes) is not an error.
    pub async fn persist_session(&self, document_id: &str) -> Result<(), SessionError> {
        let Some(slot) = self.existing_slot(document_id) else {
            warn!("Attempted to persist non-active session: {}", document_id);
            return Ok(());
        };
        self.persist_slot(&slot).await.map(|_| ())
    }

    async fn persist_slot(&self, slot: &Arc<DocSlot>) -> Result<bool, SessionError> {
        let _persist = slot.persist.lock().await;
        let snapshot = {
            let mut state = slot.state.lock().await;
            state.deadline = None;
            if !state.dirty {
                return Ok(false);
            }
            let Phase::Active(session) = &state.phase else {
                return Ok(false);
            };
            let result = session.snapshot();
            match result {
                Ok(snapshot) => {
                    state.dirty = false;
                    snapshot
                }
                Err(e) => {
                    self.arm_timer(slot, &mut state);
                    return Err(e);
                }
            }
        };

        match self.store.save(&slot.document_id, &snapshot).await {
            Ok(()) => {
                info!("Session {} persisted successfully ({} bytes)", slot.document_id, snapshot.len());
                Ok(true)
            }
            Err(e) => {
                error!("Failed to persist session {}: {}", slot.document_id, e);
                // Retry on the next debounce cycle, not immediately
                let mut state = slot.state.lock().await;
                if matches!(state.phase, Phase::Active(_)) {
                    state.dirty = true;
                    self.arm_timer(slot, &mut state);
                }
                Err(e.into())
            }
        }
    }

    /// Final persist and eviction once nobody is left in the document.
    ///
    /// Joins arriving meanwhile wait on the slot, then reload from the store.
    /// If the final write fails the session stays resident and is retried by
    /// the debounce timer. Returns whether the session was evicted.
    pub async fn close_session_if_empty(&self, document_id: &str) -> Result<bool, SessionError> {
        let Some(slot) = self.existing_slot(document_id) else {
            return Ok(false);
        };
        self.close_slot_if_empty(&slot).await
    }

    async fn close_slot_if_empty(&self, slot: &Arc<DocSlot>) -> Result<bool, SessionError> {
        let _persist = slot.persist.lock().await;
        let mut state = slot.state.lock().await;
        let pending = match &state.phase {
            Phase::Active(session) if session.participant_count() == 0 => {
                if state.dirty {
                    Some(session.snapshot())
                } else {
                    None
                }
            }
            _ => return Ok(false),
        };
        info!("Last participant left session {}. Closing and persisting.", slot.document_id);

        state.deadline = None;
        if let Some(snapshot) = pending {
            let saved = match snapshot {
                Ok(snapshot) => self.store.save(&slot.document_id, &snapshot).await.map_err(SessionError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                error!("Final persist of {} failed, keeping it in memory: {}", slot.document_id, e);
                self.arm_timer(slot, &mut state);
                return Err(e);
            }
            state.dirty = false;
        }

        state.phase = Phase::Closed;
        self.remove_slot(slot);
        info!("Session {} closed and removed from memory.", slot.document_id);
        Ok(true)
    }

    /// Write back every loaded document with unsaved changes. Used at shutdown.
    pub async fn flush_all(&self) -> usize {
        let slots: Vec<Arc<DocSlot>> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().cloned().collect()
        };
        info!("Flushing {} session(s)", slots.len());

        let mut written = 0;
        for slot in slots {
            match self.persist_slot(&slot).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to flush session {}: {}", slot.document_id, e),
            }
        }
        written
    }

    /// Drop a document's durable state. Refused while anyone is connected to it.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), SessionError> {
        let slot = self.slot(document_id);
        let _persist = slot.persist.lock().await;
        let mut state = slot.state.lock().await;
        if let Phase::Active(session) = &state.phase {
            if session.participant_count() > 0 {
                return Err(SessionError::InUse(document_id.to_string()));
            }
        }

        let deleted = self.store.delete(document_id).await;
        if deleted.is_ok() || matches!(state.phase, Phase::Unloaded) {
            state.phase = Phase::Closed;
            state.dirty = false;
            state.deadline = None;
            self.remove_slot(&slot);
        }
        deleted?;
        info!("Document {} deleted", document_id);
        Ok(())
    }

    /// Best-effort counters; documents busy right now are only counted as sessions
    pub fn stats(&self) -> RegistryStats {
        let slots: Vec<Arc<DocSlot>> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().cloned().collect()
        };
        let mut stats = RegistryStats::default();
        for slot in slots {
            let Ok(state) = slot.state.try_lock() else {
                stats.sessions += 1;
                continue;
            };
            if let Phase::Active(session) = &state.phase {
                stats.sessions += 1;
                stats.participants += session.participant_count() as u32;
                if state.dirty {
                    stats.dirty += 1;
                }
                if state.deadline.is_some() {
                    stats.pending_persists += 1;
                }
            }
        }
        stats
    }
}

/// One lazily cancelled timer per document.
///
/// Rescheduling only moves the deadline; the task sleeps again until the
/// deadline stops moving, or exits when it is cleared.
async fn run_persist_timer(registry: Weak<SessionRegistry>, slot: Arc<DocSlot>) {
    loop {
        let deadline = {
            let mut state = slot.state.lock().await;
            let current = state.deadline;
            match current {
                None => {
                    state.timer_running = false;
                    return;
                }
                Some(deadline) if deadline <= Instant::now() => {
                    state.deadline = None;
                    state.timer_running = false;
                    break;
                }
                Some(deadline) => deadline,
            }
        };
        sleep_until(deadline).await;
    }

    let Some(registry) = registry.upgrade() else {
        return;
    };
    if registry.persist_slot(&slot).await.is_err() {
        return;
    }
    if let Err(e) = registry.close_slot_if_empty(&slot).await {
        error!("Failed to close idle session {}: {}", slot.document_id, e);
    }
}
