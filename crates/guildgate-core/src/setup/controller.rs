// Connection-wide orchestration of guild setup nodes, chunk batching and the
// handshake readiness gate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use guildgate_models::gateway::{guild_sync_message, GatewayMessage, RequestGuildMembers};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::node::{GuildSetupNode, GuildSnapshot, SetupKind, SetupStatus, SetupStep};
use crate::config::SetupConfig;
use crate::event_cache::{CacheKind, CachedEvent};
use crate::events::ClientEvent;
use crate::sink::GatewaySink;

/// Side effects the caller must carry out after a controller call.
/// The controller never builds guilds or publishes events itself.
#[derive(Debug, Default)]
pub struct SetupOutcome {
    /// Guilds that finished collecting; build, register, then call `finish`.
    pub completed: Vec<GuildSnapshot>,
    pub events: Vec<ClientEvent>,
    /// Event-cache keys that will never be satisfied.
    pub purge: Vec<(CacheKind, i64)>,
    /// Set when this call resolved the last handshake guild.
    pub gateway_ready: Option<usize>,
}

impl SetupOutcome {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
            && self.events.is_empty()
            && self.purge.is_empty()
            && self.gateway_ready.is_none()
    }
}

/// Result of [`GuildSetupController::finish`].
#[derive(Debug)]
pub struct FinishedSetup {
    pub kind: SetupKind,
    /// Events queued on the node, in arrival order.
    pub queued: Vec<CachedEvent>,
    pub gateway_ready: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct PendingChunk {
    deadline: Instant,
    attempts: u32,
}

#[derive(Default)]
struct SetupState {
    nodes: HashMap<i64, GuildSetupNode>,
    /// Guilds waiting for a member request, in arrival order.
    chunking: Vec<i64>,
    syncing: Vec<i64>,
    pending_chunks: HashMap<i64, PendingChunk>,
    /// Handshake guilds not yet resolved.
    incomplete: HashSet<i64>,
    /// Guilds that went unavailable after setup.
    unavailable: HashSet<i64>,
    handshake_started: bool,
    handshake_total: usize,
    ready: bool,
}

pub struct GuildSetupController {
    state: Mutex<SetupState>,
    config: SetupConfig,
    sink: Arc<dyn GatewaySink>,
}

impl GuildSetupController {
    pub fn new(config: SetupConfig, sink: Arc<dyn GatewaySink>) -> Self {
        Self {
            state: Mutex::new(SetupState::default()),
            config,
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SetupState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send_all(&self, outgoing: Vec<GatewayMessage>) {
        for message in outgoing {
            self.sink.send(message);
        }
    }

    /// Start the handshake with the guild list from READY.
    pub fn on_ready(&self, guild_ids: &[i64]) -> SetupOutcome {
        let mut outcome = SetupOutcome::default();
        let mut st = self.lock();
        st.handshake_started = true;
        st.ready = false;
        st.handshake_total = guild_ids.len();
        for &id in guild_ids {
            st.nodes
                .entry(id)
                .or_insert_with(|| GuildSetupNode::new(id, SetupKind::InitialSync, &self.config));
            st.incomplete.insert(id);
        }
        info!(guilds = guild_ids.len(), "handshake started");
        outcome.gateway_ready = check_ready(&mut st);
        outcome
    }

    /// GUILD_CREATE (or a full guild object in READY).
    pub fn on_guild_appears(&self, guild_id: i64, payload: &Value) -> SetupOutcome {
        let available = !payload
            .get("unavailable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();

        match st.nodes.get(&guild_id) {
            None => {
                let kind = if available && st.unavailable.remove(&guild_id) {
                    SetupKind::Reappearing
                } else {
                    SetupKind::Join
                };
                debug!(guild_id, ?kind, "guild appeared without setup node");
                st.nodes
                    .insert(guild_id, GuildSetupNode::new(guild_id, kind, &self.config));
            }
            Some(node) => {
                if available
                    && node.status() == SetupStatus::Unavailable
                    && node.kind() == SetupKind::InitialSync
                    && !st.ready
                {
                    // Back during the handshake; it counts towards READY again.
                    st.incomplete.insert(guild_id);
                }
            }
        }

        let step = match st.nodes.get_mut(&guild_id) {
            Some(node) => node.handle_create(payload),
            None => SetupStep::Continue,
        };
        self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        outcome
    }

    /// GUILD_SYNC for a node in the syncing state.
    pub fn on_sync(&self, guild_id: i64, payload: &Value) -> Option<SetupOutcome> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let step = st.nodes.get_mut(&guild_id)?.handle_sync(payload);
        st.syncing.retain(|id| *id != guild_id);
        self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(outcome)
    }

    /// GUILD_MEMBERS_CHUNK. `None` when no node exists; the chunk is stale.
    pub fn on_member_chunk(
        &self,
        guild_id: i64,
        members: &[Value],
        last: bool,
    ) -> Option<SetupOutcome> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let step = st.nodes.get_mut(&guild_id)?.handle_member_chunk(members, last);
        if let Some(pending) = st.pending_chunks.get_mut(&guild_id) {
            pending.deadline = Instant::now() + self.config.chunk_timeout();
        }
        self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(outcome)
    }

    /// Live member join for a locked guild. `None` when the node did not
    /// consume it; the caller queues the raw event instead.
    pub fn on_add_member(&self, guild_id: i64, member: &Value) -> Option<SetupOutcome> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let step = st.nodes.get_mut(&guild_id)?.handle_add_member(member)?;
        self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(outcome)
    }

    pub fn on_remove_member(&self, guild_id: i64, user_id: i64) -> Option<SetupOutcome> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let step = st.nodes.get_mut(&guild_id)?.handle_remove_member(user_id)?;
        self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(outcome)
    }

    /// GUILD_DELETE for a guild that is still being set up. `None` when no
    /// node exists.
    pub fn on_guild_removed(&self, guild_id: i64, unavailable: bool) -> Option<SetupOutcome> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        if !st.nodes.contains_key(&guild_id) {
            return None;
        }
        cancel_requests(&mut st, guild_id);

        if unavailable {
            if let Some(node) = st.nodes.get_mut(&guild_id) {
                if node.status() != SetupStatus::Unavailable {
                    debug!(guild_id, status = %node.status(), "guild went unavailable during setup");
                    node.mark_unavailable();
                    outcome.events.push(ClientEvent::GuildUnavailable { guild_id });
                }
            }
        } else if let Some(mut node) = st.nodes.remove(&guild_id) {
            debug!(guild_id, status = %node.status(), "guild removed during setup");
            outcome.purge = node.remove();
            outcome.events.push(ClientEvent::GuildLeave { guild_id });
        }

        self.resolve_handshake(&mut st, guild_id, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(outcome)
    }

    /// Queue a raw event on a locked guild. Returns false if no node exists.
    pub fn queue_event(&self, guild_id: i64, event: CachedEvent) -> bool {
        let mut st = self.lock();
        match st.nodes.get_mut(&guild_id) {
            Some(node) => {
                trace!(guild_id, seq = event.seq, event_type = %event.event_type, "queueing event on setup node");
                node.queue_event(event);
                true
            }
            None => {
                warn!(guild_id, event_type = %event.event_type, "attempted to queue event for a guild that is not locked");
                false
            }
        }
    }

    /// Remove a node whose guild has been built and registered.
    pub fn finish(&self, guild_id: i64) -> Option<FinishedSetup> {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let mut node = st.nodes.remove(&guild_id)?;
        node.mark_ready();
        cancel_requests(&mut st, guild_id);
        self.resolve_handshake(&mut st, guild_id, &mut outcome, &mut outgoing);
        drop(st);
        self.send_all(outgoing);
        Some(FinishedSetup {
            kind: node.kind(),
            queued: node.take_queued(),
            gateway_ready: outcome.gateway_ready,
        })
    }

    /// Re-send member requests whose deadline passed. Guilds that exhausted
    /// their retries are completed with what they have.
    pub fn sweep_chunk_timeouts(&self, now: Instant) -> SetupOutcome {
        let mut outcome = SetupOutcome::default();
        let mut outgoing = Vec::new();
        let mut st = self.lock();

        let mut expired: Vec<i64> = st
            .pending_chunks
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return outcome;
        }
        expired.sort_unstable();

        let mut retry = Vec::new();
        for guild_id in expired {
            let chunking = st
                .nodes
                .get(&guild_id)
                .is_some_and(|node| node.status() == SetupStatus::Chunking);
            if !chunking {
                st.pending_chunks.remove(&guild_id);
                continue;
            }
            let attempts = st.pending_chunks.get(&guild_id).map_or(0, |p| p.attempts);
            if attempts > self.config.max_chunk_retries {
                warn!(guild_id, attempts, "member chunk requests keep timing out");
                st.pending_chunks.remove(&guild_id);
                let step = match st.nodes.get_mut(&guild_id) {
                    Some(node) => node.force_complete(),
                    None => SetupStep::Continue,
                };
                self.apply_step(&mut st, guild_id, step, &mut outcome, &mut outgoing);
            } else {
                retry.push(guild_id);
            }
        }

        for batch in retry.chunks(self.config.batch_size()) {
            debug!(guilds = batch.len(), "re-sending timed out member chunk requests");
            outgoing.push(self.chunk_request(&mut st, batch.to_vec(), now));
        }
        drop(st);
        self.send_all(outgoing);
        outcome
    }

    /// Re-issue the sync and member requests that were in flight when the
    /// connection dropped. Guilds still waiting for a batch stay queued.
    pub fn resend_requests(&self) {
        let mut outgoing = Vec::new();
        let mut st = self.lock();
        let batch = self.config.batch_size();

        let mut syncing: Vec<i64> = st
            .nodes
            .iter()
            .filter(|(id, node)| node.status() == SetupStatus::Syncing && !st.syncing.contains(id))
            .map(|(id, _)| *id)
            .collect();
        syncing.sort_unstable();
        for ids in syncing.chunks(batch) {
            debug!(guilds = ids.len(), "re-sending guild sync request after resume");
            outgoing.push(guild_sync_message(ids));
        }

        let mut chunking: Vec<i64> = st
            .pending_chunks
            .keys()
            .copied()
            .filter(|id| {
                st.nodes
                    .get(id)
                    .is_some_and(|node| node.status() == SetupStatus::Chunking)
            })
            .collect();
        chunking.sort_unstable();
        // A lost request is not a timeout: the retry budget starts over.
        for id in &chunking {
            st.pending_chunks.remove(id);
        }
        let now = Instant::now();
        for ids in chunking.chunks(batch) {
            debug!(guilds = ids.len(), "re-sending member chunk request after resume");
            outgoing.push(self.chunk_request(&mut st, ids.to_vec(), now));
        }

        drop(st);
        self.send_all(outgoing);
    }

    fn apply_step(
        &self,
        st: &mut SetupState,
        guild_id: i64,
        step: SetupStep,
        outcome: &mut SetupOutcome,
        outgoing: &mut Vec<GatewayMessage>,
    ) {
        match step {
            SetupStep::Continue => {}
            SetupStep::NeedsSync => self.add_for_syncing(st, guild_id, outgoing),
            SetupStep::NeedsChunks => self.add_for_chunking(st, guild_id, outgoing),
            SetupStep::Unavailable => {
                cancel_requests(st, guild_id);
                let announce_join = st
                    .nodes
                    .get_mut(&guild_id)
                    .is_some_and(|node| node.take_unavailable_join_notice());
                if announce_join {
                    outcome
                        .events
                        .push(ClientEvent::UnavailableGuildJoined { guild_id });
                } else {
                    outcome.events.push(ClientEvent::GuildUnavailable { guild_id });
                }
                self.resolve_handshake(st, guild_id, outcome, outgoing);
            }
            SetupStep::Completed => {
                cancel_requests(st, guild_id);
                if let Some(node) = st.nodes.get_mut(&guild_id) {
                    debug!(guild_id, members = node.member_count(), "guild setup collected, building");
                    outcome.completed.push(node.take_snapshot());
                }
            }
        }
    }

    /// Drop the guild from the handshake countdown and flush any batch that is
    /// now the last one.
    fn resolve_handshake(
        &self,
        st: &mut SetupState,
        guild_id: i64,
        outcome: &mut SetupOutcome,
        outgoing: &mut Vec<GatewayMessage>,
    ) {
        if !st.incomplete.remove(&guild_id) {
            return;
        }
        trace!(guild_id, remaining = st.incomplete.len(), "handshake guild resolved");
        if let Some(count) = check_ready(st) {
            outcome.gateway_ready = Some(count);
        }
        self.try_syncing(st, outgoing);
        self.try_chunking(st, outgoing);
    }

    fn add_for_chunking(&self, st: &mut SetupState, guild_id: i64, outgoing: &mut Vec<GatewayMessage>) {
        trace!(guild_id, "adding guild for chunking");
        if st.ready || !st.handshake_started {
            outgoing.push(self.chunk_request(st, vec![guild_id], Instant::now()));
            return;
        }
        if !st.chunking.contains(&guild_id) {
            st.chunking.push(guild_id);
        }
        self.try_chunking(st, outgoing);
    }

    fn try_chunking(&self, st: &mut SetupState, outgoing: &mut Vec<GatewayMessage>) {
        let batch = self.config.batch_size();
        while st.chunking.len() >= batch {
            let ids: Vec<i64> = st.chunking.drain(..batch).collect();
            outgoing.push(self.chunk_request(st, ids, Instant::now()));
        }
        // Every guild still outstanding is waiting on chunks: flush the tail.
        if !st.chunking.is_empty() && st.chunking.len() >= st.incomplete.len() {
            let ids = std::mem::take(&mut st.chunking);
            outgoing.push(self.chunk_request(st, ids, Instant::now()));
        }
    }

    fn chunk_request(&self, st: &mut SetupState, ids: Vec<i64>, now: Instant) -> GatewayMessage {
        debug!(guilds = ids.len(), "sending member chunk request");
        let deadline = now + self.config.chunk_timeout();
        for id in &ids {
            let pending = st.pending_chunks.entry(*id).or_insert(PendingChunk {
                deadline,
                attempts: 0,
            });
            pending.deadline = deadline;
            pending.attempts += 1;
        }
        RequestGuildMembers::all_members(ids).into_message()
    }

    fn add_for_syncing(&self, st: &mut SetupState, guild_id: i64, outgoing: &mut Vec<GatewayMessage>) {
        trace!(guild_id, "adding guild for syncing");
        if st.ready || !st.handshake_started {
            outgoing.push(guild_sync_message(&[guild_id]));
            return;
        }
        if !st.syncing.contains(&guild_id) {
            st.syncing.push(guild_id);
        }
        self.try_syncing(st, outgoing);
    }

    fn try_syncing(&self, st: &mut SetupState, outgoing: &mut Vec<GatewayMessage>) {
        let batch = self.config.batch_size();
        while st.syncing.len() >= batch {
            let ids: Vec<i64> = st.syncing.drain(..batch).collect();
            debug!(guilds = ids.len(), "sending guild sync request");
            outgoing.push(guild_sync_message(&ids));
        }
        if !st.syncing.is_empty() && st.syncing.len() >= st.incomplete.len() {
            let ids = std::mem::take(&mut st.syncing);
            debug!(guilds = ids.len(), "sending guild sync request");
            outgoing.push(guild_sync_message(&ids));
        }
    }

    /// The primary check every handler makes before touching global caches.
    pub fn is_locked(&self, guild_id: i64) -> bool {
        self.lock().nodes.contains_key(&guild_id)
    }

    pub fn status(&self, guild_id: i64) -> Option<SetupStatus> {
        self.lock().nodes.get(&guild_id).map(GuildSetupNode::status)
    }

    /// Inspect a node without taking it out of the table.
    pub fn with_node<R>(&self, guild_id: i64, f: impl FnOnce(&GuildSetupNode) -> R) -> Option<R> {
        self.lock().nodes.get(&guild_id).map(f)
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn incomplete_count(&self) -> usize {
        self.lock().incomplete.len()
    }

    pub fn setup_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn pending_chunk_count(&self) -> usize {
        self.lock().pending_chunks.len()
    }

    /// Record a guild that went unavailable after it was set up.
    pub fn mark_unavailable(&self, guild_id: i64) {
        self.lock().unavailable.insert(guild_id);
    }

    pub fn is_unavailable(&self, guild_id: i64) -> bool {
        self.lock().unavailable.contains(&guild_id)
    }

    /// Forget an unavailable guild; true if it was tracked.
    pub fn forget_unavailable(&self, guild_id: i64) -> bool {
        self.lock().unavailable.remove(&guild_id)
    }

    /// Drop all connection-scoped setup state.
    pub fn reset(&self) {
        let mut st = self.lock();
        if !st.nodes.is_empty() {
            debug!(nodes = st.nodes.len(), "discarding guild setup state");
        }
        *st = SetupState::default();
    }
}

fn cancel_requests(st: &mut SetupState, guild_id: i64) {
    st.chunking.retain(|id| *id != guild_id);
    st.syncing.retain(|id| *id != guild_id);
    st.pending_chunks.remove(&guild_id);
}

fn check_ready(st: &mut SetupState) -> Option<usize> {
    if st.ready || !st.handshake_started || !st.incomplete.is_empty() {
        return None;
    }
    st.ready = true;
    info!(guilds = st.handshake_total, "all handshake guilds resolved");
    Some(st.handshake_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use guildgate_models::gateway::{OP_GUILD_SYNC, OP_REQUEST_GUILD_MEMBERS};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn controller(config: SetupConfig) -> (GuildSetupController, UnboundedReceiver<GatewayMessage>) {
        let (sink, rx) = ChannelSink::new();
        (GuildSetupController::new(config, Arc::new(sink)), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayMessage>) -> Vec<GatewayMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn requested_ids(msg: &GatewayMessage) -> Vec<i64> {
        assert_eq!(msg.op, OP_REQUEST_GUILD_MEMBERS);
        let req: RequestGuildMembers = serde_json::from_value(msg.d.clone().unwrap()).unwrap();
        req.guild_id
    }

    fn member(id: i64) -> Value {
        json!({ "user": { "id": id.to_string() } })
    }

    fn big_guild(id: i64) -> Value {
        json!({ "id": id.to_string(), "name": "g", "member_count": 5, "members": [member(1)] })
    }

    fn small_guild(id: i64) -> Value {
        json!({ "id": id.to_string(), "name": "g", "member_count": 1, "members": [member(1)] })
    }

    #[test]
    fn empty_handshake_is_ready_immediately() {
        let (ctl, _rx) = controller(SetupConfig::default());
        let outcome = ctl.on_ready(&[]);
        assert_eq!(outcome.gateway_ready, Some(0));
        assert!(ctl.is_ready());
    }

    #[test]
    fn handshake_nodes_are_locked() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1, 2]);
        assert!(ctl.is_locked(1));
        assert!(ctl.is_locked(2));
        assert!(!ctl.is_locked(3));
        assert_eq!(ctl.incomplete_count(), 2);
    }

    #[test]
    fn last_outstanding_guilds_are_flushed_together() {
        let (ctl, mut rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1, 2, 3]);

        ctl.on_guild_appears(1, &big_guild(1));
        ctl.on_guild_appears(2, &big_guild(2));
        assert!(drain(&mut rx).is_empty());

        // Guild 3 completes without chunking; 1 and 2 are now all that is left.
        let outcome = ctl.on_guild_appears(3, &small_guild(3));
        assert_eq!(outcome.completed.len(), 1);
        let finished = ctl.finish(3).unwrap();
        assert_eq!(finished.gateway_ready, None);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(requested_ids(&sent[0]), vec![1, 2]);
    }

    #[test]
    fn batches_never_exceed_ceiling() {
        let (ctl, mut rx) = controller(SetupConfig::default());
        let ids: Vec<i64> = (1..=120).collect();
        ctl.on_ready(&ids);
        for id in &ids {
            ctl.on_guild_appears(*id, &big_guild(*id));
        }
        let sent = drain(&mut rx);
        let mut sizes: Vec<usize> = sent.iter().map(|m| requested_ids(m).len()).collect();
        assert_eq!(sizes, vec![50, 50]);
        assert_eq!(ctl.pending_chunk_count(), 100);

        // The tail of 20 waits until it is all that is outstanding.
        let rest = [member(2), member(3), member(4), member(5)];
        for id in 1..=100 {
            let outcome = ctl.on_member_chunk(id, &rest, false).unwrap();
            assert_eq!(outcome.completed.len(), 1);
            ctl.finish(id).unwrap();
        }
        sizes.extend(drain(&mut rx).iter().map(|m| requested_ids(m).len()));
        assert_eq!(sizes, vec![50, 50, 20]);
        assert!(sizes.iter().all(|s| *s <= 50));
    }

    #[test]
    fn join_after_handshake_requests_immediately() {
        let (ctl, mut rx) = controller(SetupConfig::default());
        ctl.on_ready(&[]);
        ctl.on_guild_appears(9, &big_guild(9));
        assert_eq!(ctl.status(9), Some(SetupStatus::Chunking));
        let sent = drain(&mut rx);
        assert_eq!(requested_ids(&sent[0]), vec![9]);
    }

    #[test]
    fn ready_gate_opens_on_last_completion() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1, 2]);
        ctl.on_guild_appears(1, &small_guild(1));
        assert_eq!(ctl.finish(1).unwrap().gateway_ready, None);
        ctl.on_guild_appears(2, &big_guild(2));
        let outcome = ctl
            .on_member_chunk(2, &[member(2), member(3), member(4), member(5)], false)
            .unwrap();
        assert_eq!(outcome.completed.len(), 1);
        let finished = ctl.finish(2).unwrap();
        assert_eq!(finished.kind, SetupKind::InitialSync);
        assert_eq!(finished.gateway_ready, Some(2));
        assert!(ctl.is_ready());
        assert_eq!(ctl.setup_count(), 0);
    }

    #[test]
    fn removal_mid_setup_unblocks_ready_gate() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1]);
        ctl.on_guild_appears(1, &big_guild(1));
        let outcome = ctl.on_guild_removed(1, false).unwrap();
        assert_eq!(outcome.gateway_ready, Some(1));
        assert!(outcome.purge.contains(&(CacheKind::Guild, 1)));
        assert!(!ctl.is_locked(1));
        assert_eq!(ctl.pending_chunk_count(), 0);
        assert!(ctl.on_guild_removed(1, false).is_none());
    }

    #[test]
    fn unavailable_cancels_timeouts_and_keeps_lock() {
        let (ctl, mut rx) = controller(SetupConfig::default());
        ctl.on_ready(&[]);
        ctl.on_guild_appears(4, &big_guild(4));
        drain(&mut rx);
        assert_eq!(ctl.pending_chunk_count(), 1);

        let outcome = ctl.on_guild_removed(4, true).unwrap();
        assert_eq!(outcome.events, vec![ClientEvent::GuildUnavailable { guild_id: 4 }]);
        assert!(ctl.is_locked(4));
        assert_eq!(ctl.status(4), Some(SetupStatus::Unavailable));
        assert_eq!(ctl.pending_chunk_count(), 0);

        let later = Instant::now() + Duration::from_secs(60);
        ctl.sweep_chunk_timeouts(later);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn unavailable_handshake_guild_is_counted_again_when_back() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1, 2]);
        ctl.on_guild_removed(1, true);
        assert_eq!(ctl.incomplete_count(), 1);
        ctl.on_guild_appears(1, &big_guild(1));
        assert_eq!(ctl.incomplete_count(), 2);
    }

    #[test]
    fn timed_out_requests_are_resent_then_forced() {
        let config = SetupConfig {
            max_chunk_retries: 1,
            ..SetupConfig::default()
        };
        let (ctl, mut rx) = controller(config);
        ctl.on_ready(&[]);
        ctl.on_guild_appears(5, &big_guild(5));
        assert_eq!(drain(&mut rx).len(), 1);

        let t1 = Instant::now() + Duration::from_secs(11);
        assert!(ctl.sweep_chunk_timeouts(t1).completed.is_empty());
        let resent = drain(&mut rx);
        assert_eq!(resent.len(), 1);
        assert_eq!(requested_ids(&resent[0]), vec![5]);

        // Not yet due again.
        assert!(ctl.sweep_chunk_timeouts(t1).is_empty());
        assert!(drain(&mut rx).is_empty());

        let t2 = t1 + Duration::from_secs(11);
        let outcome = ctl.sweep_chunk_timeouts(t2);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].members.len(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn resume_resends_in_flight_requests_only() {
        let (ctl, mut rx) = controller(SetupConfig::default());
        ctl.on_ready(&[1, 2, 3]);
        ctl.on_guild_appears(1, &big_guild(1));
        ctl.on_guild_appears(2, &big_guild(2));
        assert!(drain(&mut rx).is_empty());

        // Still waiting for the handshake tail.
        ctl.resend_requests();
        assert!(drain(&mut rx).is_empty());

        ctl.on_guild_appears(3, &big_guild(3));
        assert_eq!(requested_ids(&drain(&mut rx)[0]), vec![1, 2, 3]);

        ctl.resend_requests();
        let resent = drain(&mut rx);
        assert_eq!(resent.len(), 1);
        assert_eq!(requested_ids(&resent[0]), vec![1, 2, 3]);
        assert_eq!(ctl.pending_chunk_count(), 3);
    }

    #[test]
    fn resume_restarts_the_retry_budget() {
        let config = SetupConfig {
            max_chunk_retries: 1,
            ..SetupConfig::default()
        };
        let (ctl, mut rx) = controller(config);
        ctl.on_ready(&[]);
        ctl.on_guild_appears(5, &big_guild(5));
        ctl.sweep_chunk_timeouts(Instant::now() + Duration::from_secs(11));
        assert_eq!(drain(&mut rx).len(), 2);

        ctl.resend_requests();
        assert_eq!(drain(&mut rx).len(), 1);

        let outcome = ctl.sweep_chunk_timeouts(Instant::now() + Duration::from_secs(11));
        assert!(outcome.completed.is_empty());
        assert_eq!(requested_ids(&drain(&mut rx)[0]), vec![5]);
        assert_eq!(ctl.status(5), Some(SetupStatus::Chunking));
    }

    #[test]
    fn resume_resends_outstanding_sync_requests() {
        let config = SetupConfig {
            require_sync: true,
            ..SetupConfig::default()
        };
        let (ctl, mut rx) = controller(config);
        ctl.on_ready(&[1]);
        ctl.on_guild_appears(1, &big_guild(1));
        assert_eq!(drain(&mut rx).len(), 1);

        ctl.resend_requests();
        let resent = drain(&mut rx);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].op, OP_GUILD_SYNC);
    }

    #[test]
    fn sync_requests_precede_chunking() {
        let config = SetupConfig {
            require_sync: true,
            ..SetupConfig::default()
        };
        let (ctl, mut rx) = controller(config);
        ctl.on_ready(&[1]);
        ctl.on_guild_appears(1, &big_guild(1));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].op, OP_GUILD_SYNC);
        assert_eq!(ctl.status(1), Some(SetupStatus::Syncing));

        ctl.on_sync(1, &json!({ "id": "1", "members": [member(1)] })).unwrap();
        assert_eq!(ctl.status(1), Some(SetupStatus::Chunking));
        let sent = drain(&mut rx);
        assert_eq!(requested_ids(&sent[0]), vec![1]);
    }

    #[test]
    fn joined_unavailable_guild_is_announced_once() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[]);
        let outcome = ctl.on_guild_appears(8, &json!({ "id": "8", "unavailable": true }));
        assert_eq!(outcome.events, vec![ClientEvent::UnavailableGuildJoined { guild_id: 8 }]);
        assert!(ctl.is_locked(8));
    }

    #[test]
    fn reappearing_guild_gets_its_own_kind() {
        let (ctl, _rx) = controller(SetupConfig::default());
        ctl.on_ready(&[]);
        ctl.mark_unavailable(7);
        let outcome = ctl.on_guild_appears(7, &small_guild(7));
        assert_eq!(outcome.completed[0].kind, SetupKind::Reappearing);
        assert!(!ctl.is_unavailable(7));
    }
}
