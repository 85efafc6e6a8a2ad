// Per-guild assembly state while a guild is locked for setup.

use std::collections::{HashMap, HashSet};
use std::fmt;

use guildgate_util::snowflake;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::config::SetupConfig;
use crate::event_cache::{CacheKind, CachedEvent};

/// Why the guild is being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    /// Listed in the handshake.
    InitialSync,
    /// The bot was added to the guild at runtime.
    Join,
    /// The guild came back after an outage.
    Reappearing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Init,
    Syncing,
    Chunking,
    Building,
    Ready,
    Unavailable,
    Removed,
}

impl fmt::Display for SetupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStatus::Init => "init",
            SetupStatus::Syncing => "syncing",
            SetupStatus::Chunking => "chunking",
            SetupStatus::Building => "building",
            SetupStatus::Ready => "ready",
            SetupStatus::Unavailable => "unavailable",
            SetupStatus::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// What the controller has to do after a node consumed a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Continue,
    NeedsSync,
    NeedsChunks,
    Unavailable,
    /// The node moved to `Building`; take its snapshot and build the guild.
    Completed,
}

/// Everything accumulated for one guild, handed to the entity builder.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub guild_id: i64,
    pub kind: SetupKind,
    pub payload: Value,
    pub members: HashMap<i64, Value>,
    pub expected_member_count: i64,
}

pub struct GuildSetupNode {
    guild_id: i64,
    kind: SetupKind,
    status: SetupStatus,
    partial: Option<Map<String, Value>>,
    members: HashMap<i64, Value>,
    removed_members: HashSet<i64>,
    expected_member_count: i64,
    chunk_requested: bool,
    sync_requested: bool,
    synced: bool,
    queued_events: Vec<CachedEvent>,
    announced_unavailable_join: bool,
    chunk_guilds: bool,
    require_sync: bool,
    queue_warn_threshold: usize,
}

impl GuildSetupNode {
    pub fn new(guild_id: i64, kind: SetupKind, config: &SetupConfig) -> Self {
        trace!(guild_id, ?kind, "creating setup node");
        Self {
            guild_id,
            kind,
            status: SetupStatus::Init,
            partial: None,
            members: HashMap::new(),
            removed_members: HashSet::new(),
            expected_member_count: 0,
            chunk_requested: false,
            sync_requested: false,
            synced: false,
            queued_events: Vec::new(),
            announced_unavailable_join: false,
            chunk_guilds: config.chunk_guilds,
            require_sync: config.require_sync,
            queue_warn_threshold: config.queued_event_warn_threshold.max(1),
        }
    }

    pub fn guild_id(&self) -> i64 {
        self.guild_id
    }

    pub fn kind(&self) -> SetupKind {
        self.kind
    }

    pub fn status(&self) -> SetupStatus {
        self.status
    }

    pub fn expected_member_count(&self) -> i64 {
        self.expected_member_count
    }

    /// Distinct members accumulated so far, excluding removed ones.
    pub fn member_count(&self) -> usize {
        self.members
            .keys()
            .filter(|id| !self.removed_members.contains(id))
            .count()
    }

    pub fn has_member(&self, user_id: i64) -> bool {
        self.members.contains_key(&user_id) && !self.removed_members.contains(&user_id)
    }

    pub fn is_chunk_requested(&self) -> bool {
        self.chunk_requested
    }

    pub fn queued_len(&self) -> usize {
        self.queued_events.len()
    }

    fn update_status(&mut self, status: SetupStatus) {
        if self.status != status {
            debug!(guild_id = self.guild_id, from = %self.status, to = %status, "setup status changed");
            self.status = status;
        }
    }

    fn is_settled(&self) -> bool {
        matches!(
            self.status,
            SetupStatus::Building | SetupStatus::Ready | SetupStatus::Removed
        )
    }

    /// Merge a GUILD_CREATE (or READY guild object) into the partial payload.
    pub fn handle_create(&mut self, payload: &Value) -> SetupStep {
        if self.is_settled() {
            debug!(guild_id = self.guild_id, status = %self.status, "ignoring create for settled guild");
            return SetupStep::Continue;
        }
        self.merge(payload);

        let unavailable = self
            .partial
            .as_ref()
            .and_then(|p| p.get("unavailable"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if unavailable {
            self.mark_unavailable();
            return SetupStep::Unavailable;
        }

        match self.status {
            SetupStatus::Syncing | SetupStatus::Chunking => return SetupStep::Continue,
            SetupStatus::Unavailable => self.update_status(SetupStatus::Init),
            _ => {}
        }

        if self.require_sync && !self.synced {
            self.update_status(SetupStatus::Syncing);
            if self.sync_requested {
                return SetupStep::Continue;
            }
            self.sync_requested = true;
            return SetupStep::NeedsSync;
        }

        self.ensure_members()
    }

    /// Merge a GUILD_SYNC payload and run the member check.
    pub fn handle_sync(&mut self, payload: &Value) -> SetupStep {
        if self.status != SetupStatus::Syncing {
            debug!(guild_id = self.guild_id, status = %self.status, "ignoring sync outside of syncing state");
            return SetupStep::Continue;
        }
        self.merge(payload);
        self.synced = true;
        self.ensure_members()
    }

    fn merge(&mut self, payload: &Value) {
        let partial = self.partial.get_or_insert_with(Map::new);
        if let Value::Object(obj) = payload {
            for (key, value) in obj {
                partial.insert(key.clone(), value.clone());
            }
        }
    }

    fn ensure_members(&mut self) -> SetupStep {
        let (declared, embedded) = match self.partial.as_ref() {
            Some(partial) => (
                partial.get("member_count").and_then(Value::as_i64),
                partial
                    .get("members")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            ),
            None => (None, Vec::new()),
        };
        self.expected_member_count = declared.unwrap_or(embedded.len() as i64);
        self.members.clear();
        self.removed_members.clear();

        if !self.chunk_guilds {
            self.absorb(&embedded);
            return self.complete();
        }

        if (embedded.len() as i64) < self.expected_member_count {
            self.absorb(&embedded);
            return self.start_chunking();
        }

        self.absorb(&embedded);
        if self.member_count() as i64 >= self.expected_member_count {
            return self.complete();
        }

        // The payload carried at least member_count entries but duplicates
        // left us short; the embedded list cannot be trusted.
        trace!(
            guild_id = self.guild_id,
            member_count = self.expected_member_count,
            members = embedded.len(),
            actual_members = self.members.len(),
            "received suspicious members with guild payload, falling back to chunking"
        );
        self.members.clear();
        self.start_chunking()
    }

    fn start_chunking(&mut self) -> SetupStep {
        self.update_status(SetupStatus::Chunking);
        if self.chunk_requested {
            return SetupStep::Continue;
        }
        self.chunk_requested = true;
        SetupStep::NeedsChunks
    }

    fn complete(&mut self) -> SetupStep {
        self.update_status(SetupStatus::Building);
        SetupStep::Completed
    }

    fn absorb(&mut self, members: &[Value]) {
        for member in members {
            let user_id = match member_user_id(member) {
                Some(id) => id,
                None => {
                    warn!(guild_id = self.guild_id, "skipping member payload without user id");
                    continue;
                }
            };
            if self.removed_members.contains(&user_id) {
                continue;
            }
            self.members.insert(user_id, member.clone());
        }
    }

    /// Apply a GUILD_MEMBERS_CHUNK body.
    pub fn handle_member_chunk(&mut self, members: &[Value], last: bool) -> SetupStep {
        if self.status != SetupStatus::Chunking {
            debug!(guild_id = self.guild_id, status = %self.status, "ignoring member chunk outside of chunking state");
            return SetupStep::Continue;
        }
        self.absorb(members);
        trace!(
            guild_id = self.guild_id,
            received = members.len(),
            total = self.member_count(),
            expected = self.expected_member_count,
            last,
            "member chunk applied"
        );
        if last || self.member_count() as i64 >= self.expected_member_count {
            return self.complete();
        }
        SetupStep::Continue
    }

    /// Apply a live member join while chunking. `None` means the node is not
    /// accumulating members and the event should be queued instead.
    pub fn handle_add_member(&mut self, member: &Value) -> Option<SetupStep> {
        if self.status != SetupStatus::Chunking {
            return None;
        }
        let user_id = member_user_id(member)?;
        let known = self.has_member(user_id);
        self.removed_members.remove(&user_id);
        self.members.insert(user_id, member.clone());
        if !known {
            self.expected_member_count += 1;
        }
        Some(SetupStep::Continue)
    }

    /// Apply a live member leave while chunking. Later chunks never re-add the user.
    pub fn handle_remove_member(&mut self, user_id: i64) -> Option<SetupStep> {
        if self.status != SetupStatus::Chunking {
            return None;
        }
        if !self.removed_members.insert(user_id) {
            return Some(SetupStep::Continue);
        }
        self.members.remove(&user_id);
        self.expected_member_count -= 1;
        if self.member_count() as i64 >= self.expected_member_count {
            return Some(self.complete());
        }
        Some(SetupStep::Continue)
    }

    /// Give up on chunking and finish with what has been collected.
    pub fn force_complete(&mut self) -> SetupStep {
        if self.status != SetupStatus::Chunking {
            return SetupStep::Continue;
        }
        warn!(
            guild_id = self.guild_id,
            members = self.member_count(),
            expected = self.expected_member_count,
            "finishing guild setup with an incomplete member list"
        );
        self.complete()
    }

    /// Drop all accumulated progress; queued events are kept for the next attempt.
    pub fn mark_unavailable(&mut self) {
        self.partial = None;
        self.members.clear();
        self.removed_members.clear();
        self.expected_member_count = 0;
        self.chunk_requested = false;
        self.sync_requested = false;
        self.synced = false;
        self.update_status(SetupStatus::Unavailable);
    }

    /// True the first time a joined guild turns out to be unavailable.
    pub(crate) fn take_unavailable_join_notice(&mut self) -> bool {
        if self.kind != SetupKind::Join || self.announced_unavailable_join {
            return false;
        }
        self.announced_unavailable_join = true;
        true
    }

    pub fn queue_event(&mut self, event: CachedEvent) {
        self.queued_events.push(event);
        let size = self.queued_events.len();
        if size >= self.queue_warn_threshold && (size - self.queue_warn_threshold) % 1000 == 0 {
            warn!(
                guild_id = self.guild_id,
                size, "accumulating suspicious amounts of queued events during guild setup"
            );
        }
    }

    pub fn take_queued(&mut self) -> Vec<CachedEvent> {
        std::mem::take(&mut self.queued_events)
    }

    /// Move the accumulated state out for building. Removed members are pruned.
    pub fn take_snapshot(&mut self) -> GuildSnapshot {
        for user_id in self.removed_members.drain() {
            self.members.remove(&user_id);
        }
        GuildSnapshot {
            guild_id: self.guild_id,
            kind: self.kind,
            payload: Value::Object(self.partial.take().unwrap_or_default()),
            members: std::mem::take(&mut self.members),
            expected_member_count: self.expected_member_count,
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        self.update_status(SetupStatus::Ready);
    }

    /// Mark the node removed and list the event-cache keys that belong to it.
    pub fn remove(&mut self) -> Vec<(CacheKind, i64)> {
        self.update_status(SetupStatus::Removed);
        let mut keys = vec![(CacheKind::Guild, self.guild_id)];
        if let Some(partial) = self.partial.as_ref() {
            keys.extend(array_ids(partial.get("channels")).map(|id| (CacheKind::Channel, id)));
            keys.extend(array_ids(partial.get("roles")).map(|id| (CacheKind::Role, id)));
        }
        keys
    }
}

fn member_user_id(member: &Value) -> Option<i64> {
    member
        .get("user")
        .and_then(|user| snowflake::opt_field(user, "id"))
}

fn array_ids(value: Option<&Value>) -> impl Iterator<Item = i64> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| snowflake::opt_field(item, "id"))
}
