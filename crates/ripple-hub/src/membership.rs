use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// How long an emptied channel lingers before eviction.
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Coarse backstop expiry on a cache entry, refreshed on every join/leave.
/// Larger than the grace period so it never preempts a normal grace cycle.
pub const ENTRY_TTL: Duration = Duration::from_secs(5 * 60);

/// A channel member: the username plus the connection it is attached through.
/// The pair is the identity — the same user on two connections is two members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub username: String,
    pub conn_id: Uuid,
}

struct ChannelEntry {
    members: HashSet<Member>,
    /// Bumped every time the member set goes from empty back to non-empty.
    /// A scheduled eviction only fires if its recorded generation still
    /// matches, so a stale timer cannot remove a reactivated channel.
    generation: u64,
    expires_at: Instant,
}

/// In-memory channel -> member-set cache. Cloneable handle over shared state.
///
/// Mutation happens only through the hub's dispatch loop; every operation is
/// one short mutex-guarded critical section and never calls back up into the
/// hub or the store.
#[derive(Clone)]
pub struct Membership {
    inner: Arc<MembershipInner>,
}

struct MembershipInner {
    channels: Mutex<HashMap<String, ChannelEntry>>,
    grace: Duration,
    ttl: Duration,
}

impl Membership {
    pub fn new() -> Self {
        Self::with_expiry(GRACE_PERIOD, ENTRY_TTL)
    }

    /// Explicit grace/TTL pair, used by tests.
    pub fn with_expiry(grace: Duration, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(MembershipInner {
                channels: Mutex::new(HashMap::new()),
                grace,
                ttl,
            }),
        }
    }

    /// Add a member to a channel, creating the entry if needed and cancelling
    /// any pending eviction by superseding its generation. Repeat joins of
    /// the same member are deduplicated.
    pub fn join(&self, channel: &str, member: Member) {
        let mut channels = self.lock();
        purge_expired(&mut channels);

        let now = Instant::now();
        let entry = channels.entry(channel.to_string()).or_insert(ChannelEntry {
            members: HashSet::new(),
            generation: 0,
            expires_at: now + self.inner.ttl,
        });

        if entry.members.is_empty() {
            entry.generation += 1;
        }
        entry.members.insert(member);
        entry.expires_at = now + self.inner.ttl;
    }

    /// Remove a member. When the set empties, an eviction is scheduled after
    /// the grace period, tagged with the entry's current generation.
    pub fn leave(&self, channel: &str, member: &Member) {
        let scheduled = {
            let mut channels = self.lock();
            purge_expired(&mut channels);

            match channels.get_mut(channel) {
                Some(entry) => {
                    entry.members.remove(member);
                    entry.expires_at = Instant::now() + self.inner.ttl;
                    entry.members.is_empty().then_some(entry.generation)
                }
                None => None,
            }
        };

        if let Some(generation) = scheduled {
            let cache = self.clone();
            let channel = channel.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(cache.inner.grace).await;
                cache.evict_if_idle(&channel, generation);
            });
        }
    }

    /// Snapshot of live channel ids.
    pub fn list(&self) -> Vec<String> {
        let mut channels = self.lock();
        purge_expired(&mut channels);
        channels.keys().cloned().collect()
    }

    /// Snapshot of a channel's members, for fan-out.
    pub fn members(&self, channel: &str) -> Vec<Member> {
        let mut channels = self.lock();
        purge_expired(&mut channels);
        channels
            .get(channel)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fired by a grace timer. A no-op unless the generation still matches
    /// and the channel is still empty — a join in the meantime supersedes us.
    fn evict_if_idle(&self, channel: &str, generation: u64) {
        let mut channels = self.lock();
        if let Some(entry) = channels.get(channel) {
            if entry.generation == generation && entry.members.is_empty() {
                channels.remove(channel);
                debug!("Evicted idle channel {}", channel);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelEntry>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(channels: &mut HashMap<String, ChannelEntry>) {
    let now = Instant::now();
    channels.retain(|_, entry| entry.expires_at > now);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> Member {
        Member {
            username: name.to_string(),
            conn_id: Uuid::new_v4(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn listed_while_occupied() {
        let cache = Membership::new();
        cache.join("general", member("alice"));

        assert_eq!(cache.list(), ["general"]);
        assert_eq!(cache.members("general").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_join_of_same_member_is_deduplicated() {
        let cache = Membership::new();
        let alice = member("alice");
        cache.join("general", alice.clone());
        cache.join("general", alice);

        assert_eq!(cache.members("general").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_username_on_two_connections_is_two_members() {
        let cache = Membership::new();
        cache.join("general", member("alice"));
        cache.join("general", member("alice"));

        assert_eq!(cache.members("general").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_channel_evicted_after_grace_period() {
        let cache = Membership::new();
        let alice = member("alice");
        cache.join("x", alice.clone());
        cache.leave("x", &alice);

        // Still listed during the grace period.
        assert_eq!(cache.list(), ["x"]);

        tokio::time::sleep(GRACE_PERIOD + Duration::from_millis(10)).await;
        assert!(cache.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_supersedes_pending_eviction() {
        let cache = Membership::new();
        let alice = member("alice");
        cache.join("x", alice.clone());
        cache.leave("x", &alice);

        // New member arrives inside the grace period.
        cache.join("x", member("bob"));

        // The original timer fires against a newer generation and must not
        // remove the channel.
        tokio::time::sleep(GRACE_PERIOD + Duration::from_millis(10)).await;
        assert_eq!(cache.list(), ["x"]);
        assert_eq!(cache.members("x").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_backstop_drops_entries_without_activity() {
        let cache = Membership::new();
        cache.join("x", member("alice"));

        tokio::time::sleep(ENTRY_TTL + Duration::from_millis(10)).await;
        assert!(cache.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn join_refreshes_ttl() {
        let cache = Membership::new();
        cache.join("x", member("alice"));

        tokio::time::sleep(ENTRY_TTL - Duration::from_secs(1)).await;
        cache.join("x", member("bob"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.list(), ["x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_of_unknown_member_or_channel_is_harmless() {
        let cache = Membership::new();
        cache.leave("ghost", &member("nobody"));

        let alice = member("alice");
        cache.join("x", alice.clone());
        cache.leave("x", &member("someone-else"));
        assert_eq!(cache.members("x").len(), 1);
    }
}
