//! Event fan-out and the user-lookup collaborator seam.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::common::types::{GuildId, Ssrc, UserId};

/// A user correlated to a media stream. When no cache entry exists the
/// record carries only the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceUser {
    pub id: UserId,
    pub username: Option<String>,
}

impl VoiceUser {
    pub fn bare(id: UserId) -> Self {
        Self { id, username: None }
    }
}

/// Lookup caches owned by the higher-level client.
#[async_trait]
pub trait UserCache: Send + Sync {
    /// Guild-scoped member lookup.
    async fn guild_member(&self, guild_id: GuildId, user_id: UserId) -> Option<VoiceUser>;

    /// Global user lookup.
    async fn user(&self, user_id: UserId) -> Option<VoiceUser>;
}

/// Events observable by subscribers of a connection.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// A peer started or stopped speaking.
    UserSpeaking {
        ssrc: Ssrc,
        user: VoiceUser,
        speaking: bool,
    },
    /// One decoded inbound frame. `user` is `None` when the SSRC has not
    /// been announced through a speaking update yet.
    VoiceReceived {
        ssrc: Ssrc,
        /// Interleaved 16-bit little-endian PCM.
        pcm: Vec<u8>,
        /// Frame duration in milliseconds.
        frame_ms: u32,
        user: Option<VoiceUser>,
    },
    /// The signalling socket failed.
    SocketError { message: String },
}

/// Fan-out of [`VoiceEvent`]s to any number of subscribers. Subscribers
/// that dropped their receiver are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<VoiceEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> UnboundedReceiver<VoiceEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: VoiceEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Resolution chain for an announced SSRC: guild member cache, then
/// global user cache, then a bare record.
pub(crate) async fn resolve_user(
    cache: Option<&dyn UserCache>,
    guild_id: GuildId,
    user_id: UserId,
) -> VoiceUser {
    if let Some(cache) = cache {
        if let Some(user) = cache.guild_member(guild_id, user_id).await {
            return user;
        }
        if let Some(user) = cache.user(user_id).await {
            return user;
        }
    }
    VoiceUser::bare(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCache;

    #[async_trait]
    impl UserCache for StubCache {
        async fn guild_member(&self, _guild_id: GuildId, user_id: UserId) -> Option<VoiceUser> {
            (user_id == 7).then(|| VoiceUser {
                id: 7,
                username: Some("member".into()),
            })
        }

        async fn user(&self, user_id: UserId) -> Option<VoiceUser> {
            (user_id == 8).then(|| VoiceUser {
                id: 8,
                username: Some("global".into()),
            })
        }
    }

    #[tokio::test]
    async fn resolution_prefers_guild_member() {
        let user = resolve_user(Some(&StubCache), 1, 7).await;
        assert_eq!(user.username.as_deref(), Some("member"));
    }

    #[tokio::test]
    async fn resolution_falls_back_to_global_then_bare() {
        let global = resolve_user(Some(&StubCache), 1, 8).await;
        assert_eq!(global.username.as_deref(), Some("global"));

        let bare = resolve_user(Some(&StubCache), 1, 9).await;
        assert_eq!(bare, VoiceUser::bare(9));
    }

    #[tokio::test]
    async fn resolution_without_cache_is_bare() {
        assert_eq!(resolve_user(None, 1, 5).await, VoiceUser::bare(5));
    }

    #[tokio::test]
    async fn bus_fans_out_and_prunes() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let second = bus.subscribe();
        drop(second);

        bus.emit(VoiceEvent::SocketError {
            message: "boom".into(),
        });

        assert!(matches!(
            first.recv().await,
            Some(VoiceEvent::SocketError { .. })
        ));
        assert_eq!(bus.subscribers.lock().len(), 1);
    }
}
