/// Strongly typed identifiers.
pub type GuildId = u64;
pub type ChannelId = u64;
pub type UserId = u64;
pub type SessionId = String;

/// 32-bit RTP synchronization source.
pub type Ssrc = u32;
