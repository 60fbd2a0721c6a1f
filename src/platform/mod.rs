pub mod vk;

use anyhow::Result;
use async_trait::async_trait;

/// Who sent a message, as reported by the platform.
///
/// Group ids keep the platform's sign convention (negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User { id: i64 },
    Group { id: i64 },
    Anonymous,
}

impl Sender {
    /// Classify a raw platform sender id: positive is a user, negative is a
    /// community, zero has no attributable sender.
    pub fn from_platform_id(id: i64) -> Self {
        match id {
            id if id > 0 => Sender::User { id },
            id if id < 0 => Sender::Group { id },
            _ => Sender::Anonymous,
        }
    }
}

/// Where a message object came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// An ordinary chat message.
    Message,
    /// A service event (member joined, title changed, ...) with the raw action type.
    Service(String),
}

/// Read-only view of a message and everything attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub text: Option<String>,
    pub forwards: Vec<ChatMessage>,
    pub reply: Option<Box<ChatMessage>>,
    pub sender: Sender,
    pub context: ContextKind,
}

impl ChatMessage {
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// A new message delivered to the bot.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Conversation the reply goes to
    pub peer_id: i64,
    /// True when the peer is a private dialog with a user
    pub is_dm: bool,
    pub message: ChatMessage,
}

impl IncomingMessage {
    pub fn text(&self) -> &str {
        self.message.text.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupProfile {
    pub name: String,
    pub avatar_url: String,
}

/// Profile lookups the quote pipeline needs from the messaging platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn lookup_user(&self, id: u64) -> Result<UserProfile>;
    async fn lookup_group(&self, id: u64) -> Result<GroupProfile>;
}

/// Downloads avatar images.
#[async_trait]
pub trait AvatarFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Delivery side of the platform: plain replies and rendered quote photos.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, peer_id: i64, text: &str) -> Result<()>;
    async fn send_photo(&self, peer_id: i64, image: Vec<u8>) -> Result<()>;
}
