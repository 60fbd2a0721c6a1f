use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::VkConfig;
use crate::platform::{
    AvatarFetcher, ChatMessage, ContextKind, GroupProfile, IncomingMessage, Outbox, PlatformApi,
    Sender, UserProfile,
};

/// Peer ids at or above this belong to group chats.
const CHAT_PEER_OFFSET: i64 = 2_000_000_000;
/// Seconds the long poll server holds a request open.
const LONG_POLL_WAIT: u64 = 25;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i64,
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    first_name: String,
    last_name: String,
    #[serde(default)]
    photo_200: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    name: String,
    #[serde(default)]
    photo_200: Option<String>,
}

/// `groups.getById` returns a bare array before API 5.194 and an object after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGroups {
    Wrapped { groups: Vec<RawGroup> },
    Plain(Vec<RawGroup>),
}

impl RawGroups {
    fn into_first(self) -> Option<RawGroup> {
        match self {
            RawGroups::Wrapped { groups } | RawGroups::Plain(groups) => groups.into_iter().next(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    #[serde(default)]
    from_id: i64,
    #[serde(default)]
    peer_id: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    fwd_messages: Vec<RawMessage>,
    #[serde(default)]
    reply_message: Option<Box<RawMessage>>,
    #[serde(default)]
    action: Option<RawAction>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
}

impl From<RawMessage> for ChatMessage {
    fn from(raw: RawMessage) -> Self {
        ChatMessage {
            text: (!raw.text.is_empty()).then_some(raw.text),
            forwards: raw.fwd_messages.into_iter().map(ChatMessage::from).collect(),
            reply: raw.reply_message.map(|r| Box::new(ChatMessage::from(*r))),
            sender: Sender::from_platform_id(raw.from_id),
            context: match raw.action {
                Some(action) => ContextKind::Service(action.kind),
                None => ContextKind::Message,
            },
        }
    }
}

/// Long poll `ts` arrives as a string or a number depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Ts {
    Str(String),
    Num(u64),
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ts::Str(s) => write!(f, "{}", s),
            Ts::Num(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LongPollServer {
    key: String,
    server: String,
    ts: Ts,
}

#[derive(Debug, Deserialize)]
struct LongPollResponse {
    #[serde(default)]
    ts: Option<Ts>,
    #[serde(default)]
    updates: Vec<serde_json::Value>,
    #[serde(default)]
    failed: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct MessageNew {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
struct UploadServer {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadedPhoto {
    server: i64,
    photo: String,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct SavedPhoto {
    id: i64,
    owner_id: i64,
    #[serde(default)]
    access_key: Option<String>,
}

/// Turn one long poll update into an inbound event. Anything but
/// `message_new` is skipped.
pub fn parse_update(update: serde_json::Value) -> Option<IncomingMessage> {
    if update.get("type")?.as_str()? != "message_new" {
        return None;
    }
    let object = update.get("object")?.clone();
    let event: MessageNew = match serde_json::from_value(object) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed message_new update: {}", e);
            return None;
        }
    };

    let peer_id = event.message.peer_id;
    Some(IncomingMessage {
        peer_id,
        is_dm: peer_id > 0 && peer_id < CHAT_PEER_OFFSET,
        message: event.message.into(),
    })
}

fn attachment_id(photo: &SavedPhoto) -> String {
    match &photo.access_key {
        Some(key) => format!("photo{}_{}_{}", photo.owner_id, photo.id, key),
        None => format!("photo{}_{}", photo.owner_id, photo.id),
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Thin VK Bots API client: profile lookups, long poll and message delivery.
pub struct VkClient {
    client: reqwest::Client,
    config: VkConfig,
    random_id: AtomicI64,
}

/// HTTP client whose requests give up after `timeout`.
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

impl VkClient {
    pub fn new(config: VkConfig) -> Result<Self> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(Self {
            client: http_client(Duration::from_secs(config.http_timeout_secs))?,
            config,
            random_id: AtomicI64::new(seed),
        })
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.config.api_url, method);
        debug!("Calling VK API: {}", method);

        let mut form: Vec<(&str, String)> = vec![
            ("access_token", self.config.token.clone()),
            ("v", self.config.api_version.clone()),
            ("lang", self.config.language.clone()),
        ];
        form.extend(params.iter().cloned());

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("Failed to send request to VK: {}", method))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("VK API HTTP error ({}) on {}: {}", status, method, error_body);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse VK response for {}", method))?;

        if let Some(err) = envelope.error {
            anyhow::bail!("VK API error {} on {}: {}", err.error_code, method, err.error_msg);
        }
        envelope
            .response
            .with_context(|| format!("Empty VK response for {}", method))
    }

    fn next_random_id(&self) -> i64 {
        self.random_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn long_poll(&self) -> Result<LongPoll<'_>> {
        let server: LongPollServer = self
            .call(
                "groups.getLongPollServer",
                &[("group_id", self.config.group_id.to_string())],
            )
            .await?;
        Ok(LongPoll {
            vk: self,
            server: server.server,
            key: server.key,
            ts: server.ts.to_string(),
        })
    }

    async fn upload_photo(&self, peer_id: i64, image: Vec<u8>) -> Result<String> {
        let server: UploadServer = self
            .call(
                "photos.getMessagesUploadServer",
                &[("peer_id", peer_id.to_string())],
            )
            .await?;

        let part = reqwest::multipart::Part::bytes(image)
            .file_name("quote.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part("photo", part);

        let uploaded: UploadedPhoto = self
            .client
            .post(&server.upload_url)
            .multipart(form)
            .send()
            .await
            .context("Failed to upload photo")?
            .error_for_status()
            .context("Photo upload rejected")?
            .json()
            .await
            .context("Failed to parse photo upload response")?;

        let saved: Vec<SavedPhoto> = self
            .call(
                "photos.saveMessagesPhoto",
                &[
                    ("server", uploaded.server.to_string()),
                    ("photo", uploaded.photo),
                    ("hash", uploaded.hash),
                ],
            )
            .await?;

        saved
            .first()
            .map(attachment_id)
            .context("photos.saveMessagesPhoto returned nothing")
    }
}

#[async_trait]
impl PlatformApi for VkClient {
    async fn lookup_user(&self, id: u64) -> Result<UserProfile> {
        let users: Vec<RawUser> = self
            .call(
                "users.get",
                &[
                    ("user_ids", id.to_string()),
                    ("fields", "photo_200".to_string()),
                ],
            )
            .await?;
        let user = users
            .into_iter()
            .next()
            .with_context(|| format!("User {} not found", id))?;
        Ok(UserProfile {
            first_name: user.first_name,
            last_name: user.last_name,
            avatar_url: user.photo_200.with_context(|| format!("User {} has no avatar", id))?,
        })
    }

    async fn lookup_group(&self, id: u64) -> Result<GroupProfile> {
        let groups: RawGroups = self
            .call("groups.getById", &[("group_ids", id.to_string())])
            .await?;
        let group = groups
            .into_first()
            .with_context(|| format!("Group {} not found", id))?;
        Ok(GroupProfile {
            name: group.name,
            avatar_url: group.photo_200.with_context(|| format!("Group {} has no avatar", id))?,
        })
    }
}

#[async_trait]
impl Outbox for VkClient {
    async fn send_text(&self, peer_id: i64, text: &str) -> Result<()> {
        let _: i64 = self
            .call(
                "messages.send",
                &[
                    ("peer_id", peer_id.to_string()),
                    ("message", text.to_string()),
                    ("random_id", self.next_random_id().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn send_photo(&self, peer_id: i64, image: Vec<u8>) -> Result<()> {
        let attachment = self.upload_photo(peer_id, image).await?;
        let _: i64 = self
            .call(
                "messages.send",
                &[
                    ("peer_id", peer_id.to_string()),
                    ("attachment", attachment),
                    ("random_id", self.next_random_id().to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// An open Bots Long Poll session.
pub struct LongPoll<'a> {
    vk: &'a VkClient,
    server: String,
    key: String,
    ts: String,
}

impl LongPoll<'_> {
    /// Wait for the next batch of inbound messages.
    ///
    /// Expired keys and lost history are handled by refreshing the session,
    /// in which case the batch is empty.
    pub async fn next_batch(&mut self) -> Result<Vec<IncomingMessage>> {
        let wait = LONG_POLL_WAIT.to_string();
        let response: LongPollResponse = self
            .vk
            .client
            .get(&self.server)
            .query(&[
                ("act", "a_check"),
                ("key", self.key.as_str()),
                ("ts", self.ts.as_str()),
                ("wait", wait.as_str()),
            ])
            .timeout(Duration::from_secs(LONG_POLL_WAIT + 10))
            .send()
            .await
            .context("Long poll request failed")?
            .json()
            .await
            .context("Failed to parse long poll response")?;

        match response.failed {
            None => {}
            Some(1) => {
                warn!("Long poll history lost, continuing from new ts");
                if let Some(ts) = response.ts {
                    self.ts = ts.to_string();
                }
                return Ok(Vec::new());
            }
            Some(code) => {
                warn!("Long poll session expired (failed={}), reconnecting", code);
                let fresh = self.vk.long_poll().await?;
                self.server = fresh.server;
                self.key = fresh.key;
                self.ts = fresh.ts;
                return Ok(Vec::new());
            }
        }

        if let Some(ts) = response.ts {
            self.ts = ts.to_string();
        }
        Ok(response.updates.into_iter().filter_map(parse_update).collect())
    }
}

/// Downloads avatars over plain HTTP.
pub struct HttpAvatarFetcher {
    client: reqwest::Client,
}

impl HttpAvatarFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl AvatarFetcher for HttpAvatarFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download avatar: {}", url))?
            .error_for_status()
            .with_context(|| format!("Avatar request rejected: {}", url))?
            .bytes()
            .await
            .context("Failed to read avatar body")?;
        Ok(bytes.to_vec())
    }
}
