use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AuthorError;
use crate::platform::{AvatarFetcher, ChatMessage, ContextKind, PlatformApi, Sender};
use crate::quote::mention::{self, MentionTarget};

/// The person or community a quote is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub display_name: String,
    pub avatar: Vec<u8>,
}

/// Produces the author of a resolved root message.
#[async_trait]
pub trait AuthorSource: Send + Sync {
    async fn resolve_author(&self, root: &ChatMessage) -> Result<Author, AuthorError>;
}

/// Looks authors up through the platform and downloads their avatars.
pub struct AuthorResolver {
    api: Arc<dyn PlatformApi>,
    avatars: Arc<dyn AvatarFetcher>,
    owner_group_id: u64,
    anonymous_name: String,
    anonymous_avatar_url: String,
}

impl AuthorResolver {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        avatars: Arc<dyn AvatarFetcher>,
        owner_group_id: u64,
        anonymous_name: String,
        anonymous_avatar_url: String,
    ) -> Self {
        Self {
            api,
            avatars,
            owner_group_id,
            anonymous_name,
            anonymous_avatar_url,
        }
    }

    pub async fn user(&self, id: u64) -> Result<Author, AuthorError> {
        let profile = self.api.lookup_user(id).await.map_err(AuthorError::Lookup)?;
        Ok(Author {
            display_name: format!("{} {}", profile.first_name, profile.last_name),
            avatar: self.avatar(&profile.avatar_url).await?,
        })
    }

    pub async fn group(&self, id: u64) -> Result<Author, AuthorError> {
        let profile = self.api.lookup_group(id).await.map_err(AuthorError::Lookup)?;
        Ok(Author {
            display_name: profile.name,
            avatar: self.avatar(&profile.avatar_url).await?,
        })
    }

    /// Author named by an inline mention in the command text, if any.
    ///
    /// Mentions of the bot's own community are skipped, see [`mention::parse_override`].
    pub async fn override_author(&self, command_text: &str) -> Result<Option<Author>, AuthorError> {
        match mention::parse_override(command_text, self.owner_group_id) {
            Some(MentionTarget::User(id)) => self.user(id).await.map(Some),
            Some(MentionTarget::Group(id)) => self.group(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn avatar(&self, url: &str) -> Result<Vec<u8>, AuthorError> {
        self.avatars.fetch(url).await.map_err(AuthorError::AvatarFetch)
    }
}

#[async_trait]
impl AuthorSource for AuthorResolver {
    async fn resolve_author(&self, root: &ChatMessage) -> Result<Author, AuthorError> {
        if let ContextKind::Service(kind) = &root.context {
            return Err(AuthorError::UnsupportedContextKind(kind.clone()));
        }

        match root.sender {
            Sender::User { id } => self.user(id.unsigned_abs()).await,
            Sender::Group { id } => self.group(id.unsigned_abs()).await,
            Sender::Anonymous => {
                debug!("Anonymous root message: {:?}", root);
                Ok(Author {
                    display_name: self.anonymous_name.clone(),
                    avatar: self.avatar(&self.anonymous_avatar_url).await?,
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::{GroupProfile, UserProfile};
    use anyhow::Result;
    use std::sync::Mutex;

    /// In-memory platform that records every lookup.
    #[derive(Default)]
    pub(crate) struct FakePlatform {
        pub lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn lookup_user(&self, id: u64) -> Result<UserProfile> {
            self.lookups.lock().unwrap().push(format!("user:{}", id));
            match id {
                1 => Ok(UserProfile {
                    first_name: "Anna".into(),
                    last_name: "K".into(),
                    avatar_url: "https://cdn/anna.jpg".into(),
                }),
                123 => Ok(UserProfile {
                    first_name: "Ivan".into(),
                    last_name: "Petrov".into(),
                    avatar_url: "https://cdn/ivan.jpg".into(),
                }),
                _ => anyhow::bail!("VK API error 113: Invalid user id"),
            }
        }

        async fn lookup_group(&self, id: u64) -> Result<GroupProfile> {
            self.lookups.lock().unwrap().push(format!("group:{}", id));
            Ok(GroupProfile {
                name: format!("Club {}", id),
                avatar_url: format!("https://cdn/club{}.jpg", id),
            })
        }
    }

    /// Returns the url itself as the image bytes, fails for "broken" urls.
    pub(crate) struct EchoAvatars;

    #[async_trait]
    impl AvatarFetcher for EchoAvatars {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            if url.contains("broken") {
                anyhow::bail!("connection reset");
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    pub(crate) const OWNER: u64 = 211997710;

    pub(crate) fn resolver(platform: Arc<FakePlatform>) -> AuthorResolver {
        AuthorResolver::new(
            platform,
            Arc::new(EchoAvatars),
            OWNER,
            "Anonymous".into(),
            "https://vk.com/images/camera_200.png".into(),
        )
    }

    fn root(sender: i64, context: ContextKind) -> ChatMessage {
        ChatMessage {
            text: Some("Hello".into()),
            forwards: Vec::new(),
            reply: None,
            sender: Sender::from_platform_id(sender),
            context,
        }
    }

    #[tokio::test]
    async fn test_user_author() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .resolve_author(&root(1, ContextKind::Message))
            .await
            .unwrap();
        assert_eq!(author.display_name, "Anna K");
        assert_eq!(author.avatar, b"https://cdn/anna.jpg");
        assert_eq!(*platform.lookups.lock().unwrap(), vec!["user:1"]);
    }

    #[tokio::test]
    async fn test_group_author_uses_unsigned_id() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .resolve_author(&root(-555, ContextKind::Message))
            .await
            .unwrap();
        assert_eq!(author.display_name, "Club 555");
        assert_eq!(*platform.lookups.lock().unwrap(), vec!["group:555"]);
    }

    #[tokio::test]
    async fn test_anonymous_never_calls_platform() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .resolve_author(&root(0, ContextKind::Message))
            .await
            .unwrap();
        assert_eq!(author.display_name, "Anonymous");
        assert_eq!(author.avatar, b"https://vk.com/images/camera_200.png");
        assert!(platform.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_service_message_unsupported() {
        let platform = Arc::new(FakePlatform::default());
        let err = resolver(platform)
            .resolve_author(&root(1, ContextKind::Service("chat_title_update".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorError::UnsupportedContextKind(k) if k == "chat_title_update"));
    }

    #[tokio::test]
    async fn test_lookup_failure() {
        let platform = Arc::new(FakePlatform::default());
        let err = resolver(platform)
            .resolve_author(&root(999, ContextKind::Message))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_avatar_failure() {
        let resolver = AuthorResolver::new(
            Arc::new(FakePlatform::default()),
            Arc::new(EchoAvatars),
            OWNER,
            "Anonymous".into(),
            "https://broken/camera.png".into(),
        );
        let err = resolver
            .resolve_author(&root(0, ContextKind::Message))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthorError::AvatarFetch(_)));
    }

    #[tokio::test]
    async fn test_override_skips_owner_mention() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .override_author("[club211997710|@newquote] [id123|Ivan] look")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author.display_name, "Ivan Petrov");
        assert_eq!(*platform.lookups.lock().unwrap(), vec!["user:123"]);
    }

    #[tokio::test]
    async fn test_override_with_group_mention() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .override_author("[club42|Cats] said it")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(author.display_name, "Club 42");
        assert_eq!(author.avatar, b"https://cdn/club42.jpg");
        assert_eq!(*platform.lookups.lock().unwrap(), vec!["group:42"]);
    }

    #[tokio::test]
    async fn test_override_absent_without_lookup() {
        let platform = Arc::new(FakePlatform::default());
        let author = resolver(platform.clone())
            .override_author("[club211997710|@newquote]")
            .await
            .unwrap();
        assert!(author.is_none());
        assert!(platform.lookups.lock().unwrap().is_empty());
    }
}
