mod session;

pub use session::{load_or_create_session, persist_session};

use async_trait::async_trait;
use grammers_client::types::{Chat, Media, Message, PackedChat};
use grammers_client::{Client, Config, InitParams, InputMessage};
use grammers_session::Session;
use tracing::{debug, info, instrument, warn};

use crate::errors::MirrorError;
use crate::storage::models::MessageType;

/// A resolved Telegram identity, cached verbatim in `source_channels`/
/// `mirror_channels` once known (spec §4.4: "avoiding expensive entity
/// lookups and stale-cache errors").
#[derive(Debug, Clone)]
pub struct ResolvedChannel {
    pub telegram_id: i64,
    pub access_hash: i64,
    pub title: String,
    pub username: Option<String>,
    pub member_count: Option<i32>,
    pub about: Option<String>,
    pub noforwards: bool,
}

#[derive(Debug, Clone)]
pub struct CreatedChannel {
    pub telegram_id: i64,
    pub access_hash: i64,
    pub invite_link: Option<String>,
}

/// One logical message as the rest of the core sees it, already flattened
/// out of grammers's `Message`/`Media` split (spec §4.4 `iterateHistory`).
#[derive(Debug, Clone)]
pub struct GatewayMessage {
    pub id: i32,
    pub text: String,
    pub media_group_id: Option<i64>,
    pub message_type: MessageType,
    pub has_media: bool,
    pub file_size: Option<i64>,
    pub is_service: bool,
    pub has_spoiler: bool,
    pub date: chrono::DateTime<chrono::Utc>,
    /// The originating `grammers` message, needed by `copy_message` to
    /// rebuild an `InputMessage`. `None` for messages a test double
    /// constructs directly, since `grammers_client::types::Message` has no
    /// public constructor outside the client crate itself.
    pub raw: Option<Message>,
}

/// Maps grammers's media split onto the flatter taxonomy the storage layer
/// persists (spec §4.5 step 2, §4.9 skip decisions).
fn classify(message: &Message) -> (MessageType, bool, Option<i64>, bool) {
    let Some(media) = message.media() else {
        return (MessageType::Text, false, None, false);
    };

    match media {
        Media::Photo(_) => (MessageType::Photo, true, None, false),
        Media::Sticker(_) => (MessageType::Sticker, true, None, false),
        Media::Document(doc) => {
            let size = Some(doc.size() as i64);
            let mime = doc.mime_type().unwrap_or("");
            let kind = if mime.starts_with("video/") {
                MessageType::Video
            } else if mime == "image/gif" || mime.starts_with("video/mp4") {
                MessageType::Animation
            } else if mime.starts_with("audio/ogg") {
                MessageType::Voice
            } else if mime.starts_with("audio/") {
                MessageType::Audio
            } else {
                MessageType::Document
            };
            (kind, true, size, false)
        }
        Media::Contact(_) => (MessageType::Other, true, None, false),
        _ => (MessageType::Other, true, None, false),
    }
}

/// The capability-typed façade C5/C6/C7 depend on (spec §4.4). Kept as a
/// trait, the way the teacher's `utils::errors`/`mcp` boundary types are
/// traits at the external-service seam, so tests can swap in a fake rather
/// than talk to Telegram.
#[async_trait]
pub trait TelegramGateway: Send + Sync {
    async fn resolve_channel(&self, identifier: &str) -> Result<ResolvedChannel, MirrorError>;

    /// Restartable, finite, strictly-increasing-id iteration starting after
    /// `from_message_id` (0 meaning "from the beginning").
    async fn iterate_history(
        &self,
        telegram_id: i64,
        access_hash: i64,
        from_message_id: i32,
    ) -> Result<Vec<GatewayMessage>, MirrorError>;

    async fn forward_messages(
        &self,
        from_telegram_id: i64,
        from_access_hash: i64,
        to_telegram_id: i64,
        to_access_hash: i64,
        ids: &[i32],
    ) -> Result<Vec<Option<i32>>, MirrorError>;

    async fn copy_message(
        &self,
        to_telegram_id: i64,
        to_access_hash: i64,
        source: &GatewayMessage,
    ) -> Result<i32, MirrorError>;

    /// Re-fetches a single message by id, used by `retry_failed` to check
    /// whether the source still exists before re-mirroring it (spec §4.6).
    async fn get_message(
        &self,
        telegram_id: i64,
        access_hash: i64,
        message_id: i32,
    ) -> Result<Option<GatewayMessage>, MirrorError>;

    async fn create_private_channel(
        &self,
        title: &str,
        about: &str,
    ) -> Result<CreatedChannel, MirrorError>;

    async fn export_invite_link(
        &self,
        telegram_id: i64,
        access_hash: i64,
    ) -> Result<String, MirrorError>;
}

/// `grammers-client`-backed implementation. One `Client` per process; every
/// outgoing call funnels through the rate limiter in `mirror.rs`/`tasks/`,
/// never directly from here (spec §5: "global mutex across all outgoing
/// calls for the account").
pub struct GrammersGateway {
    client: Client,
}

impl GrammersGateway {
    /// Connects using an already-decrypted session (spec §4.4: session is
    /// persisted encrypted at a single settings key; the caller decrypts it
    /// via `crypto::SessionCipher` before reaching here).
    #[instrument(skip(session, api_hash))]
    pub async fn connect(api_id: i32, api_hash: &str, session: Session) -> Result<Self, MirrorError> {
        let client = Client::connect(Config {
            session,
            api_id,
            api_hash: api_hash.to_string(),
            params: InitParams {
                catch_up: true,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        info!("connected to telegram");
        Ok(Self { client })
    }

    pub fn session(&self) -> Session {
        self.client.session()
    }

    /// Blocks for the next raw update from the account's single update
    /// stream (spec §4.4 `subscribe`, §4.7). Not part of `TelegramGateway`
    /// since it is inherently streaming and gateway-specific; the realtime
    /// manager holds a concrete `Arc<GrammersGateway>` for this one call.
    pub async fn next_update(&self) -> Result<grammers_client::Update, MirrorError> {
        self.client
            .next_update()
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))
    }

    fn packed(telegram_id: i64, access_hash: i64) -> PackedChat {
        use grammers_session::PackedType;
        PackedChat {
            ty: PackedType::Megagroup,
            id: telegram_id,
            access_hash: Some(access_hash),
        }
    }

    /// Flattens a raw update's `Message` the same way history iteration
    /// does, for the realtime manager (spec §4.7 `onMessage`).
    pub fn wrap_update_message(message: Message) -> GatewayMessage {
        Self::to_gateway_message(message)
    }

    fn to_gateway_message(message: Message) -> GatewayMessage {
        let (message_type, has_media, file_size, has_spoiler) = classify(&message);
        GatewayMessage {
            id: message.id(),
            text: message.text().to_string(),
            media_group_id: message.grouped_id(),
            message_type,
            has_media,
            file_size,
            is_service: message.action().is_some(),
            has_spoiler,
            date: message.date(),
            raw: Some(message),
        }
    }
}

#[async_trait]
impl TelegramGateway for GrammersGateway {
    #[instrument(skip(self))]
    async fn resolve_channel(&self, identifier: &str) -> Result<ResolvedChannel, MirrorError> {
        let chat = self
            .client
            .resolve_username(identifier.trim_start_matches('@'))
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?
            .ok_or_else(|| MirrorError::PeerUnresolvable(identifier.to_string()))?;

        let packed = chat.pack();
        let access_hash = packed
            .access_hash
            .ok_or_else(|| MirrorError::PeerUnresolvable(identifier.to_string()))?;

        let (username, about, noforwards, member_count) = match &chat {
            Chat::Channel(channel) => (
                channel.username().map(str::to_string),
                None,
                channel.noforwards(),
                None,
            ),
            Chat::Group(group) => (group.username().map(str::to_string), None, false, None),
            Chat::User(user) => (user.username().map(str::to_string), None, false, None),
        };

        Ok(ResolvedChannel {
            telegram_id: packed.id,
            access_hash,
            title: chat.name().to_string(),
            username,
            member_count,
            about,
            noforwards,
        })
    }

    #[instrument(skip(self))]
    async fn iterate_history(
        &self,
        telegram_id: i64,
        access_hash: i64,
        from_message_id: i32,
    ) -> Result<Vec<GatewayMessage>, MirrorError> {
        let chat = Self::packed(telegram_id, access_hash);
        let mut iter = self.client.iter_messages(chat).max_id(0);
        if from_message_id > 0 {
            iter = iter.min_id(from_message_id);
        }

        let mut out = Vec::new();
        loop {
            match iter.next().await {
                Ok(Some(message)) => out.push(Self::to_gateway_message(message)),
                Ok(None) => break,
                Err(e) => return Err(MirrorError::Gateway(e.to_string())),
            }
        }
        out.reverse();
        debug!(count = out.len(), from_message_id, "iterated history batch");
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn forward_messages(
        &self,
        from_telegram_id: i64,
        from_access_hash: i64,
        to_telegram_id: i64,
        to_access_hash: i64,
        ids: &[i32],
    ) -> Result<Vec<Option<i32>>, MirrorError> {
        let source = Self::packed(from_telegram_id, from_access_hash);
        let destination = Self::packed(to_telegram_id, to_access_hash);

        let forwarded = self
            .client
            .forward_messages(&destination, ids, &source)
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        if forwarded.len() != ids.len() {
            warn!(
                expected = ids.len(),
                got = forwarded.len(),
                "server returned fewer forwarded updates than requested, aligning positionally"
            );
        }

        Ok(forwarded.into_iter().map(|m| m.map(|m| m.id())).collect())
    }

    #[instrument(skip(self, source))]
    async fn copy_message(
        &self,
        to_telegram_id: i64,
        to_access_hash: i64,
        source: &GatewayMessage,
    ) -> Result<i32, MirrorError> {
        let destination = Self::packed(to_telegram_id, to_access_hash);

        let raw = source
            .raw
            .as_ref()
            .ok_or_else(|| MirrorError::Config("copy source has no underlying telegram message".into()))?;
        let mut input = InputMessage::text(raw.text());
        if let Some(media) = raw.media() {
            input = input.copy_media(&media);
        }
        let sent = self
            .client
            .send_message(&destination, input)
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        Ok(sent.id())
    }

    #[instrument(skip(self))]
    async fn get_message(
        &self,
        telegram_id: i64,
        access_hash: i64,
        message_id: i32,
    ) -> Result<Option<GatewayMessage>, MirrorError> {
        let chat = Self::packed(telegram_id, access_hash);
        let mut messages = self
            .client
            .get_messages_by_id(chat, &[message_id])
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        Ok(messages.pop().flatten().map(Self::to_gateway_message))
    }

    #[instrument(skip(self))]
    async fn create_private_channel(
        &self,
        title: &str,
        about: &str,
    ) -> Result<CreatedChannel, MirrorError> {
        let channel = self
            .client
            .create_channel(title, Some(about))
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        let packed = channel.pack();
        let access_hash = packed
            .access_hash
            .ok_or_else(|| MirrorError::Gateway("new channel has no access hash".into()))?;

        let invite_link = self
            .client
            .export_invite_link(&channel)
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))
            .ok();

        Ok(CreatedChannel {
            telegram_id: packed.id,
            access_hash,
            invite_link,
        })
    }

    #[instrument(skip(self))]
    async fn export_invite_link(
        &self,
        telegram_id: i64,
        access_hash: i64,
    ) -> Result<String, MirrorError> {
        let chat = Self::packed(telegram_id, access_hash);
        let channel = self
            .client
            .unpack_chat(chat)
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))?;

        self.client
            .export_invite_link(&channel)
            .await
            .map_err(|e| MirrorError::Gateway(e.to_string()))
    }
}
