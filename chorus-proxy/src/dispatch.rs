//! Dispatcher
//!
//! Replaces an original message with one posted as the selected persona:
//! - Checks limits and permissions before touching anything, and the
//!   content cap again once emoji are rehosted and the reply is annotated
//! - Tries the persona's own bot first when it is installed in the guild,
//!   falling back to the channel's relay endpoint
//! - Deletes the original and posts the replacement concurrently, then
//!   compensates from the joint outcome
//! - Records provenance once the replacement exists
//!
//! The delete and the post are not atomic. A replacement posted while the
//! delete failed is rolled back; an original deleted while the post failed
//! cannot be restored.

use chrono::Utc;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use chorus_core::{
    allowed_mentions, annotate_reply, check_attachments, check_content, pinged_reply_author,
    AccountConfig, BotToken, InboundMessage, LimitViolation, LinkBases, Permissions, PersonaBot,
    ProvenanceRecord, ReplyAnnotation, Selection, Snowflake, VOICE_MESSAGE_FLAG,
};
use chorus_http::{
    CreateMessagePayload, EditPayload, ExecutePayload, FileUpload, OutgoingReference, PlatformError,
    PostedMessage,
};

use crate::{
    ChannelDirectory, Diagnostics, EmojiRehoster, RegistryError, Rehosted, RelayRegistry,
    RelayTarget, SharedPlatform, SharedProvenanceStore, SharedTtlStore, StoreError,
};

/// Marker key set while a message is being proxied
pub fn pending_key(message_id: Snowflake) -> String {
    format!("pending_proxy:{message_id}")
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub links: LinkBases,
    /// How long the in-flight marker lives
    pub pending_ttl: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            links: LinkBases::default(),
            pending_ttl: Duration::from_secs(30),
        }
    }
}

/// Why a dispatch stopped before any mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    NotInGuild,
    Limit(LimitViolation),
    StickerWithAttachments,
    UnsupportedSticker,
    MissingPermissions(Permissions),
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::NotInGuild => f.write_str("message is not in a guild"),
            Abort::Limit(violation) => write!(f, "{violation}"),
            Abort::StickerWithAttachments => {
                f.write_str("stickers cannot be proxied together with attachments")
            }
            Abort::UnsupportedSticker => f.write_str("sticker format cannot be proxied"),
            Abort::MissingPermissions(missing) => write!(f, "missing permissions: {missing}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Relay,
    PersonaBot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Proxied {
        record: ProvenanceRecord,
        path: DispatchPath,
    },
    Aborted(Abort),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Relay endpoint error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Original message was deleted but no replacement was posted: {0}")]
    ReplacementLost(#[source] Box<DispatchError>),

    #[error("Original message could not be deleted, replacement {replacement} was rolled back: {source}")]
    RolledBack {
        replacement: Snowflake,
        source: PlatformError,
    },

    #[error("Original message could not be deleted and replacement {replacement} is a duplicate: {source}")]
    Duplicated {
        replacement: Snowflake,
        source: PlatformError,
    },

    #[error("Nothing changed, delete failed: {0}")]
    NothingChanged(PlatformError),

    #[error("Message cannot be edited: {0}")]
    NotEditable(String),
}

/// A message to replace and who it is replaced as
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub message: &'a InboundMessage,
    pub selection: &'a Selection,
    pub account: &'a AccountConfig,
}

enum BotAttempt {
    Posted(PostedMessage),
    /// Nothing was mutated; use the relay path
    Fallback(String),
    /// The original is gone but the bot could not post
    OriginalDeleted(PlatformError),
}

enum RelayAttempt {
    Posted(PostedMessage, RelayTarget),
    /// Nothing was mutated
    Rejected(Abort),
}

pub struct Dispatcher {
    platform: SharedPlatform,
    token: BotToken,
    application_id: Snowflake,
    directory: Arc<ChannelDirectory>,
    registry: Arc<RelayRegistry>,
    rehoster: EmojiRehoster,
    provenance: SharedProvenanceStore,
    markers: SharedTtlStore,
    diagnostics: Diagnostics,
    config: DispatchConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: SharedPlatform,
        token: BotToken,
        application_id: Snowflake,
        directory: Arc<ChannelDirectory>,
        registry: Arc<RelayRegistry>,
        provenance: SharedProvenanceStore,
        markers: SharedTtlStore,
        diagnostics: Diagnostics,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rehoster: EmojiRehoster::new(platform.clone()),
            platform,
            token,
            application_id,
            directory,
            registry,
            provenance,
            markers,
            diagnostics,
            config,
        }
    }

    pub async fn dispatch(&self, request: DispatchRequest<'_>) -> Result<DispatchOutcome, DispatchError> {
        let message = request.message;
        let selection = request.selection;
        let Some(guild_id) = message.guild_id else {
            return Ok(self.abort(message.id, Abort::NotInGuild).await);
        };

        if let Some(abort) = self.precheck(message, selection, guild_id).await? {
            return Ok(self.abort(message.id, abort).await);
        }

        self.markers
            .set(&pending_key(message.id), "1", self.config.pending_ttl)
            .await?;

        let mut notes = vec![format!(
            "Proxying as `{}` ({})",
            selection.member.name, selection.reason
        )];
        let files = self.collect_files(message).await?;
        let flags = message.is_voice_message().then_some(VOICE_MESSAGE_FLAG);

        let mut original_deleted = false;
        if let Some(bot) = bot_candidate(selection, guild_id) {
            match self.via_persona_bot(message, selection, bot, guild_id, &files, flags).await? {
                BotAttempt::Posted(posted) => {
                    notes.push(format!("Posted through persona bot {}", bot.bot_id));
                    let record = self.record(message, selection, &posted, None, Some(bot.bot_id), notes).await;
                    return Ok(DispatchOutcome::Proxied {
                        record,
                        path: DispatchPath::PersonaBot,
                    });
                }
                BotAttempt::Fallback(reason) => {
                    debug!("Persona bot path skipped for {}: {}", message.id, reason);
                    notes.push(format!("Persona bot skipped: {reason}"));
                }
                BotAttempt::OriginalDeleted(e) => {
                    warn!("Persona bot failed to post {} after delete: {}", message.id, e);
                    notes.push(format!("Persona bot failed to post: {e}"));
                    original_deleted = true;
                }
            }
        }

        let (posted, target) = match self
            .via_relay(message, selection, request.account, &files, flags, original_deleted)
            .await?
        {
            RelayAttempt::Posted(posted, target) => (posted, target),
            RelayAttempt::Rejected(abort) => {
                self.clear_pending(message.id).await;
                return Ok(self.abort(message.id, abort).await);
            }
        };
        notes.push(format!("Posted through relay endpoint {}", target.endpoint.id));
        let record = self
            .record(message, selection, &posted, Some(target.endpoint.id), None, notes)
            .await;
        Ok(DispatchOutcome::Proxied {
            record,
            path: DispatchPath::Relay,
        })
    }

    /// Delete a proxied message through whoever posted it
    pub async fn delete_proxied(&self, record: &ProvenanceRecord, bot: Option<&PersonaBot>) -> Result<(), DispatchError> {
        let result = match (record.bot_id, bot) {
            (Some(bot_id), Some(bot)) if bot.bot_id == bot_id => {
                self.platform
                    .delete_message(&bot.token, record.channel_id, record.proxy_message_id)
                    .await
            }
            _ => {
                let target = self.registry.get_or_create(record.channel_id).await?;
                if record.relay_endpoint_id == Some(target.endpoint.id) {
                    self.platform
                        .delete_webhook_message(
                            target.endpoint.id,
                            &target.endpoint.secret,
                            record.proxy_message_id,
                            target.thread_id,
                        )
                        .await
                } else {
                    self.platform
                        .delete_message(&self.token, record.channel_id, record.proxy_message_id)
                        .await
                }
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the content of a message a relay endpoint posted
    pub async fn edit_proxied(&self, record: &ProvenanceRecord, content: &str) -> Result<(), DispatchError> {
        check_content(content).map_err(|violation| DispatchError::NotEditable(violation.to_string()))?;
        let Some(endpoint_id) = record.relay_endpoint_id else {
            return Err(DispatchError::NotEditable("posted by a persona bot".into()));
        };
        let target = self.registry.get_or_create(record.channel_id).await?;
        if target.endpoint.id != endpoint_id {
            return Err(DispatchError::NotEditable("relay endpoint was replaced".into()));
        }

        let payload = EditPayload {
            content: content.to_string(),
            allowed_mentions: allowed_mentions(content, None, &[]),
        };
        self.platform
            .edit_webhook_message(
                endpoint_id,
                &target.endpoint.secret,
                record.proxy_message_id,
                target.thread_id,
                &payload,
            )
            .await?;
        debug!("Edited proxied message {}", record.proxy_message_id);
        Ok(())
    }

    async fn clear_pending(&self, message_id: Snowflake) {
        if let Err(e) = self.markers.delete(&pending_key(message_id)).await {
            warn!("Failed to clear pending marker of {}: {}", message_id, e);
        }
    }

    async fn abort(&self, message_id: Snowflake, abort: Abort) -> DispatchOutcome {
        info!("Not proxying {}: {}", message_id, abort);
        self.diagnostics
            .record(message_id, &[format!("Not proxied: {abort}")])
            .await;
        DispatchOutcome::Aborted(abort)
    }

    async fn precheck(
        &self,
        message: &InboundMessage,
        selection: &Selection,
        guild_id: Snowflake,
    ) -> Result<Option<Abort>, DispatchError> {
        if !message.sticker_items.is_empty() {
            if !message.attachments.is_empty() {
                return Ok(Some(Abort::StickerWithAttachments));
            }
            if message.sticker_items.iter().any(|s| s.image_extension().is_none()) {
                return Ok(Some(Abort::UnsupportedSticker));
            }
        }

        if let Err(violation) = check_content(&selection.content) {
            return Ok(Some(Abort::Limit(violation)));
        }

        let guild = self.directory.guild(guild_id).await?;
        if let Err(violation) = check_attachments(&message.attachments, guild.premium_tier) {
            return Ok(Some(Abort::Limit(violation)));
        }

        let permissions = self
            .directory
            .permissions(guild_id, message.channel_id, self.application_id, None)
            .await?;
        let missing = permissions.missing(Permissions::RELAY_REQUIRED);
        if !missing.is_empty() {
            return Ok(Some(Abort::MissingPermissions(missing)));
        }
        Ok(None)
    }

    /// Attachments, or sticker images when there are none
    async fn collect_files(&self, message: &InboundMessage) -> Result<Vec<FileUpload>, PlatformError> {
        if !message.attachments.is_empty() {
            let downloads = message
                .attachments
                .iter()
                .map(|attachment| self.platform.download(&attachment.url));
            let data = try_join_all(downloads).await?;
            return Ok(message
                .attachments
                .iter()
                .zip(data)
                .map(|(attachment, data)| FileUpload {
                    filename: attachment.filename.clone(),
                    data,
                    description: attachment.description.clone(),
                    duration_secs: attachment.duration_secs,
                    waveform: attachment.waveform.clone(),
                })
                .collect());
        }

        let stickers: Vec<(String, String)> = message
            .sticker_items
            .iter()
            .filter_map(|sticker| {
                let ext = sticker.image_extension()?;
                Some((
                    format!("{}/stickers/{}.{ext}", self.platform.cdn_base(), sticker.id),
                    format!("{}.{ext}", sticker.name),
                ))
            })
            .collect();
        let data = try_join_all(stickers.iter().map(|(url, _)| self.platform.download(url))).await?;
        Ok(stickers
            .into_iter()
            .zip(data)
            .map(|((_, filename), data)| FileUpload {
                filename,
                data,
                description: None,
                duration_secs: None,
                waveform: None,
            })
            .collect())
    }

    async fn via_persona_bot(
        &self,
        message: &InboundMessage,
        selection: &Selection,
        bot: &PersonaBot,
        guild_id: Snowflake,
        files: &[FileUpload],
        flags: Option<u64>,
    ) -> Result<BotAttempt, DispatchError> {
        let permissions = match self
            .directory
            .permissions(guild_id, message.channel_id, bot.bot_id, None)
            .await
        {
            Ok(permissions) => permissions,
            Err(e) => return Ok(BotAttempt::Fallback(format!("permissions unavailable: {e}"))),
        };
        let missing = permissions.missing(Permissions::PERSONA_BOT_REQUIRED);
        if !missing.is_empty() {
            return Ok(BotAttempt::Fallback(format!("bot is missing {missing}")));
        }

        // the bot sees none of the author's guild emoji
        let rehosted = match self
            .rehoster
            .rehost(&selection.content, &bot.token, bot.bot_id, |_| true)
            .await
        {
            Ok(rehosted) => rehosted,
            Err(e) => return Ok(BotAttempt::Fallback(format!("emoji rehost failed: {e}"))),
        };

        let payload = CreateMessagePayload {
            content: rehosted.content.clone(),
            message_reference: message
                .message_reference
                .clone()
                .filter(|_| message.referenced_message.is_some())
                .map(|reference| OutgoingReference {
                    reference,
                    fail_if_not_exists: false,
                }),
            allowed_mentions: allowed_mentions(&selection.content, pinged_reply_author(message), &[]),
            attachments: Vec::new(),
            flags,
        };
        if let Err(violation) = check_content(&payload.content) {
            self.rehoster.cleanup(&rehosted).await;
            return Ok(BotAttempt::Fallback(format!("after emoji rehost {violation}")));
        }

        let (deleted, created) = tokio::join!(
            self.platform
                .delete_message(&self.token, message.channel_id, message.id),
            self.platform
                .create_message(&bot.token, message.channel_id, &payload, files),
        );
        self.rehoster.cleanup(&rehosted).await;

        match (deleted, created) {
            (Ok(()), Ok(posted)) => Ok(BotAttempt::Posted(posted)),
            (Ok(()), Err(e)) => Ok(BotAttempt::OriginalDeleted(e)),
            (Err(e), Ok(posted)) => {
                let rollback = self
                    .platform
                    .delete_message(&bot.token, message.channel_id, posted.id)
                    .await;
                Err(rolled_back(posted.id, e, rollback))
            }
            (Err(e), Err(_)) => Err(DispatchError::NothingChanged(e)),
        }
    }

    async fn via_relay(
        &self,
        message: &InboundMessage,
        selection: &Selection,
        account: &AccountConfig,
        files: &[FileUpload],
        flags: Option<u64>,
        original_deleted: bool,
    ) -> Result<RelayAttempt, DispatchError> {
        let lost = |e: DispatchError| {
            if original_deleted {
                DispatchError::ReplacementLost(Box::new(e))
            } else {
                e
            }
        };

        let target = self
            .registry
            .get_or_create(message.channel_id)
            .await
            .map_err(|e| lost(e.into()))?;
        let mut rehosted = self
            .rehoster
            .rehost(&selection.content, &self.token, self.application_id, |emoji| {
                !self.directory.is_known_emoji(emoji.id)
            })
            .await
            .map_err(|e| lost(e.into()))?;
        let mut payload = self.relay_payload(message, selection, account, &rehosted.content, flags);

        if let Err(violation) = check_content(&payload.content) {
            self.rehoster.cleanup(&rehosted).await;
            if !original_deleted {
                return Ok(RelayAttempt::Rejected(Abort::Limit(violation)));
            }
            // the original is gone; post without rehosted emoji rather than not at all
            warn!("Rehosted content of {} is over the cap, posting it unrehosted", message.id);
            rehosted = Rehosted::unchanged(&selection.content);
            payload = self.relay_payload(message, selection, account, &rehosted.content, flags);
        }

        let execute = self.execute_healing(message.channel_id, target, &payload, files);
        let (deleted, created) = if original_deleted {
            (Ok(()), execute.await)
        } else {
            tokio::join!(
                self.platform
                    .delete_message(&self.token, message.channel_id, message.id),
                execute,
            )
        };
        self.rehoster.cleanup(&rehosted).await;

        match (deleted, created) {
            (Ok(()), Ok((posted, target))) => Ok(RelayAttempt::Posted(posted, target)),
            (Ok(()), Err(e)) => {
                error!("Original {} deleted but relay post failed: {}", message.id, e);
                Err(DispatchError::ReplacementLost(Box::new(e)))
            }
            (Err(e), Ok((posted, target))) => {
                let rollback = self
                    .platform
                    .delete_webhook_message(
                        target.endpoint.id,
                        &target.endpoint.secret,
                        posted.id,
                        target.thread_id,
                    )
                    .await;
                Err(rolled_back(posted.id, e, rollback))
            }
            (Err(e), Err(_)) => Err(DispatchError::NothingChanged(e)),
        }
    }

    /// Execute; on a stale endpoint heal the registry and retry once
    async fn execute_healing(
        &self,
        channel_id: Snowflake,
        target: RelayTarget,
        payload: &ExecutePayload,
        files: &[FileUpload],
    ) -> Result<(PostedMessage, RelayTarget), DispatchError> {
        let first = self
            .platform
            .execute_webhook(
                target.endpoint.id,
                &target.endpoint.secret,
                target.thread_id,
                payload,
                files,
            )
            .await;
        match first {
            Ok(posted) => Ok((posted, target)),
            Err(e) if e.is_stale_endpoint() => {
                let fresh = self.registry.heal(channel_id, &target.endpoint).await?;
                let posted = self
                    .platform
                    .execute_webhook(
                        fresh.endpoint.id,
                        &fresh.endpoint.secret,
                        fresh.thread_id,
                        payload,
                        files,
                    )
                    .await?;
                Ok((posted, fresh))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn relay_payload(
        &self,
        message: &InboundMessage,
        selection: &Selection,
        account: &AccountConfig,
        content: &str,
        flags: Option<u64>,
    ) -> ExecutePayload {
        let mut content = content.to_string();
        let mut embeds = Vec::new();
        let mut quiet = Vec::new();

        if let Some(reference) = &message.referenced_message {
            let format = account.reply_format(message.guild_id.is_none());
            match annotate_reply(&content, reference, format, &self.config.links) {
                Some(ReplyAnnotation::Inline { content: annotated, quiet_users }) => {
                    content = annotated;
                    quiet = quiet_users;
                }
                Some(ReplyAnnotation::Embed(embed)) => embeds.push(embed),
                None => {}
            }
        }

        ExecutePayload {
            allowed_mentions: allowed_mentions(&selection.content, pinged_reply_author(message), &quiet),
            content,
            username: selection.display_name(),
            avatar_url: selection.avatar_url().map(str::to_string),
            embeds,
            attachments: Vec::new(),
            flags,
        }
    }

    async fn record(
        &self,
        message: &InboundMessage,
        selection: &Selection,
        posted: &PostedMessage,
        relay_endpoint_id: Option<Snowflake>,
        bot_id: Option<Snowflake>,
        notes: Vec<String>,
    ) -> ProvenanceRecord {
        let record = ProvenanceRecord {
            proxy_message_id: posted.id,
            original_message_id: Some(message.id),
            author_id: message.author_id().unwrap_or_default(),
            member_id: selection.member.id,
            channel_id: message.channel_id,
            reason: selection.reason.clone(),
            relay_endpoint_id,
            bot_id,
            created_at: Utc::now(),
        };

        let (stored, ()) = tokio::join!(
            self.provenance.record_provenance(&record),
            self.diagnostics.record(message.id, &notes),
        );
        match stored {
            Ok(()) => info!("Proxied {} as {}", message.id, posted.id),
            Err(e) => error!("Proxied {} as {} but provenance was not stored: {}", message.id, posted.id, e),
        }
        record
    }
}

/// The persona bot, when it may post this selection in this guild
fn bot_candidate(selection: &Selection, guild_id: Snowflake) -> Option<&PersonaBot> {
    // a bot cannot change its avatar per message
    if selection.tag().is_some_and(|tag| tag.avatar_url.is_some()) {
        return None;
    }
    selection.member.bot_in_guild(guild_id)
}

fn rolled_back(replacement: Snowflake, source: PlatformError, rollback: Result<(), PlatformError>) -> DispatchError {
    match rollback {
        Ok(()) => {
            warn!("Original could not be deleted, rolled back {}: {}", replacement, source);
            DispatchError::RolledBack { replacement, source }
        }
        Err(e) => {
            error!("Failed to roll back duplicate {}: {}", replacement, e);
            DispatchError::Duplicated { replacement, source }
        }
    }
}
