//! In-memory platform double
//!
//! Keeps channels, relay endpoints, messages and persona bot applications in
//! memory and records every call, so tests can assert on what was (and was
//! not) sent. Failures can be queued per operation name.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chorus_core::{AllowedMentions, BotToken, ChannelInfo, GuildInfo, Snowflake};
use chorus_http::{
    AppEmoji, ApplicationInfo, ApplicationPatch, BotUser, BotUserPatch, CommandSpec,
    CreateMessagePayload, EditPayload, ExecutePayload, FileUpload, GuildMemberInfo, PartialGuild,
    PlatformError, PostedMessage, Webhook,
};

use crate::Platform;

/// Application id encoded in [`service_token`]
pub const SERVICE_APP_ID: Snowflake = 123456789012345678;

/// A well-formed token for the service bot
pub fn service_token() -> BotToken {
    BotToken::new("MTIzNDU2Nzg5MDEyMzQ1Njc4.GaBcDe.service-secret")
}

/// Failure to inject into the next call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    NotFound,
    Unauthorized,
    Forbidden,
    Server,
}

impl FakeFailure {
    fn error(self, op: &str) -> PlatformError {
        let route = op.to_string();
        match self {
            FakeFailure::NotFound => PlatformError::NotFound { route },
            FakeFailure::Unauthorized => PlatformError::Unauthorized { route },
            FakeFailure::Forbidden => PlatformError::Forbidden {
                route,
                body: "missing access".into(),
            },
            FakeFailure::Server => PlatformError::Server {
                route,
                status: 503,
                attempts: 5,
            },
        }
    }
}

/// Who posted a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poster {
    Webhook(Snowflake),
    Bot(Snowflake),
}

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub thread_id: Option<Snowflake>,
    pub poster: Poster,
    pub content: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub files: Vec<String>,
    pub embeds: usize,
    pub allowed_mentions: AllowedMentions,
    pub flags: Option<u64>,
}

/// A persona bot application as the platform sees it
#[derive(Debug, Clone)]
pub struct FakeApp {
    pub app: ApplicationInfo,
    pub user: BotUser,
    pub commands: Vec<CommandSpec>,
    pub guilds: Vec<Snowflake>,
}

#[derive(Default)]
struct FakeState {
    channels: HashMap<Snowflake, ChannelInfo>,
    guilds: HashMap<Snowflake, GuildInfo>,
    member_roles: HashMap<(Snowflake, Snowflake), Vec<Snowflake>>,
    webhooks: BTreeMap<Snowflake, Webhook>,
    messages: Vec<FakeMessage>,
    deleted: Vec<(Snowflake, Snowflake)>,
    apps: HashMap<String, FakeApp>,
    emojis: BTreeMap<Snowflake, AppEmoji>,
    deleted_emojis: Vec<Snowflake>,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<FakeFailure>>,
    racing_webhook: Option<Webhook>,
}

pub struct FakePlatform {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
    cdn: String,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicU64::new(10_000),
            cdn: "https://cdn.test".to_string(),
        }
    }

    fn id(&self) -> Snowflake {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn begin(&self, op: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(op.to_string());
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.error(op)),
            None => Ok(()),
        }
    }

    fn app_id_of(state: &FakeState, token: &BotToken) -> Option<Snowflake> {
        state
            .apps
            .get(token.expose())
            .map(|app| app.app.id)
            .or_else(|| token.application_id().ok())
    }

    // Setup

    pub fn add_channel(&self, channel: ChannelInfo) {
        self.state.lock().channels.insert(channel.id, channel);
    }

    pub fn add_guild(&self, guild: GuildInfo) {
        self.state.lock().guilds.insert(guild.id, guild);
    }

    pub fn set_member_roles(&self, guild_id: Snowflake, user_id: Snowflake, roles: Vec<Snowflake>) {
        self.state.lock().member_roles.insert((guild_id, user_id), roles);
    }

    pub fn add_webhook(&self, webhook: Webhook) {
        self.state.lock().webhooks.insert(webhook.id, webhook);
    }

    /// Another worker creates `webhook` alongside our next create
    pub fn race_next_create(&self, webhook: Webhook) {
        self.state.lock().racing_webhook = Some(webhook);
    }

    /// Delete an endpoint behind the service's back
    pub fn remove_webhook(&self, webhook_id: Snowflake) {
        self.state.lock().webhooks.remove(&webhook_id);
    }

    pub fn add_app(&self, token: &BotToken, app: ApplicationInfo, user: BotUser) {
        self.state.lock().apps.insert(
            token.expose().to_string(),
            FakeApp {
                app,
                user,
                commands: Vec::new(),
                guilds: Vec::new(),
            },
        );
    }

    pub fn set_app_guilds(&self, token: &BotToken, guilds: Vec<Snowflake>) {
        if let Some(app) = self.state.lock().apps.get_mut(token.expose()) {
            app.guilds = guilds;
        }
    }

    /// Fail the next call of `op` (a [`Platform`] method name)
    pub fn fail_next(&self, op: &str, failure: FakeFailure) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(failure);
    }

    // Inspection

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|call| *call == op).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn messages(&self) -> Vec<FakeMessage> {
        self.state.lock().messages.clone()
    }

    /// (channel, message) pairs deleted so far
    pub fn deleted(&self) -> Vec<(Snowflake, Snowflake)> {
        self.state.lock().deleted.clone()
    }

    pub fn webhooks_in(&self, channel_id: Snowflake) -> Vec<Webhook> {
        self.state
            .lock()
            .webhooks
            .values()
            .filter(|hook| hook.channel_id == Some(channel_id))
            .cloned()
            .collect()
    }

    pub fn app(&self, token: &BotToken) -> Option<FakeApp> {
        self.state.lock().apps.get(token.expose()).cloned()
    }

    pub fn live_emojis(&self) -> Vec<AppEmoji> {
        self.state.lock().emojis.values().cloned().collect()
    }

    pub fn deleted_emojis(&self) -> Vec<Snowflake> {
        self.state.lock().deleted_emojis.clone()
    }

    fn with_app<T>(
        &self,
        op: &str,
        token: &BotToken,
        apply: impl FnOnce(&mut FakeApp) -> T,
    ) -> Result<T, PlatformError> {
        let mut state = self.state.lock();
        match state.apps.get_mut(token.expose()) {
            Some(app) => Ok(apply(app)),
            None => Err(PlatformError::Unauthorized { route: op.to_string() }),
        }
    }
}

fn not_found(op: &str) -> PlatformError {
    PlatformError::NotFound { route: op.to_string() }
}

#[async_trait]
impl Platform for FakePlatform {
    fn cdn_base(&self) -> &str {
        &self.cdn
    }

    async fn get_channel(&self, _token: &BotToken, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError> {
        self.begin("get_channel")?;
        self.state
            .lock()
            .channels
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| not_found("get_channel"))
    }

    async fn get_guild(&self, _token: &BotToken, guild_id: Snowflake) -> Result<GuildInfo, PlatformError> {
        self.begin("get_guild")?;
        self.state
            .lock()
            .guilds
            .get(&guild_id)
            .cloned()
            .ok_or_else(|| not_found("get_guild"))
    }

    async fn get_guild_member(
        &self,
        _token: &BotToken,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<GuildMemberInfo, PlatformError> {
        self.begin("get_guild_member")?;
        let roles = self
            .state
            .lock()
            .member_roles
            .get(&(guild_id, user_id))
            .cloned()
            .unwrap_or_default();
        Ok(GuildMemberInfo { roles })
    }

    async fn channel_webhooks(&self, _token: &BotToken, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
        self.begin("channel_webhooks")?;
        Ok(self.webhooks_in(channel_id))
    }

    async fn create_webhook(&self, token: &BotToken, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError> {
        self.begin("create_webhook")?;
        let id = self.id();
        let mut state = self.state.lock();
        let hook = Webhook {
            id,
            token: Some(format!("secret-{id}")),
            channel_id: Some(channel_id),
            application_id: Self::app_id_of(&state, token),
            name: Some(name.to_string()),
            kind: 1,
        };
        state.webhooks.insert(id, hook.clone());
        if let Some(racing) = state.racing_webhook.take() {
            state.webhooks.insert(racing.id, racing);
        }
        Ok(hook)
    }

    async fn delete_webhook(&self, _token: &BotToken, webhook_id: Snowflake) -> Result<(), PlatformError> {
        self.begin("delete_webhook")?;
        self.state
            .lock()
            .webhooks
            .remove(&webhook_id)
            .map(|_| ())
            .ok_or_else(|| not_found("delete_webhook"))
    }

    async fn get_webhook_with_token(&self, webhook_id: Snowflake, secret: &str) -> Result<Webhook, PlatformError> {
        self.begin("get_webhook_with_token")?;
        let state = self.state.lock();
        let hook = state
            .webhooks
            .get(&webhook_id)
            .ok_or_else(|| not_found("get_webhook_with_token"))?;
        if hook.token.as_deref() != Some(secret) {
            return Err(PlatformError::Unauthorized {
                route: "get_webhook_with_token".into(),
            });
        }
        Ok(hook.clone())
    }

    async fn execute_webhook(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        thread_id: Option<Snowflake>,
        payload: &ExecutePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        self.begin("execute_webhook")?;
        let id = self.id();
        let mut state = self.state.lock();
        let channel_id = {
            let hook = state
                .webhooks
                .get(&webhook_id)
                .ok_or_else(|| not_found("execute_webhook"))?;
            if hook.token.as_deref() != Some(secret) {
                return Err(PlatformError::Unauthorized {
                    route: "execute_webhook".into(),
                });
            }
            thread_id.or(hook.channel_id).unwrap_or_default()
        };
        state.messages.push(FakeMessage {
            id,
            channel_id,
            thread_id,
            poster: Poster::Webhook(webhook_id),
            content: payload.content.clone(),
            username: Some(payload.username.clone()),
            avatar_url: payload.avatar_url.clone(),
            files: files.iter().map(|file| file.filename.clone()).collect(),
            embeds: payload.embeds.len(),
            allowed_mentions: payload.allowed_mentions.clone(),
            flags: payload.flags,
        });
        Ok(PostedMessage {
            id,
            channel_id,
            webhook_id: Some(webhook_id),
        })
    }

    async fn delete_webhook_message(
        &self,
        webhook_id: Snowflake,
        _secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
    ) -> Result<(), PlatformError> {
        self.begin("delete_webhook_message")?;
        let mut state = self.state.lock();
        let channel_id = state
            .webhooks
            .get(&webhook_id)
            .and_then(|hook| thread_id.or(hook.channel_id))
            .ok_or_else(|| not_found("delete_webhook_message"))?;
        state.deleted.push((channel_id, message_id));
        Ok(())
    }

    async fn edit_webhook_message(
        &self,
        webhook_id: Snowflake,
        _secret: &str,
        message_id: Snowflake,
        _thread_id: Option<Snowflake>,
        payload: &EditPayload,
    ) -> Result<PostedMessage, PlatformError> {
        self.begin("edit_webhook_message")?;
        let mut state = self.state.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|message| message.id == message_id && message.poster == Poster::Webhook(webhook_id))
            .ok_or_else(|| not_found("edit_webhook_message"))?;
        message.content = payload.content.clone();
        message.allowed_mentions = payload.allowed_mentions.clone();
        Ok(PostedMessage {
            id: message.id,
            channel_id: message.channel_id,
            webhook_id: Some(webhook_id),
        })
    }

    async fn create_message(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        payload: &CreateMessagePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        self.begin("create_message")?;
        let id = self.id();
        let mut state = self.state.lock();
        let poster = Self::app_id_of(&state, token).unwrap_or_default();
        state.messages.push(FakeMessage {
            id,
            channel_id,
            thread_id: None,
            poster: Poster::Bot(poster),
            content: payload.content.clone(),
            username: None,
            avatar_url: None,
            files: files.iter().map(|file| file.filename.clone()).collect(),
            embeds: 0,
            allowed_mentions: payload.allowed_mentions.clone(),
            flags: payload.flags,
        });
        Ok(PostedMessage {
            id,
            channel_id,
            webhook_id: None,
        })
    }

    async fn delete_message(&self, _token: &BotToken, channel_id: Snowflake, message_id: Snowflake) -> Result<(), PlatformError> {
        self.begin("delete_message")?;
        self.state.lock().deleted.push((channel_id, message_id));
        Ok(())
    }

    async fn create_app_emoji(
        &self,
        _token: &BotToken,
        _application_id: Snowflake,
        name: &str,
        image: &[u8],
    ) -> Result<AppEmoji, PlatformError> {
        self.begin("create_app_emoji")?;
        chorus_http::api::image_data_uri(image)?;
        let emoji = AppEmoji {
            id: self.id(),
            name: name.to_string(),
            animated: image.starts_with(b"GIF"),
        };
        self.state.lock().emojis.insert(emoji.id, emoji.clone());
        Ok(emoji)
    }

    async fn delete_app_emoji(&self, _token: &BotToken, _application_id: Snowflake, emoji_id: Snowflake) -> Result<(), PlatformError> {
        self.begin("delete_app_emoji")?;
        let mut state = self.state.lock();
        state.emojis.remove(&emoji_id);
        state.deleted_emojis.push(emoji_id);
        Ok(())
    }

    async fn current_application(&self, token: &BotToken) -> Result<ApplicationInfo, PlatformError> {
        self.begin("current_application")?;
        self.with_app("current_application", token, |app| app.app.clone())
    }

    async fn patch_current_application(&self, token: &BotToken, patch: &ApplicationPatch) -> Result<ApplicationInfo, PlatformError> {
        self.begin("patch_current_application")?;
        let hash = format!("icon-{}", self.id());
        self.with_app("patch_current_application", token, |app| {
            let info = &mut app.app;
            if let Some(description) = &patch.description {
                info.description = description.clone();
            }
            if let Some(icon) = &patch.icon {
                info.icon = icon.as_ref().map(|_| hash);
            }
            if let Some(url) = &patch.interactions_endpoint_url {
                info.interactions_endpoint_url = url.clone();
            }
            if let Some(url) = &patch.event_webhooks_url {
                info.event_webhooks_url = url.clone();
            }
            if let Some(status) = patch.event_webhooks_status {
                info.event_webhooks_status = Some(status);
            }
            if let Some(types) = &patch.event_webhooks_types {
                info.event_webhooks_types = Some(types.clone());
            }
            if let Some(config) = &patch.integration_types_config {
                info.integration_types_config = Some(config.clone());
            }
            if let Some(params) = &patch.install_params {
                info.install_params = Some(params.clone());
            }
            info.clone()
        })
    }

    async fn current_user(&self, token: &BotToken) -> Result<BotUser, PlatformError> {
        self.begin("current_user")?;
        self.with_app("current_user", token, |app| app.user.clone())
    }

    async fn patch_current_user(&self, token: &BotToken, patch: &BotUserPatch) -> Result<BotUser, PlatformError> {
        self.begin("patch_current_user")?;
        let avatar_hash = format!("avatar-{}", self.id());
        let banner_hash = format!("banner-{}", self.id());
        self.with_app("patch_current_user", token, |app| {
            let user = &mut app.user;
            if let Some(username) = &patch.username {
                user.username = username.clone();
            }
            if let Some(avatar) = &patch.avatar {
                user.avatar = avatar.as_ref().map(|_| avatar_hash);
            }
            if let Some(banner) = &patch.banner {
                user.banner = banner.as_ref().map(|_| banner_hash);
            }
            user.clone()
        })
    }

    async fn current_user_guilds(&self, token: &BotToken) -> Result<Vec<PartialGuild>, PlatformError> {
        self.begin("current_user_guilds")?;
        self.with_app("current_user_guilds", token, |app| {
            app.guilds
                .iter()
                .map(|id| PartialGuild {
                    id: *id,
                    name: format!("guild {id}"),
                })
                .collect()
        })
    }

    async fn list_commands(&self, token: &BotToken, _application_id: Snowflake) -> Result<Vec<CommandSpec>, PlatformError> {
        self.begin("list_commands")?;
        self.with_app("list_commands", token, |app| app.commands.clone())
    }

    async fn put_commands(
        &self,
        token: &BotToken,
        _application_id: Snowflake,
        commands: &[CommandSpec],
    ) -> Result<Vec<CommandSpec>, PlatformError> {
        self.begin("put_commands")?;
        let registered: Vec<CommandSpec> = commands
            .iter()
            .map(|command| CommandSpec {
                id: Some(self.id()),
                ..command.clone()
            })
            .collect();
        self.with_app("put_commands", token, |app| {
            app.commands = registered.clone();
            registered
        })
    }

    async fn create_command(&self, token: &BotToken, _application_id: Snowflake, command: &CommandSpec) -> Result<CommandSpec, PlatformError> {
        self.begin("create_command")?;
        let created = CommandSpec {
            id: Some(self.id()),
            ..command.clone()
        };
        self.with_app("create_command", token, |app| {
            app.commands.push(created.clone());
            created
        })
    }

    async fn edit_command(
        &self,
        token: &BotToken,
        _application_id: Snowflake,
        command_id: Snowflake,
        command: &CommandSpec,
    ) -> Result<CommandSpec, PlatformError> {
        self.begin("edit_command")?;
        let edited = CommandSpec {
            id: Some(command_id),
            ..command.clone()
        };
        self.with_app("edit_command", token, |app| {
            match app.commands.iter_mut().find(|c| c.id == Some(command_id)) {
                Some(existing) => {
                    *existing = edited.clone();
                    Ok(edited)
                }
                None => Err(not_found("edit_command")),
            }
        })?
    }

    async fn delete_command(&self, token: &BotToken, _application_id: Snowflake, command_id: Snowflake) -> Result<(), PlatformError> {
        self.begin("delete_command")?;
        self.with_app("delete_command", token, |app| {
            app.commands.retain(|c| c.id != Some(command_id));
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        self.begin("download")?;
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(url.as_bytes());
        Ok(bytes)
    }
}
