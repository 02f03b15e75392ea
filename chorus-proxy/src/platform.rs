//! The platform calls the proxy components make
//!
//! `PlatformClient` is the production implementation; tests use the
//! in-memory double in [`crate::testing`].

use async_trait::async_trait;
use std::sync::Arc;

use chorus_core::{BotToken, ChannelInfo, GuildInfo, Snowflake};
use chorus_http::{
    AppEmoji, ApplicationInfo, ApplicationPatch, BotUser, BotUserPatch, CommandSpec,
    CreateMessagePayload, EditPayload, ExecutePayload, FileUpload, GuildMemberInfo, PartialGuild,
    PlatformClient, PlatformError, PostedMessage, Webhook,
};

#[async_trait]
pub trait Platform: Send + Sync {
    /// Base URL for CDN assets (emoji, avatars, stickers)
    fn cdn_base(&self) -> &str;

    async fn get_channel(&self, token: &BotToken, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError>;

    async fn get_guild(&self, token: &BotToken, guild_id: Snowflake) -> Result<GuildInfo, PlatformError>;

    async fn get_guild_member(
        &self,
        token: &BotToken,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<GuildMemberInfo, PlatformError>;

    async fn channel_webhooks(&self, token: &BotToken, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError>;

    async fn create_webhook(&self, token: &BotToken, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError>;

    async fn delete_webhook(&self, token: &BotToken, webhook_id: Snowflake) -> Result<(), PlatformError>;

    async fn get_webhook_with_token(&self, webhook_id: Snowflake, secret: &str) -> Result<Webhook, PlatformError>;

    async fn execute_webhook(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        thread_id: Option<Snowflake>,
        payload: &ExecutePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError>;

    async fn delete_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
    ) -> Result<(), PlatformError>;

    async fn edit_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
        payload: &EditPayload,
    ) -> Result<PostedMessage, PlatformError>;

    async fn create_message(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        payload: &CreateMessagePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError>;

    async fn delete_message(&self, token: &BotToken, channel_id: Snowflake, message_id: Snowflake) -> Result<(), PlatformError>;

    async fn create_app_emoji(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        name: &str,
        image: &[u8],
    ) -> Result<AppEmoji, PlatformError>;

    async fn delete_app_emoji(&self, token: &BotToken, application_id: Snowflake, emoji_id: Snowflake) -> Result<(), PlatformError>;

    async fn current_application(&self, token: &BotToken) -> Result<ApplicationInfo, PlatformError>;

    async fn patch_current_application(&self, token: &BotToken, patch: &ApplicationPatch) -> Result<ApplicationInfo, PlatformError>;

    async fn current_user(&self, token: &BotToken) -> Result<BotUser, PlatformError>;

    async fn patch_current_user(&self, token: &BotToken, patch: &BotUserPatch) -> Result<BotUser, PlatformError>;

    async fn current_user_guilds(&self, token: &BotToken) -> Result<Vec<PartialGuild>, PlatformError>;

    async fn list_commands(&self, token: &BotToken, application_id: Snowflake) -> Result<Vec<CommandSpec>, PlatformError>;

    async fn put_commands(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        commands: &[CommandSpec],
    ) -> Result<Vec<CommandSpec>, PlatformError>;

    async fn create_command(&self, token: &BotToken, application_id: Snowflake, command: &CommandSpec) -> Result<CommandSpec, PlatformError>;

    async fn edit_command(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        command_id: Snowflake,
        command: &CommandSpec,
    ) -> Result<CommandSpec, PlatformError>;

    async fn delete_command(&self, token: &BotToken, application_id: Snowflake, command_id: Snowflake) -> Result<(), PlatformError>;

    /// Fetch bytes from a CDN or attachment URL
    async fn download(&self, url: &str) -> Result<Vec<u8>, PlatformError>;
}

/// Shared platform handle
pub type SharedPlatform = Arc<dyn Platform>;

#[async_trait]
impl Platform for PlatformClient {
    fn cdn_base(&self) -> &str {
        &self.config().cdn_base
    }

    async fn get_channel(&self, token: &BotToken, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError> {
        PlatformClient::get_channel(self, token, channel_id).await
    }

    async fn get_guild(&self, token: &BotToken, guild_id: Snowflake) -> Result<GuildInfo, PlatformError> {
        PlatformClient::get_guild(self, token, guild_id).await
    }

    async fn get_guild_member(
        &self,
        token: &BotToken,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<GuildMemberInfo, PlatformError> {
        PlatformClient::get_guild_member(self, token, guild_id, user_id).await
    }

    async fn channel_webhooks(&self, token: &BotToken, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
        PlatformClient::channel_webhooks(self, token, channel_id).await
    }

    async fn create_webhook(&self, token: &BotToken, channel_id: Snowflake, name: &str) -> Result<Webhook, PlatformError> {
        PlatformClient::create_webhook(self, token, channel_id, name).await
    }

    async fn delete_webhook(&self, token: &BotToken, webhook_id: Snowflake) -> Result<(), PlatformError> {
        PlatformClient::delete_webhook(self, token, webhook_id).await
    }

    async fn get_webhook_with_token(&self, webhook_id: Snowflake, secret: &str) -> Result<Webhook, PlatformError> {
        PlatformClient::get_webhook_with_token(self, webhook_id, secret).await
    }

    async fn execute_webhook(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        thread_id: Option<Snowflake>,
        payload: &ExecutePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        PlatformClient::execute_webhook(self, webhook_id, secret, thread_id, payload, files).await
    }

    async fn delete_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
    ) -> Result<(), PlatformError> {
        PlatformClient::delete_webhook_message(self, webhook_id, secret, message_id, thread_id).await
    }

    async fn edit_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
        payload: &EditPayload,
    ) -> Result<PostedMessage, PlatformError> {
        PlatformClient::edit_webhook_message(self, webhook_id, secret, message_id, thread_id, payload).await
    }

    async fn create_message(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        payload: &CreateMessagePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        PlatformClient::create_message(self, token, channel_id, payload, files).await
    }

    async fn delete_message(&self, token: &BotToken, channel_id: Snowflake, message_id: Snowflake) -> Result<(), PlatformError> {
        PlatformClient::delete_message(self, token, channel_id, message_id).await
    }

    async fn create_app_emoji(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        name: &str,
        image: &[u8],
    ) -> Result<AppEmoji, PlatformError> {
        PlatformClient::create_app_emoji(self, token, application_id, name, image).await
    }

    async fn delete_app_emoji(&self, token: &BotToken, application_id: Snowflake, emoji_id: Snowflake) -> Result<(), PlatformError> {
        PlatformClient::delete_app_emoji(self, token, application_id, emoji_id).await
    }

    async fn current_application(&self, token: &BotToken) -> Result<ApplicationInfo, PlatformError> {
        PlatformClient::current_application(self, token).await
    }

    async fn patch_current_application(&self, token: &BotToken, patch: &ApplicationPatch) -> Result<ApplicationInfo, PlatformError> {
        PlatformClient::patch_current_application(self, token, patch).await
    }

    async fn current_user(&self, token: &BotToken) -> Result<BotUser, PlatformError> {
        PlatformClient::current_user(self, token).await
    }

    async fn patch_current_user(&self, token: &BotToken, patch: &BotUserPatch) -> Result<BotUser, PlatformError> {
        PlatformClient::patch_current_user(self, token, patch).await
    }

    async fn current_user_guilds(&self, token: &BotToken) -> Result<Vec<PartialGuild>, PlatformError> {
        PlatformClient::current_user_guilds(self, token).await
    }

    async fn list_commands(&self, token: &BotToken, application_id: Snowflake) -> Result<Vec<CommandSpec>, PlatformError> {
        PlatformClient::list_commands(self, token, application_id).await
    }

    async fn put_commands(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        commands: &[CommandSpec],
    ) -> Result<Vec<CommandSpec>, PlatformError> {
        PlatformClient::put_commands(self, token, application_id, commands).await
    }

    async fn create_command(&self, token: &BotToken, application_id: Snowflake, command: &CommandSpec) -> Result<CommandSpec, PlatformError> {
        PlatformClient::create_command(self, token, application_id, command).await
    }

    async fn edit_command(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        command_id: Snowflake,
        command: &CommandSpec,
    ) -> Result<CommandSpec, PlatformError> {
        PlatformClient::edit_command(self, token, application_id, command_id, command).await
    }

    async fn delete_command(&self, token: &BotToken, application_id: Snowflake, command_id: Snowflake) -> Result<(), PlatformError> {
        PlatformClient::delete_command(self, token, application_id, command_id).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        PlatformClient::download(self, url).await
    }
}
