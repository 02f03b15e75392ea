//! Typed platform calls

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chorus_core::{BotToken, ChannelInfo, GuildInfo, Snowflake};
use serde_json::{json, Value};

use crate::{
    AppEmoji, ApplicationInfo, ApplicationPatch, Body, BotUser, BotUserPatch, CommandSpec,
    CreateMessagePayload, EditPayload, ExecutePayload, FileUpload, GuildMemberInfo, PlatformClient,
    PartialGuild, PlatformError, PostedMessage, Route, Webhook,
};

/// Sniff an image and encode it as a `data:` URI
pub fn image_data_uri(data: &[u8]) -> Result<String, PlatformError> {
    let mime = if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        return Err(PlatformError::UnsupportedImage);
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(data)))
}

fn with_files(payload: Value, files: &[FileUpload]) -> Value {
    let mut payload = payload;
    if !files.is_empty() {
        payload["attachments"] = Value::Array(
            files
                .iter()
                .enumerate()
                .map(|(index, file)| file.descriptor(index))
                .collect(),
        );
    }
    payload
}

fn encode<T: serde::Serialize>(route: &Route, value: &T) -> Result<Value, PlatformError> {
    serde_json::to_value(value).map_err(|source| PlatformError::Decode {
        route: route.to_string(),
        source,
    })
}

impl PlatformClient {
    // Channels and guilds

    pub async fn get_channel(&self, token: &BotToken, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError> {
        self.call(Route::get(format!("/channels/{channel_id}")), Some(token), Body::Empty)
            .await
    }

    /// Guild with its roles
    pub async fn get_guild(&self, token: &BotToken, guild_id: Snowflake) -> Result<GuildInfo, PlatformError> {
        self.call(Route::get(format!("/guilds/{guild_id}")), Some(token), Body::Empty)
            .await
    }

    pub async fn get_guild_member(
        &self,
        token: &BotToken,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<GuildMemberInfo, PlatformError> {
        self.call(
            Route::get(format!("/guilds/{guild_id}/members/{user_id}")),
            Some(token),
            Body::Empty,
        )
        .await
    }

    // Relay endpoints

    pub async fn channel_webhooks(&self, token: &BotToken, channel_id: Snowflake) -> Result<Vec<Webhook>, PlatformError> {
        self.call(Route::get(format!("/channels/{channel_id}/webhooks")), Some(token), Body::Empty)
            .await
    }

    pub async fn create_webhook(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        name: &str,
    ) -> Result<Webhook, PlatformError> {
        let body = json!({ "name": name });
        self.call(
            Route::post(format!("/channels/{channel_id}/webhooks")),
            Some(token),
            Body::Json(&body),
        )
        .await
    }

    pub async fn delete_webhook(&self, token: &BotToken, webhook_id: Snowflake) -> Result<(), PlatformError> {
        self.call_empty(Route::delete(format!("/webhooks/{webhook_id}")), Some(token), Body::Empty)
            .await
    }

    /// Fetch an endpoint by its secret; fails when it was deleted or rotated
    pub async fn get_webhook_with_token(&self, webhook_id: Snowflake, secret: &str) -> Result<Webhook, PlatformError> {
        self.call(Route::get(format!("/webhooks/{webhook_id}/{secret}")), None, Body::Empty)
            .await
    }

    pub async fn execute_webhook(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        thread_id: Option<Snowflake>,
        payload: &ExecutePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        let mut route = Route::post(format!("/webhooks/{webhook_id}/{secret}")).query("wait", true);
        if let Some(thread_id) = thread_id {
            route = route.query("thread_id", thread_id);
        }
        let body = with_files(encode(&route, payload)?, files);
        let body = if files.is_empty() {
            Body::Json(&body)
        } else {
            Body::Multipart { payload: &body, files }
        };
        self.call(route, None, body).await
    }

    pub async fn delete_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
    ) -> Result<(), PlatformError> {
        let mut route = Route::delete(format!("/webhooks/{webhook_id}/{secret}/messages/{message_id}"));
        if let Some(thread_id) = thread_id {
            route = route.query("thread_id", thread_id);
        }
        self.call_empty(route, None, Body::Empty).await
    }

    pub async fn edit_webhook_message(
        &self,
        webhook_id: Snowflake,
        secret: &str,
        message_id: Snowflake,
        thread_id: Option<Snowflake>,
        payload: &EditPayload,
    ) -> Result<PostedMessage, PlatformError> {
        let mut route = Route::patch(format!("/webhooks/{webhook_id}/{secret}/messages/{message_id}"));
        if let Some(thread_id) = thread_id {
            route = route.query("thread_id", thread_id);
        }
        let body = encode(&route, payload)?;
        self.call(route, None, Body::Json(&body)).await
    }

    // Messages

    pub async fn create_message(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        payload: &CreateMessagePayload,
        files: &[FileUpload],
    ) -> Result<PostedMessage, PlatformError> {
        let route = Route::post(format!("/channels/{channel_id}/messages"));
        let body = with_files(encode(&route, payload)?, files);
        let body = if files.is_empty() {
            Body::Json(&body)
        } else {
            Body::Multipart { payload: &body, files }
        };
        self.call(route, Some(token), body).await
    }

    pub async fn delete_message(
        &self,
        token: &BotToken,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(), PlatformError> {
        self.call_empty(
            Route::delete(format!("/channels/{channel_id}/messages/{message_id}")),
            Some(token),
            Body::Empty,
        )
        .await
    }

    // Application emoji

    pub async fn create_app_emoji(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        name: &str,
        image: &[u8],
    ) -> Result<AppEmoji, PlatformError> {
        let body = json!({ "name": name, "image": image_data_uri(image)? });
        self.call(
            Route::post(format!("/applications/{application_id}/emojis")),
            Some(token),
            Body::Json(&body),
        )
        .await
    }

    pub async fn delete_app_emoji(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        emoji_id: Snowflake,
    ) -> Result<(), PlatformError> {
        self.call_empty(
            Route::delete(format!("/applications/{application_id}/emojis/{emoji_id}")),
            Some(token),
            Body::Empty,
        )
        .await
    }

    // Applications and bot users

    pub async fn current_application(&self, token: &BotToken) -> Result<ApplicationInfo, PlatformError> {
        self.call(Route::get("/applications/@me"), Some(token), Body::Empty)
            .await
    }

    pub async fn patch_current_application(
        &self,
        token: &BotToken,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationInfo, PlatformError> {
        let route = Route::patch("/applications/@me");
        let body = encode(&route, patch)?;
        self.call(route, Some(token), Body::Json(&body)).await
    }

    pub async fn current_user(&self, token: &BotToken) -> Result<BotUser, PlatformError> {
        self.call(Route::get("/users/@me"), Some(token), Body::Empty).await
    }

    pub async fn patch_current_user(&self, token: &BotToken, patch: &BotUserPatch) -> Result<BotUser, PlatformError> {
        let route = Route::patch("/users/@me");
        let body = encode(&route, patch)?;
        self.call(route, Some(token), Body::Json(&body)).await
    }

    pub async fn current_user_guilds(&self, token: &BotToken) -> Result<Vec<PartialGuild>, PlatformError> {
        self.call(Route::get("/users/@me/guilds"), Some(token), Body::Empty)
            .await
    }

    // Commands

    pub async fn list_commands(&self, token: &BotToken, application_id: Snowflake) -> Result<Vec<CommandSpec>, PlatformError> {
        self.call(
            Route::get(format!("/applications/{application_id}/commands")),
            Some(token),
            Body::Empty,
        )
        .await
    }

    /// Replace the whole command set
    pub async fn put_commands(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        commands: &[CommandSpec],
    ) -> Result<Vec<CommandSpec>, PlatformError> {
        let route = Route::put(format!("/applications/{application_id}/commands"));
        let body = encode(&route, &commands)?;
        self.call(route, Some(token), Body::Json(&body)).await
    }

    pub async fn create_command(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        command: &CommandSpec,
    ) -> Result<CommandSpec, PlatformError> {
        let route = Route::post(format!("/applications/{application_id}/commands"));
        let body = encode(&route, command)?;
        self.call(route, Some(token), Body::Json(&body)).await
    }

    pub async fn edit_command(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        command_id: Snowflake,
        command: &CommandSpec,
    ) -> Result<CommandSpec, PlatformError> {
        let route = Route::patch(format!("/applications/{application_id}/commands/{command_id}"));
        let body = encode(&route, command)?;
        self.call(route, Some(token), Body::Json(&body)).await
    }

    pub async fn delete_command(
        &self,
        token: &BotToken,
        application_id: Snowflake,
        command_id: Snowflake,
    ) -> Result<(), PlatformError> {
        self.call_empty(
            Route::delete(format!("/applications/{application_id}/commands/{command_id}")),
            Some(token),
            Body::Empty,
        )
        .await
    }
}
