//! Foreign emoji rehosting
//!
//! A posting identity can only render custom emoji from guilds it can see.
//! Emoji it cannot render are copied into transient application emoji,
//! substituted into the content and deleted once the message is posted.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use chorus_core::{custom_emojis, substitute, BotToken, EmojiToken, Snowflake};
use chorus_http::PlatformError;

use crate::SharedPlatform;

/// Content with foreign emoji swapped for transient copies
#[derive(Debug, Clone)]
pub struct Rehosted {
    pub content: String,
    /// Transient copies to delete after posting
    pub copies: Vec<Snowflake>,
    token: Option<BotToken>,
    application_id: Snowflake,
}

impl Rehosted {
    /// Content that needed no rehosting
    pub fn unchanged(content: &str) -> Self {
        Self {
            content: content.to_string(),
            copies: Vec::new(),
            token: None,
            application_id: 0,
        }
    }
}

pub struct EmojiRehoster {
    platform: SharedPlatform,
    counter: AtomicU32,
}

impl EmojiRehoster {
    pub fn new(platform: SharedPlatform) -> Self {
        Self {
            platform,
            counter: AtomicU32::new(0),
        }
    }

    /// Copy every emoji in `content` for which `foreign` holds.
    ///
    /// A single emoji that fails to copy stays as it was. An unauthorized
    /// response aborts: the identity cannot post either.
    pub async fn rehost(
        &self,
        content: &str,
        token: &BotToken,
        application_id: Snowflake,
        foreign: impl Fn(&EmojiToken) -> bool,
    ) -> Result<Rehosted, PlatformError> {
        let wanted: Vec<EmojiToken> = custom_emojis(content)
            .into_iter()
            .filter(|emoji| foreign(emoji))
            .collect();
        if wanted.is_empty() {
            return Ok(Rehosted::unchanged(content));
        }

        let mut replacements = HashMap::new();
        let mut copies = Vec::new();
        for emoji in wanted {
            match self.copy(&emoji, token, application_id).await {
                Ok(copy) => {
                    copies.push(copy.id);
                    replacements.insert(emoji.id, copy);
                }
                Err(e) if e.is_unauthorized() => {
                    let rehosted = Rehosted {
                        content: content.to_string(),
                        copies,
                        token: Some(token.clone()),
                        application_id,
                    };
                    self.cleanup(&rehosted).await;
                    return Err(e);
                }
                Err(e) => warn!("Could not rehost emoji {}: {}", emoji, e),
            }
        }

        Ok(Rehosted {
            content: substitute(content, &replacements),
            copies,
            token: Some(token.clone()),
            application_id,
        })
    }

    async fn copy(&self, emoji: &EmojiToken, token: &BotToken, application_id: Snowflake) -> Result<EmojiToken, PlatformError> {
        let image = self
            .platform
            .download(&emoji.cdn_url(self.platform.cdn_base()))
            .await?;
        let suffix = self.counter.fetch_add(1, Ordering::Relaxed) % 1000;
        let created = self
            .platform
            .create_app_emoji(token, application_id, &emoji.rehost_name(suffix), &image)
            .await?;
        debug!("Rehosted emoji {} as {}", emoji, created.id);
        Ok(EmojiToken {
            id: created.id,
            name: created.name,
            animated: emoji.animated,
        })
    }

    /// Delete the transient copies; failures are only logged
    pub async fn cleanup(&self, rehosted: &Rehosted) {
        let Some(token) = &rehosted.token else {
            return;
        };
        let deletions = rehosted.copies.iter().map(|id| async move {
            if let Err(e) = self
                .platform
                .delete_app_emoji(token, rehosted.application_id, *id)
                .await
            {
                warn!("Failed to delete rehosted emoji {}: {}", id, e);
            }
        });
        join_all(deletions).await;
    }
}
