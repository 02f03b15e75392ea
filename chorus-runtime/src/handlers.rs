//! Event handlers
//!
//! Each handler owns one event kind. They share the proxy components through
//! [`ProxyServices`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use chorus_core::{
    AuthorizedEvent, BotToken, Envelope, EventKind, InboundEvent, InboundMessage, Outcome,
    ReactionEvent, Snowflake,
};
use chorus_proxy::{
    pending_key, ChannelDirectory, Diagnostics, DispatchOutcome, DispatchRequest, Dispatcher,
    MessageContext, ProxyResolver, RelayRegistry, SharedPersonaStore, SharedProvenanceStore,
    SharedTtlStore,
};

use crate::{Backends, EventHandler, EventRouter, RuntimeConfig};

/// Components the handlers work through
pub struct ProxyServices {
    pub application_id: Snowflake,
    pub personas: SharedPersonaStore,
    pub provenance: SharedProvenanceStore,
    pub markers: SharedTtlStore,
    pub directory: Arc<ChannelDirectory>,
    pub resolver: ProxyResolver,
    pub dispatcher: Dispatcher,
    pub diagnostics: Diagnostics,
}

impl ProxyServices {
    pub fn new(backends: &Backends, token: BotToken, application_id: Snowflake, config: &RuntimeConfig) -> Self {
        let directory = Arc::new(ChannelDirectory::new(
            backends.platform.clone(),
            token.clone(),
            config.channel_cache_ttl(),
        ));
        let registry = Arc::new(RelayRegistry::new(
            backends.platform.clone(),
            directory.clone(),
            token.clone(),
            application_id,
            config.registry_config(),
        ));
        let diagnostics = Diagnostics::new(backends.markers.clone(), config.diagnostic_ttl());
        let dispatcher = Dispatcher::new(
            backends.platform.clone(),
            token,
            application_id,
            directory.clone(),
            registry,
            backends.provenance.clone(),
            backends.markers.clone(),
            diagnostics.clone(),
            config.dispatch_config(),
        );

        Self {
            application_id,
            personas: backends.personas.clone(),
            provenance: backends.provenance.clone(),
            markers: backends.markers.clone(),
            directory,
            resolver: ProxyResolver::new(backends.personas.clone(), backends.sessions.clone()),
            dispatcher,
            diagnostics,
        }
    }

    /// Resolve a message and proxy it when a persona is selected
    pub async fn proxy(&self, message: &InboundMessage) -> anyhow::Result<Option<DispatchOutcome>> {
        if !message.is_proxyable() {
            debug!("Message {} is not proxyable", message.id);
            return Ok(None);
        }
        let Some(author_id) = message.author_id() else {
            return Ok(None);
        };

        let ancestry = self
            .directory
            .ancestry(message.channel_id)
            .await
            .context("loading channel ancestry")?;
        let context = MessageContext {
            author_id,
            ancestry: &ancestry,
            guild_id: message.guild_id,
            content: &message.content,
            has_attachments: !message.attachments.is_empty() || !message.sticker_items.is_empty(),
        };
        let resolved = self
            .resolver
            .resolve(context, Utc::now())
            .await
            .context("resolving persona")?;

        let selection = match &resolved.resolution.outcome {
            Outcome::Proxy(selection) => selection,
            Outcome::Skip(reason) => {
                debug!("Not proxying {}: {}", message.id, reason);
                let mut notes = resolved.resolution.notes.clone();
                notes.push(format!("Not proxied: {reason}"));
                self.diagnostics.record(message.id, &notes).await;
                return Ok(None);
            }
        };

        let account = resolved.account.map(|account| account.config).unwrap_or_default();
        let outcome = self
            .dispatcher
            .dispatch(DispatchRequest {
                message,
                selection,
                account: &account,
            })
            .await
            .with_context(|| format!("dispatching message {}", message.id))?;
        Ok(Some(outcome))
    }
}

pub struct MessageCreateHandler {
    services: Arc<ProxyServices>,
}

impl MessageCreateHandler {
    pub fn new(services: Arc<ProxyServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for MessageCreateHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let InboundEvent::MessageCreate(message) = envelope.event else {
            return Ok(());
        };
        self.services.proxy(&message).await?;
        Ok(())
    }
}

/// Proxies an edit when it is still the newest message in its channel and
/// no proxy of it is in flight
pub struct MessageUpdateHandler {
    services: Arc<ProxyServices>,
}

impl MessageUpdateHandler {
    pub fn new(services: Arc<ProxyServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for MessageUpdateHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let InboundEvent::MessageUpdate(message) = envelope.event else {
            return Ok(());
        };
        if !message.is_proxyable() {
            return Ok(());
        }

        if self.services.markers.get(&pending_key(message.id)).await?.is_some() {
            debug!("Edit of {} ignored: proxy in flight", message.id);
            return Ok(());
        }
        let channel = self.services.directory.fresh_channel(message.channel_id).await?;
        if channel.last_message_id != Some(message.id) {
            debug!("Edit of {} ignored: not the last message", message.id);
            return Ok(());
        }

        self.services.proxy(&message).await?;
        Ok(())
    }
}

/// Deletes a proxied message when its author reacts with the delete emoji
pub struct ReactionHandler {
    services: Arc<ProxyServices>,
}

impl ReactionHandler {
    pub fn new(services: Arc<ProxyServices>) -> Self {
        Self { services }
    }

    async fn delete_request(&self, reaction: &ReactionEvent) -> anyhow::Result<()> {
        let Some(record) = self.services.provenance.provenance(reaction.message_id).await? else {
            return Ok(());
        };
        if record.author_id != reaction.user_id {
            debug!("Ignoring delete of {} by non-author {}", record.proxy_message_id, reaction.user_id);
            return Ok(());
        }

        let bot = match record.bot_id {
            Some(bot_id) => self
                .services
                .personas
                .member_by_bot(bot_id)
                .await?
                .and_then(|member| member.bot),
            None => None,
        };
        self.services.dispatcher.delete_proxied(&record, bot.as_ref()).await?;
        info!("Deleted proxied message {} on request of its author", record.proxy_message_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ReactionHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let InboundEvent::ReactionAdd(reaction) = envelope.event else {
            return Ok(());
        };
        if !reaction.is_delete_request() {
            return Ok(());
        }
        self.delete_request(&reaction).await
    }
}

/// Records guilds a persona bot is installed into
pub struct AuthorizedHandler {
    services: Arc<ProxyServices>,
}

impl AuthorizedHandler {
    pub fn new(services: Arc<ProxyServices>) -> Self {
        Self { services }
    }

    async fn authorized(&self, bot_id: Snowflake, event: &AuthorizedEvent) -> anyhow::Result<()> {
        let Some(guild) = &event.guild else {
            return Ok(());
        };
        let Some(mut member) = self.services.personas.member_by_bot(bot_id).await? else {
            debug!("Install of unknown persona bot {}", bot_id);
            return Ok(());
        };
        let added = member
            .bot
            .as_mut()
            .is_some_and(|bot| bot.guilds.insert(guild.id));
        if added {
            self.services.personas.save_member(&member).await?;
            info!("Persona bot {} of {} added to guild {}", bot_id, member.name, guild.id);
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for AuthorizedHandler {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        let InboundEvent::ApplicationAuthorized(event) = &envelope.event else {
            return Ok(());
        };
        match envelope.application_id {
            Some(bot_id) if bot_id != self.services.application_id => self.authorized(bot_id, event).await,
            _ => Ok(()),
        }
    }
}

/// Routing table with every handler registered
pub fn build_router(services: Arc<ProxyServices>) -> EventRouter {
    EventRouter::builder()
        .on(EventKind::MessageCreate, Arc::new(MessageCreateHandler::new(services.clone())))
        .on(EventKind::MessageUpdate, Arc::new(MessageUpdateHandler::new(services.clone())))
        .on(EventKind::ReactionAdd, Arc::new(ReactionHandler::new(services.clone())))
        .on(EventKind::ApplicationAuthorized, Arc::new(AuthorizedHandler::new(services)))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBed;
    use chorus_core::{ProvenanceRecord, ProxyReason};
    use chorus_proxy::{PersonaStore, ProvenanceStore, TtlStore};
    use serde_json::json;
    use std::time::Duration;

    fn message(id: u64, content: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "id": id.to_string(),
            "channel_id": TestBed::CHANNEL.to_string(),
            "guild_id": TestBed::GUILD.to_string(),
            "author": {"id": TestBed::AUTHOR.to_string(), "username": "author"},
            "content": content,
            "type": 0
        }))
        .unwrap()
    }

    fn envelope(event: InboundEvent) -> Envelope {
        Envelope {
            application_id: None,
            event,
        }
    }

    #[tokio::test]
    async fn test_create_proxies_tagged_message() {
        let bed = TestBed::new();
        let handler = MessageCreateHandler::new(bed.services.clone());
        handler
            .handle(envelope(InboundEvent::MessageCreate(message(500, "s:hello"))))
            .await
            .unwrap();
        assert_eq!(bed.platform.messages()[0].content, "hello");
    }

    #[tokio::test]
    async fn test_create_records_skip_reason() {
        let bed = TestBed::new();
        let handler = MessageCreateHandler::new(bed.services.clone());
        handler
            .handle(envelope(InboundEvent::MessageCreate(message(501, "plain"))))
            .await
            .unwrap();
        assert!(bed.platform.messages().is_empty());
        let notes = bed.services.diagnostics.read(501).await;
        assert!(notes.last().unwrap().starts_with("Not proxied"));
    }

    #[tokio::test]
    async fn test_update_requires_last_message_and_no_pending() {
        let bed = TestBed::new();
        let handler = MessageUpdateHandler::new(bed.services.clone());

        bed.set_last_message(499);
        handler
            .handle(envelope(InboundEvent::MessageUpdate(message(502, "s:edited"))))
            .await
            .unwrap();
        assert!(bed.platform.messages().is_empty());

        bed.set_last_message(502);
        bed.markers
            .set(&pending_key(502), "1", Duration::from_secs(30))
            .await
            .unwrap();
        handler
            .handle(envelope(InboundEvent::MessageUpdate(message(502, "s:edited"))))
            .await
            .unwrap();
        assert!(bed.platform.messages().is_empty());

        bed.markers.delete(&pending_key(502)).await.unwrap();
        handler
            .handle(envelope(InboundEvent::MessageUpdate(message(502, "s:edited"))))
            .await
            .unwrap();
        assert_eq!(bed.platform.messages()[0].content, "edited");
    }

    #[tokio::test]
    async fn test_author_reaction_deletes_proxy() {
        let bed = TestBed::new();
        let created = MessageCreateHandler::new(bed.services.clone());
        created
            .handle(envelope(InboundEvent::MessageCreate(message(503, "s:oops"))))
            .await
            .unwrap();
        let proxied = bed.platform.messages()[0].id;

        let reaction = |user: u64| -> ReactionEvent {
            serde_json::from_value(json!({
                "user_id": user.to_string(),
                "channel_id": TestBed::CHANNEL.to_string(),
                "message_id": proxied.to_string(),
                "guild_id": TestBed::GUILD.to_string(),
                "emoji": {"name": "\u{274C}"}
            }))
            .unwrap()
        };
        let handler = ReactionHandler::new(bed.services.clone());

        handler.handle(envelope(InboundEvent::ReactionAdd(reaction(77)))).await.unwrap();
        assert!(!bed.platform.deleted().contains(&(TestBed::CHANNEL, proxied)));

        handler
            .handle(envelope(InboundEvent::ReactionAdd(reaction(TestBed::AUTHOR))))
            .await
            .unwrap();
        assert!(bed.platform.deleted().contains(&(TestBed::CHANNEL, proxied)));
    }

    #[tokio::test]
    async fn test_authorized_adds_guild() {
        let bed = TestBed::new();
        let member = bed.add_persona_bot(900);
        let handler = AuthorizedHandler::new(bed.services.clone());
        let event: AuthorizedEvent = serde_json::from_value(json!({
            "integration_type": 0,
            "user": {"id": TestBed::AUTHOR.to_string(), "username": "author"},
            "guild": {"id": "555"}
        }))
        .unwrap();

        handler
            .handle(Envelope {
                application_id: Some(900),
                event: InboundEvent::ApplicationAuthorized(event),
            })
            .await
            .unwrap();
        let stored = bed.store.member(member).await.unwrap().unwrap();
        assert!(stored.bot.unwrap().guilds.contains(&555));
    }

    #[tokio::test]
    async fn test_reaction_on_unknown_message_is_ignored() {
        let bed = TestBed::new();
        let record = ProvenanceRecord {
            proxy_message_id: 1,
            original_message_id: None,
            author_id: TestBed::AUTHOR,
            member_id: bed.steve,
            channel_id: TestBed::CHANNEL,
            reason: ProxyReason::Command,
            relay_endpoint_id: None,
            bot_id: None,
            created_at: Utc::now(),
        };
        bed.store.record_provenance(&record).await.unwrap();

        let reaction: ReactionEvent = serde_json::from_value(json!({
            "user_id": TestBed::AUTHOR.to_string(),
            "channel_id": TestBed::CHANNEL.to_string(),
            "message_id": "2",
            "emoji": {"name": "\u{274C}"}
        }))
        .unwrap();
        ReactionHandler::new(bed.services.clone())
            .handle(envelope(InboundEvent::ReactionAdd(reaction)))
            .await
            .unwrap();
        assert!(bed.platform.calls().is_empty());
    }
}
