//! Shared fixture: one guild, one channel, one author with a "Steve" persona

use std::sync::Arc;

use chorus_core::{
    Account, BotToken, ChannelInfo, Group, GuildInfo, Member, MemberId, Permissions, PersonaBot,
    ProxyTag, Role, Snowflake,
};
use chorus_proxy::testing::{service_token, FakePlatform, SERVICE_APP_ID};
use chorus_proxy::{MemoryStore, MemoryTtlStore};

use crate::{Backends, ProxyServices, RuntimeConfig};

pub struct TestBed {
    pub platform: Arc<FakePlatform>,
    pub store: Arc<MemoryStore>,
    pub markers: Arc<MemoryTtlStore>,
    pub backends: Backends,
    pub services: Arc<ProxyServices>,
    pub steve: MemberId,
}

impl TestBed {
    pub const GUILD: Snowflake = 1;
    pub const CHANNEL: Snowflake = 10;
    pub const AUTHOR: Snowflake = 42;

    pub fn new() -> Self {
        let platform = Arc::new(FakePlatform::new());
        platform.add_guild(GuildInfo {
            id: Self::GUILD,
            owner_id: 7,
            premium_tier: 0,
            roles: vec![Role {
                id: Self::GUILD,
                permissions: Permissions::all(),
            }],
            emojis: vec![],
        });
        platform.add_channel(Self::channel(None));

        let store = Arc::new(MemoryStore::new());
        let account = Account::new(Self::AUTHOR);
        let steve = Member::new("Steve").with_tag(ProxyTag::prefix("s:"));
        store.put_group(Group::new("Crew", account.id).with_member(steve.id));
        let steve_id = steve.id;
        store.put_member(steve);
        store.put_account(account);

        let markers = Arc::new(MemoryTtlStore::new());
        let backends = Backends {
            platform: platform.clone(),
            personas: store.clone(),
            sessions: store.clone(),
            provenance: store.clone(),
            markers: markers.clone(),
        };
        let services = Arc::new(ProxyServices::new(
            &backends,
            service_token(),
            SERVICE_APP_ID,
            &RuntimeConfig::default(),
        ));

        Self {
            platform,
            store,
            markers,
            backends,
            services,
            steve: steve_id,
        }
    }

    fn channel(last_message_id: Option<Snowflake>) -> ChannelInfo {
        ChannelInfo {
            id: Self::CHANNEL,
            kind: 0,
            guild_id: Some(Self::GUILD),
            parent_id: None,
            name: Some("general".into()),
            permission_overwrites: vec![],
            last_message_id,
        }
    }

    pub fn set_last_message(&self, message_id: Snowflake) {
        self.platform.add_channel(Self::channel(Some(message_id)));
    }

    /// Add a member backed by a persona bot; returns its id
    pub fn add_persona_bot(&self, bot_id: Snowflake) -> MemberId {
        let bot = PersonaBot::new(bot_id, BotToken::new(format!("persona-{bot_id}")), "");
        let member = Member::new("Botty").with_bot(bot);
        let id = member.id;
        self.store.put_member(member);
        id
    }
}
