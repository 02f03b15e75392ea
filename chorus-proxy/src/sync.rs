//! Persona bot sync engine
//!
//! Reconciles the live configuration of a persona-owned bot with what the
//! member record says it should be. Every field group is compared against a
//! fresh snapshot and patched only on mismatch, so re-running a sync is
//! idempotent. A failure part-way leaves earlier fields patched.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use chorus_core::{display_name, AccountConfig, BotToken, Member, MemberId, PersonaBot, Snowflake, SyncedImage};
use chorus_http::{api::image_data_uri, ApplicationInfo, ApplicationPatch, BotUser, BotUserPatch, PlatformError};

use crate::{
    desired_commands, diff_commands, should_bulk_replace, CommandChange, SharedPersonaStore,
    SharedPlatform, StoreError,
};

/// Bot usernames are shorter than proxied display names
const BOT_USERNAME_LIMIT: usize = 32;
const BIO_LIMIT: usize = 400;
const EVENT_WEBHOOKS_DISABLED: u8 = 1;
const EVENT_WEBHOOKS_ENABLED: u8 = 2;
const EVENT_TYPES: [&str; 1] = ["APPLICATION_AUTHORIZED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncField {
    Username,
    Avatar,
    Banner,
    Bio,
    Commands,
    Endpoints,
    IntegrationConfig,
    Guilds,
}

impl SyncField {
    pub const ALL: [SyncField; 8] = [
        SyncField::Username,
        SyncField::Avatar,
        SyncField::Banner,
        SyncField::Bio,
        SyncField::Commands,
        SyncField::Endpoints,
        SyncField::IntegrationConfig,
        SyncField::Guilds,
    ];
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Where persona bots deliver interactions
    pub interactions_url: Option<String>,
    /// Where persona bots deliver application events
    pub event_webhooks_url: Option<String>,
    /// Appended to the bio when the account allows attribution
    pub attribution_footer: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interactions_url: None,
            event_webhooks_url: None,
            attribution_footer: "Proxied with Chorus".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub patched: Vec<SyncField>,
    pub unchanged: Vec<SyncField>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("The bot token is not valid")]
    InvalidCredential,

    #[error("Member {0} has no persona bot")]
    NoBot(MemberId),

    #[error("Unknown member {0}")]
    UnknownMember(MemberId),

    #[error("Sync failed at {failed:?} after applying {applied:?}: {source}")]
    Partial {
        applied: Vec<SyncField>,
        failed: SyncField,
        #[source]
        source: PlatformError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Remote state of one bot
struct Snapshot {
    app: ApplicationInfo,
    user: BotUser,
}

/// Account-level settings that shape the desired state
struct Preferences {
    group_tag: Option<String>,
    config: AccountConfig,
}

#[derive(Clone, Copy)]
enum ImageSlot {
    Avatar,
    Banner,
}

impl ImageSlot {
    fn remote(self, user: &BotUser) -> Option<&str> {
        match self {
            ImageSlot::Avatar => user.avatar.as_deref(),
            ImageSlot::Banner => user.banner.as_deref(),
        }
    }

    fn synced(self, bot: &mut PersonaBot) -> &mut Option<SyncedImage> {
        match self {
            ImageSlot::Avatar => &mut bot.synced_avatar,
            ImageSlot::Banner => &mut bot.synced_banner,
        }
    }

    fn patch(self, data: Option<String>) -> BotUserPatch {
        match self {
            ImageSlot::Avatar => BotUserPatch {
                avatar: Some(data),
                ..Default::default()
            },
            ImageSlot::Banner => BotUserPatch {
                banner: Some(data),
                ..Default::default()
            },
        }
    }
}

pub struct PersonaBotSync {
    platform: SharedPlatform,
    store: SharedPersonaStore,
    config: SyncConfig,
}

impl PersonaBotSync {
    pub fn new(platform: SharedPlatform, store: SharedPersonaStore, config: SyncConfig) -> Self {
        Self { platform, store, config }
    }

    /// Bring `fields` of the member's bot in line with the member record
    pub async fn sync(&self, member_id: MemberId, fields: &[SyncField]) -> Result<SyncReport, SyncError> {
        let mut member = self
            .store
            .member(member_id)
            .await?
            .ok_or(SyncError::UnknownMember(member_id))?;
        let mut bot = member.bot.clone().ok_or(SyncError::NoBot(member_id))?;

        let mut snapshot = self.snapshot(&bot.token).await?;
        let preferences = self.preferences(&member).await?;

        let mut report = SyncReport::default();
        for &field in fields {
            let result = self
                .sync_field(field, &member, &mut bot, &mut snapshot, &preferences)
                .await;
            match result {
                Ok(true) => {
                    debug!("Patched {:?} of persona bot {}", field, bot.bot_id);
                    report.patched.push(field);
                }
                Ok(false) => report.unchanged.push(field),
                Err(source) => {
                    warn!("Sync of persona bot {} failed at {:?}: {}", bot.bot_id, field, source);
                    let bot_id = bot.bot_id;
                    member.bot = Some(bot);
                    // the caller needs the partial report more than the store error
                    if let Err(e) = self.store.save_member(&member).await {
                        error!("Could not record partial sync of persona bot {}: {}", bot_id, e);
                    }
                    return Err(SyncError::Partial {
                        applied: report.patched,
                        failed: field,
                        source,
                    });
                }
            }
        }

        member.bot = Some(bot);
        self.store.save_member(&member).await?;
        info!(
            "Synced persona bot of {}: {} patched, {} unchanged",
            member.name,
            report.patched.len(),
            report.unchanged.len()
        );
        Ok(report)
    }

    /// Bind a new token to the member and sync everything under it.
    ///
    /// When the token belongs to a different bot, the old bot's commands and
    /// delivery wiring are torn down first.
    pub async fn rotate_credential(&self, member_id: MemberId, token: BotToken) -> Result<SyncReport, SyncError> {
        let mut member = self
            .store
            .member(member_id)
            .await?
            .ok_or(SyncError::UnknownMember(member_id))?;
        let snapshot = self.snapshot(&token).await?;

        let bot = match member.bot.take() {
            Some(old) if old.bot_id == snapshot.app.id => PersonaBot {
                token,
                public_key: snapshot.app.verify_key.clone(),
                ..old
            },
            Some(old) => {
                info!("Persona bot of {} changes from {} to {}", member.name, old.bot_id, snapshot.app.id);
                self.tear_down(&old).await;
                let mut bot = PersonaBot::new(snapshot.app.id, token, &snapshot.app.verify_key);
                bot.command = old.command;
                bot
            }
            None => PersonaBot::new(snapshot.app.id, token, &snapshot.app.verify_key),
        };

        member.bot = Some(bot);
        self.store.save_member(&member).await?;
        self.sync(member_id, &SyncField::ALL).await
    }

    /// Best effort; the old token may already be revoked
    async fn tear_down(&self, old: &PersonaBot) {
        if let Err(e) = self.platform.put_commands(&old.token, old.bot_id, &[]).await {
            warn!("Could not clear commands of old persona bot {}: {}", old.bot_id, e);
        }
        let patch = ApplicationPatch {
            interactions_endpoint_url: Some(None),
            event_webhooks_url: Some(None),
            event_webhooks_status: Some(EVENT_WEBHOOKS_DISABLED),
            ..Default::default()
        };
        if let Err(e) = self.platform.patch_current_application(&old.token, &patch).await {
            warn!("Could not unwire old persona bot {}: {}", old.bot_id, e);
        }
    }

    async fn snapshot(&self, token: &BotToken) -> Result<Snapshot, SyncError> {
        let app = self
            .platform
            .current_application(token)
            .await
            .map_err(credential_error)?;
        let user = self.platform.current_user(token).await.map_err(credential_error)?;
        Ok(Snapshot { app, user })
    }

    async fn preferences(&self, member: &Member) -> Result<Preferences, StoreError> {
        let group = self.store.group_of(member.id).await?;
        let owner = group.as_ref().and_then(|group| group.accounts.iter().next().copied());
        let account = match owner {
            Some(id) => self.store.account(id).await?,
            None => None,
        };
        let config = account.map(|account| account.config).unwrap_or_default();
        let group_tag = group
            .and_then(|group| group.tag)
            .filter(|_| config.include_group_tag);
        Ok(Preferences { group_tag, config })
    }

    async fn sync_field(
        &self,
        field: SyncField,
        member: &Member,
        bot: &mut PersonaBot,
        snapshot: &mut Snapshot,
        preferences: &Preferences,
    ) -> Result<bool, PlatformError> {
        match field {
            SyncField::Username => {
                let desired: String = display_name(&member.name, preferences.group_tag.as_deref())
                    .chars()
                    .take(BOT_USERNAME_LIMIT)
                    .collect();
                if snapshot.user.username == desired {
                    return Ok(false);
                }
                let patch = BotUserPatch {
                    username: Some(desired),
                    ..Default::default()
                };
                snapshot.user = self.platform.patch_current_user(&bot.token, &patch).await?;
                Ok(true)
            }
            SyncField::Avatar => {
                self.sync_image(ImageSlot::Avatar, member.avatar_url.as_deref(), bot, snapshot)
                    .await
            }
            SyncField::Banner => {
                self.sync_image(ImageSlot::Banner, member.banner_url.as_deref(), bot, snapshot)
                    .await
            }
            SyncField::Bio => {
                let desired = self.desired_bio(member, &preferences.config);
                if snapshot.app.description == desired {
                    return Ok(false);
                }
                let patch = ApplicationPatch {
                    description: Some(desired),
                    ..Default::default()
                };
                self.patch_application(&bot.token, patch, snapshot).await
            }
            SyncField::Commands => self.sync_commands(bot).await,
            SyncField::Endpoints => {
                let patch = self.endpoint_patch(&snapshot.app, &preferences.config);
                self.patch_application(&bot.token, patch, snapshot).await
            }
            SyncField::IntegrationConfig => {
                let desired = integration_types_config();
                if snapshot.app.integration_types_config.as_ref() == Some(&desired) {
                    return Ok(false);
                }
                let patch = ApplicationPatch {
                    integration_types_config: Some(desired),
                    ..Default::default()
                };
                self.patch_application(&bot.token, patch, snapshot).await
            }
            SyncField::Guilds => {
                let live: BTreeSet<Snowflake> = self
                    .platform
                    .current_user_guilds(&bot.token)
                    .await?
                    .into_iter()
                    .map(|guild| guild.id)
                    .collect();
                if live == bot.guilds {
                    return Ok(false);
                }
                bot.guilds = live;
                Ok(true)
            }
        }
    }

    async fn patch_application(
        &self,
        token: &BotToken,
        patch: ApplicationPatch,
        snapshot: &mut Snapshot,
    ) -> Result<bool, PlatformError> {
        if patch.is_empty() {
            return Ok(false);
        }
        snapshot.app = self.platform.patch_current_application(token, &patch).await?;
        Ok(true)
    }

    /// Images are matched by the source they were made from and the hash the
    /// platform assigned, since the platform re-encodes uploads
    async fn sync_image(
        &self,
        slot: ImageSlot,
        desired: Option<&str>,
        bot: &mut PersonaBot,
        snapshot: &mut Snapshot,
    ) -> Result<bool, PlatformError> {
        let remote = slot.remote(&snapshot.user);
        let current = match (desired, remote) {
            (None, None) => true,
            (Some(source), Some(hash)) => slot.synced(bot).as_ref().is_some_and(|synced| {
                synced.source.as_deref() == Some(source) && synced.hash.as_deref() == Some(hash)
            }),
            _ => false,
        };
        if current {
            return Ok(false);
        }

        let data = match desired {
            Some(url) => Some(image_data_uri(&self.platform.download(url).await?)?),
            None => None,
        };
        let user = self
            .platform
            .patch_current_user(&bot.token, &slot.patch(data))
            .await?;
        *slot.synced(bot) = Some(SyncedImage {
            source: desired.map(str::to_string),
            hash: slot.remote(&user).map(str::to_string),
        });
        snapshot.user = user;
        Ok(true)
    }

    async fn sync_commands(&self, bot: &PersonaBot) -> Result<bool, PlatformError> {
        let live = self.platform.list_commands(&bot.token, bot.bot_id).await?;
        let desired = desired_commands(bot);
        let changes = diff_commands(&live, &desired);
        if changes.is_empty() {
            return Ok(false);
        }

        if should_bulk_replace(&live, &changes) {
            debug!("Replacing {} commands of persona bot {}", live.len(), bot.bot_id);
            self.platform.put_commands(&bot.token, bot.bot_id, &desired).await?;
            return Ok(true);
        }

        for change in changes {
            match change {
                CommandChange::Create(command) => {
                    self.platform.create_command(&bot.token, bot.bot_id, &command).await?;
                }
                CommandChange::Edit(id, command) => {
                    self.platform.edit_command(&bot.token, bot.bot_id, id, &command).await?;
                }
                CommandChange::Delete(id) => match self.platform.delete_command(&bot.token, bot.bot_id, id).await {
                    Err(e) if !e.is_not_found() => return Err(e),
                    _ => {}
                },
            }
        }
        Ok(true)
    }

    fn desired_bio(&self, member: &Member, config: &AccountConfig) -> String {
        let bio = member.bio.trim();
        let full = match (config.attribution, bio.is_empty()) {
            (false, _) => bio.to_string(),
            (true, true) => self.config.attribution_footer.clone(),
            (true, false) => format!("{bio}\n\n{}", self.config.attribution_footer),
        };
        full.chars().take(BIO_LIMIT).collect()
    }

    fn endpoint_patch(&self, app: &ApplicationInfo, config: &AccountConfig) -> ApplicationPatch {
        let mut patch = ApplicationPatch::default();

        // self-hosting users point their bots at their own deployment
        if !config.self_hosted {
            if let Some(url) = &self.config.interactions_url {
                if app.interactions_endpoint_url.as_ref() != Some(url) {
                    patch.interactions_endpoint_url = Some(Some(url.clone()));
                }
            }
        }

        if let Some(url) = &self.config.event_webhooks_url {
            if app.event_webhooks_url.as_ref() != Some(url) {
                patch.event_webhooks_url = Some(Some(url.clone()));
            }
            if app.event_webhooks_status != Some(EVENT_WEBHOOKS_ENABLED) {
                patch.event_webhooks_status = Some(EVENT_WEBHOOKS_ENABLED);
            }
            let types: Vec<String> = EVENT_TYPES.iter().map(|t| t.to_string()).collect();
            if app.event_webhooks_types.as_ref() != Some(&types) {
                patch.event_webhooks_types = Some(types);
            }
        }
        patch
    }
}

/// Guild and user installs, each with its own install scopes
fn integration_types_config() -> Value {
    json!({
        "0": {"oauth2_install_params": {"scopes": ["applications.commands", "bot"], "permissions": "0"}},
        "1": {"oauth2_install_params": {"scopes": ["applications.commands"], "permissions": "0"}}
    })
}

fn credential_error(e: PlatformError) -> SyncError {
    if e.is_unauthorized() {
        SyncError::InvalidCredential
    } else {
        SyncError::Platform(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFailure, FakePlatform};
    use crate::{MemoryStore, PersonaStore};
    use chorus_core::{Account, Group, ProxyTag};
    use std::sync::Arc;

    const PATCHES: [&str; 6] = [
        "patch_current_user",
        "patch_current_application",
        "put_commands",
        "create_command",
        "edit_command",
        "delete_command",
    ];

    fn app(id: Snowflake) -> ApplicationInfo {
        ApplicationInfo {
            id,
            name: format!("app {id}"),
            description: String::new(),
            icon: None,
            verify_key: format!("{id:064x}"),
            bot: None,
            interactions_endpoint_url: None,
            event_webhooks_url: None,
            event_webhooks_status: None,
            event_webhooks_types: None,
            integration_types_config: None,
            install_params: None,
        }
    }

    fn bot_user(id: Snowflake) -> BotUser {
        BotUser {
            id,
            username: "placeholder".into(),
            avatar: None,
            banner: None,
            bot: true,
        }
    }

    struct Fixture {
        platform: Arc<FakePlatform>,
        store: Arc<MemoryStore>,
        engine: PersonaBotSync,
        member: MemberId,
        token: BotToken,
    }

    fn fixture(config: AccountConfig) -> Fixture {
        let platform = Arc::new(FakePlatform::new());
        let token = BotToken::new("persona-900");
        platform.add_app(&token, app(900), bot_user(900));
        platform.set_app_guilds(&token, vec![1, 2]);

        let store = Arc::new(MemoryStore::new());
        let mut account = Account::new(42);
        account.config = config;
        let mut member = Member::new("Steve")
            .with_tag(ProxyTag::prefix("s:"))
            .with_avatar("https://img.test/steve.png")
            .with_bot(PersonaBot::new(900, token.clone(), &format!("{:064x}", 900)));
        member.bio = "Likes trains".into();
        let group = Group::new("Crew", account.id).with_member(member.id).with_tag("[crew]");
        let id = member.id;
        store.put_account(account);
        store.put_member(member);
        store.put_group(group);

        let engine = PersonaBotSync::new(
            platform.clone(),
            store.clone(),
            SyncConfig {
                interactions_url: Some("https://chorus.test/interactions".into()),
                event_webhooks_url: Some("https://chorus.test/events".into()),
                ..Default::default()
            },
        );
        Fixture { platform, store, engine, member: id, token }
    }

    fn patch_calls(platform: &FakePlatform) -> usize {
        PATCHES.iter().map(|op| platform.count(op)).sum()
    }

    #[tokio::test]
    async fn test_second_sync_is_a_no_op() {
        let f = fixture(AccountConfig::default());
        let report = f.engine.sync(f.member, &SyncField::ALL).await.unwrap();
        assert_eq!(report.patched, SyncField::ALL.to_vec());

        let live = f.platform.app(&f.token).unwrap();
        assert_eq!(live.user.username, "Steve [crew]");
        assert!(live.user.avatar.is_some());
        assert_eq!(live.app.description, "Likes trains\n\nProxied with Chorus");
        assert_eq!(live.app.interactions_endpoint_url.as_deref(), Some("https://chorus.test/interactions"));
        assert_eq!(live.app.event_webhooks_status, Some(EVENT_WEBHOOKS_ENABLED));
        assert_eq!(live.commands.len(), 2);

        let stored = f.store.member(f.member).await.unwrap().unwrap();
        let bot = stored.bot.unwrap();
        assert_eq!(bot.guilds, BTreeSet::from([1, 2]));
        assert_eq!(bot.synced_avatar.unwrap().hash, live.user.avatar);

        f.platform.clear_calls();
        let report = f.engine.sync(f.member, &SyncField::ALL).await.unwrap();
        assert!(report.patched.is_empty());
        assert_eq!(patch_calls(&f.platform), 0);
    }

    #[tokio::test]
    async fn test_changed_avatar_is_reuploaded() {
        let f = fixture(AccountConfig::default());
        f.engine.sync(f.member, &[SyncField::Avatar]).await.unwrap();

        let mut member = f.store.member(f.member).await.unwrap().unwrap();
        member.avatar_url = Some("https://img.test/steve-2.png".into());
        f.store.put_member(member);

        f.platform.clear_calls();
        let report = f.engine.sync(f.member, &[SyncField::Avatar]).await.unwrap();
        assert_eq!(report.patched, vec![SyncField::Avatar]);
        assert_eq!(f.platform.count("download"), 1);
    }

    #[tokio::test]
    async fn test_invalid_credential_aborts() {
        let f = fixture(AccountConfig::default());
        let mut member = f.store.member(f.member).await.unwrap().unwrap();
        if let Some(bot) = member.bot.as_mut() {
            bot.token = BotToken::new("revoked");
        }
        f.store.put_member(member);

        let err = f.engine.sync(f.member, &SyncField::ALL).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidCredential));
        assert_eq!(patch_calls(&f.platform), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_applied_fields() {
        let f = fixture(AccountConfig::default());
        f.platform.fail_next("put_commands", FakeFailure::Server);

        let err = f.engine.sync(f.member, &SyncField::ALL).await.unwrap_err();
        let SyncError::Partial { applied, failed, .. } = err else {
            panic!("expected a partial failure, got {err}");
        };
        assert_eq!(failed, SyncField::Commands);
        assert_eq!(
            applied,
            vec![SyncField::Username, SyncField::Avatar, SyncField::Bio]
        );

        let report = f.engine.sync(f.member, &SyncField::ALL).await.unwrap();
        assert!(report.patched.contains(&SyncField::Commands));
        assert!(!report.patched.contains(&SyncField::Avatar));
    }

    /// Reads from the inner store, refuses every write
    struct ReadOnly(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl PersonaStore for ReadOnly {
        async fn account_for_user(&self, user_id: Snowflake) -> Result<Option<Account>, StoreError> {
            self.0.account_for_user(user_id).await
        }

        async fn account(&self, id: chorus_core::AccountId) -> Result<Option<Account>, StoreError> {
            self.0.account(id).await
        }

        async fn groups_for_user(&self, user_id: Snowflake) -> Result<Vec<Group>, StoreError> {
            self.0.groups_for_user(user_id).await
        }

        async fn members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError> {
            self.0.members(ids).await
        }

        async fn member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
            self.0.member(id).await
        }

        async fn member_by_bot(&self, bot_id: Snowflake) -> Result<Option<Member>, StoreError> {
            self.0.member_by_bot(bot_id).await
        }

        async fn group_of(&self, member: MemberId) -> Result<Option<Group>, StoreError> {
            self.0.group_of(member).await
        }

        async fn save_member(&self, _member: &Member) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read only".into()))
        }
    }

    #[tokio::test]
    async fn test_partial_failure_survives_store_outage() {
        let f = fixture(AccountConfig::default());
        let engine = PersonaBotSync::new(
            f.platform.clone(),
            Arc::new(ReadOnly(f.store.clone())),
            SyncConfig::default(),
        );
        f.platform.fail_next("put_commands", FakeFailure::Server);

        let err = engine.sync(f.member, &SyncField::ALL).await.unwrap_err();
        let SyncError::Partial { failed, .. } = err else {
            panic!("expected a partial failure, got {err}");
        };
        assert_eq!(failed, SyncField::Commands);
    }

    #[tokio::test]
    async fn test_self_hosted_leaves_interactions_url() {
        let f = fixture(AccountConfig {
            self_hosted: true,
            attribution: false,
            ..Default::default()
        });
        f.engine
            .sync(f.member, &[SyncField::Endpoints, SyncField::Bio])
            .await
            .unwrap();
        let live = f.platform.app(&f.token).unwrap();
        assert_eq!(live.app.interactions_endpoint_url, None);
        assert_eq!(live.app.event_webhooks_url.as_deref(), Some("https://chorus.test/events"));
        assert_eq!(live.app.description, "Likes trains");
    }

    #[tokio::test]
    async fn test_rotate_to_new_bot_tears_down_old() {
        let f = fixture(AccountConfig::default());
        f.engine.sync(f.member, &SyncField::ALL).await.unwrap();

        let fresh = BotToken::new("persona-901");
        f.platform.add_app(&fresh, app(901), bot_user(901));
        f.engine.rotate_credential(f.member, fresh.clone()).await.unwrap();

        let old = f.platform.app(&f.token).unwrap();
        assert!(old.commands.is_empty());
        assert_eq!(old.app.interactions_endpoint_url, None);
        assert_eq!(old.app.event_webhooks_status, Some(EVENT_WEBHOOKS_DISABLED));

        let new = f.platform.app(&fresh).unwrap();
        assert_eq!(new.commands.len(), 2);
        assert_eq!(new.user.username, "Steve [crew]");

        let bot = f.store.member(f.member).await.unwrap().unwrap().bot.unwrap();
        assert_eq!(bot.bot_id, 901);
        assert_eq!(bot.public_key, format!("{:064x}", 901));
    }

    #[tokio::test]
    async fn test_rotate_rejects_bad_token() {
        let f = fixture(AccountConfig::default());
        let err = f
            .engine
            .rotate_credential(f.member, BotToken::new("nonsense"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidCredential));
        let bot = f.store.member(f.member).await.unwrap().unwrap().bot.unwrap();
        assert_eq!(bot.bot_id, 900);
    }
}
