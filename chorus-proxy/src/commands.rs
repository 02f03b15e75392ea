//! Commands a persona bot registers, and the diff against what is live

use chorus_core::{PersonaBot, Snowflake};
use chorus_http::{CommandOption, CommandSpec};

/// More differences than this replace the whole set in one call
pub const BULK_REPLACE_THRESHOLD: usize = 4;

/// Guild and user installs
const INTEGRATION_TYPES: [u8; 2] = [0, 1];
/// Guilds, bot DMs and private channels
const CONTEXTS: [u8; 3] = [0, 1, 2];

/// The command set a persona bot should have
pub fn desired_commands(bot: &PersonaBot) -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            id: None,
            name: "Reply".to_string(),
            kind: 3,
            description: String::new(),
            options: Vec::new(),
            integration_types: INTEGRATION_TYPES.to_vec(),
            contexts: CONTEXTS.to_vec(),
        },
        CommandSpec {
            id: None,
            name: bot.command.clone(),
            kind: 1,
            description: "Send a message as this persona".to_string(),
            options: vec![CommandOption {
                kind: 3,
                name: "message".to_string(),
                description: "What to say".to_string(),
                required: true,
            }],
            integration_types: INTEGRATION_TYPES.to_vec(),
            contexts: CONTEXTS.to_vec(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandChange {
    Create(CommandSpec),
    Edit(Snowflake, CommandSpec),
    Delete(Snowflake),
}

/// Changes that turn `live` into `desired`, matching commands by name and type
pub fn diff_commands(live: &[CommandSpec], desired: &[CommandSpec]) -> Vec<CommandChange> {
    let mut changes = Vec::new();

    for want in desired {
        let existing = live
            .iter()
            .find(|have| have.name == want.name && have.kind == want.kind);
        match existing {
            None => changes.push(CommandChange::Create(want.clone())),
            Some(have) if have.same_shape(want) => {}
            Some(have) => match have.id {
                Some(id) => changes.push(CommandChange::Edit(id, want.clone())),
                None => changes.push(CommandChange::Create(want.clone())),
            },
        }
    }

    for have in live {
        let wanted = desired
            .iter()
            .any(|want| want.name == have.name && want.kind == have.kind);
        if !wanted {
            if let Some(id) = have.id {
                changes.push(CommandChange::Delete(id));
            }
        }
    }

    changes
}

/// Whether to replace the whole set instead of applying `changes` one by one
pub fn should_bulk_replace(live: &[CommandSpec], changes: &[CommandChange]) -> bool {
    !changes.is_empty() && (live.is_empty() || changes.len() > BULK_REPLACE_THRESHOLD)
}
