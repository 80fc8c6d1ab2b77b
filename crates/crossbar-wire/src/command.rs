//! Command table: maps a command name to a local handler or to the channel
//! through which the owning process is reachable.

use crossbar_types::error::{CrossbarError, CrossbarResult};
use crossbar_types::is_private;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a command handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// A type-erased async command handler.
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

/// An entry of the command table.
#[derive(Clone)]
pub enum CommandEntry {
    /// Owned by this process.
    Local { handler: Handler, private: bool },
    /// Owned by the process reachable through `channel`.
    Remote { channel: String },
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandEntry::Local { private, .. } => f
                .debug_struct("Local")
                .field("private", private)
                .finish_non_exhaustive(),
            CommandEntry::Remote { channel } => {
                f.debug_struct("Remote").field("channel", channel).finish()
            }
        }
    }
}

/// Where a command lives, as reported by `Registry::list_commands`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandLocation {
    Local { private: bool },
    Remote { channel: String },
}

/// Snapshot of one command table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    #[serde(flatten)]
    pub location: CommandLocation,
}

/// Outcome of an inbound `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteRegistration {
    /// New remote entry created.
    Added,
    /// The same channel registered the name again.
    SameChannel,
    /// Owned locally or by another channel.
    Conflict,
}

pub(crate) struct CommandTable {
    entries: DashMap<String, CommandEntry>,
}

impl CommandTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<CommandEntry> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Add a local entry. Fails if the name is present in any form.
    pub(crate) fn insert_local(&self, name: &str, handler: Handler) -> CrossbarResult<()> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(CrossbarError::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(CommandEntry::Local {
                    handler,
                    private: is_private(name),
                });
                Ok(())
            }
        }
    }

    /// Remove a local entry (used to roll back a rejected registration).
    pub(crate) fn remove_local(&self, name: &str) -> bool {
        self.entries
            .remove_if(name, |_, e| matches!(e, CommandEntry::Local { .. }))
            .is_some()
    }

    pub(crate) fn register_remote(&self, name: &str, channel: &str) -> RemoteRegistration {
        match self.entries.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(CommandEntry::Remote {
                    channel: channel.to_string(),
                });
                RemoteRegistration::Added
            }
            Entry::Occupied(slot) => match slot.get() {
                CommandEntry::Remote { channel: owner } if owner == channel => {
                    RemoteRegistration::SameChannel
                }
                _ => RemoteRegistration::Conflict,
            },
        }
    }

    /// Bind `name` to `channel`, replacing any remote entry. Local entries are
    /// never overwritten; returns `false` in that case.
    pub(crate) fn upsert_remote(&self, name: &str, channel: &str) -> bool {
        let remote = CommandEntry::Remote {
            channel: channel.to_string(),
        };
        match self.entries.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(remote);
                true
            }
            Entry::Occupied(mut slot) => {
                if matches!(slot.get(), CommandEntry::Local { .. }) {
                    return false;
                }
                slot.insert(remote);
                true
            }
        }
    }

    /// Drop every remote entry bound to `channel`, returning the purged names.
    pub(crate) fn purge_channel(&self, channel: &str) -> Vec<String> {
        let mut purged = Vec::new();
        self.entries.retain(|name, entry| match entry {
            CommandEntry::Remote { channel: owner } if owner.as_str() == channel => {
                purged.push(name.clone());
                false
            }
            _ => true,
        });
        purged.sort();
        purged
    }

    /// Sorted names of local public commands.
    pub(crate) fn local_public_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.value(), CommandEntry::Local { private: false, .. }))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn snapshot(&self) -> Vec<CommandInfo> {
        let mut infos: Vec<CommandInfo> = self
            .entries
            .iter()
            .map(|e| CommandInfo {
                name: e.key().clone(),
                location: match e.value() {
                    CommandEntry::Local { private, .. } => CommandLocation::Local {
                        private: *private,
                    },
                    CommandEntry::Remote { channel } => CommandLocation::Remote {
                        channel: channel.clone(),
                    },
                },
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
