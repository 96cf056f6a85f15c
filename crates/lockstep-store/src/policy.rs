//! Same-key conflict resolution within a step.

use std::collections::BTreeMap;

use lockstep_types::StateUpdate;

/// How a store resolves multiple updates to the same key within one step.
///
/// Selected per store at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Keep only the last update per key, in update-arrival order. The
    /// default.
    #[default]
    LastWriteWins,
    /// Keep every update, in arrival order.
    Append,
}

impl ConflictPolicy {
    /// Resolve a step's buffered updates into the batch to commit.
    ///
    /// Last-write-wins output is ordered by key; append output preserves
    /// arrival order.
    pub fn resolve(self, cache: Vec<StateUpdate>) -> Vec<StateUpdate> {
        match self {
            Self::Append => cache,
            Self::LastWriteWins => {
                let mut latest: BTreeMap<String, StateUpdate> = BTreeMap::new();
                for update in cache {
                    latest.insert(update.key.clone(), update);
                }
                latest.into_values().collect()
            }
        }
    }

    /// Parse a policy name from configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "last_write_wins" => Some(Self::LastWriteWins),
            "append" => Some(Self::Append),
            _ => None,
        }
    }
}
