//! Conflict policy between a pending local write and the remote copy.
//!
//! A conflict is only possible while a local write is pending. Under the
//! default [`ConflictPolicy::LastWriteWins`] the newer `last_modified`
//! wins and a tie goes to the local write, which is then pushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Newer `last_modified` wins; ties push the local write
    #[default]
    LastWriteWins,

    /// The remote copy wins whenever it changed since this record last synced
    ServerWins,

    /// The local write is always pushed
    ClientWins,
}

/// What to do with a pending local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    PushLocal,
    AdoptRemote,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::LastWriteWins => "last-write-wins",
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::ClientWins => "client-wins",
        }
    }

    /// Whether the remote copy must be fetched before pushing.
    pub fn needs_remote_state(&self) -> bool {
        !matches!(self, ConflictPolicy::ClientWins)
    }

    /// Lower bound for the pre-push pull of one record: remote changes older
    /// than this cannot affect the resolution. `None` means "everything".
    pub fn pull_floor(
        &self,
        local_modified: DateTime<Utc>,
        last_synced: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            ConflictPolicy::ServerWins => last_synced.map(|synced| synced.min(local_modified)),
            _ => Some(local_modified),
        }
    }

    /// Decide between the pending local write and the remote copy.
    ///
    /// * `remote_modified` - stamp of the remote copy, if one exists
    /// * `last_synced` - when this record last synced successfully
    pub fn resolve(
        &self,
        local_modified: DateTime<Utc>,
        remote_modified: Option<DateTime<Utc>>,
        last_synced: Option<DateTime<Utc>>,
    ) -> Resolution {
        let Some(remote_modified) = remote_modified else {
            return Resolution::PushLocal;
        };

        let remote_wins = match self {
            ConflictPolicy::LastWriteWins => remote_modified > local_modified,
            ConflictPolicy::ServerWins => {
                last_synced.map_or(true, |synced| remote_modified > synced)
            }
            ConflictPolicy::ClientWins => false,
        };

        if remote_wins {
            Resolution::AdoptRemote
        } else {
            Resolution::PushLocal
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(ConflictPolicy::LastWriteWins),
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            other => Err(SyncError::Config(format!("Unknown conflict policy: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_last_write_wins() {
        let policy = ConflictPolicy::LastWriteWins;
        assert_eq!(policy.resolve(t(10), Some(t(20)), None), Resolution::AdoptRemote);
        assert_eq!(policy.resolve(t(20), Some(t(10)), None), Resolution::PushLocal);
        assert_eq!(policy.resolve(t(10), None, None), Resolution::PushLocal);
    }

    #[test]
    fn test_tie_pushes_local() {
        let policy = ConflictPolicy::LastWriteWins;
        assert_eq!(policy.resolve(t(10), Some(t(10)), Some(t(0))), Resolution::PushLocal);
    }

    #[test]
    fn test_server_wins_on_remote_change_since_sync() {
        let policy = ConflictPolicy::ServerWins;
        // Remote edited after our last sync, even though the local edit is newer
        assert_eq!(policy.resolve(t(30), Some(t(10)), Some(t(5))), Resolution::AdoptRemote);
        // Remote unchanged since our last sync
        assert_eq!(policy.resolve(t(30), Some(t(5)), Some(t(5))), Resolution::PushLocal);
        // Never synced: any remote copy wins
        assert_eq!(policy.resolve(t(30), Some(t(1)), None), Resolution::AdoptRemote);
    }

    #[test]
    fn test_client_wins() {
        let policy = ConflictPolicy::ClientWins;
        assert!(!policy.needs_remote_state());
        assert_eq!(policy.resolve(t(0), Some(t(99)), None), Resolution::PushLocal);
    }

    #[test]
    fn test_pull_floor() {
        assert_eq!(
            ConflictPolicy::LastWriteWins.pull_floor(t(10), Some(t(2))),
            Some(t(10))
        );
        assert_eq!(
            ConflictPolicy::ServerWins.pull_floor(t(10), Some(t(2))),
            Some(t(2))
        );
        assert_eq!(ConflictPolicy::ServerWins.pull_floor(t(10), None), None);
    }

    #[test]
    fn test_policy_names() {
        for policy in [
            ConflictPolicy::LastWriteWins,
            ConflictPolicy::ServerWins,
            ConflictPolicy::ClientWins,
        ] {
            assert_eq!(policy.as_str().parse::<ConflictPolicy>().unwrap(), policy);
        }
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }
}
