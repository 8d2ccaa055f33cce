use std::fmt::Display;
use tracing::debug;

use crate::config::ReplicationMode;
use crate::flags::Flags;
use crate::{Result, RpcError};

/// The concrete mode used for a single remote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseMode {
    /// Wait for the replies.
    Synchronous,

    /// Return at once, marshalling may happen later off the caller's task.
    Asynchronous,

    /// Return at once, but only after the command was marshalled on the
    /// caller's task. Used when asynchrony is forced onto a synchronous cache so
    /// that commands from one caller still leave in submission order.
    AsynchronousWithSyncMarshalling,
}

impl ResponseMode {
    pub fn is_synchronous(&self) -> bool {
        *self == Self::Synchronous
    }
}

impl Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synchronous => write!(f, "SYNCHRONOUS"),
            Self::Asynchronous => write!(f, "ASYNCHRONOUS"),
            Self::AsynchronousWithSyncMarshalling => {
                write!(f, "ASYNCHRONOUS_WITH_SYNC_MARSHALLING")
            }
        }
    }
}

/// Merge the static replication mode of a cache with the flags of one call.
///
/// A forced synchronous call always blocks. A forced asynchronous call on a
/// synchronous cache keeps marshalling on the caller's task. Without either flag
/// the cache's own mode decides. `async_marshalling` does not change the outcome,
/// it only picks where a plain asynchronous command is marshalled.
pub fn determine_mode(
    mode: ReplicationMode,
    async_marshalling: bool,
    flags: Flags,
) -> Result<ResponseMode> {
    if flags.contains(Flags::FORCE_SYNCHRONOUS | Flags::FORCE_ASYNCHRONOUS) {
        return Err(RpcError::Configuration(
            "FORCE_SYNCHRONOUS and FORCE_ASYNCHRONOUS are mutually exclusive".to_string(),
        ));
    }

    let resolved = if flags.contains(Flags::FORCE_SYNCHRONOUS) {
        ResponseMode::Synchronous
    } else if flags.contains(Flags::FORCE_ASYNCHRONOUS) {
        if mode.is_synchronous() {
            ResponseMode::AsynchronousWithSyncMarshalling
        } else {
            ResponseMode::Asynchronous
        }
    } else if mode.is_synchronous() {
        ResponseMode::Synchronous
    } else {
        ResponseMode::Asynchronous
    };

    debug!(%mode, async_marshalling, ?flags, %resolved, "Resolved response mode");
    Ok(resolved)
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL_MODES: [ReplicationMode; 7] = [
        ReplicationMode::Local,
        ReplicationMode::ReplSync,
        ReplicationMode::ReplAsync,
        ReplicationMode::DistSync,
        ReplicationMode::DistAsync,
        ReplicationMode::InvalidationSync,
        ReplicationMode::InvalidationAsync,
    ];

    #[test]
    fn sync_cache_without_flags() {
        for marshalling in [true, false] {
            assert_eq!(
                determine_mode(ReplicationMode::ReplSync, marshalling, Flags::empty()).unwrap(),
                ResponseMode::Synchronous
            );
        }
    }

    #[test]
    fn force_async_on_sync_cache_marshals_on_caller() {
        for marshalling in [true, false] {
            assert_eq!(
                determine_mode(ReplicationMode::ReplSync, marshalling, Flags::FORCE_ASYNCHRONOUS)
                    .unwrap(),
                ResponseMode::AsynchronousWithSyncMarshalling
            );
        }
    }

    #[test]
    fn async_cache_without_flags() {
        assert_eq!(
            determine_mode(ReplicationMode::ReplAsync, true, Flags::empty()).unwrap(),
            ResponseMode::Asynchronous
        );
    }

    #[test]
    fn force_sync_on_async_cache() {
        assert_eq!(
            determine_mode(ReplicationMode::ReplAsync, true, Flags::FORCE_SYNCHRONOUS).unwrap(),
            ResponseMode::Synchronous
        );
    }

    #[test]
    fn force_async_on_async_cache_stays_async() {
        for marshalling in [true, false] {
            assert_eq!(
                determine_mode(ReplicationMode::DistAsync, marshalling, Flags::FORCE_ASYNCHRONOUS)
                    .unwrap(),
                ResponseMode::Asynchronous
            );
        }
    }

    #[test]
    fn both_force_flags_fail() {
        for mode in ALL_MODES {
            let err = determine_mode(
                mode,
                false,
                Flags::FORCE_SYNCHRONOUS | Flags::FORCE_ASYNCHRONOUS | Flags::CACHE_MODE_LOCAL,
            )
            .unwrap_err();
            assert!(matches!(err, RpcError::Configuration(_)));
        }
    }

    #[test]
    fn resolution_table_is_total() {
        let flag_sets = [
            Flags::empty(),
            Flags::FORCE_SYNCHRONOUS,
            Flags::FORCE_ASYNCHRONOUS,
            Flags::CACHE_MODE_LOCAL,
            Flags::CACHE_MODE_LOCAL | Flags::FORCE_ASYNCHRONOUS,
        ];
        for mode in ALL_MODES {
            for flags in flag_sets {
                for marshalling in [true, false] {
                    let resolved = determine_mode(mode, marshalling, flags).unwrap();
                    let expected = if flags.contains(Flags::FORCE_SYNCHRONOUS) {
                        ResponseMode::Synchronous
                    } else if flags.contains(Flags::FORCE_ASYNCHRONOUS) && mode.is_synchronous() {
                        ResponseMode::AsynchronousWithSyncMarshalling
                    } else if flags.contains(Flags::FORCE_ASYNCHRONOUS) || !mode.is_synchronous() {
                        ResponseMode::Asynchronous
                    } else {
                        ResponseMode::Synchronous
                    };
                    assert_eq!(resolved, expected, "{mode} {flags:?} {marshalling}");
                }
            }
        }
    }
}
