//! Remote sync: debounced push, single-flight pull and last-write-wins merge.

mod engine;
mod remote;
mod runner;
mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    ApplyReport, PullOutcome, PullState, PushOutcome, PushState, SyncEngine, SyncHealth,
    TickReport,
};
pub use remote::{HttpRemoteStore, RemoteError, RemoteResult, RemoteStore};
pub use runner::SyncRunner;
pub use scheduler::DebounceScheduler;

use crate::models::ConversationId;

/// Authentication status reported by the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    Loading,
    Authenticated { user_id: String },
}

impl AuthStatus {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self::Authenticated {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated { user_id } => Some(user_id),
            Self::Unauthenticated | Self::Loading => None,
        }
    }

    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Environment and local-change events fed to the sync runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// A conversation was mutated locally
    LocalChange {
        id: ConversationId,
        immediate: bool,
    },
    /// An evicted conversation was opened and needs its payload back
    Rehydrate(ConversationId),
    Online,
    Offline,
    Focus,
    Visible,
    AuthChanged(AuthStatus),
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_status_exposes_user_only_when_authenticated() {
        assert_eq!(AuthStatus::authenticated("u1").user_id(), Some("u1"));
        assert!(AuthStatus::authenticated("u1").is_authenticated());
        assert_eq!(AuthStatus::Loading.user_id(), None);
        assert!(!AuthStatus::Unauthenticated.is_authenticated());
    }
}
