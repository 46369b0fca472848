//! Channel join-status lifecycle (spec.md §3 "ChannelJoinStatus").

/// Channel-only join lifecycle. Status windows and queries have no
/// equivalent state — `Context::join_status` is `None` for those kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelJoinStatus {
    NotJoined,
    PendingInitialJoin,
    JoinCommandSent,
    SelfJoinReceived,
    FullyJoined,
    Parting,
    JoinFailed,
}

impl ChannelJoinStatus {
    /// `JOIN #chan` was queued by the auto-join list before the user typed
    /// anything.
    pub fn on_auto_join_queued(self) -> Self {
        ChannelJoinStatus::PendingInitialJoin
    }

    /// The user issued `/join #chan` explicitly.
    pub fn on_join_command_sent(self) -> Self {
        ChannelJoinStatus::JoinCommandSent
    }

    /// Our own JOIN echo arrived, or the first NAMES (353) line for this
    /// channel arrived before the echo (server ordering is not guaranteed).
    pub fn on_self_join_observed(self) -> Self {
        match self {
            ChannelJoinStatus::PendingInitialJoin | ChannelJoinStatus::JoinCommandSent => {
                ChannelJoinStatus::SelfJoinReceived
            }
            other => other,
        }
    }

    /// RPL_ENDOFNAMES (366) arrived for this channel.
    pub fn on_end_of_names(self) -> Self {
        match self {
            ChannelJoinStatus::SelfJoinReceived => ChannelJoinStatus::FullyJoined,
            other => other,
        }
    }

    /// We issued `/part`.
    pub fn on_part_sent(self) -> Self {
        ChannelJoinStatus::Parting
    }

    /// Our own PART echo arrived, or we were kicked.
    pub fn on_removed(self) -> Self {
        ChannelJoinStatus::NotJoined
    }

    /// 403/471/473/474/475 arrived for this channel.
    pub fn on_join_error(self) -> Self {
        ChannelJoinStatus::JoinFailed
    }

    pub fn is_joined(self) -> bool {
        matches!(self, ChannelJoinStatus::FullyJoined)
    }
}

impl Default for ChannelJoinStatus {
    fn default() -> Self {
        ChannelJoinStatus::NotJoined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_auto_join() {
        let mut status = ChannelJoinStatus::NotJoined;
        status = status.on_auto_join_queued();
        assert_eq!(status, ChannelJoinStatus::PendingInitialJoin);
        status = status.on_self_join_observed();
        assert_eq!(status, ChannelJoinStatus::SelfJoinReceived);
        status = status.on_end_of_names();
        assert_eq!(status, ChannelJoinStatus::FullyJoined);
        assert!(status.is_joined());
    }

    #[test]
    fn kick_returns_to_not_joined_from_any_state() {
        for start in [
            ChannelJoinStatus::FullyJoined,
            ChannelJoinStatus::SelfJoinReceived,
            ChannelJoinStatus::Parting,
        ] {
            assert_eq!(start.on_removed(), ChannelJoinStatus::NotJoined);
        }
    }

    #[test]
    fn join_error_from_pending() {
        let status = ChannelJoinStatus::PendingInitialJoin.on_join_error();
        assert_eq!(status, ChannelJoinStatus::JoinFailed);
    }
}
