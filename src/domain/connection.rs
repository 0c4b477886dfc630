//! Network reachability as seen by the path monitor.

/// Network path state as reported by a path monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reachability {
    /// No probe has completed yet.
    #[default]
    Unknown,
    /// The last probe reached the network.
    Reachable,
    /// The last probe failed.
    Unreachable,
}

impl Reachability {
    /// Only a positive probe counts as reachable.
    #[must_use]
    pub const fn is_reachable(self) -> bool {
        matches!(self, Self::Reachable)
    }
}

impl From<bool> for Reachability {
    fn from(reachable: bool) -> Self {
        if reachable {
            Self::Reachable
        } else {
            Self::Unreachable
        }
    }
}
