use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle command carried by an inbound round event.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCommand {
    /// Betting opens for the round.
    BetOpen,
    /// Betting closes ("bet-stop" upstream).
    #[serde(alias = "bet-stop")]
    BetClose,
    /// Result drawn; the round settles.
    Draw,
    /// Dealer paused the table.
    Pause,
}

impl EventCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BetOpen => "bet-open",
            Self::BetClose => "bet-close",
            Self::Draw => "draw",
            Self::Pause => "pause",
        }
    }

    pub fn is_settlement(&self) -> bool {
        matches!(self, Self::Draw)
    }
}

impl fmt::Display for EventCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
