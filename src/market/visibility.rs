use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    None,
    /// Hidden long enough that live state can no longer be trusted.
    ForceSnapshot { hidden_for: Duration },
    /// Short absence; keep consuming ticks.
    Resume { hidden_for: Duration },
}

#[derive(Debug, Clone)]
pub struct VisibilityRefresher {
    state: Visibility,
    hidden_at: Option<Instant>,
    threshold: Duration,
}

impl VisibilityRefresher {
    pub fn new(threshold: Duration) -> Self {
        Self {
            state: Visibility::Visible,
            hidden_at: None,
            threshold,
        }
    }

    pub fn state(&self) -> Visibility {
        self.state
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn transition(&mut self, next: Visibility, now: Instant) -> RefreshDecision {
        match (self.state, next) {
            (Visibility::Visible, Visibility::Hidden) => {
                self.state = Visibility::Hidden;
                self.hidden_at = Some(now);
                RefreshDecision::None
            }
            (Visibility::Hidden, Visibility::Visible) => {
                self.state = Visibility::Visible;
                let hidden_for = self
                    .hidden_at
                    .take()
                    .map(|hidden_at| now.saturating_duration_since(hidden_at))
                    .unwrap_or_default();
                if hidden_for >= self.threshold {
                    RefreshDecision::ForceSnapshot { hidden_for }
                } else {
                    RefreshDecision::Resume { hidden_for }
                }
            }
            _ => RefreshDecision::None,
        }
    }
}
