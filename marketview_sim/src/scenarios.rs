//! Viewer stress scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// VS-001: Clean link, steady 30 Hz feed
    Steady,

    /// VS-002: Jittered delivery with light loss and noisy positions
    Jitter,

    /// VS-003: Server stalls then flushes several snapshots at once
    Burst,

    /// VS-004: Link goes dark, then releases everything it held
    Blackout,

    /// VS-005: Agents join and leave continuously
    Churn,

    /// VS-006: Viewport and world size changes mid-run
    Resize,

    /// VS-007: Garbage, invalid and unknown messages mixed into the feed
    Malformed,

    /// VS-008: Groups hidden and shown while the feed runs
    GroupFilter,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::Jitter,
            ScenarioId::Burst,
            ScenarioId::Blackout,
            ScenarioId::Churn,
            ScenarioId::Resize,
            ScenarioId::Malformed,
            ScenarioId::GroupFilter,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Burst => "burst",
            ScenarioId::Blackout => "blackout",
            ScenarioId::Churn => "churn",
            ScenarioId::Resize => "resize",
            ScenarioId::Malformed => "malformed",
            ScenarioId::GroupFilter => "group_filter",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "30 Hz feed over a clean 20 ms link",
            ScenarioId::Jitter => "0-80 ms jitter, 5% loss, noisy positions",
            ScenarioId::Burst => "Five snapshots flushed every 166 ms with scripted trades",
            ScenarioId::Blackout => "1.5 s blackout, then a flood of held snapshots",
            ScenarioId::Churn => "Three agents replaced every half second, some mid-flash",
            ScenarioId::Resize => "Viewport resizes (one degenerate) and the world grows",
            ScenarioId::Malformed => "Invalid JSON, NaN positions, duplicate ids, unknown kinds",
            ScenarioId::GroupFilter => "Three groups, one hidden for two seconds",
        }
    }

    /// Returns the 1-based scenario number.
    pub fn number(&self) -> usize {
        Self::all().iter().position(|s| s == self).map_or(0, |i| i + 1)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" | "vs-001" => Ok(ScenarioId::Steady),
            "jitter" | "vs-002" => Ok(ScenarioId::Jitter),
            "burst" | "vs-003" => Ok(ScenarioId::Burst),
            "blackout" | "vs-004" => Ok(ScenarioId::Blackout),
            "churn" | "vs-005" => Ok(ScenarioId::Churn),
            "resize" | "vs-006" => Ok(ScenarioId::Resize),
            "malformed" | "vs-007" => Ok(ScenarioId::Malformed),
            "group_filter" | "groupfilter" | "vs-008" => Ok(ScenarioId::GroupFilter),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
