//! Fault scenarios for DST.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// DST-001: every peer acks, tasks round-trip, shutdown reaches all
    Nominal,
    
    /// DST-002: one peer never answers assign_role
    SilentPeer,
    
    /// DST-003: a ready worker dies before answering a task
    CrashedWorker,
    
    /// DST-004: a worker stops serving after shutdown
    ShutdownDrain,
    
    /// DST-005: lossy, jittery links; correlation must hold
    LossyLink,
    
    /// DST-006: more peers than roles
    SurplusPeers,
    
    /// DST-007: fewer peers than roles
    ScarcePeers,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nominal,
            ScenarioId::SilentPeer,
            ScenarioId::CrashedWorker,
            ScenarioId::ShutdownDrain,
            ScenarioId::LossyLink,
            ScenarioId::SurplusPeers,
            ScenarioId::ScarcePeers,
        ]
    }
    
    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::SilentPeer => "silent_peer",
            ScenarioId::CrashedWorker => "crashed_worker",
            ScenarioId::ShutdownDrain => "shutdown_drain",
            ScenarioId::LossyLink => "lossy_link",
            ScenarioId::SurplusPeers => "surplus_peers",
            ScenarioId::ScarcePeers => "scarce_peers",
        }
    }
    
    /// Parses a scenario from its name.
    pub fn from_name(name: &str) -> Option<ScenarioId> {
        Self::all().into_iter().find(|s| s.name() == name)
    }
    
    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "All peers ack; ping/echo round-trip; unknown task answered; shutdown reaches every worker",
            ScenarioId::SilentPeer => "Silent peer is marked not ready after every attempt; dispatch to it sends nothing",
            ScenarioId::CrashedWorker => "Dispatch to a crashed worker times out after the caller's deadline",
            ScenarioId::ShutdownDrain => "After shutdown the worker loop exits and later tasks get no reply",
            ScenarioId::LossyLink => "20% loss with jitter; every accepted result matches its TaskID",
            ScenarioId::SurplusPeers => "Excess peers get no role; roles map to the first peers in order",
            ScenarioId::ScarcePeers => "Trailing roles stay unassigned and dispatch to them fails fast",
        }
    }
    
    /// Returns the minimum number of roles the scenario needs.
    pub fn min_roles(&self) -> usize {
        match self {
            ScenarioId::SilentPeer | ScenarioId::ScarcePeers => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(ScenarioId::from_name(scenario.name()), Some(scenario));
        }
        assert_eq!(ScenarioId::from_name("split_brain"), None);
    }
    
    #[test]
    fn test_serializes_as_name() {
        let json = serde_json::to_string(&ScenarioId::SilentPeer).unwrap();
        assert_eq!(json, "\"silent_peer\"");
    }
}
