//! Run-tracking scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// RUN-001: Straight kilometer with a perfect GPS
    CleanKilometer,

    /// RUN-002: Runner stands still under sub-meter scatter
    StandingStill,

    /// RUN-003: Far one-sample jumps in an otherwise clean route
    GpsTeleport,

    /// RUN-004: Street-canyon scatter and poor-accuracy fixes
    NoisyCity,

    /// RUN-005: Oscillation across an H3 cell edge
    BoundaryDance,

    /// RUN-006: Unreliable backend with rival owners
    FlakyBackend,

    /// RUN-007: Reset and restart while confirmations are in flight
    RestartFence,

    /// RUN-008: Pause at a light, resume and carry on
    TrafficLight,

    /// RUN-009: Location permission refused
    PermissionDenied,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CleanKilometer,
            ScenarioId::StandingStill,
            ScenarioId::GpsTeleport,
            ScenarioId::NoisyCity,
            ScenarioId::BoundaryDance,
            ScenarioId::FlakyBackend,
            ScenarioId::RestartFence,
            ScenarioId::TrafficLight,
            ScenarioId::PermissionDenied,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CleanKilometer => "clean_kilometer",
            ScenarioId::StandingStill => "standing_still",
            ScenarioId::GpsTeleport => "gps_teleport",
            ScenarioId::NoisyCity => "noisy_city",
            ScenarioId::BoundaryDance => "boundary_dance",
            ScenarioId::FlakyBackend => "flaky_backend",
            ScenarioId::RestartFence => "restart_fence",
            ScenarioId::TrafficLight => "traffic_light",
            ScenarioId::PermissionDenied => "permission_denied",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CleanKilometer => "1 km north at 5 m / 1.5 s, exact distance, pace and duration",
            ScenarioId::StandingStill => "5 minutes standing under GPS scatter, zero distance, no capture",
            ScenarioId::GpsTeleport => "5% of fixes jump 300-800 m, every jump rejected",
            ScenarioId::NoisyCity => "2 km with scatter and 10% poor fixes, distance within 15%",
            ScenarioId::BoundaryDance => "30 hops across a cell edge, exactly one capture",
            ScenarioId::FlakyBackend => "50% RPC failures and rival owners, counters stay consistent",
            ScenarioId::RestartFence => "Reset mid-run with slow confirmations, no stale receipt lands",
            ScenarioId::TrafficLight => "Pause and resume at a light, paused time not counted",
            ScenarioId::PermissionDenied => "Location refused, run never leaves Idle",
        }
    }

    /// Returns true if the scenario exercises the backend confirmer.
    pub fn uses_backend(&self) -> bool {
        matches!(self, ScenarioId::FlakyBackend | ScenarioId::RestartFence)
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
            "clean_kilometer" | "cleankilometer" | "run-001" => Ok(ScenarioId::CleanKilometer),
            "standing_still" | "standingstill" | "run-002" => Ok(ScenarioId::StandingStill),
            "gps_teleport" | "gpsteleport" | "run-003" => Ok(ScenarioId::GpsTeleport),
            "noisy_city" | "noisycity" | "run-004" => Ok(ScenarioId::NoisyCity),
            "boundary_dance" | "boundarydance" | "run-005" => Ok(ScenarioId::BoundaryDance),
            "flaky_backend" | "flakybackend" | "run-006" => Ok(ScenarioId::FlakyBackend),
            "restart_fence" | "restartfence" | "run-007" => Ok(ScenarioId::RestartFence),
            "traffic_light" | "trafficlight" | "run-008" => Ok(ScenarioId::TrafficLight),
            "permission_denied" | "permissiondenied" | "run-009" => Ok(ScenarioId::PermissionDenied),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("RUN-005".parse::<ScenarioId>(), Ok(ScenarioId::BoundaryDance));
        assert_eq!("FlakyBackend".parse::<ScenarioId>(), Ok(ScenarioId::FlakyBackend));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
