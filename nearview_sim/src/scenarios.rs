//! Tracking scenarios for the simulator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: targets moving with the platform at matched speed
    Convoy,

    /// SIM-002: two target streams crossing the platform's field
    Crossing,

    /// SIM-003: motionless targets; speed must converge to exactly zero
    Standstill,

    /// SIM-004: intermittent detections; tracks must survive the gaps
    Dropout,

    /// SIM-005: dense field of slow movers across every interest ring
    Swarm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Convoy,
            ScenarioId::Crossing,
            ScenarioId::Standstill,
            ScenarioId::Dropout,
            ScenarioId::Swarm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "convoy",
            ScenarioId::Crossing => "crossing",
            ScenarioId::Standstill => "standstill",
            ScenarioId::Dropout => "dropout",
            ScenarioId::Swarm => "swarm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "Targets hold formation with a moving platform",
            ScenarioId::Crossing => "Two target streams cross the platform's field",
            ScenarioId::Standstill => "Motionless targets, speed must clamp to zero",
            ScenarioId::Dropout => "30% detection dropout, tracks bridge the gaps",
            ScenarioId::Swarm => "40 slow movers spread across every interest ring",
        }
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
            "convoy" | "sim-001" => Ok(ScenarioId::Convoy),
            "crossing" | "sim-002" => Ok(ScenarioId::Crossing),
            "standstill" | "sim-003" => Ok(ScenarioId::Standstill),
            "dropout" | "sim-004" => Ok(ScenarioId::Dropout),
            "swarm" | "sim-005" => Ok(ScenarioId::Swarm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
