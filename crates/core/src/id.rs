//! Identifiers for surfexp entities.

use crate::time::{compact_dtg, parse_dtg, Dtg};
use serde::{Deserialize, Serialize};

/// Ensemble member number. Member 0 is the control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u32);

impl MemberId {
    /// The control member.
    pub const CONTROL: MemberId = MemberId(0);

    /// Whether this is the control member.
    pub fn is_control(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mbr{:03}", self.0)
    }
}

impl std::str::FromStr for MemberId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("mbr");
        Ok(Self(digits.parse()?))
    }
}

/// Error for task kind names that are not part of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown task kind: {0}")]
pub struct UnknownTaskKind(pub String);

/// A pipeline stage.
///
/// The declaration order is the canonical ordering used when several kinds
/// have no ordering constraint between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Build the offline model binaries
    CompileOffline,
    /// Static (physiography) field generation
    Pgd,
    /// Clean the cycle working directory
    PrepareCycle,
    /// Initial-state preparation
    Prep,
    /// Atmospheric forcing generation
    Forcing,
    /// First-guess extraction for the analysis
    FirstGuess,
    /// Quality control of observations
    QualityControl,
    /// Optimal interpolation analysis
    OptimalInterpolation,
    /// Assimilation-increment conversion (analysis to SODA input)
    Oi2soda,
    /// Perturbed run for the extended Kalman filter
    PerturbedRun,
    /// Assimilation update
    Soda,
    /// Forecast integration
    Forecast,
    /// QC feedback to monitoring conversion
    Qc2obsmon,
}

impl TaskKind {
    /// Every kind, in canonical order.
    pub const ALL: [TaskKind; 13] = [
        TaskKind::CompileOffline,
        TaskKind::Pgd,
        TaskKind::PrepareCycle,
        TaskKind::Prep,
        TaskKind::Forcing,
        TaskKind::FirstGuess,
        TaskKind::QualityControl,
        TaskKind::OptimalInterpolation,
        TaskKind::Oi2soda,
        TaskKind::PerturbedRun,
        TaskKind::Soda,
        TaskKind::Forecast,
        TaskKind::Qc2obsmon,
    ];

    /// Configuration name (snake case).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CompileOffline => "compile_offline",
            TaskKind::Pgd => "pgd",
            TaskKind::PrepareCycle => "prepare_cycle",
            TaskKind::Prep => "prep",
            TaskKind::Forcing => "forcing",
            TaskKind::FirstGuess => "first_guess",
            TaskKind::QualityControl => "quality_control",
            TaskKind::OptimalInterpolation => "optimal_interpolation",
            TaskKind::Oi2soda => "oi2soda",
            TaskKind::PerturbedRun => "perturbed_run",
            TaskKind::Soda => "soda",
            TaskKind::Forecast => "forecast",
            TaskKind::Qc2obsmon => "qc2obsmon",
        }
    }

    /// Job/task name as shown in a scheduler suite.
    pub fn task_name(&self) -> &'static str {
        match self {
            TaskKind::CompileOffline => "MakeOfflineBinaries",
            TaskKind::Pgd => "OfflinePgd",
            TaskKind::PrepareCycle => "PrepareCycle",
            TaskKind::Prep => "OfflinePrep",
            TaskKind::Forcing => "Forcing",
            TaskKind::FirstGuess => "FirstGuess4OI",
            TaskKind::QualityControl => "QualityControl",
            TaskKind::OptimalInterpolation => "OptimalInterpolation",
            TaskKind::Oi2soda => "Oi2soda",
            TaskKind::PerturbedRun => "PerturbedRun",
            TaskKind::Soda => "Soda",
            TaskKind::Forecast => "OfflineForecast",
            TaskKind::Qc2obsmon => "Qc2obsmon",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = UnknownTaskKind;

    /// Accepts the configuration name or the scheduler task name, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        TaskKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted || k.task_name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

/// Identity of a task node: (kind, cycle, member).
///
/// Serialised as `YYYYMMDDHHMM/<member>/<kind>` with `-` for no member, so
/// that it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    /// Cycle the node belongs to
    pub cycle: Dtg,
    /// Member, if the node is member specific
    pub member: Option<MemberId>,
    /// Pipeline stage
    pub kind: TaskKind,
}

impl NodeId {
    /// Create a node identity.
    pub fn new(kind: TaskKind, cycle: Dtg, member: Option<MemberId>) -> Self {
        Self { cycle, member, kind }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.member {
            Some(member) => write!(f, "{}/{}/{}", compact_dtg(&self.cycle), member, self.kind),
            None => write!(f, "{}/-/{}", compact_dtg(&self.cycle), self.kind),
        }
    }
}

impl std::str::FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let [cycle, member, kind] = parts.as_slice() else {
            return Err(format!("Invalid node id: {}", s));
        };
        let cycle = parse_dtg(cycle).map_err(|e| e.to_string())?;
        let member = match *member {
            "-" => None,
            m => Some(m.parse().map_err(|_| format!("Invalid member in node id: {}", s))?),
        };
        let kind = kind.parse().map_err(|e: UnknownTaskKind| e.to_string())?;
        Ok(Self { cycle, member, kind })
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_names() {
        assert_eq!("forecast".parse::<TaskKind>().unwrap(), TaskKind::Forecast);
        assert_eq!("OfflineForecast".parse::<TaskKind>().unwrap(), TaskKind::Forecast);
        assert_eq!("quality-control".parse::<TaskKind>().unwrap(), TaskKind::QualityControl);
        assert!("dummy".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_member_display() {
        assert_eq!(MemberId(3).to_string(), "mbr003");
        assert_eq!("mbr012".parse::<MemberId>().unwrap(), MemberId(12));
        assert_eq!("7".parse::<MemberId>().unwrap(), MemberId(7));
    }

    #[test]
    fn test_node_id_text_form() {
        let cycle = parse_dtg("2022020103").unwrap();
        let id = NodeId::new(TaskKind::Soda, cycle, Some(MemberId(1)));
        assert_eq!(id.to_string(), "202202010300/mbr001/soda");
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);

        let shared = NodeId::new(TaskKind::Pgd, cycle, None);
        assert_eq!(shared.to_string(), "202202010300/-/pgd");
        assert_eq!(shared.to_string().parse::<NodeId>().unwrap(), shared);
    }

    #[test]
    fn test_node_id_as_json_key() {
        let cycle = parse_dtg("2022020100").unwrap();
        let mut map = std::collections::BTreeMap::new();
        map.insert(NodeId::new(TaskKind::Forecast, cycle, None), 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"202202010000/-/forecast":1}"#);
    }
}
