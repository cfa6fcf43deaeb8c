//! Scheduler commands and the node selectors they carry.

use crate::error::CommandParseError;
use std::fmt;
use surfexp_core::{compact_dtg, parse_dtg, Dtg, MemberId, NodeId, TaskKind};

/// Identifies the nodes a command applies to.
///
/// Experiment and cycle are mandatory; member and task narrow the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSelector {
    /// Experiment name
    pub experiment: String,
    /// Cycle
    pub cycle: Dtg,
    /// Member, all members when absent
    pub member: Option<MemberId>,
    /// Task kind, all kinds when absent
    pub kind: Option<TaskKind>,
}

impl TaskSelector {
    /// Selector for every node of a cycle.
    pub fn new(experiment: impl Into<String>, cycle: Dtg) -> Self {
        Self {
            experiment: experiment.into(),
            cycle,
            member: None,
            kind: None,
        }
    }

    /// Restrict to one member.
    pub fn member(mut self, member: MemberId) -> Self {
        self.member = Some(member);
        self
    }

    /// Restrict to one kind.
    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Parse `key=value` arguments (`experiment`, `cycle`, `member`, `task`).
    pub fn parse<I, S>(args: I) -> Result<Self, CommandParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut experiment = None;
        let mut cycle = None;
        let mut member = None;
        let mut kind = None;

        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                return Err(CommandParseError::Unrecognised(arg.to_string()));
            };
            let value = value.trim();
            match key.trim() {
                "experiment" | "exp" => {
                    if value.is_empty() || value.contains('/') || value.contains(char::is_whitespace) {
                        return Err(invalid("experiment", value, "expected a plain name"));
                    }
                    experiment = Some(value.to_string());
                }
                "cycle" | "dtg" => {
                    cycle = Some(parse_dtg(value).map_err(|e| invalid("cycle", value, e.to_string()))?);
                }
                "member" | "mbr" => {
                    member = Some(
                        value
                            .parse::<MemberId>()
                            .map_err(|_| invalid("member", value, "expected a member number"))?,
                    );
                }
                "task" | "kind" => {
                    kind = Some(value.parse::<TaskKind>().map_err(|e| invalid("task", value, e.to_string()))?);
                }
                _ => return Err(CommandParseError::Unrecognised(arg.to_string())),
            }
        }

        Ok(Self {
            experiment: experiment.ok_or(CommandParseError::MissingField("experiment"))?,
            cycle: cycle.ok_or(CommandParseError::MissingField("cycle"))?,
            member,
            kind,
        })
    }

    /// Whether a node of this selector's experiment is selected.
    pub fn matches(&self, node: &NodeId) -> bool {
        node.cycle == self.cycle
            && self.member.map_or(true, |m| node.member == Some(m))
            && self.kind.map_or(true, |k| node.kind == k)
    }
}

impl fmt::Display for TaskSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "experiment={} cycle={}", self.experiment, compact_dtg(&self.cycle))?;
        if let Some(member) = self.member {
            write!(f, " member={}", member.0)?;
        }
        if let Some(kind) = self.kind {
            write!(f, " task={}", kind)?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> CommandParseError {
    CommandParseError::InvalidField {
        field,
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Operation of a scheduler command. Submission works on a whole suite and
/// has no selector form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Kill the selected nodes
    Kill,
    /// Query the selected nodes
    Status,
}

/// A parsed scheduler command, e.g. `kill experiment=demo cycle=2022020100 task=forecast`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerCommand {
    /// Operation
    pub operation: Operation,
    /// Target nodes
    pub selector: TaskSelector,
}

impl SchedulerCommand {
    /// Command for an operation word followed by `key=value` selectors.
    pub fn from_parts<S: AsRef<str>>(operation: &str, selectors: &[S]) -> Result<Self, CommandParseError> {
        let argv: Vec<&str> = std::iter::once(operation)
            .chain(selectors.iter().map(AsRef::as_ref))
            .collect();
        Self::parse(&argv)
    }

    /// Parse a command line. Fails before anything is contacted.
    pub fn parse<S: AsRef<str>>(argv: &[S]) -> Result<Self, CommandParseError> {
        let Some((op, rest)) = argv.split_first() else {
            return Err(CommandParseError::MissingField("operation"));
        };
        let operation = match op.as_ref() {
            "kill" => Operation::Kill,
            "status" => Operation::Status,
            other => return Err(CommandParseError::UnknownOperation(other.to_string())),
        };
        Ok(Self {
            operation,
            selector: TaskSelector::parse(rest)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command() {
        let cmd = SchedulerCommand::parse(&["kill", "experiment=demo", "cycle=2022020103", "member=2", "task=OfflineForecast"])
            .unwrap();
        assert_eq!(cmd.operation, Operation::Kill);
        assert_eq!(cmd.selector.member, Some(MemberId(2)));
        assert_eq!(cmd.selector.kind, Some(TaskKind::Forecast));
        assert_eq!(
            cmd.selector.to_string(),
            "experiment=demo cycle=202202010300 member=2 task=forecast"
        );
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(
            TaskSelector::parse(["cycle=2022020100"]),
            Err(CommandParseError::MissingField("experiment"))
        );
        assert_eq!(
            TaskSelector::parse(["experiment=demo"]),
            Err(CommandParseError::MissingField("cycle"))
        );
        assert!(matches!(
            TaskSelector::parse(["experiment=demo", "cycle=20220231"]),
            Err(CommandParseError::InvalidField { field: "cycle", .. })
        ));
        assert!(matches!(
            TaskSelector::parse(["experiment=demo", "cycle=2022020100", "member=first"]),
            Err(CommandParseError::InvalidField { field: "member", .. })
        ));
        assert!(matches!(
            SchedulerCommand::parse(&["restart", "experiment=demo"]),
            Err(CommandParseError::UnknownOperation(_))
        ));
        assert!(matches!(
            SchedulerCommand::parse(&["submit", "experiment=demo", "cycle=2022020100"]),
            Err(CommandParseError::UnknownOperation(_))
        ));
        assert_eq!(
            SchedulerCommand::parse::<&str>(&[]),
            Err(CommandParseError::MissingField("operation"))
        );
        assert!(matches!(
            TaskSelector::parse(["demo"]),
            Err(CommandParseError::Unrecognised(_))
        ));
    }

    #[test]
    fn test_from_parts() {
        let selectors = vec!["experiment=demo".to_string(), "cycle=2022020100".to_string()];
        let cmd = SchedulerCommand::from_parts("status", &selectors).unwrap();
        assert_eq!(cmd.operation, Operation::Status);
        assert_eq!(cmd.selector, TaskSelector::new("demo", parse_dtg("2022020100").unwrap()));
        assert_eq!(
            SchedulerCommand::from_parts("kill", &selectors[..1]),
            Err(CommandParseError::MissingField("cycle"))
        );
    }

    #[test]
    fn test_matches() {
        let cycle = parse_dtg("2022020100").unwrap();
        let selector = TaskSelector::new("demo", cycle).kind(TaskKind::Prep);
        assert!(selector.matches(&NodeId::new(TaskKind::Prep, cycle, Some(MemberId(1)))));
        assert!(!selector.matches(&NodeId::new(TaskKind::Forecast, cycle, None)));
        assert!(!selector.clone().member(MemberId(2)).matches(&NodeId::new(TaskKind::Prep, cycle, Some(MemberId(1)))));
    }
}
