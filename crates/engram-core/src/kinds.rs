use serde::{Deserialize, Serialize};

/// Classification of a recorded tool execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Decision,
    Bugfix,
    Feature,
    Refactor,
    Discovery,
    Change,
}

impl ObservationKind {
    pub const ALL: [ObservationKind; 6] = [
        Self::Decision,
        Self::Bugfix,
        Self::Feature,
        Self::Refactor,
        Self::Discovery,
        Self::Change,
    ];
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decision => write!(f, "decision"),
            Self::Bugfix => write!(f, "bugfix"),
            Self::Feature => write!(f, "feature"),
            Self::Refactor => write!(f, "refactor"),
            Self::Discovery => write!(f, "discovery"),
            Self::Change => write!(f, "change"),
        }
    }
}

impl std::str::FromStr for ObservationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "bugfix" => Ok(Self::Bugfix),
            "feature" => Ok(Self::Feature),
            "refactor" => Ok(Self::Refactor),
            "discovery" => Ok(Self::Discovery),
            "change" => Ok(Self::Change),
            other => Err(format!("unknown observation kind: {other}")),
        }
    }
}

/// Why a session ended. `clear` leaves the worker running for a possible
/// resume; every other reason means the conversation is truly over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Exit,
    Clear,
    Logout,
    PromptInputExit,
    #[serde(other)]
    Other,
}

impl EndReason {
    /// Whether teardown should signal the worker to abort.
    pub fn aborts_worker(&self) -> bool {
        !matches!(self, Self::Clear)
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Clear => write!(f, "clear"),
            Self::Logout => write!(f, "logout"),
            Self::PromptInputExit => write!(f, "prompt_input_exit"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for EndReason {
    type Err = std::convert::Infallible;

    /// Unrecognized reasons collapse to `Other` rather than failing — the
    /// host may grow new teardown triggers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exit" => Self::Exit,
            "clear" => Self::Clear,
            "logout" => Self::Logout,
            "prompt_input_exit" => Self::PromptInputExit,
            _ => Self::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_kind_roundtrip() {
        for kind in ObservationKind::ALL {
            let s = kind.to_string();
            let parsed: ObservationKind = s.parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn observation_kind_rejects_unknown() {
        assert!("sidequest".parse::<ObservationKind>().is_err());
    }

    #[test]
    fn observation_kind_serde_matches_display() {
        for kind in ObservationKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn end_reason_roundtrip() {
        for reason in [
            EndReason::Exit,
            EndReason::Clear,
            EndReason::Logout,
            EndReason::PromptInputExit,
            EndReason::Other,
        ] {
            let parsed: EndReason = reason.to_string().parse().unwrap();
            assert_eq!(reason, parsed);
        }
    }

    #[test]
    fn unknown_reason_becomes_other() {
        let parsed: EndReason = "power_failure".parse().unwrap();
        assert_eq!(parsed, EndReason::Other);

        let from_json: EndReason = serde_json::from_str("\"power_failure\"").unwrap();
        assert_eq!(from_json, EndReason::Other);
    }

    #[test]
    fn only_clear_skips_abort() {
        assert!(!EndReason::Clear.aborts_worker());
        assert!(EndReason::Exit.aborts_worker());
        assert!(EndReason::Logout.aborts_worker());
        assert!(EndReason::PromptInputExit.aborts_worker());
        assert!(EndReason::Other.aborts_worker());
    }
}
