//! Pull progress values.
//!
//! A progress value is a single-key mapping from a state name to a
//! percentage, e.g. `{"Downloading": 40}`. `Complete` always carries 100 and
//! `Failure` always carries 0.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProgressParseError;

/// State of an image pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProgressState {
    Downloading,
    Extracting,
    Complete,
    Failure,
}

impl ProgressState {
    /// Order in which states win when several nodes report at once.
    pub const REPORTING_PRIORITY: [ProgressState; 4] = [
        ProgressState::Failure,
        ProgressState::Downloading,
        ProgressState::Extracting,
        ProgressState::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Downloading => "Downloading",
            ProgressState::Extracting => "Extracting",
            ProgressState::Complete => "Complete",
            ProgressState::Failure => "Failure",
        }
    }

    /// Returns true for `Complete` and `Failure`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Complete | ProgressState::Failure)
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressState {
    type Err = ProgressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Downloading" => Ok(ProgressState::Downloading),
            "Extracting" => Ok(ProgressState::Extracting),
            "Complete" => Ok(ProgressState::Complete),
            "Failure" => Ok(ProgressState::Failure),
            other => Err(ProgressParseError::UnknownState(other.to_string())),
        }
    }
}

/// A single progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Progress {
    state: ProgressState,
    percent: u8,
}

impl Progress {
    pub const COMPLETE: Progress = Progress {
        state: ProgressState::Complete,
        percent: 100,
    };

    pub const FAILURE: Progress = Progress {
        state: ProgressState::Failure,
        percent: 0,
    };

    /// Builds a progress value, pinning terminal states to their fixed
    /// percentages and clamping the rest to 0..=100.
    pub fn new(state: ProgressState, percent: u32) -> Self {
        match state {
            ProgressState::Complete => Self::COMPLETE,
            ProgressState::Failure => Self::FAILURE,
            _ => Self {
                state,
                percent: percent.min(100) as u8,
            },
        }
    }

    pub fn downloading(percent: u32) -> Self {
        Self::new(ProgressState::Downloading, percent)
    }

    pub fn extracting(percent: u32) -> Self {
        Self::new(ProgressState::Extracting, percent)
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Encodes the value for the push channel, e.g. `Downloading:40`.
    pub fn to_text(&self) -> String {
        format!("{}:{}", self.state, self.percent)
    }

    /// Decodes the push-channel text form.
    pub fn parse_text(text: &str) -> Result<Self, ProgressParseError> {
        let (state, percent) = text
            .split_once(':')
            .ok_or_else(|| ProgressParseError::MalformedText(text.to_string()))?;
        let state: ProgressState = state.parse()?;
        let percent = parse_percent(percent.trim())?;
        Ok(Self::new(state, percent))
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}%", self.state, self.percent)
    }
}

fn parse_percent(raw: &str) -> Result<u32, ProgressParseError> {
    let value: i64 = raw
        .parse()
        .map_err(|_| ProgressParseError::InvalidPercent(raw.to_string()))?;
    Ok(value.clamp(0, 100) as u32)
}

impl Serialize for Progress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.state.as_str(), &self.percent)?;
        map.end()
    }
}

/// Percent as sent by peers: either a number or a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPercent {
    Number(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for Progress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<ProgressState, RawPercent>::deserialize(deserializer)?;
        if raw.len() != 1 {
            return Err(D::Error::custom(ProgressParseError::StateCount(raw.len())));
        }
        let Some((state, percent)) = raw.into_iter().next() else {
            return Err(D::Error::custom(ProgressParseError::StateCount(0)));
        };
        let percent = match percent {
            RawPercent::Number(n) => n.clamp(0, 100) as u32,
            RawPercent::Text(s) => parse_percent(s.trim()).map_err(D::Error::custom)?,
        };
        Ok(Progress::new(state, percent))
    }
}

/// One message on the per-image push channel: `{"text": "<State>:<pct>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub text: String,
}

impl ProgressEvent {
    pub fn progress(&self) -> Result<Progress, ProgressParseError> {
        Progress::parse_text(&self.text)
    }
}

impl From<Progress> for ProgressEvent {
    fn from(progress: Progress) -> Self {
        Self {
            text: progress.to_text(),
        }
    }
}

/// Final body of the long-running pull request: `{"state": "Complete"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub state: ProgressState,
}

impl PullOutcome {
    pub fn is_complete(&self) -> bool {
        self.state == ProgressState::Complete
    }
}

impl From<Progress> for PullOutcome {
    fn from(progress: Progress) -> Self {
        let state = if progress.state() == ProgressState::Complete {
            ProgressState::Complete
        } else {
            ProgressState::Failure
        };
        Self { state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_values_are_pinned() {
        assert_eq!(Progress::new(ProgressState::Complete, 3), Progress::COMPLETE);
        assert_eq!(Progress::new(ProgressState::Failure, 77), Progress::FAILURE);
        assert_eq!(Progress::downloading(250).percent(), 100);
    }

    #[test]
    fn test_single_key_json() {
        let json = serde_json::to_string(&Progress::extracting(12)).unwrap();
        assert_eq!(json, r#"{"Extracting":12}"#);

        let parsed: Progress = serde_json::from_str(r#"{"Downloading":"40"}"#).unwrap();
        assert_eq!(parsed, Progress::downloading(40));

        let parsed: Progress = serde_json::from_str(r#"{"Complete":5}"#).unwrap();
        assert_eq!(parsed, Progress::COMPLETE);
    }

    #[test]
    fn test_rejects_multiple_states() {
        let result: Result<Progress, _> =
            serde_json::from_str(r#"{"Downloading":10,"Extracting":5}"#);
        assert!(result.is_err());

        let result: Result<Progress, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_text_form() {
        assert_eq!(Progress::downloading(40).to_text(), "Downloading:40");
        assert_eq!(
            Progress::parse_text("Extracting: 7").unwrap(),
            Progress::extracting(7)
        );
        assert!(matches!(
            Progress::parse_text("Downloading"),
            Err(ProgressParseError::MalformedText(_))
        ));
        assert!(matches!(
            Progress::parse_text("Paused:3"),
            Err(ProgressParseError::UnknownState(_))
        ));
    }

    #[test]
    fn test_event_roundtrip_through_json() {
        let event = ProgressEvent::from(Progress::downloading(55));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"text":"Downloading:55"}"#);
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.progress().unwrap(), Progress::downloading(55));
    }

    #[test]
    fn test_pull_outcome() {
        let outcome: PullOutcome = serde_json::from_str(r#"{"state":"Complete"}"#).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(
            PullOutcome::from(Progress::extracting(90)).state,
            ProgressState::Failure
        );
    }
}
