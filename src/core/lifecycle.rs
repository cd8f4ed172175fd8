// src/core/lifecycle.rs

//! Lifecycle event identifiers and the three dispatch points around each one.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookKeyError {
    #[error("Hook key cannot be empty.")]
    Empty,
    #[error("Hook key \"{0}\" has an empty segment.")]
    EmptySegment(String),
}

/// The dispatch point of a hook relative to its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Before,
    During,
    After,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Before, Phase::During, Phase::After];

    fn prefix(self) -> Option<&'static str> {
        match self {
            Phase::Before => Some("before"),
            Phase::During => None,
            Phase::After => Some("after"),
        }
    }
}

/// A fully-qualified lifecycle event such as `deploy:function:package`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(String);

impl EventId {
    pub fn new(event: impl Into<String>) -> Self {
        Self(event.into())
    }

    /// Namespaces a command's lifecycle event by the command key.
    pub fn for_command(command_key: &str, event: &str) -> Self {
        if command_key.is_empty() {
            Self(event.to_string())
        } else {
            Self(format!("{}:{}", command_key, event))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three hook keys dispatched for this event, in order.
    pub fn hook_keys(&self) -> [HookKey; 3] {
        Phase::ALL.map(|phase| HookKey {
            phase,
            event: self.clone(),
        })
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A hook registration target: a phase paired with an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookKey {
    pub phase: Phase,
    pub event: EventId,
}

impl HookKey {
    pub fn before(event: &str) -> Self {
        Self {
            phase: Phase::Before,
            event: EventId::new(event),
        }
    }

    pub fn during(event: &str) -> Self {
        Self {
            phase: Phase::During,
            event: EventId::new(event),
        }
    }

    pub fn after(event: &str) -> Self {
        Self {
            phase: Phase::After,
            event: EventId::new(event),
        }
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase.prefix() {
            Some(prefix) => write!(f, "{}:{}", prefix, self.event),
            None => write!(f, "{}", self.event),
        }
    }
}

impl FromStr for HookKey {
    type Err = HookKeyError;

    /// Parses `before:deploy:deploy`, `deploy:deploy` or `after:deploy:deploy`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HookKeyError::Empty);
        }

        let (phase, event) = match raw.split_once(':') {
            Some(("before", rest)) => (Phase::Before, rest),
            Some(("after", rest)) => (Phase::After, rest),
            _ => (Phase::During, raw),
        };
        if event.split(':').any(str::is_empty) {
            return Err(HookKeyError::EmptySegment(raw.to_string()));
        }

        Ok(Self {
            phase,
            event: EventId::new(event),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_phases() {
        let before: HookKey = "before:deploy:function".parse().unwrap();
        assert_eq!(before, HookKey::before("deploy:function"));

        let during: HookKey = "deploy:function".parse().unwrap();
        assert_eq!(during.phase, Phase::During);
        assert_eq!(during.event.as_str(), "deploy:function");

        let after: HookKey = "after:initialize".parse().unwrap();
        assert_eq!(after, HookKey::after("initialize"));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for raw in ["before:package:cleanup", "info:info", "after:remove:remove"] {
            let key: HookKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!("".parse::<HookKey>(), Err(HookKeyError::Empty));
        assert!(matches!(
            "before::deploy".parse::<HookKey>(),
            Err(HookKeyError::EmptySegment(_))
        ));
    }

    #[test]
    fn event_yields_keys_in_dispatch_order() {
        let event = EventId::for_command("deploy:function", "package");
        let keys: Vec<String> = event.hook_keys().iter().map(ToString::to_string).collect();
        assert_eq!(
            keys,
            vec![
                "before:deploy:function:package",
                "deploy:function:package",
                "after:deploy:function:package"
            ]
        );
    }
}
