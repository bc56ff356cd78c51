//! Conflict policies and resolvers.

use super::conflict::Conflict;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Side chosen for a conflicting object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Keep the local changes; the common state is restored before replay.
    Local,
    /// Keep the master changes; local changes to the object are dropped.
    Master,
    /// Keep master's object and replay local changes on a duplicate.
    Both,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Master => "master",
            Self::Both => "both",
        })
    }
}

/// Answer of a [`ConflictResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverAnswer {
    /// Keep local.
    Local,
    /// Keep master.
    Master,
    /// Keep both.
    Both,
    /// Stop the merge; `continue` asks again.
    Abort,
}

impl From<Resolution> for ResolverAnswer {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Local => Self::Local,
            Resolution::Master => Self::Master,
            Resolution::Both => Self::Both,
        }
    }
}

/// How conflicts without an automatic answer are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Always keep local.
    Local,
    /// Always keep master.
    Master,
    /// Always keep both.
    Both,
    /// Ask the resolver.
    #[default]
    Interactive,
}

impl ConflictPolicy {
    /// The fixed resolution of this policy, if it has one.
    #[must_use]
    pub const fn fixed(self) -> Option<Resolution> {
        match self {
            Self::Local => Some(Resolution::Local),
            Self::Master => Some(Resolution::Master),
            Self::Both => Some(Resolution::Both),
            Self::Interactive => None,
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "master" => Ok(Self::Master),
            "both" => Ok(Self::Both),
            "interactive" => Ok(Self::Interactive),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Master => "master",
            Self::Both => "both",
            Self::Interactive => "interactive",
        })
    }
}

/// Decides a conflict the automatic rule and the policy left open.
pub trait ConflictResolver {
    /// Chooses a side for `conflict`.
    fn resolve(&mut self, conflict: &Conflict) -> ResolverAnswer;
}

/// Never decides; every prompt aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl ConflictResolver for NoPrompt {
    fn resolve(&mut self, _conflict: &Conflict) -> ResolverAnswer {
        ResolverAnswer::Abort
    }
}

/// Gives the same answer every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub ResolverAnswer);

impl ConflictResolver for FixedResolver {
    fn resolve(&mut self, _conflict: &Conflict) -> ResolverAnswer {
        self.0
    }
}

/// Replays a list of answers, then aborts. Records what it was asked.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResolver {
    answers: VecDeque<ResolverAnswer>,
    /// Conflicts presented so far.
    pub asked: Vec<Conflict>,
}

impl ScriptedResolver {
    /// A resolver answering `answers` in order.
    pub fn new(answers: impl IntoIterator<Item = ResolverAnswer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }
}

impl ConflictResolver for ScriptedResolver {
    fn resolve(&mut self, conflict: &Conflict) -> ResolverAnswer {
        self.asked.push(conflict.clone());
        self.answers.pop_front().unwrap_or(ResolverAnswer::Abort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing() {
        assert_eq!("Master".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Master));
        assert_eq!(ConflictPolicy::Both.to_string(), "both");
        assert!("sideways".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::Interactive.fixed(), None);
        assert_eq!(ConflictPolicy::Local.fixed(), Some(Resolution::Local));
    }
}
