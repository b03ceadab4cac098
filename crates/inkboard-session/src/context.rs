//! Per-batch interaction context.
//!
//! Every mutation batch carries its own capture policy and origin, so
//! several sessions can live in one process without shared flags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a mutation batch is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePolicy {
    /// Commit now as one durable increment
    Immediate,
    /// Fold into the open accumulation; committed on the next flush
    Eventual,
    /// Apply to the baseline, never to history
    Never,
}

impl CapturePolicy {
    /// Parse a policy name from an untrusted source.
    ///
    /// An unknown name is a programming error: it panics in debug builds and
    /// degrades to [`CapturePolicy::Never`] in release builds.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.parse() {
            Ok(policy) => policy,
            Err(err) => {
                debug_assert!(false, "{err}");
                tracing::error!(policy = raw, "unknown capture policy, treating as never");
                CapturePolicy::Never
            }
        }
    }
}

impl FromStr for CapturePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" | "immediately" => Ok(CapturePolicy::Immediate),
            "eventual" | "eventually" => Ok(CapturePolicy::Eventual),
            "never" => Ok(CapturePolicy::Never),
            _ => Err(format!("unknown capture policy {s:?}")),
        }
    }
}

impl fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapturePolicy::Immediate => "immediate",
            CapturePolicy::Eventual => "eventual",
            CapturePolicy::Never => "never",
        };
        f.write_str(name)
    }
}

/// Where a mutation batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Local,
    Remote,
    Programmatic,
}

/// Context attached to a mutation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionContext {
    pub policy: CapturePolicy,
    #[serde(default)]
    pub origin: Origin,
}

impl InteractionContext {
    pub fn new(policy: CapturePolicy, origin: Origin) -> Self {
        Self { policy, origin }
    }

    /// A local edit committed right away
    pub fn immediate() -> Self {
        Self::new(CapturePolicy::Immediate, Origin::Local)
    }

    /// A local edit that is part of an ongoing interaction
    pub fn eventual() -> Self {
        Self::new(CapturePolicy::Eventual, Origin::Local)
    }

    /// An update received from a collaborator
    pub fn remote() -> Self {
        Self::new(CapturePolicy::Never, Origin::Remote)
    }
}
