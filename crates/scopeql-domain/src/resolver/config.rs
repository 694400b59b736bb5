//! Configuration for the permission resolver.

use std::fmt;
use std::str::FromStr;

/// What to do with field names that do not exist on a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownFieldPolicy {
    /// Reject the request with a validation error.
    #[default]
    Error,
    /// Drop the unknown name and carry on.
    Ignore,
}

impl FromStr for UnknownFieldPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown field policy '{other}', expected 'error' or 'ignore'"
            )),
        }
    }
}

impl fmt::Display for UnknownFieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Ignore => "ignore",
        })
    }
}

/// Configuration for the permission resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub unknown_fields: UnknownFieldPolicy,
    /// Upper bound on the requested read depth.
    pub max_depth: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFieldPolicy::Error,
            max_depth: 5,
        }
    }
}

impl ResolverConfig {
    pub fn with_unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub(crate) fn rejects_unknown(&self) -> bool {
        self.unknown_fields == UnknownFieldPolicy::Error
    }
}
