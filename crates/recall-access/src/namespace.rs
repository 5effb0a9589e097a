use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of store partitions, each with its own visibility scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Personal,
    Professional,
    People,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Professional => "professional",
            Self::People => "people",
        }
    }

    pub fn holds_memories(self) -> bool {
        matches!(self, Self::Personal | Self::Professional)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when a namespace name is outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown namespace '{0}' (expected personal, professional or people)")]
pub struct NamespaceParseError(pub String);

impl FromStr for Namespace {
    type Err = NamespaceParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "professional" => Ok(Self::Professional),
            "people" => Ok(Self::People),
            _ => Err(NamespaceParseError(raw.to_string())),
        }
    }
}

/// Operation kinds subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    List,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns true for operations that change the store.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Namespace, Operation};

    #[test]
    fn unit_namespace_parse_is_case_insensitive_and_trimmed() {
        assert_eq!(" Personal ".parse::<Namespace>(), Ok(Namespace::Personal));
        assert_eq!("PEOPLE".parse::<Namespace>(), Ok(Namespace::People));
        let error = "shared".parse::<Namespace>().expect_err("closed set");
        assert!(error.to_string().contains("unknown namespace 'shared'"));
    }

    #[test]
    fn unit_namespace_serde_uses_snake_case_names() {
        let encoded = serde_json::to_string(&Namespace::Professional).expect("encode");
        assert_eq!(encoded, "\"professional\"");
        assert!(!Namespace::People.holds_memories());
    }

    #[test]
    fn unit_operation_mutating_classification() {
        assert!(Operation::Delete.is_mutating());
        assert!(!Operation::List.is_mutating());
    }
}
