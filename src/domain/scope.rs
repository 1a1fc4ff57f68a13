//! Ownership scope inside a tenant: account, organization or project.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{KeywardError, Result};

/// Org and project identifiers; they become path segments in remote stores
static SCOPE_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("scope identifier regex is valid")
});

/// Account / org / project tuple. An empty scope is the account itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Scope {
    pub fn account() -> Self {
        Self::default()
    }

    pub fn org(org: impl Into<String>) -> Self {
        Self { org: Some(org.into()), project: None }
    }

    pub fn project(org: impl Into<String>, project: impl Into<String>) -> Self {
        Self { org: Some(org.into()), project: Some(project.into()) }
    }

    pub fn is_account(&self) -> bool {
        self.org.is_none() && self.project.is_none()
    }

    /// A project requires its org.
    pub fn validate(&self) -> Result<()> {
        if self.project.is_some() && self.org.is_none() {
            return Err(KeywardError::validation_field(
                "A project scope requires an organization",
                "scope",
            ));
        }
        for identifier in self.org.iter().chain(self.project.iter()) {
            if !SCOPE_IDENTIFIER.is_match(identifier) {
                return Err(KeywardError::validation_field(
                    format!(
                        "Invalid scope identifier '{}': use letters, digits, '.', '_' or '-'",
                        identifier
                    ),
                    "scope",
                ));
            }
        }
        Ok(())
    }

    /// True if `other` is this scope or nested below it
    pub fn contains(&self, other: &Scope) -> bool {
        match (&self.org, &self.project) {
            (None, _) => true,
            (Some(org), None) => other.org.as_ref() == Some(org),
            (Some(org), Some(project)) => {
                other.org.as_ref() == Some(org) && other.project.as_ref() == Some(project)
            }
        }
    }

    /// Storage key component; empty string stands for "unset".
    pub(crate) fn org_key(&self) -> &str {
        self.org.as_deref().unwrap_or("")
    }

    pub(crate) fn project_key(&self) -> &str {
        self.project.as_deref().unwrap_or("")
    }

    pub(crate) fn from_keys(org: String, project: String) -> Self {
        Self {
            org: (!org.is_empty()).then_some(org),
            project: (!project.is_empty()).then_some(project),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.org, &self.project) {
            (None, _) => write!(f, "account"),
            (Some(org), None) => write!(f, "org:{}", org),
            (Some(org), Some(project)) => write!(f, "project:{}/{}", org, project),
        }
    }
}
