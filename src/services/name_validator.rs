use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidNameReason {
    Empty,
    NotAllowed,
}

impl InvalidNameReason {
    pub fn code(&self) -> &'static str {
        match self {
            InvalidNameReason::Empty => "empty",
            InvalidNameReason::NotAllowed => "not_allowed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    #[error("Missing ?name= parameter")]
    Empty,

    #[error("Unknown image name '{0}'")]
    NotAllowed(String),
}

impl InvalidName {
    pub fn reason(&self) -> InvalidNameReason {
        match self {
            InvalidName::Empty => InvalidNameReason::Empty,
            InvalidName::NotAllowed(_) => InvalidNameReason::NotAllowed,
        }
    }
}

/// A slot name that passed validation. Only `NameValidator` can build one,
/// so holding a `SlotName` proves the value is an allowlisted literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotName(String);

impl SlotName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public file name of the slot's asset, e.g. `tom.jpg`.
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.0)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable set of permitted slot names.
#[derive(Debug, Clone)]
pub struct SlotAllowlist {
    names: Arc<BTreeSet<String>>,
}

impl SlotAllowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| normalize(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            names: Arc::new(names),
        }
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.names.contains(normalized)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NameValidator {
    allowlist: SlotAllowlist,
}

impl NameValidator {
    pub fn new(allowlist: SlotAllowlist) -> Self {
        Self { allowlist }
    }

    pub fn allowlist(&self) -> &SlotAllowlist {
        &self.allowlist
    }

    /// Trims and lowercases `raw`, then checks it against the allowlist.
    ///
    /// Path separators, `..` and absolute paths can never pass because only
    /// allowlisted literals are accepted.
    pub fn validate(&self, raw: &str) -> Result<SlotName, InvalidName> {
        let name = normalize(raw);

        if name.is_empty() {
            return Err(InvalidName::Empty);
        }

        if !self.allowlist.contains(&name) {
            tracing::warn!("Rejected slot name: {:?}", raw);
            return Err(InvalidName::NotAllowed(name));
        }

        Ok(SlotName(name))
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}
