use crate::domain::result::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Twin identifier of the form `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingId {
    namespace: String,
    name: String,
}

impl ThingId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> DomainResult<Self> {
        let namespace = namespace.into();
        let name = name.into();
        if namespace.is_empty() || name.is_empty() {
            return Err(DomainError::InvalidThingId(format!("{}:{}", namespace, name)));
        }
        Ok(Self { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier usable as a single NATS subject token.
    pub fn subject_token(&self) -> String {
        sanitize_subject_token(&self.to_string())
    }
}

impl FromStr for ThingId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Err(DomainError::InvalidThingId(s.to_string())),
        }
    }
}

impl TryFrom<String> for ThingId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ThingId> for String {
    fn from(value: ThingId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Replace characters NATS treats as token separators or wildcards.
///
/// Not injective: `a.b:c` and `a_b:c` map to the same token. Pipeline names
/// add a digest of the raw id, and routed messages carry the raw id in their
/// metadata, so a shared subject never mixes up two things.
pub fn sanitize_subject_token(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | ' ' | '*' | '>' | '\t' => '_',
            other => other,
        })
        .collect()
}

/// Subset of a twin as returned by the twin platform.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    pub thing_id: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub features: Option<BTreeMap<String, Feature>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Feature {
    /// Feature definition identifiers; the first one addresses the feature's description.
    #[serde(default)]
    pub definition: Option<Vec<String>>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}
