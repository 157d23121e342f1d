use crate::domain::result::{DomainError, DomainResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const ENTRY_SEPARATOR: char = ';';
const PAIR_SEPARATOR: char = '=';

/// Property name to feature id routing table for a single thing.
///
/// Travels as message metadata in the flat `prop=feature;` encoding, so
/// neither side of an entry may contain `=` or `;`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyFeatureMapping {
    entries: BTreeMap<String, String>,
}

impl PropertyFeatureMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `property` to `feature` unless the property is already mapped.
    ///
    /// Returns the feature that keeps the property when the insert is ignored.
    pub fn insert(
        &mut self,
        property: impl Into<String>,
        feature: impl Into<String>,
    ) -> DomainResult<Option<String>> {
        let property = property.into();
        let feature = feature.into();

        for name in [&property, &feature] {
            if name.is_empty() || name.contains([ENTRY_SEPARATOR, PAIR_SEPARATOR]) {
                return Err(DomainError::Mapping(format!(
                    "name '{}' cannot be encoded in a property feature mapping",
                    name
                )));
            }
        }

        if let Some(owner) = self.entries.get(&property) {
            return Ok(Some(owner.clone()));
        }

        self.entries.insert(property, feature);
        Ok(None)
    }

    pub fn feature_for(&self, property: &str) -> Option<&str> {
        self.entries.get(property).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PropertyFeatureMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (property, feature) in &self.entries {
            write!(f, "{property}{PAIR_SEPARATOR}{feature}{ENTRY_SEPARATOR}")?;
        }
        Ok(())
    }
}

impl FromStr for PropertyFeatureMapping {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mapping = Self::new();

        for segment in s.split(ENTRY_SEPARATOR).filter(|seg| !seg.is_empty()) {
            let (property, feature) = segment.split_once(PAIR_SEPARATOR).ok_or_else(|| {
                DomainError::Mapping(format!("malformed mapping segment '{}'", segment))
            })?;
            mapping.insert(property, feature)?;
        }

        Ok(mapping)
    }
}
