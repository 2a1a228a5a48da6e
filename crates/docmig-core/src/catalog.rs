use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::migrations;

/// A (namespace, collection) pair that has been checked against a [`Catalog`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionRef {
    pub namespace: String,
    pub collection: String,
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.collection)
    }
}

/// The set of collections migrations are allowed to address, grouped by
/// service namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, BTreeSet<String>>);

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every collection touched by the built-in versions.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (namespace, collection) in migrations::required_collections() {
            catalog.add(namespace, collection);
        }
        catalog
    }

    pub fn add(&mut self, namespace: &str, collection: &str) {
        self.0
            .entry(namespace.to_string())
            .or_default()
            .insert(collection.to_string());
    }

    pub fn contains(&self, namespace: &str, collection: &str) -> bool {
        self.0
            .get(namespace)
            .is_some_and(|c| c.contains(collection))
    }

    /// Resolve a pair, failing with `UnknownCollection` if it is not listed.
    pub fn resolve(&self, namespace: &str, collection: &str) -> Result<CollectionRef> {
        if !self.contains(namespace, collection) {
            return Err(MigrateError::UnknownCollection {
                namespace: namespace.to_string(),
                collection: collection.to_string(),
            });
        }
        Ok(CollectionRef {
            namespace: namespace.to_string(),
            collection: collection.to_string(),
        })
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_knows_every_service() {
        let catalog = Catalog::builtin();
        assert!(catalog.contains("IDENTITY", "service_account"));
        assert!(catalog.contains("INVENTORY", "record"));
        assert!(catalog.contains("FILE_MANAGER", "file"));
        assert_eq!(catalog.namespaces().count(), 9);
    }

    #[test]
    fn resolve_rejects_unknown_pairs() {
        let catalog = Catalog::builtin();
        let err = catalog.resolve("IDENTITY", "nope").unwrap_err();
        assert!(matches!(err, MigrateError::UnknownCollection { .. }));
        let ok = catalog.resolve("SECRET", "secret").unwrap();
        assert_eq!(ok.to_string(), "SECRET.secret");
    }
}
