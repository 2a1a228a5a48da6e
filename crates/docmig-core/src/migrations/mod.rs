//! The built-in migration versions, in the order they must be applied.

pub mod v1_10_1;
pub mod v1_10_2;

use crate::catalog::Catalog;
use crate::error::{MigrateError, Result};
use crate::version::Version;

/// Every built-in version, oldest first. Fails if `catalog` lacks a
/// collection one of the versions addresses.
pub fn all(catalog: &Catalog) -> Result<Vec<Version>> {
    Ok(vec![v1_10_1::version(catalog)?, v1_10_2::version(catalog)?])
}

/// The versions named in `ids`, kept in declared order. An empty `ids`
/// selects every version.
pub fn select(catalog: &Catalog, ids: &[String]) -> Result<Vec<Version>> {
    let versions = all(catalog)?;
    if let Some(unknown) = ids.iter().find(|id| !versions.iter().any(|v| &v.id == *id)) {
        return Err(MigrateError::UnknownVersion(unknown.clone()));
    }
    if ids.is_empty() {
        return Ok(versions);
    }
    Ok(versions
        .into_iter()
        .filter(|v| ids.contains(&v.id))
        .collect())
}

/// (namespace, collection) pairs the built-in versions address.
pub fn required_collections() -> impl Iterator<Item = (&'static str, &'static str)> {
    v1_10_1::TAGGED_COLLECTIONS
        .iter()
        .flat_map(|(ns, colls)| colls.iter().map(move |c| (*ns, *c)))
        .chain(v1_10_2::COLLECTIONS.iter().copied())
}
