//! v1.10.1: every tagged resource stores `tags` as a key/value mapping.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::step::{BatchStep, Transform};
use crate::version::Version;

pub const ID: &str = "v1.10.1";

pub const TAGGED_COLLECTIONS: &[(&str, &[&str])] = &[
    (
        "IDENTITY",
        &[
            "project_group",
            "role_binding",
            "project",
            "user",
            "service_account",
            "domain",
            "role",
            "provider",
            "policy",
        ],
    ),
    ("MONITORING", &["data_source"]),
    ("STATISTICS", &["schedule"]),
    ("SECRET", &["secret", "secret_group"]),
    ("REPOSITORY", &["schema", "plugin", "policy"]),
    ("PLUGIN", &["supervisor"]),
    ("CONFIG", &["user_config", "domain_config"]),
    (
        "INVENTORY",
        &["resource_group", "region", "collector", "cloud_service_type"],
    ),
];

pub fn version(catalog: &Catalog) -> Result<Version> {
    let mut version = Version::new(ID, "convert tags from a record list to a key/value mapping");
    for (namespace, collections) in TAGGED_COLLECTIONS {
        for collection in *collections {
            let target = catalog.resolve(namespace, collection)?;
            version = version.step(BatchStep::new(
                format!("{}_{}_change_tags", namespace.to_lowercase(), collection),
                target,
                Transform::normalize_tags(),
            ));
        }
    }
    Ok(version)
}
