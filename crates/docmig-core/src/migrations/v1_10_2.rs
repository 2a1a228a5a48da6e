//! v1.10.2: managed tags for cloud services, service account backfill and
//! cleanup of data the new inventory model no longer supports.

use serde_json::json;

use crate::catalog::Catalog;
use crate::document::{Filter, Update};
use crate::error::Result;
use crate::step::{BatchStep, CorrectiveStep, Selector, Transform};
use crate::version::Version;

pub const ID: &str = "v1.10.2";

pub const COLLECTIONS: &[(&str, &str)] = &[
    ("INVENTORY", "cloud_service"),
    ("INVENTORY", "record"),
    ("IDENTITY", "service_account"),
    ("FILE_MANAGER", "file"),
];

/// aws (cloud_service_group, cloud_service_type) pairs whose records are
/// dropped.
const RETIRED_AWS_RECORD_TYPES: &[(&str, &str)] = &[
    ("IAM", "Policy"),
    ("IAM", "Group"),
    ("EKS", "Cluster"),
    ("EKS", "NodeGroup"),
    ("DirectConnect", "DirectConnectGateway"),
];

pub fn version(catalog: &Catalog) -> Result<Version> {
    let cloud_service = catalog.resolve("INVENTORY", "cloud_service")?;
    let record = catalog.resolve("INVENTORY", "record")?;

    let retired_services = RETIRED_AWS_RECORD_TYPES
        .iter()
        .map(|(group, kind)| {
            Filter::from_json(json!({
                "provider": "aws",
                "cloud_service_group": group,
                "cloud_service_type": kind,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Version::new(ID, "managed cloud service tags and inventory cleanup")
        .step(BatchStep::new(
            "inventory_cloud_service_tags",
            cloud_service.clone(),
            Transform::managed_tags(),
        ))
        .step(CorrectiveStep::delete_many(
            "inventory_cloud_service_delete_azure_vms",
            cloud_service.clone(),
            Filter::from_json(json!({
                "provider": "azure",
                "cloud_service_group": "Compute",
                "cloud_service_type": "VirtualMachine",
            }))?,
        ))
        .step(CorrectiveStep::update_many(
            "identity_service_account_backfill",
            catalog.resolve("IDENTITY", "service_account")?,
            Filter::from_json(json!({"service_account_type": {"$ne": "TRUSTED"}}))?,
            Update::from_json(json!({
                "$set": {"service_account_type": "GENERAL", "scope": "PROJECT"}
            }))?,
            true,
        ))
        .step(CorrectiveStep::delete_many(
            "file_manager_file_delete_all",
            catalog.resolve("FILE_MANAGER", "file")?,
            Filter::all(),
        ))
        .step(
            BatchStep::new("inventory_record_delete_wrong_records", record, Transform::Delete)
                .with_selector(Selector::ParentKeys {
                    parent: cloud_service,
                    parent_filters: retired_services,
                    parent_field: "cloud_service_id".into(),
                    child_field: "cloud_service_id".into(),
                }),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentId};
    use crate::observe::Silent;
    use crate::step::{CancelToken, StepStatus};
    use crate::store::MemoryStore;
    use serde_json::Value;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let services = [
            json!({"_id": "cs-iam", "cloud_service_id": "cs-iam", "provider": "aws", "cloud_service_group": "IAM", "cloud_service_type": "Policy", "tags": [{"key": "owner", "value": "sec"}]}),
            json!({"_id": "cs-eks", "cloud_service_id": "cs-eks", "provider": "aws", "cloud_service_group": "EKS", "cloud_service_type": "Cluster", "tags": {}}),
            json!({"_id": "cs-ec2", "cloud_service_id": "cs-ec2", "provider": "aws", "cloud_service_group": "EC2", "cloud_service_type": "Instance", "tags": {"env": "prod"}}),
            json!({"_id": "cs-vm", "cloud_service_id": "cs-vm", "provider": "azure", "cloud_service_group": "Compute", "cloud_service_type": "VirtualMachine", "tags": {}}),
        ];
        for service in services {
            store.insert("INVENTORY", "cloud_service", doc(service)).unwrap();
        }
        for (id, parent) in [("r1", "cs-iam"), ("r2", "cs-iam"), ("r3", "cs-eks"), ("r4", "cs-ec2")] {
            store
                .insert("INVENTORY", "record", doc(json!({"_id": id, "cloud_service_id": parent})))
                .unwrap();
        }
        store
            .insert("IDENTITY", "service_account", doc(json!({"_id": "sa-t", "service_account_type": "TRUSTED"})))
            .unwrap();
        store
            .insert("IDENTITY", "service_account", doc(json!({"_id": "sa-x"})))
            .unwrap();
        store.insert("FILE_MANAGER", "file", doc(json!({"_id": "f1"}))).unwrap();
        store
    }

    #[test]
    fn applies_all_five_steps() {
        let store = seeded();
        let version = version(&Catalog::builtin()).unwrap();
        let results = version.apply(&store, &Silent, &CancelToken::new());

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.status() == StepStatus::Complete));

        let ec2 = store.get("INVENTORY", "cloud_service", &DocumentId::new("cs-ec2")).unwrap();
        assert_eq!(
            ec2["tags"],
            json!([{"key": "env", "value": "prod", "type": "MANAGED", "provider": "aws"}])
        );
        assert!(store.get("INVENTORY", "cloud_service", &DocumentId::new("cs-vm")).is_none());

        let sa = store.get("IDENTITY", "service_account", &DocumentId::new("sa-x")).unwrap();
        assert_eq!(sa["scope"], json!("PROJECT"));
        let trusted = store.get("IDENTITY", "service_account", &DocumentId::new("sa-t")).unwrap();
        assert!(trusted.get("scope").is_none());

        assert!(store.documents("FILE_MANAGER", "file").is_empty());

        let records: Vec<Value> = store
            .documents("INVENTORY", "record")
            .into_iter()
            .map(|d| d["_id"].clone())
            .collect();
        assert_eq!(records, vec![json!("r4")]);
        assert_eq!(results[4].succeeded, 3);
    }

    #[test]
    fn second_run_changes_nothing() {
        let store = seeded();
        let version = version(&Catalog::builtin()).unwrap();
        version.apply(&store, &Silent, &CancelToken::new());
        let services = store.documents("INVENTORY", "cloud_service");
        let records = store.documents("INVENTORY", "record");
        let accounts = store.documents("IDENTITY", "service_account");

        let again = version.apply(&store, &Silent, &CancelToken::new());

        assert!(again.iter().all(|r| r.status() == StepStatus::Complete));
        assert_eq!(again[0].attempted, 0);
        assert_eq!(again[4].attempted, 0);
        assert_eq!(store.documents("INVENTORY", "cloud_service"), services);
        assert_eq!(store.documents("INVENTORY", "record"), records);
        assert_eq!(store.documents("IDENTITY", "service_account"), accounts);
    }
}
