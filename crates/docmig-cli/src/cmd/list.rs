use super::load_config;
use crate::output::{print_json, print_table};
use docmig_core::migrations;
use serde_json::json;
use std::path::Path;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let versions = migrations::all(config.catalog())?;

    if json {
        let value: Vec<serde_json::Value> = versions
            .iter()
            .map(|v| {
                json!({
                    "id": v.id,
                    "description": v.description,
                    "steps": v.steps().iter().map(|s| json!({
                        "name": s.name(),
                        "kind": s.kind(),
                        "target": s.target().to_string(),
                        "action": s.describe(),
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&value);
    }

    let rows = versions
        .iter()
        .flat_map(|v| {
            v.steps().iter().map(move |s| {
                vec![
                    v.id.clone(),
                    s.name().to_string(),
                    s.kind().to_string(),
                    s.target().to_string(),
                    s.describe(),
                ]
            })
        })
        .collect();
    print_table(&["VERSION", "STEP", "KIND", "TARGET", "ACTION"], rows);
    Ok(())
}
