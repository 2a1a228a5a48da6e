use super::{load_config, open_store};
use crate::output::{print_json, print_json_lines};
use anyhow::Context;
use docmig_core::document::Document;
use serde_json::Value;
use std::path::Path;

// ---------------------------------------------------------------------------
// import
// ---------------------------------------------------------------------------

pub fn import(
    config_path: &Path,
    namespace: &str,
    collection: &str,
    file: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let target = config.catalog().resolve(namespace, collection)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let docs = parse_documents(&text).with_context(|| format!("in {}", file.display()))?;

    let store = open_store(config_path, &config)?;
    let ids = store
        .insert_many(&target.namespace, &target.collection, &docs)
        .with_context(|| format!("failed to import into {target}"))?;

    if json {
        print_json(&serde_json::json!({
            "target": target.to_string(),
            "imported": ids.len(),
        }))?;
    } else {
        println!("Imported {} document(s) into {target}", ids.len());
    }
    Ok(())
}

/// Accepts either a JSON array of objects or one object per line.
fn parse_documents(text: &str) -> anyhow::Result<Vec<Document>> {
    let values: Vec<Value> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).context("invalid JSON array")?
    } else {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<Value>(line).with_context(|| format!("invalid JSON on line {}", n + 1))
            })
            .collect::<anyhow::Result<_>>()?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Object(doc) => Ok(doc),
            other => anyhow::bail!("document #{i} is not an object: {other}"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// dump
// ---------------------------------------------------------------------------

pub fn dump(config_path: &Path, namespace: &str, collection: &str, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let target = config.catalog().resolve(namespace, collection)?;
    let store = open_store(config_path, &config)?;
    let docs = store
        .documents(&target.namespace, &target.collection)
        .with_context(|| format!("failed to read {target}"))?;
    if json {
        print_json(&docs)
    } else {
        print_json_lines(&docs)
    }
}
