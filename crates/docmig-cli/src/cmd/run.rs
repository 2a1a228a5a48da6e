use super::{load_config, open_store};
use crate::output::{print_json, print_table};
use anyhow::Context;
use docmig_core::migrations;
use docmig_core::runner::Runner;
use std::path::Path;

pub fn run(
    config_path: &Path,
    versions: &[String],
    workers: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let selected =
        migrations::select(config.catalog(), versions).context("failed to build versions")?;
    let store = open_store(config_path, &config)?;

    let report = Runner::new(&store)
        .with_workers(workers.unwrap_or(config.runner.workers))
        .run(&selected);

    if json {
        print_json(&report)?;
    } else {
        let rows = report
            .results()
            .map(|(version, r)| {
                vec![
                    version.to_string(),
                    r.step.clone(),
                    r.target.to_string(),
                    r.status().to_string(),
                    r.scanned.to_string(),
                    r.succeeded.to_string(),
                    r.affected.to_string(),
                    r.failures.len().to_string(),
                    r.duration_ms.to_string(),
                ]
            })
            .collect();
        print_table(
            &[
                "VERSION", "STEP", "TARGET", "STATUS", "SCANNED", "APPLIED", "AFFECTED",
                "FAILURES", "MS",
            ],
            rows,
        );
        for (version, r) in report.failed_steps() {
            if let Some(error) = &r.error {
                eprintln!("{version} {}: {error}", r.step);
            }
            for f in &r.failures {
                let id = f.id.as_ref().map(|id| id.to_string()).unwrap_or_default();
                eprintln!("{version} {} [{id}]: {}", r.step, f.message);
            }
        }
    }

    let unfinished = report.failed_steps().count();
    if unfinished > 0 {
        anyhow::bail!("{unfinished} step(s) did not complete");
    }
    Ok(())
}
