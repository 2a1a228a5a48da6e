pub mod config;
pub mod data;
pub mod list;
pub mod run;

use anyhow::Context;
use docmig_core::config::Config;
use docmig_core::store::RedbStore;
use std::path::Path;

pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| {
        format!(
            "failed to load config (run `docmig config init` to create {})",
            path.display()
        )
    })
}

pub(crate) fn open_store(config_path: &Path, config: &Config) -> anyhow::Result<RedbStore> {
    let path = config.store_path(config_path);
    RedbStore::open(&path, config.store.page_size)
        .with_context(|| format!("failed to open store at {}", path.display()))
}
