use anyhow::{Context, Result};
use memory_plugin::{build_plugin, driver_ids_from_env, SPAWN_LOG_ENV};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn main() -> Result<()> {
    drivehub_core::init_plugin_logging()?;

    if let Some(path) = std::env::var_os(SPAWN_LOG_ENV) {
        record_spawn(Path::new(&path))?;
    }

    let ids = driver_ids_from_env();
    tracing::debug!(drivers = ?ids, "starting memory plugin");
    drivehub_plugin::serve(build_plugin(&ids))?;
    Ok(())
}

fn record_spawn(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open spawn log {}", path.display()))?;
    writeln!(file, "{}", std::process::id())
        .with_context(|| format!("failed to write spawn log {}", path.display()))?;
    Ok(())
}
