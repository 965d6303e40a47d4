//! Show, edit, import and export the effective configuration.

use anyhow::{Context, Result};
use beacon_client::{Configuration, ImportReport};
use beacon_core::PreferenceKey;
use std::path::Path;

/// Print the effective configuration document.
pub fn show(config: &Configuration) -> Result<()> {
    println!("{}", render(config)?);
    Ok(())
}

/// Apply a free-text edit.
pub fn set(config: &Configuration, name: &str, value: &str) -> Result<()> {
    let key = config
        .set_from_text(name, value)
        .with_context(|| format!("Cannot set {}", name))?;
    println!("{} = {}", key, config.get(key));
    Ok(())
}

/// Return a key to its default.
pub fn reset(config: &Configuration, name: &str) -> Result<()> {
    let key = PreferenceKey::from_name(name)
        .with_context(|| format!("Unknown preference: {}", name))?;
    config.reset(key)?;
    println!("{} = {} (default)", key, config.get(key));
    Ok(())
}

/// Import a configuration document from `path`.
pub async fn import(config: &Configuration, path: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let report = config.import_str(&text).context("Import failed")?;
    print!("{}", render_report(&report));
    if !report.is_clean() {
        anyhow::bail!("{} preferences were rejected", report.errors.len());
    }
    Ok(())
}

/// Write the effective configuration to `path`, or print it.
pub async fn export(config: &Configuration, path: Option<&Path>) -> Result<()> {
    let document = render(config)?;
    match path {
        Some(path) => {
            tokio::fs::write(path, document + "\n")
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported configuration to {}", path.display());
        }
        None => println!("{}", document),
    }
    Ok(())
}

fn render(config: &Configuration) -> Result<String> {
    serde_json::to_string_pretty(&config.effective_configuration())
        .context("Failed to render configuration")
}

fn render_report(report: &ImportReport) -> String {
    let mut out = format!("Applied {} preferences\n", report.applied.len());
    for error in &report.errors {
        out.push_str(&format!("  rejected {}\n", error));
    }
    for name in &report.ignored {
        out.push_str(&format!("  ignored  {}\n", name));
    }
    out
}
