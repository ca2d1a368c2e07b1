use anyhow::Result;
use std::path::Path;

use coffer_core::store::CredentialDb;
use coffer_core::types::{KeyVersionStat, RotationSelection};

use super::unlock::{load_config, open_key_provider};

/// Credentials a default `coffer rotate` would re-wrap under `current`.
fn stale_credentials(stats: &[KeyVersionStat], current: u32) -> u64 {
    let selection = RotationSelection {
        from_version: None,
        to_version: current,
    };
    stats
        .iter()
        .filter(|s| selection.matches(s.key_version))
        .map(|s| s.credentials)
        .sum()
}

pub async fn run(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = load_config(base_dir)?;
    let db = CredentialDb::open(Path::new(&config.coffer.db_path))?;

    let current = match open_key_provider(&config, cli_passphrase).await {
        Ok(provider) => provider.current_version().await?,
        Err(e) => {
            tracing::warn!(error = %e, "Master keys unavailable; skipping stale count");
            None
        }
    };

    let stats = db.key_version_stats()?;
    if stats.is_empty() {
        println!("No credentials stored. Run `coffer put <owner> <name>` to add one.");
    } else {
        let total: u64 = stats.iter().map(|s| s.credentials).sum();

        println!("Credentials: {total}");
        for s in &stats {
            println!("  key v{:<4} {:>8}", s.key_version, s.credentials);
        }
        match current {
            Some(current) => {
                let stale = stale_credentials(&stats, current);
                println!("\n  Current key: v{current}");
                if stale > 0 {
                    println!(
                        "  {stale} credentials are wrapped under a version older than v{current}; run `coffer rotate`."
                    );
                }
            }
            None => println!("\n  Current key: unknown"),
        }
    }

    let runs = db.list_rotation_runs(5)?;
    if !runs.is_empty() {
        println!("\nRecent rotations:");
        for r in &runs {
            let from = r
                .from_version
                .map(|v| format!("v{v}"))
                .unwrap_or_else(|| "stale".to_string());
            println!(
                "  {}  {} -> v{}  {}  {}/{} processed, {} errors  {}",
                r.id, from, r.to_version, r.status, r.processed, r.candidates, r.errors, r.started_at
            );
        }
    }

    Ok(())
}
