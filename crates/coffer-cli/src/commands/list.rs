use anyhow::Result;
use std::path::Path;

use coffer_core::store::CredentialDb;

use super::unlock::load_config;

pub fn run(owner: Option<&str>, base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let db = CredentialDb::open(Path::new(&config.coffer.db_path))?;

    let credentials = db.list_credentials(owner)?;

    if credentials.is_empty() {
        println!("No credentials found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:<30} {:>4} {}",
        "ID", "OWNER", "NAME", "KEY", "UPDATED"
    );
    println!("{}", "-".repeat(84));

    for c in &credentials {
        println!(
            "{:<8} {:<20} {:<30} {:>4} {}",
            c.id,
            c.owner,
            c.name,
            format!("v{}", c.key_version),
            c.updated_at,
        );
    }

    Ok(())
}
