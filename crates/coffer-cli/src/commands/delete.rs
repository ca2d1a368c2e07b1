use anyhow::Result;
use std::path::Path;

use coffer_core::CofferError;
use coffer_core::store::CredentialDb;

use super::unlock::load_config;

pub fn run(owner: &str, name: &str, base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let db = CredentialDb::open(Path::new(&config.coffer.db_path))?;

    if !db.delete_credential(owner, name)? {
        return Err(CofferError::CredentialNotFound(format!("{owner}/{name}")).into());
    }
    println!("Deleted {owner}/{name}");
    Ok(())
}
