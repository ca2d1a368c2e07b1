mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Envelope-encrypted credential vault with master key rotation")]
#[command(version)]
struct Cli {
    /// Path to the Coffer config directory (default: ~/.coffer)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Passphrase for the local keyfile (or set COFFER_PASSPHRASE env var).
    /// If not provided, will prompt interactively.
    #[arg(long, global = true, env = "COFFER_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Coffer configuration, database and keyfile
    Init,

    /// Manage master keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Store (or replace) a credential
    Put {
        /// Owner (tenant or user) of the credential
        owner: String,
        /// Credential name
        name: String,
        /// Secret value (prompted for when omitted)
        #[arg(long)]
        value: Option<String>,
    },

    /// Decrypt and print a credential
    Get { owner: String, name: String },

    /// List credentials (names and key versions only)
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Delete a credential
    Delete { owner: String, name: String },

    /// Encrypt a value and print its envelope without storing it
    Encrypt {
        #[arg(long)]
        value: Option<String>,
    },

    /// Decrypt an envelope produced by `coffer encrypt`
    Decrypt { envelope: String },

    /// Re-wrap stored credentials under another master key version
    Rotate {
        /// Only rotate credentials wrapped under this version
        #[arg(long)]
        from: Option<u32>,
        /// Target version (default: current)
        #[arg(long)]
        to: Option<u32>,
        /// Credentials per transaction (default: rotation.batch_size from config)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Count candidates without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show credentials per key version and recent rotation runs
    Status,

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum KeysAction {
    /// List master key versions
    List,
    /// Provision the next master key version
    Add {
        /// Keep the current version; only stage the new key
        #[arg(long)]
        no_activate: bool,
    },
    /// Make an existing version current
    Activate { version: u32 },
}

/// Get passphrase from CLI arg, env var, or interactive prompt.
pub fn get_passphrase(cli_passphrase: &Option<String>) -> anyhow::Result<String> {
    if let Some(p) = cli_passphrase {
        return Ok(p.clone());
    }
    Ok(rpassword::prompt_password_stderr("Enter passphrase: ")?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("coffer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => coffer_core::config::CofferConfig::default_base_dir()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let passphrase = &cli.passphrase;

    match cli.command {
        Commands::Init => rt.block_on(commands::init::run(&base_dir, passphrase)),
        Commands::Keys { ref action } => match action {
            KeysAction::List => rt.block_on(commands::keys::list(&base_dir, passphrase)),
            KeysAction::Add { no_activate } => {
                rt.block_on(commands::keys::add(&base_dir, passphrase, !no_activate))
            }
            KeysAction::Activate { version } => {
                rt.block_on(commands::keys::activate(&base_dir, passphrase, *version))
            }
        },
        Commands::Put {
            ref owner,
            ref name,
            ref value,
        } => rt.block_on(commands::put::run(owner, name, value, &base_dir, passphrase)),
        Commands::Get {
            ref owner,
            ref name,
        } => rt.block_on(commands::get::run(owner, name, &base_dir, passphrase)),
        Commands::List { ref owner } => commands::list::run(owner.as_deref(), &base_dir),
        Commands::Delete {
            ref owner,
            ref name,
        } => commands::delete::run(owner, name, &base_dir),
        Commands::Encrypt { ref value } => {
            rt.block_on(commands::encrypt::run(value, &base_dir, passphrase))
        }
        Commands::Decrypt { ref envelope } => {
            rt.block_on(commands::decrypt::run(envelope, &base_dir, passphrase))
        }
        Commands::Rotate {
            from,
            to,
            batch_size,
            dry_run,
            yes,
            json,
        } => rt.block_on(commands::rotate::run(
            commands::rotate::RotateArgs {
                from,
                to,
                batch_size,
                dry_run,
                yes,
                json,
            },
            &base_dir,
            passphrase,
        )),
        Commands::Status => rt.block_on(commands::status::run(&base_dir, passphrase)),
        Commands::Config => commands::config::run(&base_dir),
    }
}
