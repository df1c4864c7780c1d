//! trustroot CLI
//!
//! Initializes and rotates a repository's root of trust.

use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;
use trustroot_core::{Key, PendingMutation, ROOT_ROLE, TARGETS_ROLE};

use trustroot_rotation::keys::read_public_key;
use trustroot_rotation::{
    as_signers, FsStore, KeyFileError, LoadedRoot, RootStateMachine, RotationConfig,
    RotationError, SigningKeyring, TrustStore,
};

#[derive(Debug, Parser)]
#[command(name = "trustroot", version, about = "Manage a repository's root of trust")]
struct Cli {
    /// Directory of the filesystem trust store [env: TRUST_ROOT_STORE_DIR]
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// PostgreSQL connection string [env: TRUST_ROOT_DATABASE_URL]
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Skip checking the latest root against its predecessor
    #[arg(long, global = true)]
    no_chain: bool,

    /// Log level [env: TRUST_ROOT_LOG_LEVEL]
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct SigningArgs {
    /// File holding a base64 Ed25519 seed of a root key (repeatable)
    #[arg(long = "signing-key", required = true)]
    signing_keys: Vec<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create version 1 of the root, self-signed by the given keys
    Init {
        #[command(flatten)]
        signing: SigningArgs,

        /// Additional root public key held elsewhere (repeatable)
        #[arg(long = "root-public-key")]
        root_public_keys: Vec<PathBuf>,

        /// Root signatures required for later rotations
        #[arg(long, default_value_t = 1)]
        threshold: u32,
    },

    /// Trust a new policy (targets) key
    AddPolicyKey {
        #[command(flatten)]
        signing: SigningArgs,

        /// File holding the base64 Ed25519 public key to trust
        #[arg(long)]
        policy_key: PathBuf,
    },

    /// Stop trusting a policy (targets) key
    RemovePolicyKey {
        #[command(flatten)]
        signing: SigningArgs,

        /// Key ID to remove (case-insensitive)
        #[arg(long)]
        policy_key_id: String,
    },

    /// Change the number of policy signatures required
    UpdatePolicyThreshold {
        #[command(flatten)]
        signing: SigningArgs,

        #[arg(long)]
        threshold: u32,
    },

    /// Push the root's expiry out by the configured validity period
    Renew {
        #[command(flatten)]
        signing: SigningArgs,

        /// Days of validity from now [env: TRUST_ROOT_EXPIRY_DAYS]
        #[arg(long)]
        days: Option<i64>,
    },

    /// Print the latest root
    Show,

    /// Verify every root back to version 1
    Verify,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    KeyFile(#[from] KeyFileError),

    #[error("Failed to render root: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Rotation(e) => e.exit_code(),
            CliError::KeyFile(_) => 66,
            CliError::Output(_) => 1,
            CliError::Usage(_) => 64,
        }
    }
}

impl Cli {
    fn config(&self) -> RotationConfig {
        let mut config = RotationConfig::from_env();
        if let Some(store_dir) = &self.store_dir {
            config.store_dir = store_dir.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.no_chain {
            config.require_chain = false;
        }
        config
    }
}

async fn open_store(config: &RotationConfig) -> Result<Arc<dyn TrustStore>, CliError> {
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let store = trustroot_rotation::PostgresStore::new(url)
            .await
            .map_err(RotationError::from)?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "postgres"))]
    if config.database_url.is_some() {
        warn!("Database URL ignored: built without the postgres feature");
    }

    info!(path = %config.store_dir.display(), "Using filesystem trust store");
    Ok(Arc::new(FsStore::new(&config.store_dir)))
}

/// Rotate with the keyring's keys that belong to the current root role
///
/// The stages are driven here so the root that picks the signers is the one
/// the rotation builds on.
async fn rotate(
    machine: &RootStateMachine,
    config: &RotationConfig,
    signing: &SigningArgs,
    mutation: PendingMutation,
) -> Result<(), CliError> {
    let keyring = SigningKeyring::from_files(&signing.signing_keys)?;
    let store = machine.store().as_ref();
    let current = LoadedRoot::load(store)
        .await?
        .validate(store, config.require_chain)
        .await?;
    let root_role = current
        .root()
        .role(ROOT_ROLE)
        .ok_or_else(|| CliError::Usage("latest root has no root role".into()))?;

    let pairs = keyring.signers_for(root_role);
    if pairs.len() < keyring.len() {
        warn!(
            held = keyring.len(),
            usable = pairs.len(),
            "Some signing keys are not root keys and will not sign"
        );
    }

    let signed = current.mutate(&mutation)?.sign(&as_signers(&pairs))?;
    let version = signed.root().version();
    let reference = signed.persist(store).await?;

    println!("root v{} stored as {}", version, reference);
    Ok(())
}

async fn run(cli: Cli, config: RotationConfig) -> Result<(), CliError> {
    let machine = RootStateMachine::new(open_store(&config).await?);

    match cli.command {
        Command::Init {
            signing,
            root_public_keys,
            threshold,
        } => {
            let keyring = SigningKeyring::from_files(&signing.signing_keys)?;
            let mut root_keys = keyring.public_keys();
            for path in &root_public_keys {
                let key = read_public_key(path)?;
                if !root_keys.iter().any(|k| k.id() == key.id()) {
                    root_keys.push(key);
                }
            }

            let pairs = keyring.signers();
            let expires = Utc::now() + Duration::days(config.expiry_days);
            let reference = machine
                .initialize(root_keys, threshold, expires, &as_signers(&pairs))
                .await?;

            println!("root v1 stored as {}", reference);
        }

        Command::AddPolicyKey {
            signing,
            policy_key,
        } => {
            let key: Key = read_public_key(&policy_key)?;
            info!(key_id = %key.id(), "Adding policy key");
            let mutation = PendingMutation::AddKey {
                role: TARGETS_ROLE.into(),
                key,
            };
            rotate(&machine, &config, &signing, mutation).await?;
        }

        Command::RemovePolicyKey {
            signing,
            policy_key_id,
        } => {
            let key_id = trustroot_core::KeyRegistry::normalize(&policy_key_id)
                .map_err(RotationError::from)?;
            let mutation = PendingMutation::RemoveKey {
                role: TARGETS_ROLE.into(),
                key_id,
            };
            rotate(&machine, &config, &signing, mutation).await?;
        }

        Command::UpdatePolicyThreshold { signing, threshold } => {
            let mutation = PendingMutation::SetThreshold {
                role: TARGETS_ROLE.into(),
                threshold,
            };
            rotate(&machine, &config, &signing, mutation).await?;
        }

        Command::Renew { signing, days } => {
            let days = days.unwrap_or(config.expiry_days);
            if days <= 0 {
                return Err(CliError::Usage(format!("--days must be positive, got {}", days)));
            }
            let mutation = PendingMutation::SetExpires {
                expires: Utc::now() + Duration::days(days),
            };
            rotate(&machine, &config, &signing, mutation).await?;
        }

        Command::Show => {
            let current = machine.current(config.require_chain).await?;
            println!("# {}", current.reference());
            if current.root().is_expired(Utc::now()) {
                println!("# expired at {}", current.root().expires());
            }
            println!("{}", serde_json::to_string_pretty(current.root())?);
        }

        Command::Verify => {
            let history = machine.history().await?;
            for (reference, root) in &history {
                println!("v{} {} expires {}", root.version(), reference, root.expires());
            }
            println!("{} root(s) verified", history.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "trustroot failed");
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
