//! fscryptctl - manage Linux filesystem encryption keys and policies
//!
//! Usage:
//!   fscryptctl add_key <mountpoint>                 - Add a key read from stdin
//!   fscryptctl remove_key <identifier> <mountpoint> - Remove a key
//!   fscryptctl key_status <identifier> <mountpoint> - Show a key's status
//!   fscryptctl get_policy <path>                    - Show a policy
//!   fscryptctl set_policy <key> <directory>         - Encrypt an empty directory
//!   fscryptctl get_descriptor                       - (v1) Print a key's descriptor
//!   fscryptctl insert_key                           - (v1) Add a key to the session keyring

use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand};
use fscryptctl::{
    config::Config,
    crypto::{KeyIdentifier, KeyMaterial, KeyReference},
    kernel::{Kernel, LinuxKernel},
    keyring::{KeyPrefix, Keyring, KeyringClient},
    policy::{EncryptionMode, Padding, PolicyManager, PolicyOptions},
    Error, Result,
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "fscryptctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage Linux filesystem encryption keys and policies")]
#[command(after_help = "On Linux 5.4 and later, use add_key and set_policy with 32-character \
key identifiers. On older kernels, use insert_key and set_policy with 16-character key \
descriptors.")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print the version of fscryptctl
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// Enable debug logging on stderr
    #[arg(long)]
    verbose: bool,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Read a key from stdin, add it to a mounted filesystem, and print its identifier
    AddKey {
        /// Mountpoint (or any path on the filesystem)
        #[arg(value_name = "MOUNTPOINT")]
        args: Vec<String>,
    },

    /// Remove a key from a mounted filesystem
    RemoveKey {
        /// Force-remove all users' claims to the key (requires root)
        #[arg(long)]
        all_users: bool,

        /// Key identifier, then mountpoint
        #[arg(value_name = "IDENTIFIER MOUNTPOINT")]
        args: Vec<String>,
    },

    /// Get the status of a key on a mounted filesystem
    KeyStatus {
        /// Key identifier, then mountpoint
        #[arg(value_name = "IDENTIFIER MOUNTPOINT")]
        args: Vec<String>,
    },

    /// Print the encryption policy of a file or directory
    GetPolicy {
        /// File or directory
        #[arg(value_name = "PATH")]
        args: Vec<String>,
    },

    /// Set an encryption policy on an empty directory
    SetPolicy {
        #[command(flatten)]
        options: SetPolicyArgs,

        /// Key identifier or descriptor, then directory
        #[arg(value_name = "KEY DIRECTORY")]
        args: Vec<String>,
    },

    /// (Deprecated) Read a key from stdin and print its descriptor
    GetDescriptor {
        #[arg(hide = true)]
        args: Vec<String>,
    },

    /// (Deprecated) Read a key from stdin, insert it into the session keyring,
    /// and print its descriptor
    InsertKey {
        /// For ext4 before Linux 4.8
        #[arg(long)]
        ext4: bool,

        /// For F2FS before Linux 4.6
        #[arg(long)]
        f2fs: bool,

        #[arg(hide = true)]
        args: Vec<String>,
    },

    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Args)]
struct SetPolicyArgs {
    /// Contents encryption mode (default: AES-256-XTS)
    #[arg(long, value_name = "MODE")]
    contents: Option<String>,

    /// Filenames encryption mode (default: AES-256-CTS)
    #[arg(long, value_name = "MODE")]
    filenames: Option<String>,

    /// Bytes of zero padding for filenames (default: 32)
    #[arg(long, value_name = "BYTES")]
    padding: Option<String>,

    /// Optimize for Adiantum encryption
    #[arg(long)]
    direct_key: bool,

    /// Optimize for UFS inline crypto hardware
    #[arg(long)]
    iv_ino_lblk_64: bool,

    /// Optimize for eMMC inline crypto hardware (not recommended)
    #[arg(long)]
    iv_ino_lblk_32: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                std::process::exit(1);
            }
        },
    };

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => fail(e),
    };
    init_logging(cli.verbose, &config);

    let Some(command) = cli.command else {
        fail(Error::NoCommand)
    };

    let kernel = LinuxKernel::new();
    let result = {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        let result = run_command(command, &kernel, &config, &mut stdin, &mut stdout);
        let _ = stdout.flush();
        result
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: Error) -> ! {
    eprintln!("error: {}", e);
    std::process::exit(1);
}

/// Diagnostics go to stderr; the default filter is "off" so that only the
/// `error: ` line is printed on failure.
fn init_logging(verbose: bool, config: &Config) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("off"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: failed to set up logging: {}", e);
    }
}

fn run_command<K: Kernel>(
    command: Commands,
    kernel: &K,
    config: &Config,
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Commands::AddKey { args } => cmd_add_key(kernel, &args, input, out),
        Commands::RemoveKey { all_users, args } => cmd_remove_key(kernel, &args, all_users, out),
        Commands::KeyStatus { args } => cmd_key_status(kernel, &args, out),
        Commands::GetPolicy { args } => cmd_get_policy(kernel, &args, out),
        Commands::SetPolicy { options, args } => {
            cmd_set_policy(kernel, config, &options, &args, out)
        }
        Commands::GetDescriptor { args } => cmd_get_descriptor(&args, input, out),
        Commands::InsertKey { ext4, f2fs, args } => {
            let prefix = if ext4 {
                KeyPrefix::Ext4
            } else if f2fs {
                KeyPrefix::F2fs
            } else {
                config.keyring.default_prefix
            };
            cmd_insert_key(kernel, prefix, &args, input, out)
        }
        Commands::External(args) => Err(Error::InvalidCommand(
            args.into_iter().next().unwrap_or_default(),
        )),
    }
}

fn usage_error(message: &str) -> Error {
    Error::Argument(message.to_string())
}

fn cmd_add_key<K: Kernel>(
    kernel: &K,
    args: &[String],
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<()> {
    let [mountpoint] = args else {
        return Err(usage_error("must specify a single mountpoint"));
    };
    let key = KeyMaterial::read_from(input)?;

    let keyring = Keyring::Filesystem {
        mountpoint: Path::new(mountpoint),
    };
    let reference = KeyringClient::new(kernel).add(&key, &keyring)?;
    writeln!(out, "{}", reference)?;
    Ok(())
}

fn cmd_remove_key<K: Kernel>(
    kernel: &K,
    args: &[String],
    all_users: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let [identifier, mountpoint] = args else {
        return Err(usage_error("must specify a key identifier and a mountpoint"));
    };
    let reference = KeyReference::Identifier(KeyIdentifier::from_hex(identifier)?);

    let keyring = Keyring::Filesystem {
        mountpoint: Path::new(mountpoint),
    };
    let outcome = KeyringClient::new(kernel).remove(&reference, &keyring, all_users)?;
    debug!("remove_key outcome: {:?}", outcome);
    if let Some(warning) = outcome.warning() {
        writeln!(out, "warning: {}", warning)?;
    }
    Ok(())
}

fn cmd_key_status<K: Kernel>(kernel: &K, args: &[String], out: &mut dyn Write) -> Result<()> {
    let [identifier, mountpoint] = args else {
        return Err(usage_error("must specify a key identifier and a mountpoint"));
    };
    let reference = KeyReference::Identifier(KeyIdentifier::from_hex(identifier)?);

    let keyring = Keyring::Filesystem {
        mountpoint: Path::new(mountpoint),
    };
    let status = KeyringClient::new(kernel).status(&reference, &keyring)?;
    writeln!(out, "{}", status)?;
    Ok(())
}

fn cmd_get_policy<K: Kernel>(kernel: &K, args: &[String], out: &mut dyn Write) -> Result<()> {
    let [path] = args else {
        return Err(usage_error("must specify a single file or directory"));
    };

    let policy = PolicyManager::new(kernel).get_policy(Path::new(path))?;
    write!(out, "{}", policy.describe(path))?;
    Ok(())
}

/// Resolve `set_policy` options: config defaults, then command-line flags
fn policy_options(
    config: &Config,
    args: &SetPolicyArgs,
    out: &mut dyn Write,
) -> Result<PolicyOptions> {
    let mut options = config.policy_options()?;

    if args.iv_ino_lblk_32 {
        writeln!(out, "warning: --iv-ino-lblk-32 should normally not be used")?;
    }
    if let Some(mode) = &args.contents {
        options.contents = EncryptionMode::parse_contents(mode)?;
    }
    if let Some(mode) = &args.filenames {
        options.filenames = EncryptionMode::parse_filenames(mode)?;
    }
    if let Some(padding) = &args.padding {
        options.padding = Padding::parse(padding)?;
    }
    options.direct_key = args.direct_key;
    options.iv_ino_lblk_64 = args.iv_ino_lblk_64;
    options.iv_ino_lblk_32 = args.iv_ino_lblk_32;

    Ok(options)
}

fn cmd_set_policy<K: Kernel>(
    kernel: &K,
    config: &Config,
    options: &SetPolicyArgs,
    args: &[String],
    out: &mut dyn Write,
) -> Result<()> {
    let options = policy_options(config, options, out)?;
    let [specifier, path] = args else {
        return Err(usage_error("must specify a key and a directory"));
    };
    let reference = KeyReference::parse(specifier)?;

    PolicyManager::new(kernel).set_policy(&reference, Path::new(path), &options)?;
    Ok(())
}

fn cmd_get_descriptor(args: &[String], input: &mut dyn Read, out: &mut dyn Write) -> Result<()> {
    if !args.is_empty() {
        return Err(usage_error("unexpected arguments"));
    }
    let key = KeyMaterial::read_from(input)?;
    writeln!(out, "{}", key.descriptor())?;
    Ok(())
}

fn cmd_insert_key<K: Kernel>(
    kernel: &K,
    prefix: KeyPrefix,
    args: &[String],
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<()> {
    if !args.is_empty() {
        return Err(usage_error("unexpected arguments"));
    }
    let key = KeyMaterial::read_from(input)?;

    let reference = KeyringClient::new(kernel).add(&key, &Keyring::Session { prefix })?;
    writeln!(out, "{}", reference)?;
    Ok(())
}
