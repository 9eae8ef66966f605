//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};

use dapplets::util::shell::ColorChoice;

/// Dapplets - publishes dapplet modules to decentralized storage and registries
#[derive(Parser)]
#[command(name = "dapplets")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Private key used to sign registry transactions
    #[arg(short = 'k', long, env = "ETH_PRIVATE_KEY", global = true, hide_env_values = true)]
    pub eth_private_key: Option<String>,

    /// Registry to publish to (contract address or ENS name)
    #[arg(short = 'r', long, env = "TARGET_REGISTRY", global = true)]
    pub target_registry: Option<String>,

    /// IPFS gateway used to read and write content
    #[arg(short = 'i', long, env = "IPFS_GATEWAY_URL", global = true)]
    pub ipfs_gateway_url: Option<String>,

    /// Publish to IPFS in addition to the centralized backup
    #[arg(short = 'I', long, global = true)]
    pub ipfs: bool,

    /// Branch of the module to publish
    #[arg(short = 'b', long, env = "MODULE_BRANCH", global = true)]
    pub module_branch: Option<String>,

    /// Storage server accepting HTTP uploads
    #[arg(long, env = "HTTP_STORAGE_URL", global = true)]
    pub http_storage_url: Option<String>,

    /// Reject self-signed certificates
    #[arg(long, global = true)]
    pub strict_tls: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Output format for messages
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish the latest version of a module from a development server
    Deploy(DeployArgs),
}

#[derive(Args)]
pub struct DeployArgs {
    /// Module name
    #[arg(value_name = "MODULE_NAME")]
    pub name: Option<String>,

    /// Module name, when not given as an argument
    #[arg(short = 'n', long, env = "MODULE_NAME")]
    pub module_name: Option<String>,

    /// Manifest URL of the development server to publish from
    #[arg(short = 'd', long, env = "DEV_SERVER_URL")]
    pub dev_server_url: Option<String>,
}

impl DeployArgs {
    pub fn module_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.module_name.as_deref())
    }
}
