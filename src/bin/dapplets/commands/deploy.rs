//! `dapplets deploy` command

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::{Cli, DeployArgs, MessageFormat};
use crate::commands::UsageError;
use dapplets::core::uri::strip_scheme;
use dapplets::ops::{deploy_module, DeployError, DeployOptions, DeployedModule};
use dapplets::registry::{self, RegistryConfig};
use dapplets::storage::{BackendType, StorageAggregator};
use dapplets::util::config::{global_config_path, load_config, project_config_path, Config};
use dapplets::util::diagnostic::suggestions;
use dapplets::util::shell::{Shell, Status};

pub async fn execute(cli: &Cli, args: &DeployArgs) -> Result<()> {
    let shell = Arc::new(Shell::from_flags(
        cli.quiet,
        cli.verbose,
        cli.color,
        cli.message_format == MessageFormat::Json,
    ));

    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let mut config = load_config(global_config_path().as_deref(), &project_config_path(&cwd));
    apply_flags(&mut config, cli);

    let module_name = args
        .module_name()
        .ok_or_else(|| UsageError::new("no module name given", suggestions::NO_MODULE_NAME))?;
    let dev_server_url = args.dev_server_url.as_deref().ok_or_else(|| {
        UsageError::new("no development server URL given", suggestions::NO_DEV_SERVER)
    })?;
    let target_registry = cli.target_registry.as_deref().ok_or_else(|| {
        UsageError::new("no target registry given", suggestions::NO_TARGET_REGISTRY)
    })?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(config.net.accept_invalid_certs())
        .build()
        .context("failed to build the HTTP client")?;

    let storage =
        StorageAggregator::from_config(&config.storage, client.clone()).map_err(DeployError::from)?;
    let credential = cli.eth_private_key.as_deref();
    let source = registry::open(&RegistryConfig::dev(dev_server_url), credential, client.clone())
        .map_err(DeployError::from)?;
    let target = registry::open(&RegistryConfig::ledger(target_registry), credential, client)
        .map_err(DeployError::from)?;

    let mut opts = DeployOptions::new(module_name);
    opts.branch = config.deploy.branch().to_string();
    opts.source_attempts = config.deploy.source_attempts();
    opts.retry_delay = config.deploy.source_retry_delay();
    if config.deploy.ipfs {
        opts.targets.push(BackendType::Ipfs);
    }

    let span = shell.span(
        Status::Deploying,
        format!("{} ({}) from {}", module_name, opts.branch, dev_server_url),
    );
    let deployed = deploy_module(&storage, source.as_ref(), target.as_ref(), &opts).await?;
    span.finish_with_message(format!("{} {}", module_name, deployed.version));

    print_summary(&shell, &config, module_name, target_registry, &deployed);
    Ok(())
}

/// Command-line flags and environment variables override config files.
fn apply_flags(config: &mut Config, cli: &Cli) {
    if let Some(gateway) = &cli.ipfs_gateway_url {
        config.storage.ipfs_gateway = Some(gateway.clone());
    }
    if let Some(url) = &cli.http_storage_url {
        config.storage.http_upload_url = Some(url.clone());
    }
    if let Some(branch) = &cli.module_branch {
        config.deploy.branch = Some(branch.clone());
    }
    if cli.ipfs {
        config.deploy.ipfs = true;
    }
    if cli.strict_tls {
        config.net.accept_invalid_certs = Some(false);
    }
}

fn print_summary(
    shell: &Shell,
    config: &Config,
    module_name: &str,
    registry: &str,
    deployed: &DeployedModule,
) {
    let script_link = deployed
        .script_url
        .as_deref()
        .and_then(|uri| gateway_link(config.storage.ipfs_gateway(), uri));

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "module-published",
            "module": module_name,
            "registry": registry,
            "deployment": deployed,
            "link": script_link,
        }));
        return;
    }

    shell.status(
        Status::Published,
        format!("Module \"{}\" published successfully!", module_name),
    );
    shell.detail("Current version", &deployed.version);
    shell.detail("Registry", registry);
    shell.detail("Publisher", &deployed.sender);
    shell.detail("Transaction", &deployed.tx_hash);
    if let Some(link) = script_link {
        shell.detail("IPFS", link);
    }
}

/// Gateway URL for an `ipfs://` locator.
fn gateway_link(gateway: &str, uri: &str) -> Option<String> {
    let path = strip_scheme(uri, "ipfs")?;
    Some(format!("{}/ipfs/{}", gateway.trim_end_matches('/'), path))
}
