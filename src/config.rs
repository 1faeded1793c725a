//! CLI parsing, logging bootstrap, and the shared application state
//! threaded through every handler.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use flexi_logger::Logger;

use crate::events::EventBus;
use crate::repo_manager::RepoManager;
use crate::validator::Validator;

#[derive(Parser, Debug)]
#[command(name = "branchvaultd", about = "Multi-tenant Git-backed configuration store")]
pub struct Cli {
    /// Directory under which `<name>.git` repositories are created.
    #[arg(long, env = "BRANCHVAULT_REPO_ROOT")]
    pub repo_root: PathBuf,

    /// Address the REST and Git HTTP surfaces are served on.
    #[arg(long, env = "BRANCHVAULT_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Path to the `git` binary used for Smart-HTTP plumbing.
    #[arg(long, env = "BRANCHVAULT_GIT_BINARY", default_value = "git")]
    pub git_binary: PathBuf,

    /// Require Basic auth even for callers on private network ranges.
    #[arg(long, env = "BRANCHVAULT_AUTH_ON_PRIVATE_NETWORKS")]
    pub auth_on_private_networks: bool,

    /// `flexi_logger`-style spec, e.g. "info" or "branchvault=debug".
    #[arg(long, env = "BRANCHVAULT_LOG", default_value = "info")]
    pub log_spec: String,
}

/// Settings that parametrize components B/D, carried in [`AppState`].
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub repo_root: PathBuf,
    pub git_binary: PathBuf,
    pub auth_on_private_networks: bool,
}

impl From<&Cli> for AppConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            repo_root: cli.repo_root.clone(),
            git_binary: cli.git_binary.clone(),
            auth_on_private_networks: cli.auth_on_private_networks,
        }
    }
}

/// The `Arc`-shared aggregate handed to every Axum handler.
pub struct AppState {
    pub repo_manager: RepoManager,
    pub event_bus: EventBus,
    pub validator: Validator,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            repo_manager: RepoManager::new(config.repo_root.clone()),
            event_bus: EventBus::new(),
            validator: Validator::new(),
            config,
        }
    }
}

/// Initialize the `log` facade via `flexi_logger`, per `cli.log_spec`.
pub fn init_logging(log_spec: &str) -> anyhow::Result<()> {
    Logger::try_with_str(log_spec)?.start()?;
    Ok(())
}
