use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::{io_error, CliResult};

pub mod gateway;
pub mod service;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a client-facing gateway.
    Gateway(NodeArgs),
    /// Run a login/chat service.
    Service(NodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Gateway(args) => block_on(gateway::run(args)),
        Command::Service(args) => block_on(service::run(args)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: std::future::Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(future)
}

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Node configuration file (JSON).
    #[arg(long, short = 'c', env = "MESHIM_CONFIG", default_value = "meshim.json")]
    pub config: PathBuf,

    /// Serve `/health` and `/metrics` on this address (e.g. 127.0.0.1:8080).
    #[arg(long, env = "MESHIM_MONITOR", value_name = "ADDR")]
    pub monitor: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
