//! fgateway - HTTP front door that runs function chains

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use btrfaas::chain::ChainExecutor;
use btrfaas::config::{merge_gateway_args, ConfigFile, GatewayArgs, GatewayConfig};
use btrfaas::gateway::GatewayServer;
use btrfaas::metrics;
use btrfaas::security::FsSecretResolver;
use btrfaas::telemetry::{build_runtime, init_tracing};
use btrfaas::Result;

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("fgateway failed: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let mut args = GatewayArgs::parse();

    if let Some(ref path) = args.config {
        let config_file = ConfigFile::load(path)?;
        args = merge_gateway_args(args, &config_file);
    }

    init_tracing(&args.log_level);

    let config = match GatewayConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let secrets = FsSecretResolver::new(config.client.secrets_dir.clone());
    let executor = match ChainExecutor::from_config(&config.client, &secrets) {
        Ok(executor) => executor,
        Err(e) => {
            error!(
                mode = %config.client.security.mode,
                error = %e,
                "Failed to set up the chain executor"
            );
            return Err(e);
        }
    };

    metrics::init_metrics();

    info!(
        mode = %config.client.security.mode,
        functions = config.client.functions.len(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting gateway"
    );

    let runtime = build_runtime()?;
    runtime.block_on(async {
        let server = GatewayServer::bind(&config, executor).await?;
        server.run().await
    })
}
