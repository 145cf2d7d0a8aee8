//! frunner - serves one function over the `run` streaming call

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use btrfaas::config::{merge_runner_args, ConfigFile, RunnerArgs, RunnerConfig};
use btrfaas::runner::{transform_for, RunnerServer};
use btrfaas::security::{FsSecretResolver, ServerTransport};
use btrfaas::telemetry::{build_runtime, init_tracing};
use btrfaas::Result;

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("frunner failed: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let mut args = RunnerArgs::parse();

    if let Some(ref path) = args.config {
        let config_file = ConfigFile::load(path)?;
        args = merge_runner_args(args, &config_file);
    }

    init_tracing(&args.log_level);

    let config = match RunnerConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let transform = transform_for(&config.function, &config.process)?;

    // Secrets are resolved before anything listens
    let secrets = FsSecretResolver::new(config.secrets_dir.clone());
    let transport = match ServerTransport::build(&config.security, &secrets) {
        Ok(transport) => transport,
        Err(e) => {
            error!(
                mode = %config.security.mode,
                secrets_dir = %config.secrets_dir.display(),
                error = %e,
                "Failed to set up transport security"
            );
            return Err(e);
        }
    };

    info!(
        function = %config.function,
        mode = %config.security.mode,
        version = env!("CARGO_PKG_VERSION"),
        "Starting runner"
    );

    let runtime = build_runtime()?;
    runtime.block_on(async {
        let server = RunnerServer::bind(&config, transport, transform).await?;
        server.run().await
    })
}
