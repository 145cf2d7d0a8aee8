//! btrfaasctl - encode and invoke function chains from a shell
//!
//! ```bash
//! $ btrfaasctl encode "uppercase skip=o | echo"
//! X-Btrfaas-Chain: uppercase|echo
//! X-Btrfaas-Options: [{"skip":"o"},{}]
//!
//! $ echo foobar | btrfaasctl invoke --security-mode insecure \
//!     --function uppercase=127.0.0.1:2424 "uppercase | uppercase"
//! FOOBAR
//! ```

use std::io::{Read, Write};
use std::process::ExitCode;

use bytes::Bytes;
use clap::Parser;

use btrfaas::chain::{parse_expression, ChainExecutor, CHAIN_HEADER, OPTIONS_HEADER};
use btrfaas::config::{ClientConfig, CtlArgs, CtlCommand};
use btrfaas::security::FsSecretResolver;
use btrfaas::telemetry::{build_runtime, init_tracing};
use btrfaas::Result;

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("btrfaasctl: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let args = CtlArgs::parse();
    init_tracing(&args.log_level);

    match args.command {
        CtlCommand::Encode { expression } => {
            let encoded = parse_expression(&expression)?.encode()?;
            println!("{}: {}", CHAIN_HEADER, encoded.chain);
            println!("{}: {}", OPTIONS_HEADER, encoded.options);
            Ok(())
        }
        CtlCommand::Invoke { expression, client } => {
            let chain = parse_expression(&expression)?;
            let config = ClientConfig::from_args(&client)?;
            let secrets = FsSecretResolver::new(config.secrets_dir.clone());
            let executor = ChainExecutor::from_config(&config, &secrets)?;

            let mut input = Vec::new();
            std::io::stdin().read_to_end(&mut input)?;

            let runtime = build_runtime()?;
            let output =
                runtime.block_on(async { executor.execute(&chain, Bytes::from(input)).await })?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&output)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
