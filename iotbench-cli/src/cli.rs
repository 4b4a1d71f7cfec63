use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use iotbench_workload::Phase;

use crate::config::Config;
use crate::{observability, runner};

/// IoT benchmark driver.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Load(LoadCommand),
    Run(RunCommand),
    Start(StartCommand),
    Version(VersionCommand),
}

/// insert records into the configured backend
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "load")]
struct LoadCommand {}

/// run the configured operation mix against previously loaded records
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// execute the phase selected in the configuration
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "start")]
struct StartCommand {}

/// print the version of the benchmark driver
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let phase = match args.command {
        Command::Load(LoadCommand {}) => Phase::Load,
        Command::Run(RunCommand {}) => Phase::Run,
        Command::Start(StartCommand {}) => config.phase,
        Command::Version(VersionCommand {}) => unreachable!(),
    };

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("iotbench-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(runner::execute(config, phase))
}
