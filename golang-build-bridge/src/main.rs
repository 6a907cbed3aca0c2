use golang_build_bridge::console::{ConsoleHost, ConsoleUi, SystemTerminal};
use golang_build_bridge::cwd::{StaticWorkspace, WorkspaceContext};
use golang_build_bridge::settings::{Settings, SettingsResolver};
use golang_build_bridge::{CLI_TARGET, exit_code, util};
use golang_build_core::host::HostServices;
use golang_build_core::{
    BUILD_COMPLETE_EVENT, BuildCommands, BuildResult, BuildTask, CompletionNotifier, CrossTarget,
    RequestOutcome, TargetId, ToolchainProfile,
};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "golang-build", version, about = "Run Go toolchain tasks with streamed output")]
struct Cli {
    /// Folder to build in.
    #[arg(long, global = true)]
    dir: Option<String>,

    /// Build in the directory containing this file (wins over --dir).
    #[arg(long, global = true)]
    file: Option<String>,

    /// Stop a running build without asking.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// go build -v
    Build,
    /// go test -v
    Test,
    /// go install -v
    Install,
    /// go clean -v
    Clean,
    /// go build -v for another OS/architecture
    CrossCompile {
        /// os/arch, e.g. linux/arm64. Prompts when omitted.
        #[arg(long)]
        target: Option<String>,
    },
    /// go get -v <url>
    Get {
        /// Package to fetch. Prompts when omitted.
        url: Option<String>,
    },
    /// Open a terminal with the configured environment
    Terminal,
    /// Print the resolved toolchain environment
    Env,
}

#[tokio::main]
async fn main() -> ExitCode {
    util::init_tracing();
    util::install_panic_hook();

    match run(Cli::parse()).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(error = ?err, "golang-build failed");
            eprintln!("golang-build: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let context = WorkspaceContext::from_args(cli.file.as_deref(), cli.dir.as_deref());
    let working_dir = context.working_dir();
    let settings = Settings::load(working_dir.as_deref()).context("failed to load settings")?;
    let profile = settings.profile().context("invalid [toolchain] settings")?;

    if matches!(cli.command, Command::Env) {
        print_env(&settings, &profile);
        return Ok(0);
    }

    let choice = match &cli.command {
        Command::CrossCompile {
            target: Some(target),
        } => Some(cross_target_index(&profile, target)?),
        _ => None,
    };
    let text = match &cli.command {
        Command::Get { url } => url.clone(),
        _ => None,
    };

    let notifier = Arc::new(CompletionNotifier::new());
    let host = HostServices {
        display: Arc::new(ConsoleHost),
        ui: Arc::new(ConsoleUi::new(cli.yes).with_text(text).with_choice(choice)),
        environment: Arc::new(SettingsResolver::new(settings)),
        workspace: Arc::new(StaticWorkspace::new(context)),
        terminal: Arc::new(SystemTerminal),
    };
    let commands = BuildCommands::new(profile, host, notifier.clone());
    let target = TargetId::from(CLI_TARGET);

    let channel = commands.profile().name.clone();
    let (listener, mut events) = notifier.listen(&channel);

    // Request errors were already shown to the user by the command surface.
    let outcome = match cli.command {
        Command::Build => commands.build(&target, BuildTask::Build).await,
        Command::Test => commands.build(&target, BuildTask::Test).await,
        Command::Install => commands.build(&target, BuildTask::Install).await,
        Command::Clean => commands.build(&target, BuildTask::Clean).await,
        Command::CrossCompile { .. } => commands.cross_compile(&target).await,
        Command::Get { .. } => commands.get_package(&target).await,
        Command::Terminal => {
            return Ok(if commands.open_terminal(&target).is_ok() { 0 } else { 1 });
        }
        Command::Env => return Ok(0),
    };
    let process = match outcome {
        Ok(RequestOutcome::Started(process)) => process,
        Ok(RequestOutcome::Abandoned) => {
            tracing::info!("nothing to run");
            return Ok(exit_code(BuildResult::Cancelled));
        }
        Err(_) => return Ok(1),
    };

    let result = loop {
        tokio::select! {
            envelope = events.recv() => match envelope {
                Some(envelope) if envelope.event == BUILD_COMPLETE_EVENT => break envelope.payload.result,
                Some(_) => continue,
                None => break process.wait().await,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::warn!(error = %err, "failed to listen for Ctrl+C");
                    break process.wait().await;
                }
                tracing::info!(outcome = ?commands.cancel(&target), "interrupted");
            }
        }
    };
    notifier.unsubscribe(&channel, listener);

    Ok(exit_code(result))
}

fn cross_target_index(profile: &ToolchainProfile, target: &str) -> Result<usize> {
    let wanted: CrossTarget = target.parse()?;
    profile
        .cross_targets
        .iter()
        .position(|candidate| *candidate == wanted)
        .ok_or_else(|| anyhow!("{} is not a supported cross-compile target", wanted))
}

fn print_env(settings: &Settings, profile: &ToolchainProfile) {
    for name in &profile.env_vars {
        match settings.lookup(name) {
            Some((value, source)) => println!("{name}={value}  ({source})"),
            None => println!("{name} is not set"),
        }
    }
}
