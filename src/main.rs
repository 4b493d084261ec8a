use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use colored::*;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gitagent::config::{self, Config};
use gitagent::theme::Theme;
use gitagent::{AgentError, Controller, GitManager, LlmPlanner, RunOutcome, SessionStore, TerminalPrompter};

#[derive(Parser, Debug)]
#[command(
    name = "gitagent",
    version,
    about = "Turn plain-language requests into verified Git operations",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// What you want done, e.g. "create a branch called feature and switch to it"
    request: Vec<String>,

    /// Run every step without asking for confirmation
    #[arg(short = 'y', long, global = true)]
    auto_approve: bool,

    /// Repository to operate on
    #[arg(short = 'C', long = "repo", global = true, value_name = "PATH")]
    repo: Option<PathBuf>,

    /// More log output on stderr (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resume the unfinished workflow
    Continue,
    /// Print recorded commands
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Discard the unfinished workflow
    Reset,
    /// Print the config file path, creating defaults if missing
    Config,
}

/// Parses the command line, reading "reset my last commit" as a request
/// rather than the `reset` subcommand with stray words.
fn parse_cli<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let err = match Cli::try_parse_from(&args) {
        Ok(cli) => return Ok(cli),
        Err(err) => err,
    };
    if !matches!(err.kind(), ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand) {
        return Err(err);
    }
    let Some(index) = subcommand_position(&args) else {
        return Err(err);
    };
    let mut request_args = args;
    request_args.insert(index, OsString::from("--"));
    Cli::try_parse_from(request_args).map_err(|_| err)
}

/// Index of the first positional word when it names a subcommand.
fn subcommand_position(args: &[OsString]) -> Option<usize> {
    let names: Vec<String> = Cli::command()
        .get_subcommands()
        .map(|c| c.get_name().to_string())
        .chain(std::iter::once("help".to_string()))
        .collect();
    let mut index = 1;
    while let Some(arg) = args.get(index) {
        let arg = arg.to_string_lossy();
        if arg == "-C" || arg == "--repo" {
            index += 2;
            continue;
        }
        if arg == "--" {
            return None;
        }
        if !arg.starts_with('-') {
            return names.iter().any(|n| *n == arg).then_some(index);
        }
        index += 1;
    }
    None
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config() -> Result<Config> {
    let config_path = config::get_config_path()?;
    let existed = config_path.exists();
    let mut config = Config::load_or_create(&config_path)?;
    if !existed {
        println!("Created default config file at {:?}", config_path);
    }
    config.apply_env()?;
    Ok(config)
}

fn read_request() -> Result<String> {
    print!("{} ", "gitagent>".green().bold());
    io::stdout().flush()?;
    let mut request = String::new();
    io::stdin().read_line(&mut request)?;
    Ok(request.trim().to_string())
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config()?;
    if !config.display.color_output {
        colored::control::set_override(false);
    }

    if let Some(Commands::Config) = cli.command {
        println!("{}", config::get_config_path()?.display());
        return Ok(0);
    }

    let start = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let repo = GitManager::discover(&start)?;

    match cli.command {
        Some(Commands::History { limit }) => {
            let store = SessionStore::for_git_dir(repo.git_dir());
            let session = store.load_or_create(repo.repo_path())?;
            if session.history.is_empty() {
                println!("No commands recorded for {}", repo.repo_path().display());
            }
            for record in session.recent_history(limit) {
                let outcome = if record.verification.is_success() {
                    record.verification.outcome.to_string().green()
                } else {
                    record.verification.outcome.to_string().red()
                };
                println!(
                    "{} {} {} [{}] {}",
                    record.executed_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    format!("git {}", record.command).bold(),
                    format!("(exit {})", record.exit_code).dimmed(),
                    outcome,
                    record.verification.explanation
                );
            }
            return Ok(0);
        }
        Some(Commands::Reset) => {
            let store = SessionStore::for_git_dir(repo.git_dir());
            let discarded = store.reset(repo.repo_path())?;
            println!(
                "{}",
                if discarded {
                    "Unfinished workflow discarded."
                } else {
                    "No unfinished workflow."
                }
            );
            return Ok(0);
        }
        _ => {}
    }

    let planner = LlmPlanner::new(&config.ai).map_err(AgentError::from)?;
    let prompter = TerminalPrompter::stdin(Theme::named(&config.display.theme));
    let mut controller =
        Controller::new(repo, config, planner, prompter)?.with_auto_approve(cli.auto_approve);

    let outcome = match cli.command {
        Some(Commands::Continue) => controller.resume().await?,
        _ => {
            let request = if cli.request.is_empty() {
                read_request()?
            } else {
                cli.request.join(" ")
            };
            if request.is_empty() {
                println!("Nothing to do.");
                return Ok(0);
            }
            controller.run_request(&request).await?
        }
    };

    if let RunOutcome::Declined { step, .. } = &outcome {
        tracing::info!("stopped at declined step {}", step);
    }
    match outcome.error() {
        Some(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            Ok(e.exit_code())
        }
        None => Ok(0),
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = parse_cli(std::env::args_os()).unwrap_or_else(|e| e.exit());
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            e.downcast_ref::<AgentError>()
                .map(AgentError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}
