use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use statusdeck::{
    config::{load_cli_settings, save_cli_settings, OutputFormat, Scope, WatchChannel},
    render, DeckApp,
};
use statusdeck_core::config::DashboardConfig;
use statusdeck_core::guard::GuardDecision;
use statusdeck_core::models::{EntityId, ServiceQuery, TerminateOptions};
use statusdeck_core::telemetry;
use std::path::PathBuf;
use tokio::runtime::Runtime;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "statusdeck", version, about = "Service status dashboard client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Output format; defaults to the saved CLI setting.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
    /// Keep CLI settings in `<dir>/.statusdeck` instead of the user config dir.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "STATUSDECK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    Services {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    Users {
        service: String,
    },
    Processes {
        service: String,
    },
    #[command(subcommand)]
    Terminate(TerminateCommand),
    /// Show where navigating to `path` would lead.
    Route {
        path: String,
    },
    /// Stream live updates until Ctrl-C or the connection closes.
    Watch {
        #[arg(long = "channel", value_enum)]
        channels: Vec<WatchChannel>,
    },
}

#[derive(Subcommand, Debug)]
enum TerminateCommand {
    User {
        id: String,
        #[command(flatten)]
        options: TerminateArgs,
    },
    Process {
        pid: String,
        #[command(flatten)]
        options: TerminateArgs,
    },
}

#[derive(clap::Args, Debug)]
struct TerminateArgs {
    #[arg(long)]
    service: Option<String>,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    reason: Option<String>,
}

impl From<TerminateArgs> for TerminateOptions {
    fn from(args: TerminateArgs) -> Self {
        Self {
            service_id: args.service,
            force: args.force.then_some(true),
            reason: args.reason,
            requested_by: None,
        }
    }
}

fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::env_filter_or("warn"))?;

    let cli = Cli::parse();
    let config = DashboardConfig::load().map_err(|err| anyhow::anyhow!(err.user_message()))?;
    let scope = match &cli.dir {
        Some(dir) => Scope::Directory(dir.clone()),
        None => Scope::User,
    };

    let runtime = Runtime::new()?;
    runtime.block_on(run(cli, config, scope))
}

async fn run(cli: Cli, config: DashboardConfig, scope: Scope) -> Result<()> {
    let settings = load_cli_settings(&scope).await?;
    let format = cli.format.unwrap_or(settings.output);
    let mut app = DeckApp::open(&config, settings)?;

    match cli.command {
        Command::Login { username, password } => {
            let username = username
                .or_else(|| app.settings().last_username.clone())
                .context("no username given and none remembered; pass --username")?;
            let state = app.login(&username, &password).await?;
            if let Err(err) = save_cli_settings(&scope, app.settings()).await {
                warn!(error = ?err, "failed to remember username");
            }
            println!("{}", render::session(format, &state)?);
        }
        Command::Logout => {
            let state = app.logout();
            println!("{}", render::session(format, &state)?);
        }
        Command::Whoami => {
            let state = app.whoami().await?;
            println!("{}", render::session(format, &state)?);
        }
        Command::Services { query, status } => {
            let services = app.services(ServiceQuery { query, status }).await?;
            println!("{}", render::services(format, &services)?);
        }
        Command::Users { service } => {
            let users = app.users(&service).await?;
            println!("{}", render::users(format, &users)?);
        }
        Command::Processes { service } => {
            let processes = app.processes(&service).await?;
            println!("{}", render::processes(format, &processes)?);
        }
        Command::Terminate(TerminateCommand::User { id, options }) => {
            let response = app.terminate_user(&id, options.into()).await?;
            println!("{}", render::termination(format, &response)?);
        }
        Command::Terminate(TerminateCommand::Process { pid, options }) => {
            let pid = match pid.parse::<i64>() {
                Ok(number) => EntityId::Number(number),
                Err(_) => EntityId::Text(pid),
            };
            let response = app.terminate_process(pid, options.into()).await?;
            println!("{}", render::termination(format, &response)?);
        }
        Command::Route { path } => match app.route(&path) {
            GuardDecision::Proceed => println!("proceed {path}"),
            redirect => println!(
                "redirect {}",
                redirect.location().unwrap_or_else(|| path.clone())
            ),
        },
        Command::Watch { channels } => {
            let channels = if channels.is_empty() {
                app.settings().watch.clone()
            } else {
                channels
            };
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            let mut stdout = std::io::stdout();
            app.watch(&channels, format, &mut stdout, shutdown).await?;
        }
    }

    Ok(())
}
