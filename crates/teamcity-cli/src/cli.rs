//! Argument parsing and command dispatch.

use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use teamcity_telemetry::{
    DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, TelemetryError, init_logging,
    log_format_from_str,
};
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::client::{AppContext, Auth, CliError, CliResult, build_client, parse_url};
use crate::commands::{build_configs, builds, changes, projects, queue, server, users};
use crate::output::{ColorMode, OutputFormat, OutputSettings};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8111";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub(crate) const DEFAULT_BUILD_COLUMNS: &str =
    "status,statusText,id,buildTypeId,number,branchName,user";
pub(crate) const DEFAULT_BUILD_CONFIG_COLUMNS: &str = "id,projectName,name";
pub(crate) const DEFAULT_QUEUED_BUILD_COLUMNS: &str = "state,id,buildTypeId,branchName,user";
pub(crate) const DEFAULT_PROJECT_COLUMNS: &str = "name,id,parentProjectId";
pub(crate) const DEFAULT_AGENT_COLUMNS: &str = "name,id,ip,pool,build_type,build_text";
pub(crate) const DEFAULT_CHANGE_COLUMNS: &str = "id,version,username,date";
pub(crate) const DEFAULT_USER_COLUMNS: &str = "id,username,name";
pub(crate) const DEFAULT_PLUGIN_COLUMNS: &str = "name,displayName,version";

/// Parses process arguments, executes the requested command, and returns the
/// process exit code.
pub async fn run() -> i32 {
    run_with_args(std::env::args_os()).await
}

pub(crate) async fn run_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return err.exit_code();
        }
    };

    if let Err(err) = install_logging(&cli) {
        eprintln!("error: {}", err.display_message());
        return err.exit_code();
    }

    let command_name = command_label(&cli.command);
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("command", command = command_name, request_id = %request_id);

    match dispatch(cli, &request_id).instrument(span).await {
        Ok(()) => {
            tracing::debug!(command = command_name, "command completed");
            0
        }
        Err(err) => {
            let exit_code = err.exit_code();
            tracing::debug!(command = command_name, exit_code, "command failed");
            eprintln!("error: {}", err.display_message());
            exit_code
        }
    }
}

fn install_logging(cli: &Cli) -> CliResult<()> {
    let config = LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format,
        build_sha: option_env!("TEAMCITY_CLI_BUILD_SHA").unwrap_or("dev"),
    };
    match init_logging(&config) {
        // A subscriber installed earlier in this process keeps working.
        Ok(()) | Err(TelemetryError::SubscriberInstall { .. }) => Ok(()),
        Err(err) => Err(CliError::usage(err.to_string())),
    }
}

async fn dispatch(cli: Cli, request_id: &str) -> CliResult<()> {
    let auth = Auth::resolve(cli.username, cli.password, cli.token)?;
    let ctx = AppContext {
        client: build_client(Duration::from_secs(cli.timeout), request_id)?,
        base_url: cli.server_url,
        auth,
    };
    let settings = OutputSettings {
        format: cli.output,
        color: resolve_color(cli.color),
    };
    tracing::debug!(
        server = %ctx.base_url,
        build_sha = teamcity_telemetry::build_sha(),
        "dispatching"
    );

    let mut out = io::stdout();
    match cli.command {
        Command::Build(command) => match command {
            BuildCommand::List(args) => {
                builds::handle_build_list(&ctx, &mut out, args, settings).await
            }
            BuildCommand::Trigger(args) => {
                builds::handle_build_trigger(&ctx, &mut out, args, settings).await
            }
            BuildCommand::Browse(args) => builds::handle_build_browse(&ctx, args).await,
            BuildCommand::Queue(QueueCommand::List(args)) => {
                queue::handle_queue_list(&ctx, &mut out, args, settings).await
            }
            BuildCommand::Queue(QueueCommand::Show(args)) => {
                queue::handle_queue_show(&ctx, &mut out, args, settings).await
            }
            BuildCommand::Show(show) => match show {
                BuildShowCommand::Details(args) => {
                    builds::handle_build_details(&ctx, &mut out, args, settings).await
                }
                BuildShowCommand::Statistics(args) => {
                    builds::handle_build_statistics(&ctx, &mut out, args, settings).await
                }
                BuildShowCommand::Log(args) => builds::handle_build_log(&ctx, &mut out, args).await,
                BuildShowCommand::Artifacts(args) => {
                    builds::handle_build_artifacts(&ctx, &mut out, args, settings).await
                }
                BuildShowCommand::Parameters(args) => {
                    builds::handle_build_parameters(&ctx, &mut out, args, settings).await
                }
                BuildShowCommand::Tags(args) => {
                    builds::handle_build_tags(&ctx, &mut out, args, settings).await
                }
            },
        },
        Command::BuildConfigs(command) => match command {
            BuildConfigsCommand::List(args) => {
                build_configs::handle_build_configs_list(&ctx, &mut out, args, settings).await
            }
            BuildConfigsCommand::Show(args) => {
                build_configs::handle_build_configs_show(&ctx, &mut out, args, settings).await
            }
        },
        Command::Project(command) => match command {
            ProjectCommand::List(args) => {
                projects::handle_project_list(&ctx, &mut out, args, settings).await
            }
            ProjectCommand::Show(args) => {
                projects::handle_project_show(&ctx, &mut out, args, settings).await
            }
        },
        Command::Change(command) => match command {
            ChangeCommand::List(args) => {
                changes::handle_change_list(&ctx, &mut out, args, settings).await
            }
            ChangeCommand::Show(args) => {
                changes::handle_change_show(&ctx, &mut out, args, settings).await
            }
        },
        Command::Server(command) => match command {
            ServerCommand::Info => server::handle_server_info(&ctx, &mut out, settings).await,
            ServerCommand::Plugin(PluginCommand::List(args)) => {
                server::handle_plugin_list(&ctx, &mut out, args, settings).await
            }
            ServerCommand::Agent(agent) => match agent {
                AgentCommand::List(args) => {
                    server::handle_agent_list(&ctx, &mut out, args, settings).await
                }
                AgentCommand::Show(args) => {
                    server::handle_agent_show(&ctx, &mut out, args, settings).await
                }
                AgentCommand::Statistics => {
                    server::handle_agent_statistics(&ctx, &mut out, settings).await
                }
            },
        },
        Command::User(command) => match command {
            UserCommand::List(args) => {
                users::handle_user_list(&ctx, &mut out, args, settings).await
            }
            UserCommand::Show(args) => {
                users::handle_user_show(&ctx, &mut out, args, settings).await
            }
        },
    }
}

fn resolve_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => {
            colored::control::set_override(true);
            true
        }
        ColorMode::Never => {
            colored::control::set_override(false);
            false
        }
        ColorMode::Auto => io::stdout().is_terminal(),
    }
}

fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    log_format_from_str(input).ok_or_else(|| format!("unknown log format '{input}'"))
}

/// Parse a `name=value` build parameter.
pub(crate) fn parse_parameter(input: &str) -> Result<(String, String), String> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| format!("parameter '{input}' must be given as name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("parameter '{input}' has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// CLI for interacting with TeamCity.
#[derive(Parser, Debug)]
#[command(name = "teamcity", version, about = "CLI for interacting with TeamCity")]
pub(crate) struct Cli {
    /// TeamCity server root URL.
    #[arg(
        long,
        global = true,
        env = "TEAMCITY_URL",
        value_parser = parse_url,
        default_value = DEFAULT_SERVER_URL
    )]
    pub(crate) server_url: Url,
    /// User for HTTP basic authentication.
    #[arg(long, global = true, env = "TEAMCITY_USER")]
    pub(crate) username: Option<String>,
    /// Password for HTTP basic authentication.
    #[arg(long, global = true, env = "TEAMCITY_PASSWORD", hide_env_values = true)]
    pub(crate) password: Option<String>,
    /// Access token; takes precedence over username/password.
    #[arg(long, global = true, env = "TEAMCITY_TOKEN", hide_env_values = true)]
    pub(crate) token: Option<String>,
    /// HTTP timeout in seconds.
    #[arg(
        long,
        global = true,
        env = "TEAMCITY_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub(crate) timeout: u64,
    /// Output format; lists default to table, single items to JSON.
    #[arg(long = "output-format", alias = "output", global = true, value_enum)]
    pub(crate) output: Option<OutputFormat>,
    /// Colorize build statuses in tables.
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub(crate) color: ColorMode,
    /// Log filter directive (overridden by `RUST_LOG`).
    #[arg(long, global = true, env = "TEAMCITY_CLI_LOG", default_value = DEFAULT_LOG_LEVEL)]
    pub(crate) log_level: String,
    /// Log line format: pretty or json.
    #[arg(
        long,
        global = true,
        env = "TEAMCITY_CLI_LOG_FORMAT",
        value_parser = parse_log_format,
        default_value = "pretty"
    )]
    pub(crate) log_format: LogFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Commands related to builds
    #[command(subcommand)]
    Build(BuildCommand),
    /// Commands related to build configs
    #[command(subcommand)]
    BuildConfigs(BuildConfigsCommand),
    /// Commands related to projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Commands related to changes
    #[command(subcommand)]
    Change(ChangeCommand),
    /// Commands related to the server instance
    #[command(subcommand)]
    Server(ServerCommand),
    /// Commands related to users
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand, Debug)]
pub(crate) enum BuildCommand {
    /// Display list of builds
    List(BuildListArgs),
    /// Trigger a new build
    Trigger(BuildTriggerArgs),
    /// Open selected build(s) in web browser
    Browse(IdArgs),
    /// Commands for build queue management
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Commands for showing statistics/tags/etc. for builds
    #[command(subcommand)]
    Show(BuildShowCommand),
}

#[derive(Subcommand, Debug)]
pub(crate) enum QueueCommand {
    /// List queued build(s)
    List(QueueListArgs),
    /// Show info about a queued build
    Show(ShowAllArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum BuildShowCommand {
    /// Display details for selected build(s)
    Details(ShowAllArgs),
    /// Display statistics for selected build(s)
    Statistics(IdArgs),
    /// Display log for selected build(s)
    Log(IdArgs),
    /// Display artifacts for a build
    Artifacts(ArtifactsArgs),
    /// Display parameters for selected build(s)
    Parameters(IdArgs),
    /// Display tags for selected build(s)
    Tags(IdArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum BuildConfigsCommand {
    /// List build configs
    List(BuildConfigsListArgs),
    /// Show info about a build config
    Show(IdArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum ProjectCommand {
    /// Display list of projects
    List(ProjectListArgs),
    /// Display info for selected projects
    Show(IdArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum ChangeCommand {
    /// Display list of changes
    List(ChangeListArgs),
    /// Display info for selected changes
    Show(IdArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum ServerCommand {
    /// Display info about TeamCity server
    Info,
    /// Show info about server plugins
    #[command(subcommand)]
    Plugin(PluginCommand),
    /// Show info about agents
    #[command(subcommand)]
    Agent(AgentCommand),
}

#[derive(Subcommand, Debug)]
pub(crate) enum PluginCommand {
    /// Display list of plugins
    List(PluginListArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum AgentCommand {
    /// Display list of agents
    List(AgentListArgs),
    /// Display info for selected agent(s)
    Show(IdArgs),
    /// Display statistics for agents - idle, busy, etc.
    Statistics,
}

#[derive(Subcommand, Debug)]
pub(crate) enum UserCommand {
    /// Display list of users
    List(UserListArgs),
    /// Display info for selected users
    Show(IdArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdArgs {
    #[arg(required = true, num_args = 1.., help = "Identifiers to look up")]
    pub(crate) ids: Vec<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShowAllArgs {
    #[arg(long, help = "Show all data for build (very verbose)")]
    pub(crate) show_all: bool,
    #[arg(required = true, num_args = 1.., help = "Build identifiers")]
    pub(crate) ids: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum BuildStatus {
    Success,
    Failure,
    Error,
}

impl BuildStatus {
    pub(crate) const fn as_locator(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum TriState {
    True,
    False,
    #[default]
    Any,
}

impl TriState {
    pub(crate) const fn as_locator(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Any => "any",
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildListArgs {
    #[arg(long, help = "Show URL for request")]
    pub(crate) show_url: bool,
    #[arg(long, help = "Do not fetch data (useful with --show-url)")]
    pub(crate) no_show_data: bool,
    #[arg(long, default_value_t = 0, help = "Start index")]
    pub(crate) start: u32,
    #[arg(long, default_value_t = 100, help = "Max number of items to show")]
    pub(crate) count: u32,
    #[arg(long, help = "project to filter on")]
    pub(crate) project: Option<String>,
    #[arg(long, help = "buildTypeId to filter on (required)")]
    pub(crate) build_type_id: Option<String>,
    #[arg(long, default_value = "default:any", help = "branch to filter on")]
    pub(crate) branch: String,
    #[arg(long, value_enum, help = "filter on build status")]
    pub(crate) status: Option<BuildStatus>,
    #[arg(long, value_enum, default_value_t = TriState::Any, help = "filter on build state")]
    pub(crate) running: TriState,
    #[arg(
        long,
        help = "comma-delimited list of build tags (only builds containing all the specified tags are returned)"
    )]
    pub(crate) tags: Option<String>,
    #[arg(long, help = "limit builds to only those triggered by the user specified")]
    pub(crate) user: Option<String>,
    #[arg(long, default_value = DEFAULT_BUILD_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildTriggerArgs {
    #[arg(long, help = "buildTypeId to trigger (required)")]
    pub(crate) build_type_id: Option<String>,
    #[arg(long, help = "branch to build")]
    pub(crate) branch: Option<String>,
    #[arg(long, help = "comment message for build")]
    pub(crate) comment: Option<String>,
    #[arg(long = "parameter", value_parser = parse_parameter, help = "Custom parameter as name=value")]
    pub(crate) parameters: Vec<(String, String)>,
    #[arg(long, help = "ID of agent to force build to run on")]
    pub(crate) agent_id: Option<String>,
    #[arg(long, help = "open build log in browser")]
    pub(crate) open_build_log: bool,
    #[arg(long, help = "Wait for the build to start running")]
    pub(crate) wait_for_run: bool,
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between queue polls with --wait-for-run"
    )]
    pub(crate) poll_interval_secs: u64,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueListArgs {
    #[arg(long, help = "buildTypeId to filter on")]
    pub(crate) build_type_id: Option<String>,
    #[arg(long, help = "branch to filter on")]
    pub(crate) branch: Option<String>,
    #[arg(long, default_value = DEFAULT_QUEUED_BUILD_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArtifactsArgs {
    #[arg(help = "Build identifier")]
    pub(crate) build_id: String,
    #[arg(help = "Artifact view: children, metadata, content, files")]
    pub(crate) data_type: Option<String>,
    #[arg(help = "Artifact path relative to the build root")]
    pub(crate) artifact_relative_name: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildConfigsListArgs {
    #[arg(long, help = "Show URL for request")]
    pub(crate) show_url: bool,
    #[arg(long, help = "project to filter on")]
    pub(crate) project: Option<String>,
    #[arg(long, help = "project to filter on (recursive)")]
    pub(crate) affected_project: Option<String>,
    #[arg(
        long,
        value_enum,
        default_value_t = TriState::Any,
        help = "only templates (true) or only non-templates (false)"
    )]
    pub(crate) template_flag: TriState,
    #[arg(long, default_value = DEFAULT_BUILD_CONFIG_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectListArgs {
    #[arg(long, help = "parent project id to filter on")]
    pub(crate) parent_project_id: Option<String>,
    #[arg(long, default_value = DEFAULT_PROJECT_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangeListArgs {
    #[arg(long, default_value_t = 0, help = "Start index")]
    pub(crate) start: u32,
    #[arg(long, default_value_t = 10, help = "Max number of items to show")]
    pub(crate) count: u32,
    #[arg(long, default_value = DEFAULT_CHANGE_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct PluginListArgs {
    #[arg(long, default_value = DEFAULT_PLUGIN_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct AgentListArgs {
    #[arg(long, default_value = DEFAULT_AGENT_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct UserListArgs {
    #[arg(long, default_value = DEFAULT_USER_COLUMNS, help = "comma-separated list of columns to show in table")]
    pub(crate) columns: String,
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Build(BuildCommand::List(_)) => "build_list",
        Command::Build(BuildCommand::Trigger(_)) => "build_trigger",
        Command::Build(BuildCommand::Browse(_)) => "build_browse",
        Command::Build(BuildCommand::Queue(QueueCommand::List(_))) => "build_queue_list",
        Command::Build(BuildCommand::Queue(QueueCommand::Show(_))) => "build_queue_show",
        Command::Build(BuildCommand::Show(show)) => match show {
            BuildShowCommand::Details(_) => "build_show_details",
            BuildShowCommand::Statistics(_) => "build_show_statistics",
            BuildShowCommand::Log(_) => "build_show_log",
            BuildShowCommand::Artifacts(_) => "build_show_artifacts",
            BuildShowCommand::Parameters(_) => "build_show_parameters",
            BuildShowCommand::Tags(_) => "build_show_tags",
        },
        Command::BuildConfigs(BuildConfigsCommand::List(_)) => "build_configs_list",
        Command::BuildConfigs(BuildConfigsCommand::Show(_)) => "build_configs_show",
        Command::Project(ProjectCommand::List(_)) => "project_list",
        Command::Project(ProjectCommand::Show(_)) => "project_show",
        Command::Change(ChangeCommand::List(_)) => "change_list",
        Command::Change(ChangeCommand::Show(_)) => "change_show",
        Command::Server(ServerCommand::Info) => "server_info",
        Command::Server(ServerCommand::Plugin(PluginCommand::List(_))) => "server_plugin_list",
        Command::Server(ServerCommand::Agent(AgentCommand::List(_))) => "server_agent_list",
        Command::Server(ServerCommand::Agent(AgentCommand::Show(_))) => "server_agent_show",
        Command::Server(ServerCommand::Agent(AgentCommand::Statistics)) => {
            "server_agent_statistics"
        }
        Command::User(UserCommand::List(_)) => "user_list",
        Command::User(UserCommand::Show(_)) => "user_show",
    }
}
