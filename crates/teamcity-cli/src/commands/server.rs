//! Server, plugin, and agent commands.

use std::io::Write;

use anyhow::anyhow;
use teamcity_api_models::{AgentStatistics, ResourceKind, derive_column, record_from_value};

use crate::cli::{AgentListArgs, IdArgs, PluginListArgs};
use crate::client::{AppContext, CliError, CliResult};
use crate::commands::{fetch_record, fetch_result_set, show_items};
use crate::output::{OutputSettings, render_record, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

/// Agent columns computed from nested pool and running-build fields.
const AGENT_DERIVED_COLUMNS: &[(&str, &str)] = &[
    ("pool", "pool.name"),
    ("build_type", "build.buildTypeId"),
    ("build_text", "build.statusText"),
];

pub(crate) async fn handle_server_info(
    ctx: &AppContext,
    out: &mut impl Write,
    settings: OutputSettings,
) -> CliResult<()> {
    let info = fetch_record(ctx, &Query::collection(ResourceKind::Server)).await?;
    render_record(out, &info, settings)
}

pub(crate) async fn handle_plugin_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: PluginListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = Query::collection(ResourceKind::Plugin);
    let plugins = fetch_result_set(ctx, &query).await?;
    render_result_set(out, &plugins, query.kind().item_key(), &columns, settings)
}

pub(crate) fn agent_list_query(columns: &[String]) -> Query {
    let derived: Vec<&str> = AGENT_DERIVED_COLUMNS.iter().map(|(name, _)| *name).collect();
    Query::collection(ResourceKind::Agent).param(
        "fields",
        fields_selector(
            "agent",
            &["id", "name", "ip", "pool(name)", "build(buildTypeId,statusText)"],
            columns,
            &derived,
        ),
    )
}

pub(crate) async fn handle_agent_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: AgentListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = agent_list_query(&columns);
    let mut agents = fetch_result_set(ctx, &query).await?;
    for agent in agents.records_mut() {
        for (column, path) in AGENT_DERIVED_COLUMNS {
            derive_column(agent, column, path, None);
        }
    }
    render_result_set(out, &agents, query.kind().item_key(), &columns, settings)
}

pub(crate) async fn handle_agent_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    show_items(ctx, out, ResourceKind::Agent, &args.ids, settings).await
}

/// Count agents across every state, not only the connected and authorized
/// ones the server lists by default.
pub(crate) async fn handle_agent_statistics(
    ctx: &AppContext,
    out: &mut impl Write,
    settings: OutputSettings,
) -> CliResult<()> {
    let query = Query::collection(ResourceKind::Agent)
        .filter("defaultFilter", "false")
        .param(
            "fields",
            "count,agent(id,connected,enabled,authorized,build(id))",
        );
    let agents = fetch_result_set(ctx, &query).await?;
    let statistics = AgentStatistics::from_agents(&agents);
    tracing::debug!(total = statistics.total, busy = statistics.busy, "agent statistics");

    let value = serde_json::to_value(statistics)
        .map_err(|err| CliError::failure(anyhow!("failed to encode agent statistics: {err}")))?;
    render_record(out, &record_from_value(value, "agent statistics")?, settings)
}
