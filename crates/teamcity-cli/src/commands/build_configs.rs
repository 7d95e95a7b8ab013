use std::io::Write;

use teamcity_api_models::ResourceKind;

use crate::cli::{BuildConfigsListArgs, IdArgs, TriState};
use crate::client::{AppContext, CliResult};
use crate::commands::{fetch_result_set, show_items};
use crate::output::{OutputSettings, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

pub(crate) fn build_configs_query(args: &BuildConfigsListArgs, columns: &[String]) -> Query {
    let template_flag = match args.template_flag {
        TriState::Any => None,
        flag => Some(flag.as_locator()),
    };
    Query::collection(ResourceKind::BuildType)
        .filter_opt("project", args.project.as_deref())
        .filter_opt("affectedProject", args.affected_project.as_deref())
        .filter_opt("templateFlag", template_flag)
        .param(
            "fields",
            fields_selector("buildType", &["id", "name", "projectName"], columns, &[]),
        )
}

pub(crate) async fn handle_build_configs_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: BuildConfigsListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = build_configs_query(&args, &columns);
    if args.show_url {
        writeln!(out, "{}", ctx.rest_url(&query)?)?;
    }
    let configs = fetch_result_set(ctx, &query).await?;
    render_result_set(out, &configs, query.kind().item_key(), &columns, settings)
}

pub(crate) async fn handle_build_configs_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    show_items(ctx, out, ResourceKind::BuildType, &args.ids, settings).await
}
