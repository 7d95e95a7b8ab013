use std::io::Write;

use teamcity_api_models::ResourceKind;

use crate::cli::{IdArgs, ProjectListArgs};
use crate::client::{AppContext, CliResult};
use crate::commands::{fetch_result_set, show_items};
use crate::output::{OutputSettings, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

pub(crate) fn project_list_query(args: &ProjectListArgs, columns: &[String]) -> Query {
    let parent = args
        .parent_project_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| format!("(id:{id})"));
    Query::collection(ResourceKind::Project)
        .filter_opt("parentProject", parent.as_deref())
        .param(
            "fields",
            fields_selector("project", &["id", "name", "parentProjectId"], columns, &[]),
        )
}

pub(crate) async fn handle_project_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: ProjectListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = project_list_query(&args, &columns);
    let projects = fetch_result_set(ctx, &query).await?;
    render_result_set(out, &projects, query.kind().item_key(), &columns, settings)
}

pub(crate) async fn handle_project_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    show_items(ctx, out, ResourceKind::Project, &args.ids, settings).await
}
