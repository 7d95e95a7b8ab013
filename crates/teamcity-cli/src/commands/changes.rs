use std::io::Write;

use teamcity_api_models::ResourceKind;

use crate::cli::{ChangeListArgs, IdArgs};
use crate::client::{AppContext, CliResult};
use crate::commands::{fetch_result_set, show_items};
use crate::output::{OutputSettings, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

pub(crate) async fn handle_change_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: ChangeListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = Query::collection(ResourceKind::Change)
        .filter("start", args.start.to_string())
        .filter("count", args.count.to_string())
        .param(
            "fields",
            fields_selector("change", &["id", "version", "username", "date"], &columns, &[]),
        );
    let changes = fetch_result_set(ctx, &query).await?;
    render_result_set(out, &changes, query.kind().item_key(), &columns, settings)
}

pub(crate) async fn handle_change_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    show_items(ctx, out, ResourceKind::Change, &args.ids, settings).await
}
