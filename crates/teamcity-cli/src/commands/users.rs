use std::io::Write;

use teamcity_api_models::ResourceKind;

use crate::cli::{IdArgs, UserListArgs};
use crate::client::{AppContext, CliResult};
use crate::commands::{fetch_result_set, show_items};
use crate::output::{OutputSettings, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

pub(crate) async fn handle_user_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: UserListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = Query::collection(ResourceKind::User).param(
        "fields",
        fields_selector("user", &["id", "username", "name"], &columns, &[]),
    );
    let users = fetch_result_set(ctx, &query).await?;
    render_result_set(out, &users, query.kind().item_key(), &columns, settings)
}

/// Users are addressed by username rather than numeric id.
pub(crate) async fn handle_user_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    show_items(ctx, out, ResourceKind::User, &args.ids, settings).await
}
