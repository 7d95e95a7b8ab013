use std::io::Write;

use serde_json::Value;
use teamcity_api_models::{Record, ResourceKind, derive_column, lookup};

use crate::cli::{QueueListArgs, ShowAllArgs};
use crate::client::{AppContext, CliResult};
use crate::commands::{attach_trigger_user, fetch_record, fetch_result_set, summarize};
use crate::output::{MISSING, OutputSettings, render_record, render_result_set};
use crate::query::{Query, fields_selector, parse_columns};

const QUEUE_LIST_FIELDS: &[&str] = &[
    "id",
    "state",
    "buildTypeId",
    "branchName",
    "webUrl",
    "triggered(type,user(username))",
];

const QUEUED_BUILD_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("number", "number"),
    ("startEstimate", "startEstimate"),
    ("startDate", "startDate"),
    ("queuedDate", "queuedDate"),
    ("finishDate", "finishDate"),
    ("branchName", "branchName"),
    ("projectId", "buildType.projectId"),
    ("projectName", "buildType.projectName"),
    ("webUrl", "webUrl"),
    ("state", "state"),
    ("waitReason", "waitReason"),
];

pub(crate) fn queued_build_summary(queued: &Record) -> Record {
    let mut summary = summarize(queued, QUEUED_BUILD_FIELDS);
    attach_trigger_user(queued, &mut summary);
    summary
}

/// Render the condensed view of a queued build.
pub(crate) fn render_queued_build(
    out: &mut impl Write,
    queued: &Record,
    settings: OutputSettings,
) -> CliResult<()> {
    render_record(out, &queued_build_summary(queued), settings)
}

pub(crate) async fn handle_queue_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: QueueListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = Query::collection(ResourceKind::QueuedBuild)
        .filter_opt("buildType", args.build_type_id.as_deref())
        .param(
            "fields",
            fields_selector("build", QUEUE_LIST_FIELDS, &columns, &["user"]),
        );

    let mut queued = fetch_result_set(ctx, &query).await?;
    // The queue locator has no branch dimension.
    if let Some(branch) = args.branch.as_deref().filter(|branch| !branch.trim().is_empty()) {
        queued.retain(|build| {
            lookup(build, "branchName").and_then(Value::as_str) == Some(branch)
        });
    }
    for build in queued.records_mut() {
        derive_column(build, "user", "triggered.user.username", Some(MISSING));
    }
    render_result_set(out, &queued, "build", &columns, settings)
}

pub(crate) async fn handle_queue_show(
    ctx: &AppContext,
    out: &mut impl Write,
    args: ShowAllArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    for id in &args.ids {
        let queued = fetch_record(ctx, &Query::item(ResourceKind::QueuedBuild, id)).await?;
        if args.show_all {
            render_record(out, &queued, settings)?;
        } else {
            render_queued_build(out, &queued, settings)?;
        }
    }
    Ok(())
}
