//! Command handlers grouped by TeamCity resource.

pub(crate) mod build_configs;
pub(crate) mod builds;
pub(crate) mod changes;
pub(crate) mod projects;
pub(crate) mod queue;
pub(crate) mod server;
pub(crate) mod users;

use std::io::Write;

use serde_json::Value;
use teamcity_api_models::{Record, ResourceKind, ResultSet, lookup, record_from_value};

use crate::client::{AppContext, CliResult};
use crate::output::{OutputSettings, render_record};
use crate::query::Query;

/// Fetch a collection and decode its envelope.
pub(crate) async fn fetch_result_set(ctx: &AppContext, query: &Query) -> CliResult<ResultSet> {
    let url = ctx.rest_url(query)?;
    let value = ctx.get_json(url).await?;
    let set = ResultSet::from_envelope(value, query.kind().item_key())?;
    if let Some(reported) = set.reported_count()
        && usize::try_from(reported).ok() != Some(set.count())
    {
        tracing::warn!(
            reported,
            received = set.count(),
            "server count differs from items received"
        );
    }
    Ok(set)
}

pub(crate) async fn fetch_record(ctx: &AppContext, query: &Query) -> CliResult<Record> {
    let url = ctx.rest_url(query)?;
    let value = ctx.get_json(url).await?;
    Ok(record_from_value(value, &query.path())?)
}

/// Fetch and render each identified item in turn.
pub(crate) async fn show_items(
    ctx: &AppContext,
    out: &mut impl Write,
    kind: ResourceKind,
    ids: &[String],
    settings: OutputSettings,
) -> CliResult<()> {
    for id in ids {
        let record = fetch_record(ctx, &Query::item(kind, id)).await?;
        render_record(out, &record, settings)?;
    }
    Ok(())
}

/// Pick `(name, path)` pairs out of a record, `null` where absent.
pub(crate) fn summarize(record: &Record, fields: &[(&str, &str)]) -> Record {
    fields
        .iter()
        .map(|(name, path)| {
            (
                (*name).to_string(),
                lookup(record, path).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

/// Attach `username` when the build was triggered by a person.
pub(crate) fn attach_trigger_user(source: &Record, summary: &mut Record) {
    let by_user = lookup(source, "triggered.type").and_then(Value::as_str) == Some("user");
    if by_user && let Some(username) = lookup(source, "triggered.user.username") {
        summary.insert("username".to_string(), username.clone());
    }
}
