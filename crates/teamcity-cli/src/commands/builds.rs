use std::io::Write;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::StreamExt;
use serde_json::Value;
use teamcity_api_models::{
    Comment, IdRef, Record, ResourceKind, TriggerBuildRequest, derive_column, lookup,
    record_from_value,
};

use crate::cli::{
    ArtifactsArgs, BuildListArgs, BuildStatus, BuildTriggerArgs, IdArgs, ShowAllArgs,
};
use crate::client::{ACCEPT_ANY, AppContext, CliError, CliResult, is_json};
use crate::commands::queue::render_queued_build;
use crate::commands::{attach_trigger_user, fetch_record, fetch_result_set, summarize};
use crate::output::{
    MISSING, OutputFormat, OutputSettings, render_record, render_result_set, write_json,
};
use crate::query::{Query, fields_selector, parse_columns};

/// Fields always requested for build rows; `user` is derived from `triggered`.
const BUILD_LIST_FIELDS: &[&str] = &[
    "id",
    "number",
    "status",
    "state",
    "statusText",
    "buildTypeId",
    "branchName",
    "webUrl",
    "triggered(type,user(username))",
];

const BUILD_DETAIL_FIELDS: &[(&str, &str)] = &[
    ("number", "number"),
    ("id", "id"),
    ("startDate", "startDate"),
    ("queuedDate", "queuedDate"),
    ("finishDate", "finishDate"),
    ("branchName", "branchName"),
    ("agent", "agent.name"),
    ("projectId", "buildType.projectId"),
    ("projectName", "buildType.projectName"),
    ("webUrl", "webUrl"),
    ("status", "status"),
    ("state", "state"),
    ("statusText", "statusText"),
];

/// Build the `builds` query for `build list`.
///
/// `--build-type-id` is mandatory; the check happens before any request.
pub(crate) fn build_list_query(args: &BuildListArgs, columns: &[String]) -> CliResult<Query> {
    let build_type = args
        .build_type_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CliError::usage("--build-type-id is required for `build list`"))?;

    Ok(Query::collection(ResourceKind::Build)
        .filter("buildType", build_type)
        .filter("branch", args.branch.as_str())
        .filter_opt("status", args.status.map(BuildStatus::as_locator))
        .filter("running", args.running.as_locator())
        .filter_opt("tags", args.tags.as_deref())
        .filter_opt("user", args.user.as_deref())
        .filter_opt("project", args.project.as_deref())
        .filter("start", args.start.to_string())
        .filter("count", args.count.to_string())
        .param(
            "fields",
            fields_selector("build", BUILD_LIST_FIELDS, columns, &["user"]),
        ))
}

pub(crate) async fn handle_build_list(
    ctx: &AppContext,
    out: &mut impl Write,
    args: BuildListArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = parse_columns(&args.columns);
    let query = build_list_query(&args, &columns)?;

    if args.show_url {
        writeln!(out, "{}", ctx.rest_url(&query)?)?;
    }
    if args.no_show_data {
        return Ok(());
    }

    let mut builds = fetch_result_set(ctx, &query).await?;
    for build in builds.records_mut() {
        derive_column(build, "user", "triggered.user.username", Some(MISSING));
    }
    render_result_set(out, &builds, "build", &columns, settings)
}

/// Parse `--parameter` pairs and assemble the queue payload.
pub(crate) fn trigger_request(args: &BuildTriggerArgs) -> CliResult<TriggerBuildRequest> {
    let build_type = args
        .build_type_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CliError::usage("--build-type-id is required for `build trigger`"))?;

    let mut request = TriggerBuildRequest::new(build_type).with_parameters(args.parameters.clone());
    request.branch_name = args.branch.clone().filter(|branch| !branch.trim().is_empty());
    request.comment = args.comment.clone().map(|text| Comment { text });
    request.agent = args.agent_id.clone().map(|id| IdRef { id });
    Ok(request)
}

pub(crate) async fn handle_build_trigger(
    ctx: &AppContext,
    out: &mut impl Write,
    args: BuildTriggerArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let request = trigger_request(&args)?;
    let url = ctx.rest_url(&Query::collection(ResourceKind::QueuedBuild))?;
    let value = ctx.post_json(url, &request).await?;
    let mut queued = record_from_value(value, "queued build")?;
    let build_id = queued_build_id(&queued)?;
    tracing::info!(build_id = %build_id, build_type = %request.build_type.id, "build queued");

    render_queued_build(out, &queued, settings)?;

    if args.open_build_log {
        let web_url = lookup(&queued, "webUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| CliError::failure(anyhow!("queued build has no webUrl")))?;
        open_in_browser(&format!("{web_url}&tab=buildLog"))?;
    }

    if !args.wait_for_run {
        return Ok(());
    }

    let query = Query::item(ResourceKind::QueuedBuild, &build_id);
    while lookup(&queued, "state").and_then(Value::as_str) == Some("queued") {
        tokio::time::sleep(Duration::from_secs(args.poll_interval_secs)).await;
        queued = fetch_record(ctx, &query).await?;
        let state = lookup(&queued, "state").and_then(Value::as_str).unwrap_or(MISSING);
        writeln!(out, "state: {state}")?;
    }
    render_queued_build(out, &queued, settings)
}

fn queued_build_id(record: &Record) -> CliResult<String> {
    match lookup(record, "id") {
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(CliError::failure(anyhow!("queued build response carries no id"))),
    }
}

fn open_in_browser(url: &str) -> CliResult<()> {
    tracing::debug!(%url, "opening browser");
    webbrowser::open(url)
        .map_err(|err| CliError::failure(anyhow!("failed to open browser for {url}: {err}")))
}

pub(crate) async fn handle_build_browse(ctx: &AppContext, args: IdArgs) -> CliResult<()> {
    for id in &args.ids {
        let build = fetch_record(ctx, &Query::item(ResourceKind::Build, id)).await?;
        let web_url = lookup(&build, "webUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| CliError::failure(anyhow!("build {id} has no webUrl")))?;
        open_in_browser(web_url)?;
    }
    Ok(())
}

/// Condensed view of a build for `build show details`.
pub(crate) fn build_summary(build: &Record) -> Record {
    let mut summary = summarize(build, BUILD_DETAIL_FIELDS);
    attach_trigger_user(build, &mut summary);
    summary
}

pub(crate) async fn handle_build_details(
    ctx: &AppContext,
    out: &mut impl Write,
    args: ShowAllArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    for id in &args.ids {
        let build = fetch_record(ctx, &Query::item(ResourceKind::Build, id)).await?;
        if args.show_all {
            render_record(out, &build, settings)?;
        } else {
            render_record(out, &build_summary(&build), settings)?;
        }
    }
    Ok(())
}

pub(crate) async fn handle_build_statistics(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    for id in &args.ids {
        let query = Query::item_child(ResourceKind::Build, id, "statistics");
        let statistics = fetch_record(ctx, &query).await?;
        render_record(out, &statistics, settings)?;
    }
    Ok(())
}

pub(crate) async fn handle_build_tags(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    for id in &args.ids {
        let tags = fetch_record(ctx, &Query::item_child(ResourceKind::Build, id, "tags")).await?;
        render_record(out, &tags, settings)?;
    }
    Ok(())
}

pub(crate) async fn handle_build_parameters(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let columns = vec!["name".to_string(), "value".to_string()];
    for id in &args.ids {
        let query = Query::item_child(ResourceKind::Build, id, "resulting-properties")
            .listing(ResourceKind::Property);
        let parameters = fetch_result_set(ctx, &query).await?;
        render_result_set(out, &parameters, query.kind().item_key(), &columns, settings)?;
    }
    Ok(())
}

/// Stream the plain-text build log.
pub(crate) async fn handle_build_log(
    ctx: &AppContext,
    out: &mut impl Write,
    args: IdArgs,
) -> CliResult<()> {
    for id in &args.ids {
        let mut url = ctx.server_url("downloadBuildLog.html")?;
        url.query_pairs_mut().append_pair("buildId", id.trim());
        let response = ctx.get_response(url, "text/plain, */*").await?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|err| CliError::transport(anyhow!("build log download failed: {err}")))?;
            out.write_all(&chunk)?;
        }
        out.flush()?;
    }
    Ok(())
}

/// Path of the artifacts view: `artifacts[/<type>[/<path>]]`.
pub(crate) fn artifacts_path(args: &ArtifactsArgs) -> String {
    let mut path = String::from("artifacts");
    let data_type = args.data_type.as_deref().map(str::trim).unwrap_or_default();
    let name = args
        .artifact_relative_name
        .as_deref()
        .map(|name| name.trim().trim_start_matches('/'))
        .unwrap_or_default();
    if !data_type.is_empty() {
        path.push('/');
        path.push_str(data_type);
        if !name.is_empty() {
            path.push('/');
            path.push_str(name);
        }
    }
    path
}

pub(crate) async fn handle_build_artifacts(
    ctx: &AppContext,
    out: &mut impl Write,
    args: ArtifactsArgs,
    settings: OutputSettings,
) -> CliResult<()> {
    let query = Query::item_child(ResourceKind::Build, &args.build_id, &artifacts_path(&args));
    let url = ctx.rest_url(&query)?;
    let response = ctx.get_response(url, ACCEPT_ANY).await?;

    if is_json(&response) {
        let value = response
            .json::<Value>()
            .await
            .map_err(|err| CliError::failure(anyhow!("failed to parse artifact listing: {err}")))?;
        match (value, settings.record_format()) {
            (Value::Object(record), OutputFormat::Table) => render_record(out, &record, settings),
            (value, _) => write_json(out, &value),
        }
    } else {
        let text = response
            .text()
            .await
            .map_err(|err| CliError::transport(anyhow!("artifact download failed: {err}")))?;
        out.write_all(text.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TriState;
    use crate::client::{Auth, build_client, parse_url};
    use httpmock::prelude::*;
    use serde_json::json;

    fn context(server: &MockServer) -> AppContext {
        AppContext {
            client: build_client(Duration::from_secs(5), "test").expect("client"),
            base_url: parse_url(&server.base_url()).expect("valid URL"),
            auth: Auth::Guest,
        }
    }

    fn settings() -> OutputSettings {
        OutputSettings {
            format: None,
            color: false,
        }
    }

    fn list_args(build_type_id: Option<&str>) -> BuildListArgs {
        BuildListArgs {
            show_url: false,
            no_show_data: false,
            start: 0,
            count: 100,
            project: None,
            build_type_id: build_type_id.map(str::to_string),
            branch: "default:any".to_string(),
            status: None,
            running: TriState::Any,
            tags: None,
            user: None,
            columns: crate::cli::DEFAULT_BUILD_COLUMNS.to_string(),
        }
    }

    fn trigger_args() -> BuildTriggerArgs {
        BuildTriggerArgs {
            build_type_id: Some("Proj_Build".to_string()),
            branch: None,
            comment: None,
            parameters: Vec::new(),
            agent_id: None,
            open_build_log: false,
            wait_for_run: false,
            poll_interval_secs: 1,
        }
    }

    #[test]
    fn build_list_query_translates_filters() {
        let mut args = list_args(Some("Ansvc_Branches_Py34"));
        args.branch = "feature/login".to_string();
        args.status = Some(BuildStatus::Failure);
        args.tags = Some("nightly,release".to_string());
        let columns = parse_columns("status,number,user");
        let query = build_list_query(&args, &columns).expect("query");
        assert_eq!(
            query.locator().as_deref(),
            Some(
                "buildType:Ansvc_Branches_Py34,branch:feature/login,status:FAILURE,running:any,\
                 tags:(nightly,release),start:0,count:100"
            )
        );
    }

    #[test]
    fn build_list_requires_build_type() {
        let err = build_list_query(&list_args(None), &[]).expect_err("usage error");
        assert!(matches!(err, CliError::Usage(_)));
        let err = build_list_query(&list_args(Some("  ")), &[]).expect_err("usage error");
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn trigger_request_carries_optional_fields() {
        let mut args = trigger_args();
        args.branch = Some("feature/x".to_string());
        args.comment = Some("manual run".to_string());
        args.agent_id = Some("12".to_string());
        args.parameters = vec![("env.MODE".to_string(), "fast".to_string())];
        let request = trigger_request(&args).expect("request");
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({
                "buildType": {"id": "Proj_Build"},
                "branchName": "feature/x",
                "comment": {"text": "manual run"},
                "properties": {"property": [{"name": "env.MODE", "value": "fast"}]},
                "agent": {"id": "12"}
            })
        );

        args.build_type_id = None;
        assert!(matches!(trigger_request(&args), Err(CliError::Usage(_))));
    }

    #[test]
    fn artifacts_path_only_nests_names_under_a_type() {
        let args = |data_type: Option<&str>, name: Option<&str>| ArtifactsArgs {
            build_id: "1".to_string(),
            data_type: data_type.map(str::to_string),
            artifact_relative_name: name.map(str::to_string),
        };
        assert_eq!(artifacts_path(&args(None, None)), "artifacts");
        assert_eq!(artifacts_path(&args(Some("children"), None)), "artifacts/children");
        assert_eq!(
            artifacts_path(&args(Some("content"), Some("/dist/app.zip"))),
            "artifacts/content/dist/app.zip"
        );
        assert_eq!(artifacts_path(&args(None, Some("ignored"))), "artifacts");
    }

    #[test]
    fn build_summary_picks_known_fields() {
        let build = record_from_value(
            json!({
                "id": 99, "number": "12", "status": "SUCCESS", "state": "finished",
                "agent": {"name": "agent-1"},
                "buildType": {"projectId": "Proj", "projectName": "Project"},
                "triggered": {"type": "user", "user": {"username": "jdoe"}},
                "changes": {"count": 3}
            }),
            "build",
        )
        .expect("object");
        let summary = build_summary(&build);
        assert_eq!(summary.get("agent"), Some(&json!("agent-1")));
        assert_eq!(summary.get("projectName"), Some(&json!("Project")));
        assert_eq!(summary.get("username"), Some(&json!("jdoe")));
        assert_eq!(summary.get("finishDate"), Some(&Value::Null));
        assert!(!summary.contains_key("changes"));
    }

    #[test]
    fn build_list_query_wraps_comma_branches() {
        let mut args = list_args(Some("Proj_Build"));
        args.branch = "feature/a,b".to_string();
        let query = build_list_query(&args, &[]).expect("query");
        assert_eq!(
            query.locator().as_deref(),
            Some("buildType:Proj_Build,branch:(feature/a,b),running:any,start:0,count:100")
        );
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).expect("utf-8")
    }

    #[tokio::test]
    async fn build_list_renders_count_line_and_trigger_user() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/guestAuth/app/rest/builds")
                .query_param(
                    "locator",
                    "buildType:Ansvc_Branches_Py34,branch:master,running:any,start:0,count:100",
                );
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "count": 2,
                    "build": [
                        {"id": 2, "number": "164", "status": "SUCCESS", "state": "finished",
                         "buildTypeId": "Ansvc_Branches_Py34", "branchName": "master",
                         "triggered": {"type": "user", "user": {"username": "jdoe"}}},
                        {"id": 1, "number": "163", "status": "FAILURE", "state": "finished",
                         "buildTypeId": "Ansvc_Branches_Py34", "branchName": "master",
                         "triggered": {"type": "vcs"}}
                    ]
                }));
        });

        let mut args = list_args(Some("Ansvc_Branches_Py34"));
        args.branch = "master".to_string();
        args.columns = "number,status,user".to_string();
        let mut out = Vec::new();
        handle_build_list(&context(&server), &mut out, args, settings())
            .await
            .expect("build list");
        mock.assert();

        let rendered = text(out);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "count: 2");
        assert_eq!(lines.len(), 2 + 5);
        assert_eq!(lines[2], "| number | status  | user |");
        assert_eq!(lines[4], "| 164    | SUCCESS | jdoe |");
        assert_eq!(lines[5], "| 163    | FAILURE | N/A  |");
    }

    #[tokio::test]
    async fn build_list_without_data_skips_request() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/guestAuth/app/rest/builds");
            then.status(200).json_body(json!({"count": 0}));
        });

        let mut args = list_args(Some("Proj_Build"));
        args.show_url = true;
        args.no_show_data = true;
        let mut out = Vec::new();
        handle_build_list(&context(&server), &mut out, args, settings())
            .await
            .expect("build list");
        mock.assert_calls(0);

        let rendered = text(out);
        assert_eq!(rendered.lines().count(), 1);
        let expected_prefix = format!("{}/guestAuth/app/rest/builds?locator=", server.base_url());
        assert!(rendered.starts_with(&expected_prefix));
    }

    #[tokio::test]
    async fn build_list_surfaces_api_error_without_output() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/guestAuth/app/rest/builds");
            then.status(404).body(
                "Error has occurred during request processing (Not Found).\n\
                 Error: NotFoundException: No build type nor template is found by id 'Nope'.",
            );
        });

        let mut out = Vec::new();
        let ctx = context(&server);
        let err = handle_build_list(&ctx, &mut out, list_args(Some("Nope")), settings())
            .await
            .expect_err("api error");
        mock.assert();
        assert!(out.is_empty());
        match err {
            CliError::Api { status, message } => {
                assert_eq!(status.as_u16(), 404);
                assert!(message.contains("No build type nor template"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn build_trigger_posts_to_queue_and_waits_for_run() {
        let server = MockServer::start_async().await;
        let queue = server.mock(|when, then| {
            when.method(POST)
                .path("/guestAuth/app/rest/buildQueue")
                .json_body(json!({"buildType": {"id": "Proj_Build"}, "branchName": "main"}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": 501, "state": "queued", "branchName": "main",
                    "webUrl": "http://tc/viewQueued.html?itemId=501",
                    "buildType": {"projectId": "Proj", "projectName": "Project"}
                }));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/guestAuth/app/rest/buildQueue/id:501");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"id": 501, "state": "running", "branchName": "main"}));
        });

        let mut args = trigger_args();
        args.branch = Some("main".to_string());
        args.wait_for_run = true;
        let mut out = Vec::new();
        handle_build_trigger(&context(&server), &mut out, args, settings())
            .await
            .expect("trigger");

        queue.assert();
        poll.assert_calls(1);
        assert!(text(out).contains("state: running\n"));
    }

    #[tokio::test]
    async fn build_parameters_render_property_table() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/guestAuth/app/rest/builds/id:42/resulting-properties");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "count": 1,
                    "property": [{"name": "env.JAVA_HOME", "value": "/opt/jdk"}]
                }));
        });

        let mut out = Vec::new();
        handle_build_parameters(
            &context(&server),
            &mut out,
            IdArgs {
                ids: vec!["42".to_string()],
            },
            settings(),
        )
        .await
        .expect("parameters");
        mock.assert();

        let rendered = text(out);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "count: 1");
        assert_eq!(lines[2], "| name          | value    |");
        assert_eq!(lines[4], "| env.JAVA_HOME | /opt/jdk |");
    }

    #[tokio::test]
    async fn build_log_downloads_plain_text() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/guestAuth/downloadBuildLog.html")
                .query_param("buildId", "42");
            then.status(200)
                .header("content-type", "text/plain")
                .body("[12:00:00] Step 1/2\n[12:00:05] Build finished\n");
        });

        let mut out = Vec::new();
        handle_build_log(
            &context(&server),
            &mut out,
            IdArgs {
                ids: vec!["42".to_string()],
            },
        )
        .await
        .expect("log");
        mock.assert();
        assert_eq!(
            text(out),
            "[12:00:00] Step 1/2\n[12:00:05] Build finished\n"
        );
    }

    #[tokio::test]
    async fn build_artifacts_print_raw_content() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/guestAuth/app/rest/builds/id:42/artifacts/content/report.txt");
            then.status(200)
                .header("content-type", "text/plain")
                .body("all green\n");
        });

        let mut out = Vec::new();
        handle_build_artifacts(
            &context(&server),
            &mut out,
            ArtifactsArgs {
                build_id: "42".to_string(),
                data_type: Some("content".to_string()),
                artifact_relative_name: Some("report.txt".to_string()),
            },
            settings(),
        )
        .await
        .expect("artifacts");
        mock.assert();
        assert_eq!(text(out), "all green\n");
    }
}
