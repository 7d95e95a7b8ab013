//! Shared HTTP client, credentials, and error types for the CLI.

use std::time::Duration;

use anyhow::anyhow;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::query::Query;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const ACCEPT_JSON: &str = "application/json";
pub(crate) const ACCEPT_ANY: &str = "application/json, */*;q=0.5";

/// CLI-level error type separating usage mistakes from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    /// Bad or missing command-line input; nothing was sent.
    Usage(String),
    /// The server could not be reached.
    Transport(anyhow::Error),
    /// The server answered with a non-success status.
    Api { status: StatusCode, message: String },
    /// Anything else: malformed payloads, local I/O.
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub(crate) fn transport(error: impl Into<anyhow::Error>) -> Self {
        Self::Transport(error.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Failure(_) => 1,
            Self::Usage(_) => 2,
            Self::Transport(_) => 3,
            Self::Api { .. } => 4,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Usage(message) => message.clone(),
            Self::Transport(error) | Self::Failure(error) => format!("{error:#}"),
            Self::Api { status, message } if message.is_empty() => {
                format!("TeamCity returned {status}")
            }
            Self::Api { status, message } => format!("TeamCity returned {status}: {message}"),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.display_message())
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::failure(anyhow!("failed to write output: {err}"))
    }
}

impl From<teamcity_api_models::ModelError> for CliError {
    fn from(err: teamcity_api_models::ModelError) -> Self {
        Self::failure(anyhow!("unexpected response shape: {err}"))
    }
}

/// Credentials presented to TeamCity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Auth {
    Guest,
    Basic { user: String, password: String },
    Bearer(String),
}

impl Auth {
    /// Resolve credentials from flags; a token wins over user/password.
    pub(crate) fn resolve(
        user: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> CliResult<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let (user, password, token) = (non_empty(user), non_empty(password), non_empty(token));

        if let Some(token) = token {
            if user.is_some() {
                tracing::debug!("token supplied; ignoring user/password credentials");
            }
            return Ok(Self::Bearer(token.trim().to_string()));
        }

        match (user, password) {
            (Some(user), Some(password)) => Ok(Self::Basic {
                user: user.trim().to_string(),
                password,
            }),
            (Some(_), None) => Err(CliError::usage(
                "a password is required with --username (pass --password or set TEAMCITY_PASSWORD)",
            )),
            (None, Some(_)) => Err(CliError::usage(
                "a user is required with --password (pass --username or set TEAMCITY_USER)",
            )),
            (None, None) => Ok(Self::Guest),
        }
    }

    /// Path prefix of the REST root for this authentication scheme.
    pub(crate) const fn rest_prefix(&self) -> &'static str {
        match self {
            Self::Guest => "guestAuth/app/rest/",
            Self::Basic { .. } => "httpAuth/app/rest/",
            Self::Bearer(_) => "app/rest/",
        }
    }

    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Guest => builder,
            Self::Basic { user, password } => builder.basic_auth(user, Some(password)),
            Self::Bearer(token) => builder.bearer_auth(token),
        }
    }
}

/// Build the shared HTTP client.
pub(crate) fn build_client(timeout: Duration, request_id: &str) -> CliResult<Client> {
    let mut default_headers = HeaderMap::new();
    let request_id = HeaderValue::from_str(request_id).map_err(|_| {
        CliError::failure(anyhow!("request identifier contains invalid characters"))
    })?;
    default_headers.insert(HEADER_REQUEST_ID, request_id);
    default_headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("teamcity-cli/", env!("CARGO_PKG_VERSION"))),
    );

    Client::builder()
        .timeout(timeout)
        .default_headers(default_headers)
        .build()
        .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))
}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) client: Client,
    pub(crate) base_url: Url,
    pub(crate) auth: Auth,
}

impl AppContext {
    /// Absolute URL for a REST query, locator and parameters included.
    pub(crate) fn rest_url(&self, query: &Query) -> CliResult<Url> {
        let invalid = || CliError::usage(format!("invalid request path '{}'", query.path()));
        let mut url = self
            .base_url
            .join(self.auth.rest_prefix())
            .map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(query.segments());
        query.apply(&mut url);
        Ok(url)
    }

    /// Absolute URL for a non-REST server page such as the build log download.
    pub(crate) fn server_url(&self, path: &str) -> CliResult<Url> {
        let prefix = match self.auth {
            Auth::Guest => "guestAuth/",
            Auth::Basic { .. } => "httpAuth/",
            Auth::Bearer(_) => "",
        };
        self.base_url
            .join(&format!("{prefix}{path}"))
            .map_err(|err| CliError::usage(format!("invalid request path '{path}': {err}")))
    }

    pub(crate) async fn get_json(&self, url: Url) -> CliResult<Value> {
        let response = self.get_response(url, ACCEPT_JSON).await?;
        decode_json(response).await
    }

    pub(crate) async fn post_json<T: Serialize + Sync>(
        &self,
        url: Url,
        body: &T,
    ) -> CliResult<Value> {
        tracing::debug!(%url, "POST");
        let response = self
            .auth
            .apply(self.client.post(url.clone()))
            .json(body)
            .send()
            .await
            .map_err(|err| CliError::transport(anyhow!("request to {url} failed: {err}")))?;
        let response = ensure_success(response).await?;
        decode_json(response).await
    }

    /// Issue a GET and return the successful response without consuming it.
    pub(crate) async fn get_response(&self, url: Url, accept: &str) -> CliResult<Response> {
        tracing::debug!(%url, "GET");
        let response = self
            .auth
            .apply(self.client.get(url.clone()))
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|err| CliError::transport(anyhow!("request to {url} failed: {err}")))?;
        ensure_success(response).await
    }
}

/// Whether a response declares a JSON body.
pub(crate) fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("json"))
}

async fn ensure_success(response: Response) -> CliResult<Response> {
    let status = response.status();
    tracing::debug!(status = %status, "response received");
    if status.is_success() {
        Ok(response)
    } else {
        Err(classify_problem(response).await)
    }
}

async fn decode_json(response: Response) -> CliResult<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|err| CliError::failure(anyhow!("failed to parse TeamCity response: {err}")))
}

/// Classify a non-success HTTP response into a CLI error.
pub(crate) async fn classify_problem(response: Response) -> CliError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    CliError::Api {
        status,
        message: problem_message(&bytes),
    }
}

/// Extract a human-readable message from an error body.
///
/// TeamCity answers most failures with plain text whose first line is a
/// generic banner; the interesting part follows `Error:`.
fn problem_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let text = ["message", "details", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str));
        if let Some(text) = text {
            return text.trim().to_string();
        }
    }

    let text = String::from_utf8_lossy(body);
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let first = lines.next().unwrap_or_default();
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Error:"))
        .map_or_else(|| first.to_string(), |detail| detail.trim().to_string())
}

/// Parse the server URL provided to the CLI, normalising a trailing slash so
/// relative joins stay below any context path.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    let mut url = input
        .trim()
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))?;
    if url.cannot_be_a_base() {
        return Err(format!("invalid URL '{input}': not a base URL"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use teamcity_api_models::ResourceKind;

    fn context_with(server: &MockServer, auth: Auth) -> AppContext {
        AppContext {
            client: build_client(Duration::from_secs(5), "test-request").expect("client"),
            base_url: parse_url(&server.base_url()).expect("valid URL"),
            auth,
        }
    }

    #[test]
    fn parse_url_appends_trailing_slash() {
        let url = parse_url("https://ci.example.com/teamcity").expect("valid URL");
        assert_eq!(url.as_str(), "https://ci.example.com/teamcity/");
        let err = parse_url("not-a-url").expect_err("invalid URL should fail");
        assert!(err.contains("invalid URL"));
    }

    #[test]
    fn auth_resolution_prefers_token() {
        let auth = Auth::resolve(Some("jdoe".into()), None, Some(" tok ".into()));
        assert_eq!(auth.ok(), Some(Auth::Bearer("tok".into())));
    }

    #[test]
    fn auth_resolution_requires_both_halves_of_basic_credentials() {
        let err = Auth::resolve(Some("jdoe".into()), None, None).expect_err("missing password");
        assert!(matches!(err, CliError::Usage(_)));
        let err = Auth::resolve(None, Some("pw".into()), None).expect_err("missing user");
        assert!(matches!(err, CliError::Usage(_)));
        assert_eq!(Auth::resolve(None, None, None).ok(), Some(Auth::Guest));
        assert_eq!(
            Auth::resolve(Some("jdoe".into()), Some("pw".into()), Some("  ".into())).ok(),
            Some(Auth::Basic {
                user: "jdoe".into(),
                password: "pw".into()
            })
        );
    }

    #[test]
    fn rest_url_uses_auth_specific_root() {
        let base = parse_url("https://ci.example.com/tc").expect("valid URL");
        let query = Query::item(ResourceKind::Project, "Root");
        for (auth, expected) in [
            (Auth::Guest, "https://ci.example.com/tc/guestAuth/app/rest/projects/id:Root"),
            (
                Auth::Basic {
                    user: "u".into(),
                    password: "p".into(),
                },
                "https://ci.example.com/tc/httpAuth/app/rest/projects/id:Root",
            ),
            (
                Auth::Bearer("t".into()),
                "https://ci.example.com/tc/app/rest/projects/id:Root",
            ),
        ] {
            let ctx = AppContext {
                client: Client::new(),
                base_url: base.clone(),
                auth,
            };
            assert_eq!(ctx.rest_url(&query).expect("url").as_str(), expected);
        }
    }

    #[test]
    fn rest_url_escapes_identifiers() {
        let ctx = AppContext {
            client: Client::new(),
            base_url: parse_url("http://tc").expect("valid URL"),
            auth: Auth::Guest,
        };
        let url = ctx
            .rest_url(&Query::item(ResourceKind::User, "a#b"))
            .expect("url");
        assert_eq!(url.as_str(), "http://tc/guestAuth/app/rest/users/username:a%23b");
        assert_eq!(url.fragment(), None);

        let url = ctx
            .rest_url(&Query::item(ResourceKind::BuildType, "odd/id?x"))
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://tc/guestAuth/app/rest/buildTypes/id:odd%2Fid%3Fx"
        );
    }

    #[test]
    fn problem_message_prefers_error_detail_line() {
        let body = b"Error has occurred during request processing (Not Found).\n\
            Error: jetbrains.buildServer.server.rest.errors.NotFoundException: No build type found\n";
        assert_eq!(
            problem_message(body),
            "jetbrains.buildServer.server.rest.errors.NotFoundException: No build type found"
        );
        assert_eq!(problem_message(b"\n  Forbidden  \n"), "Forbidden");
        assert_eq!(
            problem_message(br#"{"message": "token expired"}"#),
            "token expired"
        );
        assert_eq!(problem_message(b""), "");
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(CliError::usage("bad").exit_code(), 2);
        assert_eq!(CliError::transport(anyhow!("down")).exit_code(), 3);
        let api = CliError::Api {
            status: StatusCode::NOT_FOUND,
            message: String::new(),
        };
        assert_eq!(api.exit_code(), 4);
        assert_eq!(api.display_message(), "TeamCity returned 404 Not Found");
        assert_eq!(CliError::failure(anyhow!("io")).exit_code(), 1);
    }

    #[tokio::test]
    async fn get_json_sends_bearer_token_and_request_id() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/app/rest/server")
                .header("authorization", "Bearer secret")
                .header(HEADER_REQUEST_ID, "test-request")
                .header("accept", ACCEPT_JSON);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"version": "2024.03"}));
        });

        let ctx = context_with(&server, Auth::Bearer("secret".into()));
        let url = ctx
            .rest_url(&Query::collection(ResourceKind::Server))
            .expect("url");
        let value = ctx.get_json(url).await.expect("json");

        mock.assert();
        assert_eq!(value, json!({"version": "2024.03"}));
    }

    #[tokio::test]
    async fn non_success_status_becomes_api_error() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/guestAuth/app/rest/users");
            then.status(403)
                .body("Access denied.\nError: You do not have enough permissions\n");
        });

        let ctx = context_with(&server, Auth::Guest);
        let url = ctx
            .rest_url(&Query::collection(ResourceKind::User))
            .expect("url");
        let err = ctx.get_json(url).await.expect_err("should fail");

        mock.assert();
        match err {
            CliError::Api { status, message } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(message, "You do not have enough permissions");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let ctx = AppContext {
            client: build_client(Duration::from_secs(2), "test-request").expect("client"),
            base_url: parse_url("http://127.0.0.1:9").expect("valid URL"),
            auth: Auth::Guest,
        };
        let url = ctx
            .rest_url(&Query::collection(ResourceKind::Server))
            .expect("url");
        let err = ctx.get_json(url).await.expect_err("should fail");
        assert!(matches!(err, CliError::Transport(_)));
        assert_eq!(err.exit_code(), 3);
    }
}
