//! Page fetcher backed by a remote browser
//!
//! This module drives a browser through the W3C WebDriver protocol, including:
//! - Session creation against a Selenium grid
//! - Navigation and script timeouts per session
//! - Returning the rendered page source
//! - Error classification into `FetchError`

use crate::config::{BrowserConfig, CrawlerConfig};
use crate::FetchError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;

/// Extra time the HTTP client waits beyond the navigation timeout, so the
/// browser reports its own timeout before the transport gives up
const CLIENT_GRACE: Duration = Duration::from_secs(30);

/// Per-session navigation and script limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub navigation: Duration,
    pub script: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(300),
            script: Duration::from_secs(300),
        }
    }
}

impl FetchTimeouts {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            navigation: Duration::from_secs(config.navigation_timeout_secs),
            script: Duration::from_secs(config.script_timeout_secs),
        }
    }
}

/// A live browser session, used by exactly one traversal at a time
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigates to `url` and returns the rendered page source
    async fn render_page(&mut self, url: &str) -> Result<String, FetchError>;

    /// Releases the session
    async fn close(self: Box<Self>) -> Result<(), FetchError>;
}

/// Creates browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, timeouts: &FetchTimeouts) -> Result<Box<dyn BrowserSession>, FetchError>;
}

/// Launches sessions on a WebDriver endpoint (Selenium grid, geckodriver, chromedriver)
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    endpoint: String,
    browser_name: String,
    headless: bool,
}

impl WebDriverLauncher {
    pub fn new(endpoint: impl Into<String>, browser_name: impl Into<String>, headless: bool) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            browser_name: browser_name.into(),
            headless,
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(&config.webdriver_url, &config.browser_name, config.headless)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn open(&self, timeouts: &FetchTimeouts) -> Result<Box<dyn BrowserSession>, FetchError> {
        let client = Client::builder()
            .timeout(timeouts.navigation + CLIENT_GRACE)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let body = json!({
            "capabilities": {
                "alwaysMatch": capabilities(&self.browser_name, self.headless)
            }
        });
        let response = send_command(
            client.post(format!("{}/session", self.endpoint)).json(&body),
            &self.endpoint,
        )
        .await?;
        let session_id = parse_session_id(&response)?;

        tracing::debug!(session_id = %session_id, browser = %self.browser_name, "Opened browser session");

        let session = WebDriverSession {
            client,
            base: format!("{}/session/{}", self.endpoint, session_id),
            session_id,
        };

        if let Err(e) = session.set_timeouts(timeouts).await {
            let session_id = session.session_id.clone();
            if let Err(close_err) = Box::new(session).close().await {
                tracing::warn!(
                    session_id = %session_id,
                    error = %close_err,
                    "Failed to close browser session after timeout setup failed"
                );
            }
            return Err(e);
        }

        Ok(Box::new(session))
    }
}

/// One WebDriver session
pub struct WebDriverSession {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn set_timeouts(&self, timeouts: &FetchTimeouts) -> Result<(), FetchError> {
        let body = json!({
            "pageLoad": timeouts.navigation.as_millis() as u64,
            "script": timeouts.script.as_millis() as u64,
        });
        send_command(
            self.client.post(format!("{}/timeouts", self.base)).json(&body),
            &self.base,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn render_page(&mut self, url: &str) -> Result<String, FetchError> {
        send_command(
            self.client
                .post(format!("{}/url", self.base))
                .json(&json!({ "url": url })),
            url,
        )
        .await?;

        let response = send_command(self.client.get(format!("{}/source", self.base)), url).await?;
        match response.get("value").and_then(Value::as_str) {
            Some(source) => Ok(source.to_string()),
            None => Err(FetchError::Protocol(format!(
                "page source for {} is not a string",
                url
            ))),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), FetchError> {
        send_command(self.client.delete(&self.base), &self.base).await?;
        tracing::debug!(session_id = %self.session_id, "Closed browser session");
        Ok(())
    }
}

/// Builds the `alwaysMatch` capabilities for a browser
fn capabilities(browser_name: &str, headless: bool) -> Value {
    let mut caps = json!({ "browserName": browser_name });

    if headless {
        match browser_name {
            "firefox" => caps["moz:firefoxOptions"] = json!({ "args": ["-headless"] }),
            "chrome" | "chromium" => {
                caps["goog:chromeOptions"] = json!({ "args": ["--headless=new", "--disable-gpu"] })
            }
            "MicrosoftEdge" | "msedge" => caps["ms:edgeOptions"] = json!({ "args": ["--headless"] }),
            _ => {}
        }
    }

    caps
}

/// Extracts the session id from a new-session response
///
/// W3C drivers nest it under `value`; legacy grids put it at the top level.
fn parse_session_id(response: &Value) -> Result<String, FetchError> {
    response
        .get("value")
        .and_then(|v| v.get("sessionId"))
        .or_else(|| response.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FetchError::Protocol("new session response has no sessionId".to_string()))
}

/// Sends one WebDriver command and returns the decoded JSON body
async fn send_command(request: RequestBuilder, url: &str) -> Result<Value, FetchError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport_error(url, e))?;
    let status = response.status();

    let body: Value = response
        .json()
        .await
        .map_err(|e| classify_transport_error(url, e))?;

    if let Some(error) = body.get("value").and_then(|v| v.get("error")).and_then(Value::as_str) {
        let message = body["value"]
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(classify_webdriver_error(url, error, message));
    }

    if !status.is_success() {
        return Err(FetchError::Protocol(format!(
            "HTTP {} from WebDriver for {}",
            status.as_u16(),
            url
        )));
    }

    Ok(body)
}

/// Maps a W3C WebDriver error code to a `FetchError`
fn classify_webdriver_error(url: &str, code: &str, message: &str) -> FetchError {
    match code {
        "timeout" | "script timeout" => FetchError::Timeout {
            url: url.to_string(),
            message: message.to_string(),
        },
        "invalid session id" | "no such window" => {
            FetchError::SessionLost(format!("{}: {}", code, message))
        }
        _ => FetchError::Navigation {
            url: url.to_string(),
            message: format!("{}: {}", code, message),
        },
    }
}

fn classify_transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            message: "WebDriver request timed out".to_string(),
        }
    } else if e.is_decode() {
        FetchError::Protocol(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_new_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc123", "capabilities": {} }
            })))
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/timeouts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .mount(server)
            .await;
    }

    fn webdriver_error(status: u16, code: &str, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_json(json!({
            "value": { "error": code, "message": message, "stacktrace": "" }
        }))
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = FetchTimeouts::default();
        assert_eq!(timeouts.navigation, Duration::from_secs(300));
        assert_eq!(timeouts.script, Duration::from_secs(300));
    }

    #[test]
    fn test_capabilities_headless_firefox() {
        let caps = capabilities("firefox", true);
        assert_eq!(caps["browserName"], "firefox");
        assert_eq!(caps["moz:firefoxOptions"]["args"][0], "-headless");
    }

    #[test]
    fn test_capabilities_headful() {
        let caps = capabilities("firefox", false);
        assert!(caps.get("moz:firefoxOptions").is_none());
    }

    #[test]
    fn test_parse_session_id_legacy() {
        let response = json!({ "sessionId": "legacy", "status": 0 });
        assert_eq!(parse_session_id(&response).unwrap(), "legacy");
        assert!(parse_session_id(&json!({ "value": {} })).is_err());
    }

    #[test]
    fn test_launcher_trims_trailing_slash() {
        let launcher = WebDriverLauncher::new("http://grid:4444/wd/hub/", "firefox", true);
        assert_eq!(launcher.endpoint(), "http://grid:4444/wd/hub");
    }

    #[tokio::test]
    async fn test_open_render_close() {
        let server = MockServer::start().await;
        mount_new_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/url"))
            .and(body_json(json!({ "url": "http://a.test/" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/session/abc123/source"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": "<html>ok</html>" })),
            )
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/session/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let mut session = launcher.open(&FetchTimeouts::default()).await.unwrap();
        let html = session.render_page("http://a.test/").await.unwrap();
        assert_eq!(html, "<html>ok</html>");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sets_timeouts_in_millis() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc123" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/timeouts"))
            .and(body_json(json!({ "pageLoad": 5000, "script": 7000 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let timeouts = FetchTimeouts {
            navigation: Duration::from_secs(5),
            script: Duration::from_secs(7),
        };
        assert!(launcher.open(&timeouts).await.is_ok());
    }

    #[tokio::test]
    async fn test_navigation_timeout() {
        let server = MockServer::start().await;
        mount_new_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/url"))
            .respond_with(webdriver_error(500, "timeout", "page load timed out"))
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let mut session = launcher.open(&FetchTimeouts::default()).await.unwrap();
        let err = session.render_page("http://a.test/slow").await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { ref url, .. } if url == "http://a.test/slow"));
    }

    #[tokio::test]
    async fn test_session_lost() {
        let server = MockServer::start().await;
        mount_new_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/url"))
            .respond_with(webdriver_error(404, "invalid session id", "session deleted"))
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let mut session = launcher.open(&FetchTimeouts::default()).await.unwrap();
        let err = session.render_page("http://a.test/").await.unwrap_err();
        assert!(matches!(err, FetchError::SessionLost(_)));
    }

    #[tokio::test]
    async fn test_unknown_error_is_navigation_failure() {
        let server = MockServer::start().await;
        mount_new_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/url"))
            .respond_with(webdriver_error(500, "unknown error", "Reached error page"))
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let mut session = launcher.open(&FetchTimeouts::default()).await.unwrap();
        let err = session.render_page("http://a.test/").await.unwrap_err();
        match err {
            FetchError::Navigation { url, message } => {
                assert_eq!(url, "http://a.test/");
                assert!(message.contains("Reached error page"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_timeout_setup_still_deletes_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc123" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc123/timeouts"))
            .respond_with(webdriver_error(400, "invalid argument", "bad timeouts"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/abc123"))
            .respond_with(webdriver_error(500, "unknown error", "browser gone"))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let result = launcher.open(&FetchTimeouts::default()).await;
        match result {
            Err(FetchError::Navigation { message, .. }) => assert!(message.contains("bad timeouts")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[tokio::test]
    async fn test_open_fails_without_session_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": {} })))
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri(), "firefox", true);
        let result = launcher.open(&FetchTimeouts::default()).await;
        assert!(matches!(result, Err(FetchError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unreachable_grid_is_transport_error() {
        let launcher = WebDriverLauncher::new("http://127.0.0.1:1", "firefox", true);
        let result = launcher.open(&FetchTimeouts::default()).await;
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
