//! OAuth 2.0 installed-app flow with a loopback redirect.
//!
//! The flow needs a person at the keyboard: a consent page is opened in the
//! browser and the authorization code comes back to a short-lived listener
//! on `127.0.0.1`. Unattended runs should use a
//! [`StaticToken`](crate::auth::StaticToken) instead.

use crate::auth::TokenSource;
use crate::error::{sanitize_error_message, PipelineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use url::Url;

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Time a single loopback connection gets to send its request line and headers.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Authorization failed.</h3>\
    <p>Check the terminal for details.</p></body></html>";

/// OAuth client credentials from a Google client-secret JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Consent page endpoint.
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    /// Code exchange endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    #[serde(default)]
    installed: Option<ClientSecret>,
    #[serde(default)]
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Parses the JSON downloaded from the Google Cloud console.
    ///
    /// Both `installed` and `web` client types are accepted.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(json).map_err(|e| {
            PipelineError::Configuration(format!("invalid client secret JSON: {}", e))
        })?;
        file.installed.or(file.web).ok_or_else(|| {
            PipelineError::Configuration(
                "client secret JSON has neither an \"installed\" nor a \"web\" section".into(),
            )
        })
    }

    /// Reads and parses a client-secret file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot read client secret file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

/// A consent page waiting for the browser to come back.
#[derive(Debug)]
pub struct ConsentRequest {
    listener: TcpListener,
    redirect_uri: String,
    state: String,
    url: Url,
}

impl ConsentRequest {
    /// The consent page the user has to open.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Loopback address the browser is sent back to.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Anti-forgery value echoed back by the provider.
    pub fn state(&self) -> &str {
        &self.state
    }
}

/// Installed-app authorization against Google's OAuth endpoints.
pub struct InstalledAppFlow {
    client: reqwest::Client,
    secret: ClientSecret,
    scopes: Vec<String>,
    port: u16,
    open_browser: bool,
    consent_timeout: Duration,
}

impl InstalledAppFlow {
    /// Creates a flow for the given client and scopes.
    pub fn new(secret: ClientSecret, scopes: &[&str]) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            port: 0,
            open_browser: true,
            consent_timeout: Duration::from_secs(300),
        }
    }

    /// Creates a flow from a client-secret file.
    pub fn from_client_secrets_file(path: impl AsRef<Path>, scopes: &[&str]) -> Result<Self> {
        Ok(Self::new(ClientSecret::from_file(path)?, scopes))
    }

    /// Uses a fixed loopback port instead of an ephemeral one.
    pub fn redirect_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Whether to launch the system browser (the URL is always logged).
    pub fn open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// How long to wait for the user to finish the consent screen.
    pub fn consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    /// Uses the given HTTP client for the code exchange.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Binds the loopback listener and builds the consent URL.
    pub async fn begin(&self) -> Result<ConsentRequest> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| {
                PipelineError::Auth(format!(
                    "cannot listen on 127.0.0.1:{} for the OAuth redirect: {}",
                    self.port, e
                ))
            })?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);
        let state = uuid::Uuid::new_v4().simple().to_string();

        let mut url = Url::parse(&self.secret.auth_uri).map_err(|e| {
            PipelineError::Configuration(format!(
                "invalid auth_uri {}: {}",
                self.secret.auth_uri, e
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("access_type", "offline");

        Ok(ConsentRequest {
            listener,
            redirect_uri,
            state,
            url,
        })
    }

    /// Accepts redirects until one carries the authorization result.
    ///
    /// Connections are served concurrently, each with its own deadline, so a
    /// browser's idle preconnect cannot hold up the real redirect. Unrelated
    /// requests (a browser asking for `/favicon.ico`, say) get a 404 and
    /// redirects with a foreign `state` get the failure page; both are
    /// otherwise ignored.
    pub async fn wait_for_code(&self, consent: &ConsentRequest) -> Result<String> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = consent.listener.accept() => {
                    let (stream, peer) = accepted?;
                    let state = consent.state.clone();
                    connections.spawn(async move {
                        let served =
                            tokio::time::timeout(CONNECTION_TIMEOUT, handle_redirect(stream, &state));
                        match served.await {
                            Ok(Ok(outcome)) => outcome,
                            Ok(Err(e)) => {
                                tracing::debug!(%peer, "loopback connection failed: {}", e);
                                None
                            }
                            Err(_) => {
                                tracing::debug!(%peer, "loopback connection timed out");
                                None
                            }
                        }
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Ok(Some(outcome)) => return outcome,
                        Ok(None) => {}
                        Err(e) => tracing::warn!("loopback handler failed: {}", e),
                    }
                }
            }
        }
    }

    /// Exchanges an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String> {
        let transport =
            |e: reqwest::Error| PipelineError::Auth(format!("token exchange failed: {}", e));
        let response = self
            .client
            .post(&self.secret.token_uri)
            .form(&[
                ("code", code),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(PipelineError::Auth(format!(
                "token exchange returned {}: {}",
                status.as_u16(),
                sanitize_error_message(&text)
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Auth(format!("malformed token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(PipelineError::Auth("token response has no access token".into()));
        }
        tracing::debug!(expires_in = ?token.expires_in, "OAuth access token obtained");
        Ok(token.access_token)
    }

    /// Runs the whole consent flow and returns an access token.
    pub async fn run_local_server(&self) -> Result<String> {
        let consent = self.begin().await?;
        tracing::info!(url = %consent.url(), "authorize the upload in your browser");
        if self.open_browser {
            let url = consent.url().to_string();
            match tokio::task::spawn_blocking(move || open::that(url)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("could not open a browser ({e}); open the URL manually"),
                Err(e) => tracing::warn!("browser launcher panicked ({e}); open the URL manually"),
            }
        }

        let code = tokio::time::timeout(self.consent_timeout, self.wait_for_code(&consent))
            .await
            .map_err(|_| {
                PipelineError::Auth(format!(
                    "no authorization received within {:?}",
                    self.consent_timeout
                ))
            })??;
        self.exchange_code(&code, consent.redirect_uri()).await
    }
}

#[async_trait]
impl TokenSource for InstalledAppFlow {
    async fn access_token(&self) -> Result<String> {
        self.run_local_server().await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// What came back on the redirect.
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code { code: String, state: Option<String> },
    Denied(String),
    Unrelated,
}

/// Parses the request target of a redirect (`/?code=...&state=...`).
fn parse_redirect(target: &str) -> Redirect {
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", target)) else {
        return Redirect::Unrelated;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Redirect::Denied(error),
        (Some(code), None) => Redirect::Code { code, state },
        (None, None) => Redirect::Unrelated,
    }
}

/// Serves one connection. Returns `None` when it carried no usable result.
async fn handle_redirect(
    stream: TcpStream,
    expected_state: &str,
) -> Result<Option<Result<String>>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain headers so the browser sees an orderly response.
    let mut header = String::new();
    loop {
        header.clear();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let outcome = match parse_redirect(target) {
        Redirect::Unrelated => {
            respond(reader.get_mut(), "404 Not Found", "").await?;
            return Ok(None);
        }
        Redirect::Denied(error) => Err(PipelineError::Auth(format!(
            "authorization was denied: {}",
            error
        ))),
        Redirect::Code { state, .. } if state.as_deref() != Some(expected_state) => {
            tracing::warn!(state = ?state, "OAuth state mismatch; ignoring the redirect");
            respond(reader.get_mut(), "400 Bad Request", FAILURE_PAGE).await?;
            return Ok(None);
        }
        Redirect::Code { code, .. } => Ok(code),
    };

    let page = if outcome.is_ok() {
        SUCCESS_PAGE
    } else {
        FAILURE_PAGE
    };
    respond(reader.get_mut(), "200 OK", page).await?;
    Ok(Some(outcome))
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
