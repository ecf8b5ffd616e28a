//! Local HTTP listener for the OAuth redirect.
//!
//! When the user finishes in the browser, the authorization server redirects
//! to `http://localhost:<port>/callback?code=..&state=..`. The
//! [`RedirectListener`] binds that fixed loopback port for the duration of
//! one attempt, answers the redirect with a small HTML page, and hands an
//! [`AuthorizationResult`] to the waiting flow through a one-shot channel.
//!
//! After the first redirect on the callback path the accept loop exits and
//! the socket is closed, so a second delivery is refused by the OS.
//!
//! Raw [`tokio::net::TcpListener`] keeps this free of an HTTP server stack;
//! query parsing goes through `url`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use crate::error::{AuthError, Result};

/// Upper bound on the request head we are willing to read.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// How long a single connection may take to send its request.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of the authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// The server issued an authorization code for this attempt.
    Success { code: String },
    /// The server reported an error (e.g. `access_denied`).
    Denied { reason: String },
    /// The `state` did not match this attempt.
    InvalidState,
    /// Matching state, but neither a code nor an error.
    MissingCode,
}

impl AuthorizationResult {
    /// Classify the redirect's query parameters.
    ///
    /// An `error` wins over everything; the state check comes before the
    /// code so a forged redirect never yields a code.
    pub fn from_params<'a>(
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
        expected_state: &str,
    ) -> Self {
        let mut code = None;
        let mut state = None;
        let mut error = None;

        for (key, value) in params {
            match key {
                "code" => code = Some(value),
                "state" => state = Some(value),
                "error" => error = Some(value),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Self::Denied {
                reason: error.to_string(),
            };
        }
        if state != Some(expected_state) {
            return Self::InvalidState;
        }
        match code {
            Some(code) if !code.is_empty() => Self::Success {
                code: code.to_string(),
            },
            _ => Self::MissingCode,
        }
    }

    /// The authorization code, if the redirect succeeded.
    pub fn into_code(self) -> Result<String> {
        match self {
            Self::Success { code } => Ok(code),
            Self::Denied { reason } => Err(AuthError::Denied { reason }),
            Self::InvalidState => Err(AuthError::StateMismatch),
            Self::MissingCode => Err(AuthError::MissingCode),
        }
    }

    fn page(&self) -> String {
        match self {
            Self::Success { .. } => render_page(
                "Authorization Successful",
                "You can close this tab and return to usagebar.",
                "#22c55e",
            ),
            Self::Denied { reason } => render_page(
                "Authorization Failed",
                &format!("The sign-in was not completed ({}).", escape_html(reason)),
                "#ef4444",
            ),
            Self::InvalidState => render_page(
                "Authorization Failed",
                "This response does not belong to the current sign-in attempt.",
                "#ef4444",
            ),
            Self::MissingCode => render_page(
                "Authorization Failed",
                "The response did not contain an authorization code.",
                "#ef4444",
            ),
        }
    }
}

fn render_page(title: &str, message: &str, color: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }}
        .card {{
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }}
        h1 {{ color: {color}; margin-bottom: 0.5rem; }}
        p {{ color: #666; }}
    </style>
</head>
<body>
    <div class="card">
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Single-use redirect listener bound to a fixed loopback port.
///
/// Dropping the listener aborts its task; [`stop`](Self::stop) additionally
/// waits until the socket has been released.
pub struct RedirectListener {
    port: u16,
    result_rx: oneshot::Receiver<AuthorizationResult>,
    task: JoinHandle<()>,
}

impl RedirectListener {
    /// Bind `127.0.0.1:{port}` and start serving `path`.
    ///
    /// The result is delivered once, through [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Bind`] if the port cannot be bound. This is not
    /// retried on another port: the redirect URI is registered with the
    /// authorization server.
    pub async fn start(port: u16, path: &str, expected_state: String) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| AuthError::Bind { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| AuthError::Bind { port, source })?
            .port();

        tracing::info!(port, "redirect listener bound");

        let (result_tx, result_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, path.to_string(), expected_state, result_tx));

        Ok(Self {
            port,
            result_rx,
            task,
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the redirect.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ListenerClosed`] if the listener task ended
    /// without delivering a result.
    pub async fn wait(&mut self) -> Result<AuthorizationResult> {
        (&mut self.result_rx)
            .await
            .map_err(|_| AuthError::ListenerClosed)
    }

    /// Stop serving and release the port. Safe after a delivery.
    pub async fn stop(mut self) {
        self.task.abort();
        // Cancellation drops the TcpListener; awaiting makes the release
        // observable to the caller.
        let _ = (&mut self.task).await;
        tracing::debug!(port = self.port, "redirect listener stopped");
    }
}

impl Drop for RedirectListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accept connections until one hits `path`, deliver its result, and
/// return (closing the socket).
///
/// Each connection is served on its own task under [`CONNECTION_TIMEOUT`],
/// so an idle or slow client cannot hold up the browser's redirect.
/// Returning drops the [`JoinSet`], which aborts any connection still open.
async fn serve(
    listener: TcpListener,
    path: String,
    expected_state: String,
    result_tx: oneshot::Sender<AuthorizationResult>,
) {
    let path: Arc<str> = path.into();
    let expected_state: Arc<str> = expected_state.into();
    let mut connections: JoinSet<Option<AuthorizationResult>> = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "accepted redirect connection");
                    let path = Arc::clone(&path);
                    let expected_state = Arc::clone(&expected_state);
                    connections.spawn(async move {
                        let served = tokio::time::timeout(
                            CONNECTION_TIMEOUT,
                            handle_connection(stream, &path, &expected_state),
                        )
                        .await;
                        match served {
                            Ok(Ok(result)) => result,
                            Ok(Err(e)) => {
                                tracing::debug!(peer = %peer, error = %e, "ignoring unreadable redirect request");
                                None
                            }
                            Err(_) => {
                                tracing::debug!(peer = %peer, "redirect connection timed out");
                                None
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "redirect listener accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Ok(Some(result)) = joined {
                    tracing::info!(outcome = result_label(&result), "authorization redirect received");
                    let _ = result_tx.send(result);
                    return;
                }
            }
        }
    }
}

fn result_label(result: &AuthorizationResult) -> &'static str {
    match result {
        AuthorizationResult::Success { .. } => "success",
        AuthorizationResult::Denied { .. } => "denied",
        AuthorizationResult::InvalidState => "invalid_state",
        AuthorizationResult::MissingCode => "missing_code",
    }
}

/// Serve one request. Returns `Some` only for a GET on the callback path.
async fn handle_connection(
    mut stream: TcpStream,
    path: &str,
    expected_state: &str,
) -> std::io::Result<Option<AuthorizationResult>> {
    let request_line = read_request_head(&mut stream).await?;

    let Some(target) = parse_request_target(&request_line) else {
        write_response(&mut stream, "400 Bad Request", "text/plain", "bad request").await?;
        return Ok(None);
    };

    // Resolve the target against a dummy origin so `url` handles the
    // percent- and plus-decoding of the query.
    let url = match Url::parse(&format!("http://localhost{target}")) {
        Ok(url) if url.path() == path => url,
        _ => {
            write_response(&mut stream, "404 Not Found", "text/plain", "not found").await?;
            return Ok(None);
        }
    };

    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let result = AuthorizationResult::from_params(
        pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        expected_state,
    );

    write_response(
        &mut stream,
        "200 OK",
        "text/html; charset=utf-8",
        &result.page(),
    )
    .await?;

    Ok(Some(result))
}

/// Read the request head and return its first line.
///
/// At most [`MAX_REQUEST_HEAD`] bytes are read. A request line that does
/// not fit is rejected rather than parsed truncated.
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new((&mut *stream).take(MAX_REQUEST_HEAD as u64));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if !request_line.ends_with('\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "request line too long or incomplete",
        ));
    }

    // Drain headers so the browser is not reset mid-send.
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    Ok(request_line)
}

/// Extract the request target from `GET /callback?code=.. HTTP/1.1`.
fn parse_request_target(request_line: &str) -> Option<&str> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    (method == "GET" && target.starts_with('/')).then_some(target)
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    let _ = stream.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(pairs: &[(&str, &str)], expected: &str) -> AuthorizationResult {
        AuthorizationResult::from_params(pairs.iter().copied(), expected)
    }

    #[test]
    fn matching_state_and_code_is_success() {
        assert_eq!(
            classify(&[("code", "C"), ("state", "S")], "S"),
            AuthorizationResult::Success { code: "C".into() }
        );
    }

    #[test]
    fn state_mismatch_wins_over_code() {
        assert_eq!(
            classify(&[("code", "C"), ("state", "X")], "S"),
            AuthorizationResult::InvalidState
        );
        assert_eq!(
            classify(&[("code", "C")], "S"),
            AuthorizationResult::InvalidState
        );
    }

    #[test]
    fn error_wins_over_everything() {
        assert_eq!(
            classify(&[("error", "access_denied"), ("code", "C"), ("state", "X")], "S"),
            AuthorizationResult::Denied {
                reason: "access_denied".into()
            }
        );
        assert_eq!(
            classify(&[("error", "access_denied")], "S"),
            AuthorizationResult::Denied {
                reason: "access_denied".into()
            }
        );
    }

    #[test]
    fn matching_state_without_code_is_missing_code() {
        assert_eq!(
            classify(&[("state", "S")], "S"),
            AuthorizationResult::MissingCode
        );
        assert_eq!(
            classify(&[("state", "S"), ("code", "")], "S"),
            AuthorizationResult::MissingCode
        );
    }

    #[test]
    fn into_code_maps_failures() {
        assert_eq!(
            AuthorizationResult::Success { code: "c".into() }
                .into_code()
                .unwrap(),
            "c"
        );
        assert!(matches!(
            AuthorizationResult::InvalidState.into_code(),
            Err(AuthError::StateMismatch)
        ));
        assert!(matches!(
            AuthorizationResult::MissingCode.into_code(),
            Err(AuthError::MissingCode)
        ));
    }

    #[test]
    fn parse_request_target_variants() {
        assert_eq!(
            parse_request_target("GET /callback?code=a HTTP/1.1\r\n"),
            Some("/callback?code=a")
        );
        assert_eq!(parse_request_target("POST /callback HTTP/1.1"), None);
        assert_eq!(parse_request_target("NOTHTTP"), None);
        assert_eq!(parse_request_target(""), None);
    }

    #[test]
    fn denied_page_escapes_reason() {
        let page = AuthorizationResult::Denied {
            reason: "<script>".into(),
        }
        .page();
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    async fn send(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request =
            format!("GET {target} HTTP/1.1\r\nHost: localhost:{port}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn delivers_success_and_serves_html() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move { send(port, "/callback?code=abc%20def&state=S").await });

        let result = listener.wait().await.unwrap();
        assert_eq!(
            result,
            AuthorizationResult::Success {
                code: "abc def".into()
            }
        );

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("text/html"));
        assert!(response.contains("Authorization Successful"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn failure_page_for_state_mismatch() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move { send(port, "/callback?code=C&state=X").await });

        assert_eq!(listener.wait().await.unwrap(), AuthorizationResult::InvalidState);
        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Authorization Failed"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn other_paths_get_404_and_keep_listening() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        let favicon = send(port, "/favicon.ico").await;
        assert!(favicon.starts_with("HTTP/1.1 404"));

        let client = tokio::spawn(async move { send(port, "/callback?code=C&state=S").await });
        assert_eq!(
            listener.wait().await.unwrap(),
            AuthorizationResult::Success { code: "C".into() }
        );
        client.await.unwrap();
        listener.stop().await;
    }

    #[tokio::test]
    async fn second_delivery_is_refused() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        send(port, "/callback?code=C&state=S").await;
        listener.wait().await.unwrap();

        // The serve task returned after the first delivery; give it a moment
        // to drop the socket.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        listener.stop().await;
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_redirect() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        // Browsers preconnect speculatively and may never send a request.
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let client = tokio::spawn(async move { send(port, "/callback?code=C&state=S").await });
        let result = tokio::time::timeout(Duration::from_secs(3), listener.wait())
            .await
            .expect("redirect was blocked by the idle connection")
            .unwrap();
        assert_eq!(result, AuthorizationResult::Success { code: "C".into() });

        assert!(client.await.unwrap().starts_with("HTTP/1.1 200 OK"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn oversized_request_line_is_not_delivered() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let code = "A".repeat(MAX_REQUEST_HEAD * 2);
        let request = format!("GET /callback?state=S&code={code} HTTP/1.1\r\n\r\n");
        // The listener hangs up mid-request, so either side may see a reset.
        let _ = stream.write_all(request.as_bytes()).await;
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response).await;
        assert!(!response.contains("200 OK"));

        let client = tokio::spawn(async move { send(port, "/callback?code=C&state=S").await });
        assert_eq!(
            listener.wait().await.unwrap(),
            AuthorizationResult::Success { code: "C".into() }
        );
        client.await.unwrap();
        listener.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_the_port() {
        let listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        let port = listener.port();

        listener.stop().await;

        let rebound = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn bind_conflict_is_a_setup_error() {
        let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = RedirectListener::start(port, "/callback", "S".into())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
        assert_eq!(err.kind(), crate::error::ErrorKind::Setup);
    }

    #[tokio::test]
    async fn wait_after_stop_is_listener_closed() {
        let mut listener = RedirectListener::start(0, "/callback", "S".into())
            .await
            .unwrap();
        listener.task.abort();
        assert!(matches!(
            listener.wait().await,
            Err(AuthError::ListenerClosed)
        ));
    }
}
