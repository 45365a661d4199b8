//! OAuth2 callback server
//!
//! A temporary local HTTP server bound to the port of the configured
//! redirect URI. It runs on its own task, hands exactly one callback to
//! the login flow through a capacity-1 channel, and answers the browser
//! with whatever the login flow decides once the code has been processed.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use crate::error::Error;
use crate::Result;

/// Upper bound on the request head we are willing to buffer
const MAX_REQUEST_BYTES: usize = 8192;

/// How long `finish` waits for the final response to be written
const FINISH_GRACE: Duration = Duration::from_secs(5);

/// How long a connection may take to send its request head
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Casdoor CLI | Authentication Successful</title>
    <style>
        body {
            background-color: #f5f7fa;
            color: #1f2937;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #059669; }
        p { font-size: 15px; color: #4b5563; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>✅ Authentication Successful</h1>
        <p>You have been successfully authenticated.<br>You may now close this window and return to your terminal.</p>
    </div>
</body>
</html>"#;

const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Casdoor CLI | Authentication Failed</title>
    <style>
        body {
            background-color: #f5f7fa;
            color: #1f2937;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #dc2626; }
        p { font-size: 15px; color: #4b5563; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>Authentication Failed</h1>
        <p>{message}<br>Please check your terminal and try again.</p>
    </div>
</body>
</html>"#;

/// Query parameters of the redirect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the browser is told once the callback has been processed
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackReply {
    Success,
    BadRequest(String),
    ServerError(String),
}

impl CallbackReply {
    fn status_line(&self) -> &'static str {
        match self {
            CallbackReply::Success => "200 OK",
            CallbackReply::BadRequest(_) => "400 Bad Request",
            CallbackReply::ServerError(_) => "500 Internal Server Error",
        }
    }

    fn body(&self) -> String {
        match self {
            CallbackReply::Success => SUCCESS_HTML.to_string(),
            CallbackReply::BadRequest(msg) | CallbackReply::ServerError(msg) => {
                ERROR_HTML.replace("{message}", &escape_html(msg))
            }
        }
    }
}

/// A received callback waiting for its reply
#[derive(Debug)]
pub struct PendingCallback {
    pub params: CallbackParams,
    reply: oneshot::Sender<CallbackReply>,
}

impl PendingCallback {
    /// Split into the parameters and the handle used to answer the browser
    pub fn into_parts(self) -> (CallbackParams, CallbackResponder) {
        (self.params, CallbackResponder(self.reply))
    }
}

/// Answers the browser request that delivered the callback
#[derive(Debug)]
pub struct CallbackResponder(oneshot::Sender<CallbackReply>);

impl CallbackResponder {
    pub fn respond(self, reply: CallbackReply) {
        // The receiver is gone only when the server task was aborted.
        let _ = self.0.send(reply);
    }
}

/// Transient listener for a single login attempt
pub struct CallbackServer {
    addr: SocketAddr,
    receiver: mpsc::Receiver<PendingCallback>,
    task: Option<JoinHandle<()>>,
    delivered: bool,
}

impl CallbackServer {
    /// Bind to the port of `redirect_uri` and start serving its path
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        let port = redirect_uri
            .port_or_known_default()
            .ok_or_else(|| Error::Callback(format!("redirect URI {} has no port", redirect_uri)))?;
        let path = redirect_uri.path().to_string();

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Callback(format!("Failed to start callback server on {}: {}", addr, e)))?;
        let addr = listener.local_addr()?;

        tracing::info!("Callback server listening on http://{}{}", addr, path);

        let (sender, receiver) = mpsc::channel(1);
        let task = tokio::spawn(serve(listener, path, sender));

        Ok(Self {
            addr,
            receiver,
            task: Some(task),
            delivered: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the callback arrives or `timeout` elapses
    pub async fn wait(&mut self, timeout: Duration) -> Result<PendingCallback> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(pending)) => {
                self.delivered = true;
                Ok(pending)
            }
            Ok(None) => Err(Error::Callback("callback server stopped unexpectedly".to_string())),
            Err(_) => Err(Error::CallbackTimeout(timeout.as_secs())),
        }
    }

    /// Let the server write its final response, then release the port
    pub async fn finish(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if !self.delivered {
            task.abort();
            let _ = task.await;
            return;
        }

        let abort = task.abort_handle();
        if tokio::time::timeout(FINISH_GRACE, task).await.is_err() {
            abort.abort();
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Accept connections until one request hits the callback path
///
/// Each connection is served on its own task, so a client that connects
/// and stays silent cannot hold up the redirect. Dropping the `JoinSet`
/// when the loop ends or the task is aborted cancels the rest.
async fn serve(listener: TcpListener, path: String, sender: mpsc::Sender<PendingCallback>) {
    let path: Arc<str> = Arc::from(path);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let path = Arc::clone(&path);
                let sender = sender.clone();
                connections.spawn(async move {
                    match handle_connection(socket, &path, &sender).await {
                        Ok(answered) => answered,
                        Err(e) => {
                            tracing::warn!("Dropped request from {}: {}", peer, e);
                            false
                        }
                    }
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if matches!(joined, Ok(true)) {
                    break;
                }
            }
        }
    }
    tracing::debug!("callback server stopped");
}

/// Returns `true` once the callback has been delivered and answered
async fn handle_connection(
    mut socket: TcpStream,
    path: &str,
    sender: &mpsc::Sender<PendingCallback>,
) -> Result<bool> {
    let request = read_request_head(&mut socket).await?;
    let target = parse_request_target(&request)?;

    if target.path() != path {
        write_response(&mut socket, "404 Not Found", "text/plain", "Not Found").await;
        return Ok(false);
    }

    let params = parse_callback_params(&target);
    tracing::debug!("callback received");

    let (reply_tx, reply_rx) = oneshot::channel();
    let pending = PendingCallback {
        params,
        reply: reply_tx,
    };

    let reply = if sender.send(pending).await.is_err() {
        CallbackReply::ServerError("The login attempt is no longer running.".to_string())
    } else {
        reply_rx
            .await
            .unwrap_or_else(|_| CallbackReply::ServerError("The login attempt was aborted.".to_string()))
    };

    write_response(&mut socket, reply.status_line(), "text/html; charset=utf-8", &reply.body()).await;
    Ok(true)
}

async fn read_request_head(socket: &mut TcpStream) -> Result<String> {
    tokio::time::timeout(READ_TIMEOUT, read_until_blank_line(socket))
        .await
        .map_err(|_| Error::Callback("Timed out reading request".to_string()))?
}

async fn read_until_blank_line(socket: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|e| Error::Callback(format!("Failed to read request: {}", e)))?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Parse the request line (`GET /callback?code=... HTTP/1.1`) into a URL
fn parse_request_target(request: &str) -> Result<Url> {
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| Error::Callback("Empty request".to_string()))?;

    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(Error::Callback("Invalid request format".to_string()));
    }
    if parts[0] != "GET" {
        return Err(Error::Callback(format!("Unsupported method {}", parts[0])));
    }

    let base = Url::parse("http://localhost")?;
    base.join(parts[1])
        .map_err(|e| Error::Callback(format!("Failed to parse callback URL: {}", e)))
}

fn parse_callback_params(url: &Url) -> CallbackParams {
    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.to_string()),
            "state" => params.state = Some(value.to_string()),
            "error" => params.error = Some(value.to_string()),
            "error_description" => params.error_description = Some(value.to_string()),
            _ => {}
        }
    }
    params
}

async fn write_response(socket: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );

    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
