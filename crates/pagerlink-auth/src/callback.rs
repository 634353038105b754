//! Local HTTP callback listener for OAuth redirects.
//!
//! Used by command-line logins: the provider redirects the browser to
//! `127.0.0.1:{port}/complete/{backend}/?...`. This module accepts that one
//! request, answers with a small HTML page, and hands every query parameter
//! to the caller. Validation (state token, `error`, `code`) is the
//! manager's job.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::context::CallbackParams;
use crate::error::{AuthError, Result};

/// Page returned when the redirect carries an authorization code.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Authorization Received</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
        h1 { color: #22c55e; margin-bottom: 0.5rem; }
        p { color: #666; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Authorization Received</h1>
        <p>You can close this tab and return to pagerlink.</p>
    </div>
</body>
</html>"#;

/// Page returned when the provider reported an error.
const DENIED_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization Failed</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 20vh;">
    <h1 style="color: #ef4444;">Authorization Failed</h1>
    <p>The provider did not grant access. Check the terminal for details.</p>
</body>
</html>"#;

/// A minimal HTTP server that waits for a single OAuth redirect.
pub struct CallbackServer;

impl CallbackServer {
    /// Bind `127.0.0.1:{port}` and wait for one redirect.
    ///
    /// # Errors
    ///
    /// - [`AuthError::CallbackTimeout`] if `timeout_secs` elapse first.
    /// - [`AuthError::Io`] if the listener cannot bind.
    /// - [`AuthError::FlowFailed`] if the request is not an HTTP request
    ///   line with a query string.
    pub async fn start(port: u16, timeout_secs: u64) -> Result<CallbackParams> {
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(addr = %addr, "callback server listening for OAuth redirect");

        let timeout = tokio::time::Duration::from_secs(timeout_secs);
        match tokio::time::timeout(timeout, Self::accept_one(&listener)).await {
            Ok(inner) => inner,
            Err(_) => Err(AuthError::CallbackTimeout { timeout_secs }),
        }
    }

    /// Accept a single connection, parse the request, send a response.
    async fn accept_one(listener: &TcpListener) -> Result<CallbackParams> {
        let (mut stream, peer) = listener.accept().await?;

        tracing::debug!(peer = %peer, "accepted callback connection");

        // Redirects are small GET requests.
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let params = Self::parse_callback_request(&request)?;

        let body = if params.error().is_some() {
            DENIED_HTML
        } else {
            SUCCESS_HTML
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );

        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        tracing::info!("callback received");

        Ok(params)
    }

    /// Extract the query parameters from `GET /path?query HTTP/1.1`.
    fn parse_callback_request(request: &str) -> Result<CallbackParams> {
        let request_line = request
            .lines()
            .next()
            .ok_or_else(|| AuthError::FlowFailed {
                reason: "empty HTTP request".to_string(),
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(AuthError::FlowFailed {
                reason: format!("malformed HTTP request line: {request_line}"),
            });
        }

        let query = parts[1]
            .split_once('?')
            .map(|(_, q)| q)
            .ok_or_else(|| AuthError::FlowFailed {
                reason: "callback request has no query string".to_string(),
            })?;

        Ok(CallbackParams::from_query(query))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
