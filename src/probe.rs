use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use http_body_util::Empty;
use hyper::{
    Method, Request, Uri,
    body::Bytes,
    header::{HOST, USER_AGENT},
};
use hyper_util::rt::tokio::TokioIo;
use tokio::net::TcpStream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of a single readiness probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// The server answered with this HTTP status.
    Response(u16),
    /// No response arrived before the per-attempt timeout.
    NotReady,
    /// Connection refused, DNS failure, malformed response and similar.
    TransportError(String),
}

impl ProbeResult {
    /// The HTTP status, or `0` when nothing was received.
    pub fn status_code(&self) -> u16 {
        match self {
            ProbeResult::Response(status) => *status,
            ProbeResult::NotReady | ProbeResult::TransportError(_) => 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status_code() == 200
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

/// Plain HTTP/1.1 GET prober with a short per-attempt timeout.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeResult {
        match tokio::time::timeout(self.timeout, fetch_status(url)).await {
            Ok(Ok(status)) => ProbeResult::Response(status),
            Ok(Err(err)) => ProbeResult::TransportError(format!("{err:#}")),
            Err(_) => ProbeResult::NotReady,
        }
    }
}

async fn fetch_status(url: &str) -> anyhow::Result<u16> {
    let uri: Uri = url
        .parse()
        .with_context(|| format!("invalid probe url {url}"))?;
    if uri.scheme_str().is_some_and(|scheme| scheme != "http") {
        anyhow::bail!("unsupported probe scheme in {url}");
    }
    let host = uri.host().context("probe url has no host")?;
    let port = uri.port_u16().unwrap_or(80);
    let authority = uri
        .authority()
        .map(|authority| authority.as_str().to_string())
        .unwrap_or_else(|| host.to_string());
    let path = uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");

    let stream = TcpStream::connect((host.trim_matches(|c| c == '[' || c == ']'), port))
        .await
        .with_context(|| format!("connect {host}:{port}"))?;
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    let driver = tokio::spawn(async move {
        let _ = connection.await;
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, authority)
        .header(USER_AGENT, concat!("homeserver-harness/", env!("CARGO_PKG_VERSION")))
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await;
    driver.abort();
    Ok(response?.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\n\r\n");
            let _ = stream.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}/_matrix/client/versions")
    }

    #[tokio::test]
    async fn reports_status_of_any_response() {
        let url = serve_once("200 OK").await;
        assert_eq!(HttpProbe::default().probe(&url).await, ProbeResult::Response(200));

        let url = serve_once("503 Service Unavailable").await;
        let result = HttpProbe::default().probe(&url).await;
        assert_eq!(result, ProbeResult::Response(503));
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn redirect_is_not_ready() {
        let url = serve_once("302 Found").await;
        let result = HttpProbe::default().probe(&url).await;
        assert_eq!(result.status_code(), 302);
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = HttpProbe::default().probe(&format!("http://{addr}/")).await;
        assert!(matches!(result, ProbeResult::TransportError(_)), "{result:?}");
        assert_eq!(result.status_code(), 0);
    }

    #[tokio::test]
    async fn silent_server_times_out_as_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let holder = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let probe = HttpProbe::new(Duration::from_millis(200));
        let started = Instant::now();
        let result = probe.probe(&format!("http://{addr}/")).await;
        let elapsed = started.elapsed();
        holder.abort();

        assert_eq!(result, ProbeResult::NotReady);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn malformed_url_is_transport_error() {
        let result = HttpProbe::default().probe("not a url").await;
        assert!(matches!(result, ProbeResult::TransportError(_)));
    }
}
