//! HTTP clients.
//!
//! [`HttpMemberLink`] is how the locator pushes artifacts to a remote
//! member; [`LocatorClient`] is how members join and how operators issue
//! commands. Both speak HTTP/1.1 over one fresh connection per request.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use cfgsync_core::{
    ApplyFailure, ApplyReport, ArtifactPayload, ArtifactRecord, CommandResult, LinkError, MemberId,
    MemberLink,
};
use cfgsync_coordinator::{JoinResponse, MemberInfo};
use cfgsync_member::MemberAgent;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::{debug, info, warn};

use crate::JoinRequest;

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Send one request and collect the whole response.
async fn send(
    uri: &Uri,
    method: Method,
    content_type: Option<&str>,
    body: Bytes,
) -> anyhow::Result<(StatusCode, Bytes)> {
    let authority = uri.authority().context("uri has no host")?.clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

    let stream = tokio::net::TcpStream::connect(&address)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .context("http handshake failed")?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http connection closed with error");
        }
    });

    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, authority.as_str())
        .header(USER_AGENT, concat!("cfgsync/", env!("CARGO_PKG_VERSION")));
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    let req = builder.body(Full::new(body))?;

    let resp = sender.send_request(req).await.context("request failed")?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .context("failed to read response body")?
        .to_bytes();
    Ok((status, body))
}

/// Join `base` (an `http://host:port` URL) and `path` into a request URI.
fn join_uri(base: &str, path: &str) -> anyhow::Result<Uri> {
    let uri: Uri = format!("{}{}", base.trim_end_matches('/'), path)
        .parse()
        .with_context(|| format!("invalid url {base}"))?;
    if uri.scheme_str() != Some("http") {
        bail!("unsupported url {base}: only http:// is supported");
    }
    if uri.host().is_none() {
        bail!("invalid url {base}: missing host");
    }
    Ok(uri)
}

/// Percent-encode a query value.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

// ── Member link ────────────────────────────────────────────────────

/// Pushes artifacts to a member's `/member/v1/artifacts` endpoint.
pub struct HttpMemberLink {
    endpoint: String,
    push_uri: Uri,
    ping_uri: Uri,
}

impl HttpMemberLink {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let push_uri = join_uri(&endpoint, "/member/v1/artifacts")?;
        let ping_uri = join_uri(&endpoint, "/member/v1/ping")?;
        Ok(Self {
            endpoint,
            push_uri,
            ping_uri,
        })
    }
}

#[async_trait]
impl MemberLink for HttpMemberLink {
    async fn apply_artifact(&self, payload: ArtifactPayload) -> Result<ArtifactRecord, LinkError> {
        let body = serde_json::to_vec(&payload).map_err(|e| LinkError::Transport(e.to_string()))?;
        let (status, body) = send(&self.push_uri, Method::POST, Some(JSON), body.into())
            .await
            .map_err(|e| LinkError::Transport(format!("{e:#}")))?;

        match status {
            StatusCode::OK => serde_json::from_slice(&body)
                .map_err(|e| LinkError::Transport(format!("unreadable member response: {e}"))),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let failure: ApplyFailure = serde_json::from_slice(&body)
                    .map_err(|e| LinkError::Transport(format!("unreadable apply failure: {e}")))?;
                Err(LinkError::Apply(failure))
            }
            other => Err(LinkError::Transport(format!(
                "member answered {other}: {}",
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    async fn ping(&self) -> Result<(), LinkError> {
        let (status, _) = send(&self.ping_uri, Method::GET, None, Bytes::new())
            .await
            .map_err(|e| LinkError::Transport(format!("{e:#}")))?;
        if status != StatusCode::OK {
            return Err(LinkError::Transport(format!("member answered ping with {status}")));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

// ── Locator client ─────────────────────────────────────────────────

/// Client for the locator API.
#[derive(Debug, Clone)]
pub struct LocatorClient {
    base: String,
    timeout: Duration,
}

impl LocatorClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        join_uri(base, "/")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> anyhow::Result<(StatusCode, Bytes)> {
        let uri = join_uri(&self.base, path)?;
        match tokio::time::timeout(self.timeout, send(&uri, method, content_type, body)).await {
            Ok(result) => result.with_context(|| format!("locator request {path} failed")),
            Err(_) => bail!("locator did not answer {path} within {:?}", self.timeout),
        }
    }

    /// Call an endpoint that always answers with a [`CommandResult`].
    async fn command(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> anyhow::Result<CommandResult> {
        let (status, body) = self.call(method, path, content_type, body).await?;
        serde_json::from_slice(&body).with_context(|| {
            format!(
                "locator answered {status} without a command result: {}",
                String::from_utf8_lossy(&body)
            )
        })
    }

    /// Join with `groups` (comma-separated); the locator pushes later
    /// deploys to `endpoint`.
    pub async fn join(&self, groups: &str, endpoint: &str) -> anyhow::Result<JoinResponse> {
        let req = JoinRequest {
            groups: groups.to_string(),
            endpoint: endpoint.to_string(),
        };
        let body = serde_json::to_vec(&req)?;
        let (status, body) = self
            .call(Method::POST, "/api/v1/members", Some(JSON), body.into())
            .await?;
        if status != StatusCode::OK {
            let message = serde_json::from_slice::<CommandResult>(&body)
                .map(|r| r.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            bail!("join rejected ({status}): {message}");
        }
        serde_json::from_slice(&body).context("unreadable join response")
    }

    /// Join, apply the returned bundle on `agent`, and acknowledge it.
    ///
    /// Apply failures do not make this fail: they travel in the report
    /// and the locator marks the session failed.
    pub async fn join_and_apply(
        &self,
        agent: &MemberAgent,
        endpoint: &str,
    ) -> anyhow::Result<(MemberId, ApplyReport)> {
        let response = self.join(&agent.groups(), endpoint).await?;
        info!(
            member = %response.member_id,
            records = ?response.bundle.resolved.record_names(),
            "joined locator"
        );

        let report = agent.apply_resolved_configuration(&response.bundle);
        let ack = self.ack(&response.member_id, &report).await?;
        if !ack.is_ok() {
            warn!(member = %response.member_id, message = %ack.message, "locator rejected ack");
        }
        Ok((response.member_id, report))
    }

    pub async fn ack(&self, member_id: &str, report: &ApplyReport) -> anyhow::Result<CommandResult> {
        let body = serde_json::to_vec(report)?;
        let path = format!("/api/v1/members/{}/ack", encode_query(member_id));
        self.command(Method::POST, &path, Some(JSON), body.into()).await
    }

    pub async fn leave(&self, member_id: &str) -> anyhow::Result<CommandResult> {
        let path = format!("/api/v1/members/{}", encode_query(member_id));
        self.command(Method::DELETE, &path, None, Bytes::new()).await
    }

    pub async fn members(&self) -> anyhow::Result<Vec<MemberInfo>> {
        let (status, body) = self
            .call(Method::GET, "/api/v1/members", None, Bytes::new())
            .await?;
        if status != StatusCode::OK {
            bail!("listing members failed ({status})");
        }
        serde_json::from_slice(&body).context("unreadable member list")
    }

    fn deploy_path(group: Option<&str>, name: &str) -> String {
        let mut path = format!("/api/v1/deploy?name={}", encode_query(name));
        if let Some(group) = group {
            path.push_str(&format!("&group={}", encode_query(group)));
        }
        path
    }

    pub async fn deploy(
        &self,
        group: Option<&str>,
        name: &str,
        content: Vec<u8>,
    ) -> anyhow::Result<CommandResult> {
        let path = Self::deploy_path(group, name);
        self.command(Method::POST, &path, Some(OCTET_STREAM), content.into())
            .await
    }

    pub async fn undeploy(&self, group: Option<&str>, name: &str) -> anyhow::Result<CommandResult> {
        let path = Self::deploy_path(group, name);
        self.command(Method::DELETE, &path, None, Bytes::new()).await
    }

    pub async fn import(&self, archive: Vec<u8>) -> anyhow::Result<CommandResult> {
        self.command(Method::POST, "/api/v1/import", Some("application/zip"), archive.into())
            .await
    }

    pub async fn export(&self) -> anyhow::Result<Vec<u8>> {
        let (status, body) = self
            .call(Method::GET, "/api/v1/export", None, Bytes::new())
            .await?;
        if status != StatusCode::OK {
            bail!("export failed ({status}): {}", String::from_utf8_lossy(&body));
        }
        Ok(body.to_vec())
    }
}
