//! Single-shot document download.
//!
//! One GET per call, no retry. Any non-success status, transport failure,
//! truncated body or oversized body is a fetch error naming the cause.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::{Attempt, Policy};
use tracing::{debug, instrument, warn};
use url::Url;

use manualforge_shared::{ManualForgeError, PipelineConfig, Result};

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("ManualForge/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP client shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_bytes: u64,
    /// Allow localhost/private IPs (local mirrors, mock servers).
    allow_private_hosts: bool,
}

impl Fetcher {
    /// Create a fetcher using the timeout, size and host limits of `config`.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let allow_private_hosts = config.allow_private_hosts;
        let redirects = Policy::custom(move |attempt: Attempt| {
            match check_redirect(attempt.url(), attempt.previous().len(), allow_private_hosts) {
                Ok(()) => attempt.follow(),
                Err(reason) => {
                    warn!(target_url = %attempt.url(), %reason, "redirect refused");
                    attempt.error(reason)
                }
            }
        });

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirects)
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ManualForgeError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_bytes: config.max_document_bytes,
            allow_private_hosts,
        })
    }

    /// Download the raw document at `source_link`.
    #[instrument(skip_all, fields(source_link = %source_link))]
    pub async fn fetch(&self, source_link: &str) -> Result<Vec<u8>> {
        let url = Url::parse(source_link)
            .map_err(|e| ManualForgeError::Fetch(format!("{source_link}: invalid URL: {e}")))?;
        let bytes = self.get_bytes(&url).await?;
        debug!(size = bytes.len(), "fetched document");
        Ok(bytes)
    }

    /// GET `url` and read the whole body, bounded by `max_bytes`.
    pub(crate) async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(ManualForgeError::Fetch(format!(
                "{url}: refusing to fetch from a non-public host"
            )));
        }

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ManualForgeError::Fetch(format!("{url}: {}", error_chain(&e))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManualForgeError::Fetch(format!("{url}: HTTP {status}")));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(self.too_large(url));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ManualForgeError::Fetch(format!("{url}: body read failed: {e}")))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn too_large(&self, url: &Url) -> ManualForgeError {
        ManualForgeError::Fetch(format!(
            "{url}: body exceeds the {} byte limit",
            self.max_bytes
        ))
    }
}

/// Render an error with its sources, so redirect refusals name the reason.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Decide whether to follow a redirect to `target` after `hops` earlier URLs.
///
/// Every hop is held to the same host rules as the first request.
fn check_redirect(
    target: &Url,
    hops: usize,
    allow_private_hosts: bool,
) -> std::result::Result<(), String> {
    if hops > MAX_REDIRECTS {
        return Err(format!("more than {MAX_REDIRECTS} redirects"));
    }
    if !allow_private_hosts && is_ssrf_target(target) {
        return Err(format!("redirect to non-public host {target}"));
    }
    Ok(())
}

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}
