//! Delivery pipeline and agent loop
//!
//! Each cycle gathers and encodes one payload, then sends it with
//! exponential backoff. Gather failures are local data problems and end
//! the agent; send failures only abandon the current cycle.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! - SC-8: Transmission Confidentiality - reports travel over HTTPS (rustls)
//! - SI-4: System Monitoring - node state is pushed to the monitoring server
//! - AU-12: Audit Record Generation - every failure is logged with its phase

use crate::config::{Config, NodeIdentity};
use crate::crawler::{CrawlOptions, CrawlSnapshot, Crawler};
use crate::error::{NodewatcherError, Result};
use crate::ndp::RawProbeFactory;
use crate::netlink::NetlinkSocket;
use crate::report::{AGENT_VERSION, Report, encode_payload};
use crate::routing::{self, RoutingConfig};
use crate::sysinfo::SystemSnapshot;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Attempts per cycle before the report is dropped
pub const MAX_ATTEMPTS: u32 = 6;

/// Delay after the first failed attempt
pub const BASE_DELAY: Duration = Duration::from_secs(1);

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Produces the encoded payload for one cycle
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn gather(&self) -> Result<Vec<u8>>;
}

/// Hands one payload to the monitoring endpoint
#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<()>;
}

/// Exponential backoff between send attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered { attempts: u32 },
    Abandoned,
}

/// Sequential gather-then-send loop
pub struct DeliveryPipeline<S, T> {
    source: S,
    sender: T,
    policy: RetryPolicy,
    interval: Duration,
}

impl<S, T> DeliveryPipeline<S, T>
where
    S: ReportSource,
    T: ReportSender,
{
    pub fn new(source: S, sender: T, policy: RetryPolicy, interval: Duration) -> Self {
        Self {
            source,
            sender,
            policy,
            interval,
        }
    }

    /// Gather once, then send until success or the attempt ceiling
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        info!("Sending report");

        let payload = match self.source.gather().await {
            Ok(payload) => payload,
            Err(e) => {
                error!(phase = "gather", error = %e, "Failed to gather node information");
                return Err(e);
            }
        };

        for attempt in 1..=self.policy.max_attempts {
            match self.sender.send(&payload).await {
                Ok(()) => {
                    info!(attempt, "Successfully sent report");
                    return Ok(CycleOutcome::Delivered { attempts: attempt });
                }
                Err(e) if attempt == self.policy.max_attempts => {
                    error!(phase = "send", attempt, error = %e, "Failed to send report, giving up");
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        phase = "send",
                        attempt,
                        error = %e,
                        delay_secs = delay.as_secs_f64(),
                        "Failed to send report, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(CycleOutcome::Abandoned)
    }

    /// Run cycles forever; returns only on a gather failure
    pub async fn run(&self) -> Result<()> {
        loop {
            self.run_cycle().await?;
            debug!(interval_secs = self.interval.as_secs(), "Sleeping until next cycle");
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Gathers the live node state: crawl, /proc, routing daemons
pub struct NodeGatherer {
    identity: NodeIdentity,
    crawl: CrawlOptions,
    routing: RoutingConfig,
}

impl NodeGatherer {
    pub fn new(identity: NodeIdentity, crawl: CrawlOptions, routing: RoutingConfig) -> Self {
        Self {
            identity,
            crawl,
            routing,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.identity.clone(),
            config.crawl_options(),
            config.routing.clone(),
        )
    }
}

#[async_trait]
impl ReportSource for NodeGatherer {
    #[instrument(skip(self))]
    async fn gather(&self) -> Result<Vec<u8>> {
        let options = self.crawl.clone();
        let (crawl, system) = tokio::task::spawn_blocking(
            move || -> Result<(CrawlSnapshot, SystemSnapshot)> {
                let mut crawler = Crawler::new(NetlinkSocket::new()?, RawProbeFactory, options);
                let crawl = crawler.crawl()?;
                Ok((crawl, SystemSnapshot::read()?))
            },
        )
        .await
        .map_err(|e| NodewatcherError::Gather(format!("crawl task failed: {e}")))??;

        let routing = routing::collect(&self.routing).await;
        let report = Report::assemble(&self.identity, system, crawl, routing);
        let payload = encode_payload(&report)?;

        debug!(payload = %String::from_utf8_lossy(&payload), "Encoded report");
        Ok(payload)
    }
}

/// POSTs payloads to the monitoring endpoint
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
    dry: bool,
}

impl HttpSender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, dry: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(AGENT_VERSION)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            dry,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.http_timeout, config.dry)
    }
}

#[async_trait]
impl ReportSender for HttpSender {
    #[instrument(skip(self, payload), fields(endpoint = %self.endpoint, len = payload.len()))]
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.dry {
            info!("Dry run, report not sent");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_vec())
            .send()
            .await?
            .error_for_status()?;

        let status = response.status();
        match response.text().await {
            Ok(body) => debug!(%status, %body, "Monitoring server response"),
            Err(e) => debug!(%status, error = %e, "Failed to read monitoring server response body"),
        }
        Ok(())
    }
}
