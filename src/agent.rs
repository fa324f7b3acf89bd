//! The receive, decode, filter, format, deliver loop.
//!
//! An [`AgentLoop`] cycles through three phases until shut down:
//!
//! 1. **connect**: [`DeliveryChannel::connect`] retries until the gateway
//!    accepts, racing the shutdown signal.
//! 2. **session**: frames are read from the controller under a read timeout,
//!    decoded and matched, and every accepted reading is delivered. The
//!    session ends when a send fails or when more than `exception_threshold`
//!    consecutive failures accumulate, even if the socket still looks healthy.
//! 3. **close**: the gateway stream is shut down, then the cycle restarts.

use crate::alias::{AliasMap, resolve_name};
use crate::config::AgentConfig;
use crate::decoder::{AdvertisingReport, PacketDecoder, classify};
use crate::delivery::{Connector, DeliveryChannel, TcpConnector};
use crate::filter::ReportFilter;
use crate::output::json::JsonFormatter;
use crate::output::{OutputFormatter, wire};
use crate::scanner::{self, FrameSource, MAX_FRAME_LEN, ScanError};
use crate::throttle::Throttle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Errors that stop the agent.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Create a linked shutdown trigger and listener.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Requests a cooperative stop of every linked [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal observed by the agent loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Consecutive non-fatal failures within one gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionCounter {
    threshold: u32,
    count: u32,
}

impl ExceptionCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            count: 0,
        }
    }

    /// Record one failure. Returns `true` once the count exceeds the threshold.
    pub fn record(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count > self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Reconnect,
    Cancelled,
}

/// What handling one frame led to.
enum Outcome {
    /// Nothing delivered, nothing wrong.
    Quiet,
    Delivered,
    Failed,
    SendFailed,
}

pub struct AgentLoop<S: FrameSource, C: Connector> {
    source: S,
    channel: DeliveryChannel<C>,
    decoder: PacketDecoder,
    filter: ReportFilter,
    formatter: Box<dyn OutputFormatter>,
    throttle: Throttle,
    aliases: AliasMap,
    default_name: String,
    read_timeout: Duration,
    exceptions: ExceptionCounter,
    shutdown: Shutdown,
}

impl<S: FrameSource, C: Connector> AgentLoop<S, C> {
    pub fn new(config: &AgentConfig, source: S, connector: C, shutdown: Shutdown) -> Self {
        Self {
            source,
            channel: DeliveryChannel::new(connector, config.retry),
            decoder: PacketDecoder::new(config.layout),
            filter: ReportFilter::new(config.signature.clone()),
            formatter: Box::new(JsonFormatter::new(config.metadata.clone())),
            throttle: Throttle::new(config.send_interval),
            aliases: config.aliases.clone(),
            default_name: config.metadata.display_name.clone(),
            read_timeout: config.read_timeout,
            exceptions: ExceptionCounter::new(config.exception_threshold),
            shutdown,
        }
    }

    /// Replace the output formatter.
    pub fn with_formatter(mut self, formatter: Box<dyn OutputFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn channel(&self) -> &DeliveryChannel<C> {
        &self.channel
    }

    /// Run until shutdown is requested. The gateway connection is closed on return.
    pub async fn run(&mut self) {
        while !self.shutdown.is_triggered() {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                _ = self.channel.connect() => {}
            }
            self.exceptions.reset();

            let end = self.run_session().await;
            self.channel.close().await;
            if end == SessionEnd::Cancelled {
                break;
            }
            info!(peer = self.channel.connector().peer(), "resetting gateway connection");
        }

        self.channel.close().await;
        info!("agent stopped");
    }

    async fn run_session(&mut self) -> SessionEnd {
        let mut buf = [0u8; MAX_FRAME_LEN];

        loop {
            if self.shutdown.is_triggered() {
                return SessionEnd::Cancelled;
            }

            let received = tokio::select! {
                biased;
                _ = self.shutdown.wait() => return SessionEnd::Cancelled,
                read = tokio::time::timeout(self.read_timeout, self.source.receive(&mut buf)) => read,
            };

            let outcome = match received {
                // Idle poll; nothing was broadcast.
                Err(_) => continue,
                Ok(Ok(0)) => {
                    debug!("empty read from controller");
                    Outcome::Failed
                }
                Ok(Ok(len)) => self.handle_frame(&buf[..len]).await,
                Ok(Err(error)) => {
                    warn!(%error, "controller read failed");
                    Outcome::Failed
                }
            };

            match outcome {
                Outcome::Quiet => {}
                Outcome::Delivered => self.exceptions.reset(),
                Outcome::Failed => {
                    if self.exceptions.record() {
                        warn!(
                            failures = self.exceptions.count(),
                            "too many consecutive failures"
                        );
                        return SessionEnd::Reconnect;
                    }
                }
                Outcome::SendFailed => {
                    self.exceptions.record();
                    return SessionEnd::Reconnect;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Outcome {
        let reports = match self.decoder.decode_all(frame) {
            Ok(reports) => reports,
            Err(error) => {
                debug!(%error, len = frame.len(), "undecodable frame");
                return Outcome::Failed;
            }
        };
        if reports.is_empty() {
            trace!(event = ?classify(frame), "ignoring frame");
        }

        let mut outcome = Outcome::Quiet;
        for report in &reports {
            match self.deliver(report).await {
                Outcome::Quiet => {}
                Outcome::Delivered => outcome = Outcome::Delivered,
                other => return other,
            }
        }
        outcome
    }

    async fn deliver(&mut self, report: &AdvertisingReport) -> Outcome {
        let Some(event) = self.filter.matches(report) else {
            trace!(address = %report.address, "signature mismatch");
            return Outcome::Quiet;
        };
        if !self.throttle.should_emit(&event.address) {
            trace!(address = %event.address, "throttled");
            return Outcome::Quiet;
        }

        let name = resolve_name(&event.address, &self.aliases, &self.default_name);
        let message = match self.formatter.format(&event, name) {
            Ok(message) => message,
            Err(error) => {
                warn!(address = %event.address, %error, "failed to format reading");
                return Outcome::Failed;
            }
        };

        match self.channel.send(&wire::frame(&message)).await {
            Ok(()) => {
                debug!(address = %event.address, payload = ?event.payload_str(), "reading delivered");
                self.throttle.record(event.address);
                Outcome::Delivered
            }
            Err(_) => Outcome::SendFailed,
        }
    }
}

/// Open the controller and forward readings to the configured gateway until
/// `shutdown` fires.
pub async fn run(config: AgentConfig, shutdown: Shutdown) -> Result<(), RunError> {
    let source = scanner::open(config.device)?;
    info!(device = config.device, gateway = %config.gateway, "scanning for sensor broadcasts");

    let connector = TcpConnector::new(config.gateway.clone());
    AgentLoop::new(&config, source, connector, shutdown).run().await;
    Ok(())
}
