//! HTTP readiness probe
//!
//! Polls a URL with exponential backoff until it answers 2xx, the overall
//! timeout elapses, or the operation is cancelled. The GET itself is issued
//! through `curl` via the command layer, with the status code captured and
//! range-checked here.

use crate::cancel::CancelToken;
use crate::{Error, Result};
use command_runner::{Command, CommandRunner};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Per-attempt timeout handed to curl
const ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// URL to poll
    pub url: String,
    /// Service the probe belongs to, for diagnostics
    pub service_name: String,
    /// Overall deadline
    pub timeout: Duration,
    /// First retry interval
    pub initial_interval: Duration,
    /// Multiplier applied to the interval after each failed attempt
    pub backoff_multiplier: f64,
    /// Upper bound for the retry interval
    pub max_interval: Duration,
}

impl ProbeOptions {
    /// Defaults: 60s total, 1s initial interval, x1.5 backoff clamped to 5s
    pub fn new(url: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_name: service_name.into(),
            timeout: Duration::from_secs(60),
            initial_interval: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            max_interval: Duration::from_secs(5),
        }
    }
}

/// Poll until the URL answers 2xx.
pub async fn wait_for_ready(opts: ProbeOptions, cancel: &CancelToken) -> Result<()> {
    info!(service = %opts.service_name, url = %opts.url, "waiting for readiness");

    let runner = CommandRunner::new("readiness-probe");
    let started = Instant::now();
    let mut interval = opts.initial_interval;
    let mut attempt = 0u32;

    loop {
        cancel.check("readiness probe")?;
        if started.elapsed() >= opts.timeout {
            return Err(Error::ReadinessProbe {
                service: opts.service_name,
                url: opts.url,
            });
        }

        attempt += 1;
        if attempt_get(&runner, &opts.url).await {
            info!(service = %opts.service_name, attempt, "service is ready");
            return Ok(());
        }
        debug!(service = %opts.service_name, attempt, "probe attempt failed, retrying in {:?}", interval);

        smol::future::or(
            async {
                smol::Timer::after(interval).await;
            },
            cancel.cancelled(),
        )
        .await;

        interval = next_interval(interval, opts.backoff_multiplier, opts.max_interval);
    }
}

/// One GET attempt; true iff the status code is 2xx.
async fn attempt_get(runner: &CommandRunner, url: &str) -> bool {
    let mut cmd = Command::new("curl");
    cmd.args([
        "-s",
        "-o",
        "/dev/null",
        "-w",
        "%{http_code}",
        "--max-time",
        &ATTEMPT_TIMEOUT_SECS.to_string(),
        url,
    ]);

    match runner.execute(cmd).await {
        Ok(result) if result.success() => matches!(
            result.stdout.trim().parse::<u16>(),
            Ok(code) if (200..300).contains(&code)
        ),
        _ => false,
    }
}

fn next_interval(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let scaled = current.mul_f64(multiplier);
    scaled.min(max)
}
