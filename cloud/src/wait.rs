//! Bounded polling. AWS is eventually consistent, so most reconcilers wait for a resource to reach
//! a state, or retry a call that fails with a known transient code, before moving on.

use crate::error::{self, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Poll intervals and timeouts. Services take this at construction so that tests can poll fast.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    /// Time between two polls.
    pub interval: Duration,
    /// Bound for a resource (VPC, subnet, NAT gateway) to become available, and for retried calls.
    pub timeout: Duration,
    /// Bound for a new instance to reach `running`. Exceeding it is not fatal.
    pub instance_running_timeout: Duration,
    /// Bound for instance termination and load balancer deletion.
    pub delete_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
            instance_running_timeout: Duration::from_secs(60),
            delete_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl WaitConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.interval, self.timeout)
    }

    pub fn instance_running_backoff(&self) -> Backoff {
        Backoff::new(self.interval, self.instance_running_timeout)
    }

    pub fn delete_backoff(&self) -> Backoff {
        Backoff::new(self.interval, self.delete_timeout)
    }
}

/// A fixed interval and an overall timeout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Backoff {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Polls `condition` until it returns `Ok(true)`. Any error aborts the wait immediately.
pub async fn wait_for<F, Fut>(backoff: Backoff, what: &str, condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for_with_retryable(backoff, what, &[], condition).await
}

/// Polls `condition` until it returns `Ok(true)`. Errors carrying one of the `retryable` AWS
/// codes count as "not yet"; any other error aborts the wait immediately.
pub async fn wait_for_with_retryable<F, Fut>(
    backoff: Backoff,
    what: &str,
    retryable: &[&str],
    mut condition: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let poll = async {
        loop {
            match condition().await {
                Ok(true) => return Ok(()),
                Ok(false) => trace!("Still waiting for {}", what),
                Err(e) if e.has_code(retryable) => {
                    trace!("Retrying {} after retryable error: {}", what, e)
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(backoff.interval).await;
        }
    };
    match tokio::time::timeout(backoff.timeout, poll).await {
        Ok(result) => result,
        Err(_) => error::TimeoutSnafu {
            what,
            timeout: backoff.timeout,
        }
        .fail(),
    }
}

/// Runs `call` until it succeeds, retrying errors that carry one of the `retryable` codes.
pub async fn retry<T, F, Fut>(
    backoff: Backoff,
    what: &str,
    retryable: &[&str],
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempt = async {
        loop {
            match call().await {
                Ok(output) => return Ok(output),
                Err(e) if e.has_code(retryable) => {
                    trace!("Retrying {} after retryable error: {}", what, e)
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(backoff.interval).await;
        }
    };
    match tokio::time::timeout(backoff.timeout, attempt).await {
        Ok(result) => result,
        Err(_) => error::TimeoutSnafu {
            what,
            timeout: backoff.timeout,
        }
        .fail(),
    }
}
