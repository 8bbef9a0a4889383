// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::result::Result as StdResult;
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::warn;
use rand::Rng;
use thiserror::Error;

use crate::error_::{BoltError, Result};

/// Specifies how to retry work.
///
/// The driver itself never retries: it classifies errors
/// ([`BoltError::is_retryable()`]) and leaves the decision to the caller.
/// A default implementation of this hook is provided through
/// [`ExponentialBackoff`].
pub trait RetryPolicy {
    type Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error>;
}

/// [`RetryPolicy`] that retries work with exponential backoff.
///
/// Exponential backoff means that the pause between retries grows
/// exponentially:
///  * work fails → wait 1 second
///  * work fails → wait 2 seconds
///  * work fails → wait 4 seconds
///  * ...
///
/// By default, it will retry for up to 30 seconds in total.
/// This can be changed with [`ExponentialBackoff::with_max_retry_time()`].
///
/// Currently, the implementation uses a start pause of 1 second, a factor of
/// 2, and a random jitter factor of `(0.8..=1.2)`.
/// This is an implementation detail and might change in the future.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_retry_time: Duration,
    factor: f64,
    jitter: f64,
}

/// Error type returned by [`RetryPolicy::execute()`] to distinguish work that
/// failed with a non-retryable error from a retry timeout.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The work failed with a non-retryable driver error.
    #[error("non-retryable error occurred: {0}")]
    BoltError(#[from] BoltError),
    /// A timeout occurred while retrying.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

/// Used to indicate that a retry loop timed out.
///
/// All errors encountered during the retry loop are collected in
/// [`TimeoutError::errors`].
#[derive(Error, Debug)]
#[error("timeout occurred while retrying; last error: {}", .errors.last().expect("timeout is only reported after at least one failure"))]
pub struct TimeoutError {
    /// Errors encountered during the retry loop.
    pub errors: Vec<BoltError>,
}

impl From<TimeoutError> for Vec<BoltError> {
    fn from(value: TimeoutError) -> Self {
        value.errors
    }
}

impl ExponentialBackoff {
    /// Create a new exponential backoff policy with default settings.
    ///
    /// Same as [`ExponentialBackoff::default()`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change for how long the policy will retry, before giving up.
    #[inline]
    pub fn with_max_retry_time(self, max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            ..self
        }
    }
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_retry_time: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy for &ExponentialBackoff {
    type Error = RetryError;

    fn execute<R>(&self, mut work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        assert!(self.jitter >= 0.0);
        assert!(self.jitter < 1.0);
        let mut time_start = None;
        let mut errors: Vec<BoltError> = Vec::new();
        let mut current_delay = self.initial_delay.as_secs_f64();
        let mut rng = rand::rng();
        loop {
            let res = work();
            if time_start.is_none() {
                time_start = Some(Instant::now());
            }
            let err = match res {
                Err(e) if e.is_retryable() => e,
                _ => return res.map_err(Into::into),
            };
            errors.push(err);
            let time_elapsed = time_start.expect("set above").elapsed();
            if time_elapsed > self.max_retry_time {
                return Err(TimeoutError { errors }.into());
            }
            let jitter_factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
            let jittered_delay = current_delay * jitter_factor;
            warn!(
                "transaction failed and will be retried in {:.4} seconds: {}",
                jittered_delay,
                errors.last().expect("pushed above")
            );
            sleep(Duration::try_from_secs_f64(jittered_delay).unwrap_or(Duration::MAX));
            current_delay *= self.factor;
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    type Error = <&'static ExponentialBackoff as RetryPolicy>::Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        (&self).execute(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_retryable_error_is_returned_immediately() {
        let policy = ExponentialBackoff::new();
        let mut count = 0;
        let res: StdResult<(), _> = policy.execute(|| {
            count += 1;
            Err(BoltError::protocol_error("boom"))
        });
        assert!(matches!(res, Err(RetryError::BoltError(_))));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_retryable_errors_are_retried() {
        let policy = ExponentialBackoff::new().with_max_retry_time(Duration::from_secs(3600));
        let mut count = 0;
        let res = policy.execute(|| {
            count += 1;
            if count < 2 {
                Err(BoltError::session_expired("try again"))
            } else {
                Ok(count)
            }
        });
        assert_eq!(res.unwrap(), 2);
    }
}
