//! Per-fetch retry accounting.

// self
use crate::{_prelude::*, jwks::RetryPolicy};

/// Attempts and deadline spent so far by one JWKS fetch.
///
/// Every attempt gets the policy's attempt timeout, cut short by the fetch deadline.
#[derive(Debug)]
pub struct FetchAttempts<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries: u32,
}
impl<'a> FetchAttempts<'a> {
	/// Start counting against `policy`.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, deadline: Instant::now() + policy.deadline, retries: 0 }
	}

	/// Timeout for the next attempt, or `None` once the deadline has passed.
	pub fn next_timeout(&self) -> Option<Duration> {
		let timeout = self.left().min(self.policy.attempt_timeout);

		(!timeout.is_zero()).then_some(timeout)
	}

	/// Spend one retry and return how long to wait before it.
	///
	/// `None` means the policy allows no further retries.
	pub fn backoff(&mut self) -> Option<Duration> {
		if self.retries >= self.policy.max_retries {
			tracing::debug!(retries = self.retries, "no retries left");

			return None;
		}

		let delay = self.policy.compute_backoff(self.retries).min(self.left());

		self.retries += 1;
		tracing::debug!(retry = self.retries, ?delay, "retrying jwks fetch");

		Some(delay)
	}

	fn left(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}
}
