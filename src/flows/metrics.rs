//! Per-client acquisition counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared by every acquisition flow of one client.
#[derive(Debug, Default)]
pub struct AcquisitionMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	cache_hits: AtomicU64,
	mrrt_redemptions: AtomicU64,
	stale_serves: AtomicU64,
}
impl AcquisitionMetrics {
	/// Returns the total number of acquisition attempts.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of successful acquisitions (including cache hits).
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed acquisitions.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of acquisitions answered from a fresh cached access token.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Returns the number of multi-resource or family refresh tokens redeemed.
	pub fn mrrt_redemptions(&self) -> u64 {
		self.mrrt_redemptions.load(Ordering::Relaxed)
	}

	/// Returns the number of expired tokens served inside their extended lifetime.
	pub fn stale_serves(&self) -> u64 {
		self.stale_serves.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_mrrt_redemption(&self) {
		self.mrrt_redemptions.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_stale_serve(&self) {
		self.stale_serves.fetch_add(1, Ordering::Relaxed);
	}
}
