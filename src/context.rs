//! Per-call correlation id, logging span, and cancellation signal.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Request-scoped context threaded through every acquisition.
///
/// One context is created per top-level call. Its correlation id travels to the STS in the
/// `client-request-id` header and to the platform broker in the parameter set; its span parents
/// every flow span; its cancellation token aborts outstanding network calls and delegation.
#[derive(Clone, Debug)]
pub struct CorrelationContext {
	correlation_id: Uuid,
	span: tracing::Span,
	cancel: CancellationToken,
}
impl CorrelationContext {
	/// Creates a context with a fresh v4 correlation id.
	pub fn new() -> Self {
		Self::with_correlation_id(Uuid::new_v4())
	}

	/// Creates a context reusing a caller-supplied correlation id.
	pub fn with_correlation_id(correlation_id: Uuid) -> Self {
		let span = tracing::info_span!("token_broker.request", correlation_id = %correlation_id);

		Self { correlation_id, span, cancel: CancellationToken::new() }
	}

	/// Replaces the cancellation token, typically with a child of an application-wide token.
	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;

		self
	}

	/// Correlation id for this call.
	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}

	/// Span that parents every flow span of this call.
	pub fn span(&self) -> &tracing::Span {
		&self.span
	}

	/// Cancellation token observed by every suspension point.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Signals cancellation to every in-flight step of this call.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns `true` once cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Fails with [`Error::Cancelled`] if cancellation was already requested.
	pub fn ensure_active(&self) -> Result<()> {
		if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	/// Races `fut` against the cancellation signal.
	///
	/// The future is dropped as soon as cancellation fires, so nothing it would have written
	/// after its pending `.await` ever happens.
	pub async fn guard<F, T>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		tokio::select! {
			biased;

			_ = self.cancel.cancelled() => Err(Error::Cancelled),
			output = fut => output,
		}
	}
}
impl Default for CorrelationContext {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn guard_returns_cancelled_once_signalled() {
		let ctx = CorrelationContext::new();

		ctx.cancel();

		let result = ctx.guard(std::future::pending::<Result<()>>()).await;

		assert!(matches!(result, Err(Error::Cancelled)));
		assert!(ctx.ensure_active().is_err());
	}

	#[tokio::test]
	async fn guard_passes_through_completed_futures() {
		let ctx = CorrelationContext::new();
		let value = ctx.guard(async { Ok(7) }).await.expect("Ready future should complete.");

		assert_eq!(value, 7);
		assert_ne!(ctx.correlation_id(), CorrelationContext::new().correlation_id());
	}

	#[test]
	fn child_tokens_follow_parent_cancellation() {
		let parent = CancellationToken::new();
		let ctx = CorrelationContext::new().with_cancellation(parent.child_token());

		assert!(!ctx.is_cancelled());

		parent.cancel();

		assert!(ctx.is_cancelled());
	}
}
