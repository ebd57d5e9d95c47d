// crates.io
use tracing::{Span, instrument::Instrumented};
// self
use crate::{_prelude::*, context::CorrelationContext, obs::FlowKind};

/// Span wrapper used by acquisition flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: Span,
}
impl FlowSpan {
	/// Creates a span tagged with the flow kind, stage, and the call's correlation id.
	pub fn new(kind: FlowKind, stage: &'static str, ctx: &CorrelationContext) -> Self {
		let span = tracing::info_span!(
			parent: ctx.span(),
			"token_broker.flow",
			flow = kind.as_str(),
			stage,
			correlation_id = %ctx.correlation_id(),
		);

		Self { span }
	}

	/// Underlying span.
	pub fn span(&self) -> &Span {
		&self.span
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}
