//! Observability helpers for acquisition flows.
//!
//! - Every flow runs inside a `token_broker.flow` span carrying the `flow`, `stage`, and
//!   `correlation_id` fields, parented by the call's [`CorrelationContext`] span.
//! - Enable `metrics` to increment the `token_broker_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.
//!
//! [`CorrelationContext`]: crate::context::CorrelationContext

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Acquisition flows observed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Cache-first silent acquisition.
	Silent,
	/// Interactive sign-in and code exchange.
	Interactive,
	/// App-only client credentials acquisition.
	ClientCredentials,
	/// Authority resolution and instance discovery.
	InstanceDiscovery,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Silent => "silent",
			FlowKind::Interactive => "interactive",
			FlowKind::ClientCredentials => "client_credentials",
			FlowKind::InstanceDiscovery => "instance_discovery",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
