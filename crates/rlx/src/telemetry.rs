//! 🧭 telemetry.rs: breadcrumbs that survive the trip across the queue.
//!
//! The producer and the consumer run in different processes, possibly on different
//! continents, possibly on different days. The only thing they share is the job
//! message. So the trace context rides along in its metadata as a W3C `traceparent`
//! (plus `baggage`, if anyone ever sets some), injected on one side and extracted on
//! the other with the same composite propagator.
//!
//! Also home to `init_logging`, because every binary needs one and nobody wants to
//! copy it twice.
//!
//! 🦆 Quack (propagated).

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use opentelemetry::Context;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// 🏷️ The metadata key the W3C propagator writes.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// 📝 Env var that picks the log output format. `json` for machines, anything else for humans.
pub const LOG_FORMAT_ENV: &str = "RLX_LOG_FORMAT";

/// 📝 Env var for the log filter. Falls back to `RUST_LOG`, then to `info`.
pub const LOG_LEVEL_ENV: &str = "RLX_LOG_LEVEL";

fn propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

// -- 🎲 uuids are already random; borrow their bytes instead of pulling in another rng
fn random_span_id() -> SpanId {
    let bytes = Uuid::new_v4().into_bytes();
    let mut span = [0u8; 8];
    span.copy_from_slice(&bytes[..8]);
    SpanId::from_bytes(span)
}

/// 🌱 A brand new sampled trace, for work that has no parent.
pub fn start_trace() -> Context {
    let span_context = SpanContext::new(
        TraceId::from_bytes(Uuid::new_v4().into_bytes()),
        random_span_id(),
        TraceFlags::SAMPLED,
        false,
        TraceState::default(),
    );
    Context::new().with_remote_span_context(span_context)
}

/// 🌿 Continue the parent's trace under a fresh span id. A parent with no valid trace
/// starts a new one instead.
pub fn child_of(parent: &Context) -> Context {
    let parent_span = parent.span().span_context().clone();
    if !parent_span.is_valid() {
        return start_trace();
    }
    let span_context = SpanContext::new(
        parent_span.trace_id(),
        random_span_id(),
        parent_span.trace_flags(),
        false,
        parent_span.trace_state().clone(),
    );
    parent.with_remote_span_context(span_context)
}

/// 📤 Write the context into message metadata.
pub fn inject(cx: &Context, metadata: &mut HashMap<String, String>) {
    propagator().inject_context(cx, metadata);
}

/// 📥 Read a context back out of message metadata. Missing or garbled headers give an
/// empty context, never an error.
pub fn extract(metadata: &HashMap<String, String>) -> Context {
    propagator().extract(metadata)
}

/// 🔍 The trace id as 32 hex chars, when the context carries a valid one.
pub fn trace_id(cx: &Context) -> Option<String> {
    let span = cx.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// 📝 Install the global `tracing` subscriber.
///
/// `RLX_LOG_FORMAT=json` switches to JSON lines. The filter comes from `RLX_LOG_LEVEL`,
/// then `RUST_LOG`, then `info`.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let installed = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    installed.map_err(|e| anyhow!("💀 could not install the log subscriber: {e}"))
}
