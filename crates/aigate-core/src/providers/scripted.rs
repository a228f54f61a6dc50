use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{Provider, ProviderError, ProviderFuture, ProviderKind, ProviderReply};
use crate::fallback;
use crate::request::RequestEnvelope;
use crate::response::Output;
use crate::CapabilitySet;

const SCRIPTED_CONFIDENCE: f64 = 0.95;

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Answer with the deterministic local computation for the capability.
    Succeed,
    /// Answer with a fixed output.
    Reply(Output),
    Transient,
    Permanent,
    /// Wait, then succeed.
    Delay(Duration),
    /// Never complete.
    Hang,
}

/// Deterministic offline provider driven by a queue of [`Step`]s.
///
/// Once the script runs out every call uses the fallback step, `Succeed`
/// unless configured otherwise.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    capabilities: CapabilitySet,
    script: Mutex<VecDeque<Step>>,
    otherwise: Step,
    calls: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderKind::Scripted.default_capabilities(),
            script: Mutex::new(VecDeque::new()),
            otherwise: Step::Succeed,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(steps);
        self
    }

    /// Step used after the script is exhausted.
    pub fn otherwise(mut self, step: Step) -> Self {
        self.otherwise = step;
        self
    }

    pub fn push(&self, step: Step) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    /// Calls that reached this provider.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone())
    }

    fn success(request: &RequestEnvelope) -> ProviderReply {
        let computed = fallback::compute(request.capability, &request.payload, &request.options);
        ProviderReply::new(computed.output, SCRIPTED_CONFIDENCE)
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Scripted
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn invoke<'a>(&'a self, request: &'a RequestEnvelope) -> ProviderFuture<'a> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let step = self.next_step();

        Box::pin(async move {
            if !self.capabilities.supports(request.capability) {
                return Err(ProviderError::unsupported(&self.name, request.capability));
            }

            match step {
                Step::Succeed => Ok(Self::success(request)),
                Step::Reply(output) => Ok(ProviderReply::new(output, SCRIPTED_CONFIDENCE)),
                Step::Transient => Err(ProviderError::transient(
                    &self.name,
                    "scripted transient failure",
                )),
                Step::Permanent => Err(ProviderError::permanent(
                    &self.name,
                    "scripted permanent failure",
                )),
                Step::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Self::success(request))
                }
                Step::Hang => std::future::pending().await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderErrorKind;
    use crate::request::{InvokeOptions, Payload};
    use crate::Capability;

    fn request() -> RequestEnvelope {
        RequestEnvelope::new(
            Capability::ImproveText,
            Payload::text("hello  world"),
            InvokeOptions::new(),
        )
    }

    #[tokio::test]
    async fn follows_script_then_falls_back_to_default_step() {
        let provider = ScriptedProvider::new("mock")
            .with_script([Step::Transient, Step::Permanent])
            .otherwise(Step::Succeed);
        let request = request();

        let first = provider.invoke(&request).await.expect_err("scripted transient");
        assert_eq!(first.kind(), ProviderErrorKind::Transient);
        let second = provider.invoke(&request).await.expect_err("scripted permanent");
        assert_eq!(second.kind(), ProviderErrorKind::Permanent);

        let reply = provider.invoke(&request).await.expect("default success");
        assert_eq!(reply.output, Output::text("Hello world."));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_step_waits_before_answering() {
        let provider = ScriptedProvider::new("slow").with_script([Step::Delay(Duration::from_secs(2))]);
        let request = request();

        let started = tokio::time::Instant::now();
        provider.invoke(&request).await.expect("delayed success");
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unsupported_capability_is_permanent() {
        let provider = ScriptedProvider::new("text-only").with_capabilities(CapabilitySet::text());
        let request = RequestEnvelope::new(
            Capability::SpeechToText,
            Payload::audio(vec![1]),
            InvokeOptions::new(),
        );

        let error = provider.invoke(&request).await.expect_err("unsupported");
        assert!(error.is_permanent());
    }
}
