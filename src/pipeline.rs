//! Ordered enrichment pipeline
//!
//! A [`Pipeline`] runs its [`Step`]s strictly in order over one message,
//! threading a [`PipelineContext`] from each step to the next. A step may
//! halt the pipeline, which counts as success and skips the remaining steps.
//! An error stops the pipeline at the failing step with no rollback of
//! changes already made to the message.

use crate::error::{Error, Result};
use crate::queue::Message;
use crate::tracksys::TracksysItem;
use async_trait::async_trait;
use std::time::Instant;

/// Value handed from one step to the next
#[derive(Clone, Debug, Default, PartialEq)]
pub enum PipelineContext {
    /// Nothing has been looked up yet
    #[default]
    Unprocessed,
    /// The Tracksys record for the message
    Item(TracksysItem),
}

impl PipelineContext {
    /// Short name of the variant, used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineContext::Unprocessed => "unprocessed",
            PipelineContext::Item(_) => "item",
        }
    }

    /// Borrow the Tracksys item, or fail naming the step that needed it
    pub fn item(&self, step: &'static str) -> Result<&TracksysItem> {
        match self {
            PipelineContext::Item(item) => Ok(item),
            other => Err(Error::ContextMismatch {
                step,
                expected: "item",
                found: other.kind(),
            }),
        }
    }
}

/// What a step decided
#[derive(Debug)]
pub enum StepOutcome {
    /// Continue with this context
    Proceed(PipelineContext),
    /// Stop here; the message is finished
    Halt,
}

/// One transform applied to a message
///
/// Steps hold configuration and shared clients only, never per-message state.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &'static str;

    /// Transform the message in place and decide whether to continue
    async fn process(&self, message: &mut Message, context: PipelineContext)
    -> Result<StepOutcome>;
}

/// How a pipeline run ended successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every step ran
    Finished,
    /// A step halted the pipeline
    Halted {
        /// Position of the halting step
        index: usize,
        /// Name of the halting step
        step: &'static str,
    },
}

/// A step error, with the position of the step that raised it
#[derive(Debug, thiserror::Error)]
#[error("step {index} ({step}) failed: {error}")]
pub struct StepFailure {
    /// Position of the failing step
    pub index: usize,
    /// Name of the failing step
    pub step: &'static str,
    /// The step's error
    #[source]
    pub error: Error,
}

/// An ordered list of steps
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append a boxed step
    pub fn push(&mut self, step: Box<dyn Step>) {
        self.steps.push(step);
    }

    /// Names of the steps, in order
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step over `message`
    pub async fn process(&self, message: &mut Message) -> std::result::Result<Completion, StepFailure> {
        let mut context = PipelineContext::Unprocessed;
        let record_id = message.record_id().unwrap_or_default().to_string();

        for (index, step) in self.steps.iter().enumerate() {
            let start = Instant::now();
            let outcome = step.process(message, context).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(StepOutcome::Proceed(next)) => {
                    tracing::debug!(record_id = %record_id, step = step.name(), elapsed_ms, "Step complete");
                    context = next;
                }
                Ok(StepOutcome::Halt) => {
                    tracing::debug!(record_id = %record_id, step = step.name(), elapsed_ms, "Step halted pipeline");
                    return Ok(Completion::Halted {
                        index,
                        step: step.name(),
                    });
                }
                Err(error) => {
                    return Err(StepFailure {
                        index,
                        step: step.name(),
                        error,
                    });
                }
            }
        }

        Ok(Completion::Finished)
    }
}
