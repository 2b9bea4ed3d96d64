//! Stage role classification.
//!
//! Classification walks the pipeline from its most downstream stage: `index`
//! is the distance from the sink end and `has_next` says whether a further
//! upstream stage exists.

use crate::core::{PipelineDefinition, Stage, StageRole};
use crate::errors::TypingError;

/// Derives [`StageRole`]s from position and bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTyper;

impl StageTyper {
    /// Classifies one stage.
    ///
    /// # Errors
    ///
    /// Returns a [`TypingError`] when a stage other than the most downstream
    /// one has neither an input nor an output binding.
    pub fn role(pipeline: &str, stage: &Stage, index: usize, has_next: bool) -> Result<StageRole, TypingError> {
        let has_input = stage.has_input_binding();
        let has_output = stage.has_output_binding();

        if index > 0 && !has_input && !has_output {
            return Err(TypingError::new(pipeline, &stage.label));
        }

        let role = if index == 0 {
            match (has_output, has_next) {
                (true, true) => StageRole::Processor,
                (true, false) => StageRole::Source,
                (false, _) => StageRole::Sink,
            }
        } else if has_next || has_input {
            StageRole::Processor
        } else {
            StageRole::Source
        };

        Ok(role)
    }

    /// Classifies every stage, returning roles in deployment order.
    ///
    /// # Errors
    ///
    /// Propagates the first [`TypingError`].
    pub fn classify(definition: &PipelineDefinition) -> Result<Vec<StageRole>, TypingError> {
        let last = definition.len().saturating_sub(1);
        definition
            .stages()
            .iter()
            .enumerate()
            .map(|(position, stage)| Self::role(definition.name(), stage, last - position, position > 0))
            .collect()
    }
}
