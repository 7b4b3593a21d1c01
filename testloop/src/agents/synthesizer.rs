//! Code synthesizer: asks the generator model for a pytest module.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::payload::{excerpt, extract_code};
use crate::core::types::Framework;
use crate::io::config::ModelSettings;
use crate::io::llm::{GenerationRequest, TextGenerator};
use crate::io::prompt::{GeneratorPrompt, PromptEngine};

/// Characters of the previous attempt fed back on retries.
const PREVIOUS_CODE_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct SynthesisInputs<'a> {
    pub functions: &'a [String],
    pub framework: Framework,
    pub spec_text: &'a str,
    pub source_text: Option<&'a str>,
    /// Critic feedback from the previous attempt, if any.
    pub feedback: Option<&'a str>,
    pub previous_code: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Synthesizer {
    model: ModelSettings,
    context_char_budget: usize,
}

impl Synthesizer {
    pub fn new(model: ModelSettings, context_char_budget: usize) -> Self {
        Self {
            model,
            context_char_budget,
        }
    }

    /// Render the prompt, call the model once, and extract the module text.
    ///
    /// The extracted text is returned even when it is empty or not valid
    /// Python; execution is where unusable code shows up.
    #[instrument(skip_all, fields(functions = inputs.functions.len(), retry = inputs.feedback.is_some()))]
    pub fn synthesize<G: TextGenerator>(
        &self,
        generator: &G,
        inputs: &SynthesisInputs<'_>,
    ) -> Result<String> {
        let spec_excerpt = excerpt(inputs.spec_text, self.context_char_budget);
        let source_excerpt = inputs
            .source_text
            .map(|source| excerpt(source, self.context_char_budget));
        let previous_code = inputs
            .previous_code
            .map(|code| excerpt(code, PREVIOUS_CODE_CHARS));

        let prompt = PromptEngine::new()
            .render_generator(&GeneratorPrompt {
                functions: inputs.functions,
                framework: inputs.framework,
                spec_excerpt: &spec_excerpt,
                source_excerpt: source_excerpt.as_deref(),
                feedback: inputs.feedback,
                previous_code: previous_code.as_deref(),
            })
            .context("render generator prompt")?;

        let response = generator
            .generate(&GenerationRequest::new(&self.model, &prompt))
            .context("generator model call")?;
        let code = extract_code(&response);
        debug!(response_chars = response.len(), code_chars = code.len(), "extracted test module");
        Ok(code)
    }
}
