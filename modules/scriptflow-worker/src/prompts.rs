//! Prompt assembly. The prompt *content* is owned by the prompt-engineering
//! collaborator; these builders only wire request context into the agreed
//! frames.

use scriptflow_common::{GenerationMode, ReelAnalysis, ToneHint};
use scriptflow_common::intent::Intensity;

use crate::context::PriorContext;

pub const ANALYSIS_PROMPT: &str = "Analyze this short-form video. Extract the spoken transcript, \
the delivery tone, the hook device used in the opening seconds, the broad content type, the \
creator niche if identifiable, notable visual cues, and a short description of each scene.";

pub struct PromptInputs<'a> {
    pub idea: &'a str,
    pub tone: Option<ToneHint>,
    pub intensity: Intensity,
    pub mode: GenerationMode,
    pub language: Option<&'a str>,
    pub analysis: Option<&'a ReelAnalysis>,
    pub prior: &'a PriorContext,
}

fn push_common_constraints(prompt: &mut String, inputs: &PromptInputs<'_>) {
    if let Some(tone) = inputs.tone {
        prompt.push_str(&format!("Write in a {} tone.\n", tone.as_str()));
    }
    match inputs.intensity {
        Intensity::Lite => prompt.push_str("Keep it brief: under 60 seconds of speaking time.\n"),
        Intensity::Medium => {}
        Intensity::Deep => prompt.push_str("Go deeper than usual: 90-120 seconds of material.\n"),
    }
    if let Some(language) = inputs.language {
        prompt.push_str(&format!("Write the script in {language}.\n"));
    }
    match inputs.mode {
        GenerationMode::Full => prompt.push_str(
            "Return the script in exactly this layout:\n[HOOK]\n...\n\n[BODY]\n...\n\n[CTA]\n...\n",
        ),
        GenerationMode::HookOnly => {
            prompt.push_str("Return only the hook, in this layout:\n[HOOK]\n...\n")
        }
    }
}

fn push_prior_context(prompt: &mut String, prior: &PriorContext) {
    if !prior.same_idea_summaries.is_empty() {
        prompt.push_str(
            "\nYou already wrote these takes on the same idea; take a different angle:\n",
        );
        for summary in &prior.same_idea_summaries {
            prompt.push_str(&format!("- {summary}\n"));
        }
    }
    if !prior.other_idea_bodies.is_empty() {
        prompt.push_str("\nStyle reference from earlier scripts for this reel:\n");
        for body in &prior.other_idea_bodies {
            prompt.push_str(&format!("---\n{body}\n"));
        }
    }
}

/// Text-only prompt for the cached-analysis path.
pub fn build_text_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::from(
        "You write short-form speaking scripts modeled on an existing reel.\n\n",
    );

    if let Some(analysis) = inputs.analysis {
        prompt.push_str("Reel analysis:\n");
        if let Some(transcript) = &analysis.transcript {
            prompt.push_str(&format!("Transcript: {transcript}\n"));
        }
        if let Some(tone) = &analysis.tone {
            prompt.push_str(&format!("Tone: {tone}\n"));
        }
        if let Some(hook_type) = &analysis.hook_type {
            prompt.push_str(&format!("Hook type: {hook_type}\n"));
        }
        if !analysis.scene_descriptions.is_empty() {
            prompt.push_str(&format!(
                "Scenes: {}\n",
                analysis.scene_descriptions.join("; ")
            ));
        }
    }

    prompt.push_str(&format!("\nThe user's idea: {}\n", inputs.idea));
    push_prior_context(&mut prompt, inputs.prior);
    push_common_constraints(&mut prompt, inputs);
    prompt
}

/// One-shot multimodal prompt: the frames and audio ride along as media
/// parts.
pub fn build_oneshot_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::from(
        "Watch the attached reel (sampled frames and audio). Write a new short-form speaking \
         script that borrows its structure and pacing but is about the user's idea.\n\n",
    );
    prompt.push_str(&format!("The user's idea: {}\n", inputs.idea));
    push_prior_context(&mut prompt, inputs.prior);
    push_common_constraints(&mut prompt, inputs);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs<'a>(prior: &'a PriorContext) -> PromptInputs<'a> {
        PromptInputs {
            idea: "coding interviews",
            tone: Some(ToneHint::Funny),
            intensity: Intensity::Medium,
            mode: GenerationMode::Full,
            language: None,
            analysis: None,
            prior,
        }
    }

    #[test]
    fn text_prompt_carries_idea_tone_and_layout() {
        let prior = PriorContext::default();
        let prompt = build_text_prompt(&base_inputs(&prior));
        assert!(prompt.contains("coding interviews"));
        assert!(prompt.contains("funny tone"));
        assert!(prompt.contains("[HOOK]"));
        assert!(prompt.contains("[CTA]"));
    }

    #[test]
    fn hook_only_mode_changes_layout() {
        let prior = PriorContext::default();
        let mut inputs = base_inputs(&prior);
        inputs.mode = GenerationMode::HookOnly;
        let prompt = build_text_prompt(&inputs);
        assert!(prompt.contains("only the hook"));
        assert!(!prompt.contains("[CTA]"));
    }

    #[test]
    fn prior_summaries_are_injected() {
        let prior = PriorContext {
            same_idea_summaries: vec!["hook: old take / body: old body".to_string()],
            other_idea_bodies: vec!["[HOOK]\nstyle\n".to_string()],
        };
        let prompt = build_oneshot_prompt(&base_inputs(&prior));
        assert!(prompt.contains("different angle"));
        assert!(prompt.contains("old take"));
        assert!(prompt.contains("Style reference"));
    }
}
