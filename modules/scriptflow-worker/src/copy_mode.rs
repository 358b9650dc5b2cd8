//! Copy mode: emit the analyzed transcript as a script instead of calling
//! the generator.

use scriptflow_common::{ReelAnalysis, ScriptSections};

/// Split text into sentences on terminal punctuation. Deterministic and
/// intentionally simple; the transcripts this sees are short spoken-word
/// passages.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Allocate transcript sentences to HOOK/BODY/CTA.
///
/// Three or fewer sentences: first is the hook, last the CTA, the remainder
/// the body. Otherwise the first 20% open, the last 20% close, and the
/// middle carries the body.
pub fn allocate_sentences(sentences: &[String]) -> ScriptSections {
    match sentences.len() {
        0 => ScriptSections::default(),
        1 => ScriptSections::new(sentences[0].clone(), "", ""),
        2 => ScriptSections::new(sentences[0].clone(), "", sentences[1].clone()),
        3 => ScriptSections::new(
            sentences[0].clone(),
            sentences[1].clone(),
            sentences[2].clone(),
        ),
        n => {
            let edge = ((n as f64) * 0.2).ceil() as usize;
            let hook = sentences[..edge].join(" ");
            let cta = sentences[n - edge..].join(" ");
            let body = sentences[edge..n - edge].join(" ");
            ScriptSections::new(hook, body, cta)
        }
    }
}

/// Format a reel analysis as a copyable script: transcript allocated by the
/// rule above, with scene descriptions and visual cues appended as body
/// notes.
pub fn transcript_to_sections(analysis: &ReelAnalysis) -> ScriptSections {
    let transcript = analysis.transcript.as_deref().unwrap_or("");
    let mut sections = allocate_sentences(&split_sentences(transcript));

    let mut notes = Vec::new();
    for scene in &analysis.scene_descriptions {
        notes.push(format!("(scene: {scene})"));
    }
    for cue in &analysis.visual_cues {
        notes.push(format!("(visual: {cue})"));
    }
    if !notes.is_empty() {
        if sections.body.is_empty() {
            sections.body = notes.join("\n");
        } else {
            sections.body = format!("{}\n{}", sections.body, notes.join("\n"));
        }
    }

    sections
}
