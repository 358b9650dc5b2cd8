//! Prior-script retrieval: context that steers the generator away from
//! repeating itself and toward the reel's working style.

use scriptflow_common::{normalize_idea, ScriptRecord, ScriptSections};

const SUMMARY_LINE_MAX: usize = 80;
const STYLE_BODY_MAX: usize = 1_500;

#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    /// Compressed summaries of scripts generated for the *same* idea, so a
    /// new variation avoids repeating their angle.
    pub same_idea_summaries: Vec<String>,
    /// Full bodies of scripts for *other* ideas on this reel, as style
    /// context.
    pub other_idea_bodies: Vec<String>,
}

impl PriorContext {
    pub fn is_empty(&self) -> bool {
        self.same_idea_summaries.is_empty() && self.other_idea_bodies.is_empty()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Partition up to 5 prior scripts for a reel by idea identity.
pub fn partition_prior_scripts(scripts: &[ScriptRecord], idea: &str) -> PriorContext {
    let target = normalize_idea(idea);
    let mut context = PriorContext::default();

    for script in scripts {
        if normalize_idea(&script.user_idea) == target {
            let sections = ScriptSections::parse(&script.script_text);
            let hook = sections.hook_line().unwrap_or_default();
            let body = sections.body_line().unwrap_or_default();
            context.same_idea_summaries.push(format!(
                "hook: {} / body: {}",
                truncate(hook, SUMMARY_LINE_MAX),
                truncate(body, SUMMARY_LINE_MAX)
            ));
        } else {
            context
                .other_idea_bodies
                .push(truncate(&script.script_text, STYLE_BODY_MAX));
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scriptflow_common::GenerationMode;
    use uuid::Uuid;

    fn script(idea: &str, text: &str) -> ScriptRecord {
        ScriptRecord {
            id: Uuid::new_v4(),
            request_hash: Uuid::new_v4().to_string(),
            public_id: "abcdef".to_string(),
            subscriber_id: "12345".to_string(),
            reel_url: "https://u/reel/A".to_string(),
            reel_hash: "rh".to_string(),
            user_idea: idea.to_string(),
            variation_index: 0,
            mode: GenerationMode::Full,
            script_text: text.to_string(),
            image_urls: vec![],
            script_url: None,
            generator_version: "test".to_string(),
            generation_ms: 0,
            quality_score: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn same_idea_scripts_become_summaries() {
        let scripts = vec![script(
            "coding tips",
            "[HOOK]\nStop writing bad code.\n\n[BODY]\nHere is the fix.\n\n[CTA]\nFollow.",
        )];
        let context = partition_prior_scripts(&scripts, "Coding Tips");
        assert_eq!(context.same_idea_summaries.len(), 1);
        assert!(context.same_idea_summaries[0].contains("Stop writing bad code."));
        assert!(context.same_idea_summaries[0].contains("Here is the fix."));
        assert!(context.other_idea_bodies.is_empty());
    }

    #[test]
    fn different_ideas_contribute_full_bodies() {
        let scripts = vec![
            script("coding tips", "[HOOK]\nA\n\n[BODY]\nB\n\n[CTA]\nC"),
            script("fitness", "[HOOK]\nX\n\n[BODY]\nY\n\n[CTA]\nZ"),
        ];
        let context = partition_prior_scripts(&scripts, "coding tips");
        assert_eq!(context.same_idea_summaries.len(), 1);
        assert_eq!(context.other_idea_bodies.len(), 1);
        assert!(context.other_idea_bodies[0].contains("[BODY]\nY"));
    }

    #[test]
    fn summary_lines_are_truncated() {
        let long_hook = "h".repeat(200);
        let text = format!("[HOOK]\n{long_hook}\n\n[BODY]\nshort\n\n[CTA]\nend");
        let scripts = vec![script("idea", &text)];
        let context = partition_prior_scripts(&scripts, "idea");
        let summary = &context.same_idea_summaries[0];
        assert!(summary.chars().count() < 200);
        assert!(summary.contains('…'));
    }
}
