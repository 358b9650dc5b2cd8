//! The canonical `[HOOK]/[BODY]/[CTA]` script layout.
//!
//! Scripts are stored as a single text blob in this layout; the copy view,
//! the card renderer, and copy mode all parse or emit it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSections {
    pub hook: String,
    pub body: String,
    pub cta: String,
}

impl ScriptSections {
    pub fn new(hook: impl Into<String>, body: impl Into<String>, cta: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            body: body.into(),
            cta: cta.into(),
        }
    }

    /// Render the canonical layout.
    pub fn to_script_text(&self) -> String {
        format!(
            "[HOOK]\n{}\n\n[BODY]\n{}\n\n[CTA]\n{}",
            self.hook.trim(),
            self.body.trim(),
            self.cta.trim()
        )
    }

    /// Parse a script blob back into sections. Text before the first marker
    /// is folded into the body so nothing is lost.
    pub fn parse(text: &str) -> Self {
        #[derive(Clone, Copy)]
        enum Cursor {
            Preamble,
            Hook,
            Body,
            Cta,
        }

        let mut hook = String::new();
        let mut body = String::new();
        let mut cta = String::new();
        let mut preamble = String::new();
        let mut cursor = Cursor::Preamble;

        for line in text.lines() {
            match line.trim() {
                "[HOOK]" => cursor = Cursor::Hook,
                "[BODY]" => cursor = Cursor::Body,
                "[CTA]" => cursor = Cursor::Cta,
                _ => {
                    let target = match cursor {
                        Cursor::Preamble => &mut preamble,
                        Cursor::Hook => &mut hook,
                        Cursor::Body => &mut body,
                        Cursor::Cta => &mut cta,
                    };
                    if !target.is_empty() {
                        target.push('\n');
                    }
                    target.push_str(line);
                }
            }
        }

        let preamble = preamble.trim().to_string();
        if !preamble.is_empty() {
            body = if body.is_empty() {
                preamble
            } else {
                format!("{preamble}\n{body}")
            };
        }

        Self {
            hook: hook.trim().to_string(),
            body: body.trim().to_string(),
            cta: cta.trim().to_string(),
        }
    }

    /// First non-empty line of the hook, used for prior-script summaries.
    pub fn hook_line(&self) -> Option<&str> {
        self.hook.lines().find(|l| !l.trim().is_empty())
    }

    /// First non-empty line of the body.
    pub fn body_line(&self) -> Option<&str> {
        self.body.lines().find(|l| !l.trim().is_empty())
    }
}
