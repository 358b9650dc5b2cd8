//! The public copy view: a cache-friendly, no-index HTML page with the
//! script split into sections and a client-side copy action.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};

use scriptflow_common::validate::is_valid_public_id;
use scriptflow_common::ScriptSections;
use scriptflow_store::ScriptRepo;

use crate::AppState;

/// Escape user-derived text for HTML contexts.
pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn section_html(label: &str, text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    format!(
        r#"<section><h2>{label}</h2><p>{}</p></section>"#,
        html_escape(text).replace('\n', "<br>")
    )
}

/// Build the full copy-view document.
pub fn build_view_page(sections: &ScriptSections, script_text: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex, nofollow">
<title>Your script</title>
<style>
*{{margin:0;padding:0;box-sizing:border-box;}}
body{{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,sans-serif;color:#1a1a1a;background:#fafafa;}}
.container{{max-width:640px;margin:0 auto;padding:24px;}}
section{{background:#fff;border:1px solid #e0e0e0;border-radius:8px;padding:16px;margin-bottom:12px;}}
h2{{font-size:13px;text-transform:uppercase;letter-spacing:.08em;color:#888;margin-bottom:8px;}}
p{{font-size:16px;line-height:1.5;white-space:pre-wrap;}}
.copy-btn{{display:block;width:100%;padding:12px;background:#1a1a1a;color:#fff;border:0;border-radius:8px;font-size:15px;font-weight:600;cursor:pointer;}}
.copy-btn:active{{background:#444;}}
</style>
</head>
<body>
<div class="container">
{hook}{body}{cta}
<button class="copy-btn" onclick="copyScript()">Copy script</button>
<textarea id="raw" style="position:absolute;left:-9999px">{raw}</textarea>
</div>
<script>
function copyScript() {{
  var raw = document.getElementById('raw');
  raw.select();
  document.execCommand('copy');
  var btn = document.querySelector('.copy-btn');
  btn.textContent = 'Copied!';
  setTimeout(function() {{ btn.textContent = 'Copy script'; }}, 1500);
}}
</script>
</body>
</html>"#,
        hook = section_html("Hook", &sections.hook),
        body = section_html("Body", &sections.body),
        cta = section_html("CTA", &sections.cta),
        raw = html_escape(script_text),
    )
}

const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><meta name="robots" content="noindex, nofollow">
<title>Not found</title></head>
<body><p>This script link doesn't exist or has expired.</p></body></html>"#;

pub async fn view_script(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
) -> Response {
    state
        .telemetry
        .requests_total
        .with_label_values(&["view"])
        .inc();

    if !is_valid_public_id(&public_id) {
        return (StatusCode::BAD_REQUEST, Html(NOT_FOUND_PAGE)).into_response();
    }

    match state.store.find_by_public_id(&public_id).await {
        Ok(Some(script)) => {
            let sections = ScriptSections::parse(&script.script_text);
            let page = build_view_page(&sections, &script.script_text);
            (
                StatusCode::OK,
                [
                    (header::CACHE_CONTROL, "public, max-age=3600"),
                    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                    (header::HeaderName::from_static("x-robots-tag"), "noindex, nofollow"),
                ],
                Html(page),
            )
                .into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Script lookup failed");
            (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_markup_characters() {
        assert_eq!(
            html_escape(r#"<script>alert("x&y')</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn page_escapes_user_text() {
        let sections = ScriptSections::new("<b>hook</b>", "body & soul", "cta");
        let page = build_view_page(&sections, "<b>hook</b>\nbody & soul");
        assert!(!page.contains("<b>hook</b>"));
        assert!(page.contains("&lt;b&gt;hook&lt;/b&gt;"));
        assert!(page.contains("body &amp; soul"));
    }

    #[test]
    fn page_has_noindex_and_sections() {
        let sections = ScriptSections::new("Hook line", "Body line", "CTA line");
        let page = build_view_page(&sections, "raw");
        assert!(page.contains(r#"content="noindex, nofollow""#));
        assert!(page.contains("Hook line"));
        assert!(page.contains("CTA line"));
        assert!(page.contains("copyScript"));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let sections = ScriptSections::new("Hook only", "", "");
        let page = build_view_page(&sections, "Hook only");
        assert!(!page.contains("<h2>Body</h2>"));
        assert!(!page.contains("<h2>CTA</h2>"));
    }
}
