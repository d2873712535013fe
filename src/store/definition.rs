//! Conventions the host applies to serialized job definitions.
//!
//! A template source job carries its membership marker inside its definition:
//!
//! ```xml
//! <templateWorkflowProperty>
//!   <templateName>nightly, release</templateName>
//!   <startingWorkflowJob>true</startingWorkflowJob>
//! </templateWorkflowProperty>
//! ```
//!
//! and `<disabled>true</disabled>` controls the enabled flag when the host loads a
//! definition.

use crate::types::TemplateMarker;

/// Element wrapping the membership marker.
pub const MARKER_ELEMENT: &str = "templateWorkflowProperty";

/// Byte range of the first `<tag>...</tag>` element and of its body.
fn element_span(text: &str, tag: &str) -> Option<(usize, usize, usize, usize)> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)?;
    let body_start = start + open.len();
    let body_end = body_start + text[body_start..].find(&close)?;
    Some((start, body_start, body_end, body_end + close.len()))
}

/// Trimmed text body of the first `<tag>` element.
fn element_text<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    element_span(text, tag).map(|(_, body_start, body_end, _)| text[body_start..body_end].trim())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the membership marker, if the definition has one.
pub fn extract_marker(definition: &str) -> Option<TemplateMarker> {
    let (_, body_start, body_end, _) = element_span(definition, MARKER_ELEMENT)?;
    let body = &definition[body_start..body_end];
    let template_names = element_text(body, "templateName").map(unescape)?;
    let starting_job = element_text(body, "startingWorkflowJob")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    Some(TemplateMarker {
        template_names,
        starting_job,
    })
}

/// Definition with the marker element (and its line) removed, or `None` when absent.
pub fn strip_marker(definition: &str) -> Option<String> {
    let (mut start, _, _, mut end) = element_span(definition, MARKER_ELEMENT)?;
    let bytes = definition.as_bytes();

    while start > 0 && matches!(bytes[start - 1], b' ' | b'\t') {
        start -= 1;
    }
    while end < bytes.len() && matches!(bytes[end], b' ' | b'\t' | b'\r') {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'\n' {
        end += 1;
    }

    let mut stripped = String::with_capacity(definition.len());
    stripped.push_str(&definition[..start]);
    stripped.push_str(&definition[end..]);
    Some(stripped)
}

/// Enabled flag implied by a `<disabled>` element, if present.
pub fn enabled_flag(definition: &str) -> Option<bool> {
    element_text(definition, "disabled").map(|v| !v.eq_ignore_ascii_case("true"))
}

/// Render a marker element, as a template author would embed it.
pub fn marker_element(marker: &TemplateMarker) -> String {
    format!(
        "<{tag}><templateName>{names}</templateName><startingWorkflowJob>{starting}</startingWorkflowJob></{tag}>",
        tag = MARKER_ELEMENT,
        names = marker.template_names.replace('&', "&amp;"),
        starting = marker.starting_job,
    )
}
