//! Rewriting a job definition for one workflow instance.
//!
//! For every (original, new) job-name pair, in mapping order:
//!
//! 1. `>  original  </`  becomes `>new</`      (whole element body)
//! 2. `,  original`      becomes `,new`        (list entry after a comma)
//! 3. `original  ,`      becomes `new,`        (list entry before a comma)
//!
//! List matches must end (rule 2) or start (rule 3) on a job-name boundary, so a
//! name that is only a prefix or suffix of a longer token is left alone.
//! Parameter placeholders are replaced last, so bound values are never remapped.

use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{JobMapping, ParameterMap};
use regex_lite::{NoExpand, Regex};

/// Characters that may continue a job name.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Escape a parameter value for XML-bearing text.
pub fn escape_value(value: &str) -> String {
    value.replace('&', "&amp;")
}

#[derive(Clone, Copy)]
enum Boundary {
    /// The character after the match must not continue a name.
    After,
    /// The character before the match must not continue a name.
    Before,
}

struct NameRule {
    element: Regex,
    after_comma: Regex,
    before_comma: Regex,
    element_replacement: String,
    after_comma_replacement: String,
    before_comma_replacement: String,
}

impl NameRule {
    fn new(original: &str, replacement: &str) -> WorkflowResult<Self> {
        let quoted = regex_lite::escape(original);
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| {
                WorkflowError::validation(
                    format!("template.{}", original),
                    format!("Cannot match job name '{}': {}", original, e),
                )
            })
        };
        Ok(Self {
            element: compile(format!(r">\s*{}\s*</", quoted))?,
            after_comma: compile(format!(r",\s*{}", quoted))?,
            before_comma: compile(format!(r"{}\s*,", quoted))?,
            element_replacement: format!(">{}</", replacement),
            after_comma_replacement: format!(",{}", replacement),
            before_comma_replacement: format!("{},", replacement),
        })
    }

    fn apply(&self, text: &str) -> String {
        let text = self
            .element
            .replace_all(text, NoExpand(&self.element_replacement))
            .into_owned();
        let text = replace_bounded(
            &text,
            &self.after_comma,
            &self.after_comma_replacement,
            Boundary::After,
        );
        replace_bounded(
            &text,
            &self.before_comma,
            &self.before_comma_replacement,
            Boundary::Before,
        )
    }
}

fn replace_bounded(text: &str, re: &Regex, replacement: &str, boundary: Boundary) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re.find_iter(text) {
        let bounded = match boundary {
            Boundary::After => !text[m.end()..].chars().next().is_some_and(is_name_char),
            Boundary::Before => !text[..m.start()]
                .chars()
                .next_back()
                .is_some_and(is_name_char),
        };
        if bounded {
            out.push_str(&text[last..m.start()]);
            out.push_str(replacement);
            last = m.end();
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Compiled rewrite for one instance, reused across all of its job definitions.
pub struct Substitution {
    rules: Vec<NameRule>,
    parameters: Vec<(String, String)>,
}

impl Substitution {
    /// Blank parameter values are substituted as-is; callers validate them first.
    pub fn new(job_mapping: &JobMapping, parameters: &ParameterMap) -> WorkflowResult<Self> {
        let rules = job_mapping
            .iter()
            .filter(|(original, _)| !original.is_empty())
            .map(|(original, replacement)| NameRule::new(original, replacement))
            .collect::<WorkflowResult<Vec<_>>>()?;
        let parameters = parameters
            .iter()
            .map(|(key, value)| (format!("@@{}@@", key), escape_value(value)))
            .collect();
        Ok(Self { rules, parameters })
    }

    pub fn apply(&self, definition: &str) -> String {
        let mut text = definition.to_string();
        for rule in &self.rules {
            text = rule.apply(&text);
        }
        for (placeholder, value) in &self.parameters {
            text = text.replace(placeholder.as_str(), value);
        }
        text
    }
}
