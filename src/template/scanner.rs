//! Placeholder scanning.

use crate::types::JobHandle;
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@@(.*?)@@").expect("placeholder pattern is valid"));

/// Distinct parameter names referenced by the definitions, sorted, all unbound.
///
/// Matching is line by line, so a marker never spans lines; an unterminated
/// `@@` is simply not a match. Empty tokens (`@@@@`) are skipped.
pub fn scan<'a, I>(definitions: I) -> BTreeMap<String, Option<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parameters = BTreeMap::new();
    for definition in definitions {
        for line in definition.lines() {
            for caps in PLACEHOLDER.captures_iter(line) {
                let token = &caps[1];
                if !token.is_empty() {
                    parameters.insert(token.to_string(), None);
                }
            }
        }
    }
    parameters
}

/// Scan the definitions of a resolved template.
pub fn scan_jobs(jobs: &[JobHandle]) -> BTreeMap<String, Option<String>> {
    scan(jobs.iter().map(|job| job.definition.as_str()))
}
