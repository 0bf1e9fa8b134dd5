//! Composition section finalization
//!
//! After references have been rewritten, every section's `entry[]` is made
//! unique by reference and overlapping sections are made mutually exclusive:
//! a reference claimed by a higher-priority section is removed from the
//! lower-priority one. Sections left without entries get an `emptyReason`.

use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashSet;

pub const LOINC: &str = "http://loinc.org";
pub const PROBLEMS_SECTION: &str = "11450-4";
pub const PAST_ILLNESS_SECTION: &str = "11348-0";

/// `(higher priority, lower priority)` section codes sharing candidates
const EXCLUSIVE_SECTIONS: &[(&str, &str)] = &[(PROBLEMS_SECTION, PAST_ILLNESS_SECTION)];

const LIST_EMPTY_REASON: &str = "http://terminology.hl7.org/CodeSystem/list-empty-reason";

/// Finalize the sections of a Composition in place.
pub fn finalize_sections(composition: &mut JsonValue) {
    let Some(sections) = composition
        .get_mut("section")
        .and_then(JsonValue::as_array_mut)
    else {
        return;
    };

    for section in sections.iter_mut() {
        dedupe_entries(section);
    }

    for (winner, loser) in EXCLUSIVE_SECTIONS {
        let claimed: HashSet<String> = sections
            .iter()
            .filter(|s| section_code(s) == Some(*winner))
            .flat_map(entry_references)
            .collect();
        if claimed.is_empty() {
            continue;
        }

        for section in sections
            .iter_mut()
            .filter(|s| section_code(s) == Some(*loser))
        {
            let removed = retain_entries(section, |reference| !claimed.contains(reference));
            if removed > 0 {
                tracing::debug!(section = *loser, claimed_by = *winner, removed, "Removed entries claimed by another section");
            }
        }
    }
}

/// LOINC code of a section
pub fn section_code(section: &JsonValue) -> Option<&str> {
    section
        .get("code")?
        .get("coding")?
        .as_array()?
        .iter()
        .find(|c| c.get("system").and_then(JsonValue::as_str) == Some(LOINC))
        .and_then(|c| c.get("code"))
        .and_then(JsonValue::as_str)
}

/// Reference strings of a section's entries, in order
pub fn entry_references(section: &JsonValue) -> Vec<String> {
    section
        .get("entry")
        .and_then(JsonValue::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("reference").and_then(JsonValue::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn dedupe_entries(section: &mut JsonValue) {
    let mut seen = HashSet::new();
    retain_entries(section, |reference| seen.insert(reference.to_string()));
}

/// Keep entries whose reference satisfies `keep`; returns how many were dropped.
fn retain_entries(section: &mut JsonValue, mut keep: impl FnMut(&str) -> bool) -> usize {
    let Some(map) = section.as_object_mut() else {
        return 0;
    };
    let Some(entries) = map.get_mut("entry").and_then(JsonValue::as_array_mut) else {
        return 0;
    };

    let before = entries.len();
    entries.retain(|e| match e.get("reference").and_then(JsonValue::as_str) {
        Some(reference) => keep(reference),
        None => true,
    });
    let removed = before - entries.len();

    if removed > 0 && entries.is_empty() {
        mark_empty(map);
    }
    removed
}

fn mark_empty(section: &mut Map<String, JsonValue>) {
    section.remove("entry");
    section.insert(
        "emptyReason".to_string(),
        json!({
            "coding": [{
                "system": LIST_EMPTY_REASON,
                "code": "unavailable",
                "display": "Unavailable"
            }]
        }),
    );
}
