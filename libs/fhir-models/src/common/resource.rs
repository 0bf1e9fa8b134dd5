//! Generic FHIR resource wrapper with reference navigation
//!
//! Reference fields are addressed with dotted element paths. A segment
//! suffixed with `[]` marks a repeating element, e.g. `participant[].individual`
//! or `hasMember[]`. Repeating elements are also traversed when the marker is
//! omitted; the marker only matters when a whole array element has to be
//! dropped (see [`StripMode::Container`]).

use super::error::{Error, Result};
use super::reference::ResourceRef;
use serde_json::{Map, Value};

/// A FHIR resource as fetched from a source system.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirResource {
    pub resource_type: String,
    pub id: String,
    pub raw: Value,
}

/// How an unsatisfiable reference is removed from its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripMode {
    /// Delete only the element holding the reference.
    Field,
    /// Delete the enclosing repeating element (e.g. a whole `performer` entry).
    Container,
}

#[derive(Debug, Clone)]
struct PathSegment {
    name: String,
    repeating: bool,
}

fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_suffix("[]") {
            Some(name) => PathSegment {
                name: name.to_string(),
                repeating: true,
            },
            None => PathSegment {
                name: s.to_string(),
                repeating: false,
            },
        })
        .collect()
}

impl FhirResource {
    /// Wrap a JSON resource. Both `resourceType` and `id` are required.
    pub fn from_value(raw: Value) -> Result<Self> {
        let resource_type = raw
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingField("resourceType".to_string()))?
            .to_string();
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MissingField(format!("{resource_type}.id")))?
            .to_string();
        Ok(Self {
            resource_type,
            id,
            raw,
        })
    }

    pub fn key(&self) -> ResourceRef {
        ResourceRef::new(&self.resource_type, &self.id)
    }

    pub fn into_value(self) -> Value {
        self.raw
    }

    /// Literal references found at `path`, de-duplicated, in document order.
    pub fn references_at(&self, path: &str) -> Vec<ResourceRef> {
        let segments = parse_path(path);
        let mut out = Vec::new();
        collect_at(&self.raw, &segments, &mut out);
        let mut seen = std::collections::HashSet::new();
        out.retain(|r| seen.insert(r.clone()));
        out
    }

    /// Every literal reference anywhere in the resource.
    pub fn all_references(&self) -> Vec<ResourceRef> {
        let mut out = Vec::new();
        visit_references(&self.raw, &mut |raw| {
            if let Some(r) = ResourceRef::parse(raw) {
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        });
        out
    }

    /// Remove references at `path` that point to `target`.
    ///
    /// Returns the number of removed occurrences. Arrays and objects left
    /// empty by the removal are dropped as well.
    pub fn strip_reference(&mut self, path: &str, target: &ResourceRef, mode: StripMode) -> usize {
        let segments = parse_path(path);
        let Value::Object(map) = &mut self.raw else {
            return 0;
        };
        strip_in_object(map, &segments, mode, &|r| r == target)
    }

    /// Remove every reference (at any path) for which `predicate` holds.
    pub fn strip_references_where(&mut self, predicate: impl Fn(&ResourceRef) -> bool) -> usize {
        strip_anywhere(&mut self.raw, &predicate)
    }

    /// Point references at `path` that target `from` to `to` instead.
    pub fn rewrite_reference(&mut self, path: &str, from: &ResourceRef, to: &ResourceRef) -> usize {
        let segments = parse_path(path);
        let mut count = 0;
        rewrite_at(&mut self.raw, &segments, &mut |raw| {
            if ResourceRef::parse(raw).as_ref() == Some(from) {
                count += 1;
                Some(to.key())
            } else {
                None
            }
        });
        count
    }
}

fn reference_of(value: &Value) -> Option<ResourceRef> {
    value
        .get("reference")
        .and_then(Value::as_str)
        .and_then(ResourceRef::parse)
}

fn collect_at(value: &Value, segments: &[PathSegment], out: &mut Vec<ResourceRef>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_at(item, segments, out);
            }
        }
        Value::Object(map) => match segments.split_first() {
            None => out.extend(reference_of(value)),
            Some((first, rest)) => {
                if let Some(child) = map.get(&first.name) {
                    collect_at(child, rest, out);
                }
            }
        },
        _ => {}
    }
}

fn contains_matching(value: &Value, segments: &[PathSegment], predicate: &dyn Fn(&ResourceRef) -> bool) -> bool {
    let mut found = Vec::new();
    collect_at(value, segments, &mut found);
    found.iter().any(predicate)
}

fn strip_in_object(
    map: &mut Map<String, Value>,
    segments: &[PathSegment],
    mode: StripMode,
    predicate: &dyn Fn(&ResourceRef) -> bool,
) -> usize {
    let Some((first, rest)) = segments.split_first() else {
        return 0;
    };
    let Some(child) = map.get_mut(&first.name) else {
        return 0;
    };

    let removed = match child {
        Value::Array(items) => {
            let before = items.len();
            if rest.is_empty() || (first.repeating && mode == StripMode::Container) {
                items.retain(|item| !contains_matching(item, rest, predicate));
                before - items.len()
            } else {
                let removed = items
                    .iter_mut()
                    .filter_map(|item| item.as_object_mut())
                    .map(|obj| strip_in_object(obj, rest, mode, predicate))
                    .sum();
                if removed > 0 {
                    items.retain(|item| !matches!(item, Value::Object(o) if o.is_empty()));
                }
                removed
            }
        }
        Value::Object(obj) if rest.is_empty() => {
            let hit = obj
                .get("reference")
                .and_then(Value::as_str)
                .and_then(ResourceRef::parse)
                .is_some_and(|r| predicate(&r));
            if hit {
                map.remove(&first.name);
                return 1;
            }
            0
        }
        Value::Object(obj) => strip_in_object(obj, rest, mode, predicate),
        _ => 0,
    };

    if removed > 0 && is_empty_container(map.get(&first.name)) {
        map.remove(&first.name);
    }
    removed
}

fn strip_anywhere(value: &mut Value, predicate: &dyn Fn(&ResourceRef) -> bool) -> usize {
    match value {
        Value::Object(map) => {
            let mut removed = 0;
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let Some(child) = map.get_mut(&key) else {
                    continue;
                };
                if reference_of(child).as_ref().is_some_and(|r| predicate(r)) {
                    map.remove(&key);
                    removed += 1;
                    continue;
                }
                let nested = strip_anywhere(child, predicate);
                if nested > 0 && is_empty_container(map.get(&key)) {
                    map.remove(&key);
                }
                removed += nested;
            }
            removed
        }
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !reference_of(item).as_ref().is_some_and(|r| predicate(r)));
            let mut removed = before - items.len();
            for item in items.iter_mut() {
                removed += strip_anywhere(item, predicate);
            }
            removed
        }
        _ => 0,
    }
}

fn is_empty_container(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

fn rewrite_at(value: &mut Value, segments: &[PathSegment], f: &mut dyn FnMut(&str) -> Option<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                rewrite_at(item, segments, f);
            }
        }
        Value::Object(map) => match segments.split_first() {
            None => {
                if let Some(Value::String(raw)) = map.get_mut("reference") {
                    if let Some(replacement) = f(raw) {
                        *raw = replacement;
                    }
                }
            }
            Some((first, rest)) => {
                if let Some(child) = map.get_mut(&first.name) {
                    rewrite_at(child, rest, f);
                }
            }
        },
        _ => {}
    }
}

/// Call `f` with every `reference` string in `value`.
pub fn visit_references(value: &Value, f: &mut dyn FnMut(&str)) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                match (k.as_str(), v) {
                    ("reference", Value::String(raw)) => f(raw),
                    _ => visit_references(v, f),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                visit_references(item, f);
            }
        }
        _ => {}
    }
}

/// Replace every `reference` string in `value` for which `f` returns a value.
pub fn rewrite_references(value: &mut Value, f: &mut dyn FnMut(&str) -> Option<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                match v {
                    Value::String(raw) if k == "reference" => {
                        if let Some(replacement) = f(raw) {
                            *raw = replacement;
                        }
                    }
                    _ => rewrite_references(v, f),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, f);
            }
        }
        _ => {}
    }
}
