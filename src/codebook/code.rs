// Code and Codebook types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator between the source ID and the quoted message in an encoded
/// example. Chosen so provenance survives merges; spreadsheet export rewrites
/// it to `": "` and import restores it.
pub const EXAMPLE_SEPARATOR: &str = "|||";

/// A single qualitative tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    /// Canonical name. Codebook keys are the lower-cased label.
    pub label: String,

    /// Explanatory sentences. More than one means an unresolved merge that
    /// still awaits LLM synthesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<String>,

    /// Higher-level theme names this code belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    /// Evidentiary quotes, each encoded as `"<sourceID>|||<speaker>: <text>"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,

    /// Labels absorbed into this code during merges. Never contains `label`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,

    /// Labels contributed by a just-completed cluster merge. Consumed by the
    /// next LLM refinement round and then cleared; never persisted.
    #[serde(skip)]
    pub old_labels: Vec<String>,
}

impl Code {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// First definition, if any. Used for embedding text and representative
    /// election.
    pub fn first_definition(&self) -> Option<&str> {
        self.definitions.first().map(|d| d.as_str())
    }

    /// Pick up to `limit` examples for an LLM prompt, scored by
    /// length x occurrence count so long, repeatedly-quoted messages win.
    pub fn best_examples(&self, limit: usize) -> Vec<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for example in &self.examples {
            *counts.entry(example.as_str()).or_insert(0) += 1;
        }
        let mut scored: Vec<(&str, usize)> = counts
            .into_iter()
            .map(|(text, count)| (text, text.len() * count))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.into_iter().take(limit).map(|(text, _)| text).collect()
    }

    /// Text serialized for the embedding service: label, plus the first
    /// definition and absorbed labels when requested.
    pub fn embedding_text(&self, use_definition: bool) -> String {
        let mut parts = vec![self.label.clone()];
        if use_definition {
            if let Some(definition) = self.first_definition() {
                parts.push(definition.to_string());
            }
            parts.extend(self.alternatives.iter().cloned());
        }
        parts.join(": ")
    }
}

/// Encode an evidentiary quote with its provenance.
pub fn encode_example(source_id: &str, speaker: &str, text: &str) -> String {
    format!("{source_id}{EXAMPLE_SEPARATOR}{speaker}: {text}")
}

/// Split an encoded example into (source ID, quote). Examples that were never
/// encoded come back with an empty source.
pub fn split_example(example: &str) -> (&str, &str) {
    match example.split_once(EXAMPLE_SEPARATOR) {
        Some((source, quote)) => (source, quote),
        None => ("", example),
    }
}

/// The full set of codes for one coding pass, keyed by lower-cased label.
///
/// `BTreeMap` keeps iteration deterministic, which prompt construction and
/// the positional-alignment guard in the response parser rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Codebook {
    codes: BTreeMap<String, Code>,
}

impl Codebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalized map key for a label.
    pub fn key(label: &str) -> String {
        label.trim().to_lowercase()
    }

    /// Insert a code, returning the previous entry under the same key.
    pub fn insert(&mut self, code: Code) -> Option<Code> {
        self.codes.insert(Self::key(&code.label), code)
    }

    pub fn get(&self, label: &str) -> Option<&Code> {
        self.codes.get(&Self::key(label))
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Code> {
        self.codes.get_mut(&Self::key(label))
    }

    pub fn remove(&mut self, label: &str) -> Option<Code> {
        self.codes.remove(&Self::key(label))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.codes.contains_key(&Self::key(label))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = &Code> + '_ {
        self.codes.values()
    }

    pub fn codes_mut(&mut self) -> impl Iterator<Item = &mut Code> + '_ {
        self.codes.values_mut()
    }

    pub fn into_codes(self) -> impl Iterator<Item = Code> {
        self.codes.into_values()
    }

    /// Every distinct category name across the book, in key order.
    pub fn category_names(&self) -> Vec<String> {
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        for code in self.codes.values() {
            for category in &code.categories {
                names
                    .entry(Self::key(category))
                    .or_insert_with(|| category.clone());
            }
        }
        names.into_values().collect()
    }
}

impl FromIterator<Code> for Codebook {
    fn from_iter<I: IntoIterator<Item = Code>>(iter: I) -> Self {
        let mut book = Codebook::new();
        for code in iter {
            book.insert(code);
        }
        book
    }
}
