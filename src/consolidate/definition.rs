// Definition parsing and generation
//
// Parses LLM replies shaped as a numbered list with Label / Criteria /
// Category sub-lines. Models deviate constantly: bold markup, trailing
// punctuation, "label:" prefixes inside the label value, quote wrapping,
// Theme for Category, Definition for Criteria, and a literal "..." line when
// the model gives up early. Each tolerated quirk has a unit test below.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::codebook::{merge_into, Code, Codebook};

use super::stage::{ConsolidatorStage, ParseError, Preprocessed};

static ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[.)]\s*(.*)$").unwrap());
static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(label|phrase|code|criteria|definition|category|theme|relationship)\s*:\s*(.*)$")
        .unwrap()
});

/// Which field a sub-line continues. Mirrors the response grammar:
/// `Label | Criteria | Category | Relationship | freeform-continuation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Label,
    Criteria,
    Category,
    Relationship,
}

/// One parsed response item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCode {
    pub label: String,
    pub definitions: Vec<String>,
    pub category: Option<String>,
    pub relationship: Option<String>,
}

/// Strip bold markup, wrapping quotes, stray "label:" prefixes, and trailing
/// punctuation from a label value.
fn clean_label(raw: &str) -> String {
    let mut label = raw.trim().trim_matches('*').trim();
    for prefix in ["label:", "phrase:", "code:"] {
        let matched = label
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if matched {
            label = label[prefix.len()..].trim();
        }
    }
    let label = label
        .trim_matches(|c| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}'))
        .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '!'))
        .trim();
    label.to_string()
}

fn clean_value(raw: &str) -> String {
    raw.trim().trim_matches('*').trim().trim_matches('"').trim().to_string()
}

/// The model's explicit "I gave up" marker.
fn is_truncation(line: &str) -> bool {
    let stripped = line
        .trim()
        .trim_matches(|c| matches!(c, '*' | '"' | '\'' | '[' | ']'));
    stripped == "..." || stripped == "\u{2026}"
}

fn push_field(item: &mut ParsedCode, field: Field, value: String) {
    if value.is_empty() {
        return;
    }
    match field {
        Field::Label => item.label = clean_label(&value),
        Field::Criteria => item.definitions.push(value),
        Field::Category => item.category = Some(clean_label(&value)),
        Field::Relationship => item.relationship = Some(value),
        Field::None => {}
    }
}

fn append_continuation(item: &mut ParsedCode, field: Field, extra: &str) {
    let target = match field {
        Field::Criteria => item.definitions.last_mut(),
        Field::Category => item.category.as_mut(),
        Field::Relationship => item.relationship.as_mut(),
        // Continuations after a bare label are noise.
        Field::Label | Field::None => None,
    };
    if let Some(text) = target {
        text.push(' ');
        text.push_str(extra);
    }
}

/// Parse a numbered-list response. Returns the parsed items and whether a
/// truncation sentinel cut the response short; a truncated response is not
/// an error, the remaining codes simply stay unchanged.
pub fn parse_definitions(lines: &[String]) -> Result<(Vec<ParsedCode>, bool), ParseError> {
    let mut items: Vec<ParsedCode> = Vec::new();
    let mut current: Option<ParsedCode> = None;
    let mut field = Field::None;
    let mut truncated = false;

    for raw in lines {
        let line = raw.replace("**", "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_truncation(line) {
            truncated = true;
            break;
        }

        let (content, starts_item) = match ITEM_RE.captures(line) {
            Some(caps) => (caps.get(2).map_or("", |m| m.as_str()).to_string(), true),
            None => (line.to_string(), false),
        };

        if starts_item {
            if let Some(item) = current.take() {
                items.push(item);
            }
            current = Some(ParsedCode::default());
            field = Field::None;
            if is_truncation(&content) {
                truncated = true;
                current = None;
                break;
            }
        }

        let item = match current.as_mut() {
            Some(item) => item,
            // Preamble before the first numbered item is ignored.
            None => continue,
        };

        match FIELD_RE.captures(&content) {
            Some(caps) => {
                let keyword = caps.get(1).map_or("", |m| m.as_str()).to_lowercase();
                let value = caps.get(2).map_or("", |m| m.as_str());
                field = match keyword.as_str() {
                    "label" | "phrase" | "code" => Field::Label,
                    "criteria" | "definition" => Field::Criteria,
                    "category" | "theme" => Field::Category,
                    _ => Field::Relationship,
                };
                push_field(item, field, clean_value(value));
            }
            None if starts_item => {
                // `1. greeting` with no keyword: the remainder is the label.
                if !content.is_empty() {
                    item.label = clean_label(&content);
                    field = Field::Label;
                }
            }
            None => append_continuation(item, field, line),
        }
    }

    if let Some(item) = current.take() {
        items.push(item);
    }

    for item in &items {
        if item.label.is_empty() {
            return Err(ParseError::MissingSection("Label"));
        }
    }

    Ok((items, truncated))
}

/// Guard against silently reordered responses: a parsed label that matches
/// an input code's label at a different position is fatal for this attempt.
pub fn check_alignment(codes: &[Code], parsed: &[ParsedCode]) -> Result<(), ParseError> {
    for (returned, item) in parsed.iter().enumerate() {
        let key = Codebook::key(&item.label);
        for (expected, code) in codes.iter().enumerate() {
            if Codebook::key(&code.label) == key && expected != returned {
                return Err(ParseError::Reordered {
                    label: item.label.clone(),
                    returned,
                    expected,
                });
            }
        }
    }
    Ok(())
}

/// Apply parsed items positionally: overwrite label, definitions, and
/// category on the matched codes, re-key the codebook where a label changed
/// (the old label becomes an alternative), and clear the transient
/// `old_labels`. Only the first `parsed.len()` codes are touched, so a
/// truncated response leaves the tail unchanged.
pub fn update_codes(codebook: &mut Codebook, codes: &mut [Code], parsed: &[ParsedCode]) {
    for (index, item) in parsed.iter().enumerate() {
        let old = &codes[index];
        let old_key = Codebook::key(&old.label);
        let mut updated = old.clone();

        if !item.label.is_empty() && Codebook::key(&item.label) != old_key {
            let previous = std::mem::replace(&mut updated.label, item.label.clone());
            if !updated.alternatives.iter().any(|a| *a == previous) {
                updated.alternatives.push(previous);
            }
        }
        if !item.definitions.is_empty() {
            updated.definitions = item.definitions.clone();
        }
        if let Some(category) = &item.category {
            updated.categories = vec![category.clone()];
        }
        updated.old_labels.clear();
        let survivor_key = Codebook::key(&updated.label);
        updated
            .alternatives
            .retain(|alternative| Codebook::key(alternative) != survivor_key);

        codebook.remove(&old.label);
        match codebook.get_mut(&updated.label) {
            // A rename collided with a different existing code: fold the
            // update into it instead of silently overwriting.
            Some(existing) => {
                merge_into(existing, &updated);
                existing.old_labels.clear();
                codes[index] = existing.clone();
            }
            None => {
                codebook.insert(updated.clone());
                codes[index] = updated;
            }
        }
    }
}

const GENERATOR_SYSTEM_PROMPT: &str = "\
You are a qualitative researcher maintaining a codebook for an online community's chat archive. \
Each numbered code below has example quotes but no definition yet.

For every item, respond with exactly:
<number>. Label: <the label, unchanged>
Criteria: <one sentence describing when this code applies>
Category: <a short higher-level theme name>

Keep the items in the given order and do not add or drop items. \
If you cannot finish the whole list, output a line containing only \"...\" and stop.";

/// How many example quotes each code contributes to the prompt.
const PROMPT_EXAMPLES: usize = 5;

/// Terminal, no-clustering stage: ask the model to invent a definition and a
/// category for every code that has neither.
pub struct DefinitionGenerator {
    stopping: bool,
}

impl DefinitionGenerator {
    pub fn new() -> Self {
        Self { stopping: false }
    }
}

impl Default for DefinitionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsolidatorStage for DefinitionGenerator {
    fn name(&self) -> &str {
        "definition-generator"
    }

    fn stopping(&self) -> bool {
        self.stopping
    }

    fn chunked(&self) -> bool {
        true
    }

    fn subunit_filter(&self, code: &Code) -> bool {
        code.definitions.is_empty()
    }

    async fn preprocess(
        &mut self,
        _codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed> {
        self.stopping = candidates.is_empty();
        Ok(Preprocessed::Candidates(candidates))
    }

    fn build_prompts(&self, _codebook: &Codebook, codes: &[Code]) -> (String, String) {
        let mut user = String::new();
        for (index, code) in codes.iter().enumerate() {
            user.push_str(&format!("{}. {}\n", index + 1, code.label));
            for example in code.best_examples(PROMPT_EXAMPLES) {
                let (_, quote) = crate::codebook::split_example(example);
                user.push_str(&format!("- {}\n", quote));
            }
        }
        (GENERATOR_SYSTEM_PROMPT.to_string(), user)
    }

    fn parse_response(
        &mut self,
        codebook: &mut Codebook,
        codes: &mut [Code],
        lines: &[String],
    ) -> Result<i64, ParseError> {
        let (parsed, truncated) = parse_definitions(lines)?;
        if !truncated && parsed.len() != codes.len() {
            return Err(ParseError::CountMismatch {
                expected: codes.len(),
                actual: parsed.len(),
            });
        }
        if truncated && parsed.len() > codes.len() {
            return Err(ParseError::CountMismatch {
                expected: codes.len(),
                actual: parsed.len(),
            });
        }
        check_alignment(codes, &parsed)?;
        update_codes(codebook, codes, &parsed);
        if truncated {
            debug!(parsed = parsed.len(), expected = codes.len(), "response truncated");
        }
        Ok(parsed.len() as i64 - codes.len() as i64)
    }
}
