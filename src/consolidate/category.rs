// Category mergers
//
// The same clustering merge applied one level up, to category-name strings.
// CategoryNameMerger rewrites categories silently; CategoryMerger adds an
// LLM round that renames each merged category given its member codes.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::codebook::{Code, Codebook};

use super::cluster_merge::ClusterMerge;
use super::definition::{check_alignment, parse_definitions};
use super::stage::{ConsolidatorStage, ParseError, Preprocessed};

/// Distinct category names across a candidate list, in first-seen order.
fn collect_names(candidates: &[Code]) -> Vec<String> {
    let mut seen: BTreeMap<String, ()> = BTreeMap::new();
    let mut names = Vec::new();
    for code in candidates {
        for category in &code.categories {
            if seen.insert(Codebook::key(category), ()).is_none() {
                names.push(category.clone());
            }
        }
    }
    names
}

/// Rewrite one category name across the whole book.
fn rename_category(codebook: &mut Codebook, from: &str, to: &str) {
    let from_key = Codebook::key(from);
    for code in codebook.codes_mut() {
        let mut renamed: Vec<String> = Vec::new();
        for category in &code.categories {
            let name = if Codebook::key(category) == from_key {
                to.to_string()
            } else {
                category.clone()
            };
            if !renamed.iter().any(|existing| *existing == name) {
                renamed.push(name);
            }
        }
        code.categories = renamed;
    }
}

pub struct CategoryNameMerger {
    merge: ClusterMerge,
    stopping: bool,
}

impl CategoryNameMerger {
    pub fn new(merge: ClusterMerge) -> Self {
        Self {
            merge,
            stopping: false,
        }
    }
}

#[async_trait]
impl ConsolidatorStage for CategoryNameMerger {
    fn name(&self) -> &str {
        "category-name-merger"
    }

    fn looping(&self) -> bool {
        true
    }

    fn stopping(&self) -> bool {
        self.stopping
    }

    fn subunit_filter(&self, code: &Code) -> bool {
        !code.categories.is_empty()
    }

    async fn preprocess(
        &mut self,
        codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed> {
        let names = collect_names(&candidates);
        if names.len() < 2 {
            self.stopping = true;
            return Ok(Preprocessed::Candidates(Vec::new()));
        }

        let rename = self.merge.merge_categories(&names).await?;
        self.stopping = rename.is_empty();
        // Category names span the whole book, so the rewrite does too.
        rename.apply(codebook);
        Ok(Preprocessed::Replaced)
    }

    fn build_prompts(&self, _codebook: &Codebook, _codes: &[Code]) -> (String, String) {
        (String::new(), String::new())
    }

    fn parse_response(
        &mut self,
        _codebook: &mut Codebook,
        _codes: &mut [Code],
        _lines: &[String],
    ) -> Result<i64, ParseError> {
        Ok(0)
    }
}

const CATEGORY_SYSTEM_PROMPT: &str = "\
You are organizing the themes of a qualitative codebook built from an online community's \
chat archive. Each numbered item below is a theme that just absorbed similar theme names; \
the codes filed under it are listed.

For every item, respond with exactly:
<number>. Label: <the best name for the combined theme>

Keep the items in the given order and do not add or drop items. \
If you cannot finish the whole list, output a line containing only \"...\" and stop.";

/// How many member code labels each merged category shows the model.
const PROMPT_MEMBERS: usize = 10;

pub struct CategoryMerger {
    merge: ClusterMerge,
    stopping: bool,
}

impl CategoryMerger {
    pub fn new(merge: ClusterMerge) -> Self {
        Self {
            merge,
            stopping: false,
        }
    }

    /// Candidate pseudo-codes for the renaming round: one per merged
    /// category, carrying the absorbed names and member code labels.
    fn renaming_candidates(codebook: &Codebook, rename: &crate::codebook::CategoryRename) -> Vec<Code> {
        let mut survivors: BTreeMap<String, Code> = BTreeMap::new();
        for (absorbed, survivor) in rename.iter() {
            let entry = survivors
                .entry(Codebook::key(survivor))
                .or_insert_with(|| Code::new(survivor));
            entry.old_labels.push(absorbed.to_string());
        }

        for code in codebook.codes() {
            for category in &code.categories {
                if let Some(entry) = survivors.get_mut(&Codebook::key(category)) {
                    if entry.examples.len() < PROMPT_MEMBERS {
                        entry.examples.push(code.label.clone());
                    }
                }
            }
        }
        survivors.into_values().collect()
    }
}

#[async_trait]
impl ConsolidatorStage for CategoryMerger {
    fn name(&self) -> &str {
        "category-merger"
    }

    fn looping(&self) -> bool {
        true
    }

    fn stopping(&self) -> bool {
        self.stopping
    }

    fn chunked(&self) -> bool {
        true
    }

    fn subunit_filter(&self, code: &Code) -> bool {
        !code.categories.is_empty()
    }

    async fn preprocess(
        &mut self,
        codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed> {
        let names = collect_names(&candidates);
        if names.len() < 2 {
            self.stopping = true;
            return Ok(Preprocessed::Candidates(Vec::new()));
        }

        let rename = self.merge.merge_categories(&names).await?;
        self.stopping = rename.is_empty();
        rename.apply(codebook);

        let to_rename = Self::renaming_candidates(codebook, &rename);
        Ok(Preprocessed::Candidates(to_rename))
    }

    fn build_prompts(&self, _codebook: &Codebook, codes: &[Code]) -> (String, String) {
        let mut user = String::new();
        for (index, category) in codes.iter().enumerate() {
            user.push_str(&format!("{}. {}\n", index + 1, category.label));
            if !category.old_labels.is_empty() {
                user.push_str(&format!("Absorbed: {}\n", category.old_labels.join("; ")));
            }
            if !category.examples.is_empty() {
                user.push_str(&format!("Codes: {}\n", category.examples.join("; ")));
            }
        }
        (CATEGORY_SYSTEM_PROMPT.to_string(), user)
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
        if parsed.len() > codes.len() {
            return Err(ParseError::CountMismatch {
                expected: codes.len(),
                actual: parsed.len(),
            });
        }
        check_alignment(codes, &parsed)?;

        for (index, item) in parsed.iter().enumerate() {
            let old_name = codes[index].label.clone();
            if !item.label.is_empty() && Codebook::key(&item.label) != Codebook::key(&old_name) {
                debug!(from = %old_name, to = %item.label, "category renamed");
                rename_category(codebook, &old_name, &item.label);
                codes[index].label = item.label.clone();
            }
            codes[index].old_labels.clear();
        }
        Ok(parsed.len() as i64 - codes.len() as i64)
    }
}
