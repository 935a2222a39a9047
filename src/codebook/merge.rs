// Merge primitives
//
// Cluster-based merges return a brand-new codebook keyed by surviving labels
// only; absorbed codes are removed from the map rather than marked with a
// sentinel, so nothing downstream needs to filter them out.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::cluster::{ClusterAssignment, ClusterMember, UNCLUSTERED};

use super::code::{Code, Codebook};

/// Membership confidence a member needs before a cluster may absorb it.
pub const ACCEPT_PROBABILITY: f64 = 0.95;

#[derive(Debug, Error)]
pub enum MergeError {
    /// Two independent clusters elected the same surviving label. Overwriting
    /// would silently drop the first cluster's merge, so this is fatal.
    #[error("clusters {first} and {second} both elected representative {label:?}")]
    DuplicateSurvivor {
        label: String,
        first: i64,
        second: i64,
    },

    #[error("cluster member index {index} out of range for {len} codes")]
    IndexOutOfRange { index: usize, len: usize },
}

/// How a cluster elects its surviving code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representative {
    /// Shortest combined label + first-definition length wins. Lossy; only
    /// safe at low thresholds.
    ShortestLabel,
    /// Highest membership probability wins.
    HighestProbability,
}

/// Append values missing from `target`, deduplicating by value rather than
/// by reference since examples are reformatted strings.
fn union_into(target: &mut Vec<String>, extra: &[String]) {
    for value in extra {
        if !target.iter().any(|existing| existing == value) {
            target.push(value.clone());
        }
    }
}

/// Absorb `absorbed` into `survivor`: union definitions, categories,
/// examples, and alternatives, and record the absorbed label so it can be
/// recovered later. The survivor's own label never appears among its
/// alternatives.
pub fn merge_into(survivor: &mut Code, absorbed: &Code) {
    union_into(&mut survivor.definitions, &absorbed.definitions);
    union_into(&mut survivor.categories, &absorbed.categories);
    union_into(&mut survivor.examples, &absorbed.examples);
    union_into(&mut survivor.alternatives, &absorbed.alternatives);
    union_into(&mut survivor.old_labels, &absorbed.old_labels);

    let survivor_key = Codebook::key(&survivor.label);
    if Codebook::key(&absorbed.label) != survivor_key {
        union_into(
            &mut survivor.alternatives,
            std::slice::from_ref(&absorbed.label),
        );
        union_into(
            &mut survivor.old_labels,
            std::slice::from_ref(&absorbed.label),
        );
    }
    survivor
        .alternatives
        .retain(|alternative| Codebook::key(alternative) != survivor_key);
}

fn election_score(code: &Code) -> usize {
    code.label.len() + code.first_definition().map(str::len).unwrap_or(0)
}

fn elect<'m>(
    members: &'m [ClusterMember],
    codes: &[Code],
    pick: Representative,
) -> &'m ClusterMember {
    members
        .iter()
        .min_by(|a, b| match pick {
            Representative::ShortestLabel => election_score(&codes[a.index])
                .cmp(&election_score(&codes[b.index]))
                .then_with(|| codes[a.index].label.cmp(&codes[b.index].label)),
            Representative::HighestProbability => b
                .probability
                .total_cmp(&a.probability)
                .then_with(|| codes[a.index].label.cmp(&codes[b.index].label)),
        })
        .expect("elect called with at least one member")
}

/// Merge every cluster with two or more confident members into its elected
/// representative. Unclustered and low-confidence members pass through as
/// singletons. Returns a replacement codebook; callers must replace, not
/// patch, the old one.
pub fn merge_codes_by_cluster(
    clusters: &ClusterAssignment,
    codes: &[Code],
    pick: Representative,
) -> Result<Codebook, MergeError> {
    let mut book = Codebook::new();
    // Which cluster first claimed each surviving key, for the duplicate check.
    let mut claimed: BTreeMap<String, i64> = BTreeMap::new();

    for (cluster, members) in clusters.groups() {
        for member in members {
            if member.index >= codes.len() {
                return Err(MergeError::IndexOutOfRange {
                    index: member.index,
                    len: codes.len(),
                });
            }
        }

        let (confident, uncertain): (Vec<&ClusterMember>, Vec<&ClusterMember>) =
            if cluster == UNCLUSTERED {
                (Vec::new(), members.iter().collect())
            } else {
                members
                    .iter()
                    .partition(|member| member.probability > ACCEPT_PROBABILITY)
            };

        if confident.len() >= 2 {
            let owned: Vec<ClusterMember> = confident.iter().map(|m| **m).collect();
            let representative = elect(&owned, codes, pick);
            let mut survivor = codes[representative.index].clone();
            for member in &owned {
                if member.index != representative.index {
                    merge_into(&mut survivor, &codes[member.index]);
                }
            }

            let key = Codebook::key(&survivor.label);
            if let Some(&first) = claimed.get(&key) {
                return Err(MergeError::DuplicateSurvivor {
                    label: survivor.label,
                    first,
                    second: cluster,
                });
            }
            claimed.insert(key, cluster);
            debug!(
                cluster,
                survivor = %survivor.label,
                absorbed = owned.len() - 1,
                "merged cluster"
            );
            book.insert(survivor);
        } else {
            // A lone confident member is a singleton too.
            for member in confident {
                book.insert(codes[member.index].clone());
            }
        }

        for member in uncertain {
            book.insert(codes[member.index].clone());
        }
    }

    Ok(book)
}

/// Rename map from a category-name merge: absorbed name (normalized) to the
/// surviving name.
#[derive(Debug, Clone, Default)]
pub struct CategoryRename {
    renames: BTreeMap<String, String>,
}

impl CategoryRename {
    pub fn surviving(&self, name: &str) -> Option<&str> {
        self.renames.get(&Codebook::key(name)).map(String::as_str)
    }

    /// Number of absorbed category names.
    pub fn merges(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.renames
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    /// Rewrite every code's category list, replacing merged names with their
    /// survivor and dropping the duplicates that rewriting creates.
    pub fn apply(&self, book: &mut Codebook) {
        if self.renames.is_empty() {
            return;
        }
        for code in book.codes_mut() {
            let renamed: Vec<String> = code
                .categories
                .iter()
                .map(|category| {
                    self.surviving(category)
                        .map(str::to_string)
                        .unwrap_or_else(|| category.clone())
                })
                .collect();
            code.categories.clear();
            union_into(&mut code.categories, &renamed);
        }
    }
}

/// The cluster-merge algorithm applied to category-name strings. The
/// election works on name length alone (categories carry no definitions).
pub fn merge_categories_by_cluster(
    clusters: &ClusterAssignment,
    names: &[String],
    pick: Representative,
) -> Result<CategoryRename, MergeError> {
    let pseudo: Vec<Code> = names.iter().map(Code::new).collect();
    let merged = merge_codes_by_cluster(clusters, &pseudo, pick)?;

    let mut rename = CategoryRename::default();
    for survivor in merged.codes() {
        for absorbed in &survivor.alternatives {
            rename
                .renames
                .insert(Codebook::key(absorbed), survivor.label.clone());
        }
    }
    Ok(rename)
}

/// Union codebooks from independently coded threads/coders by exact
/// (case-normalized) label match. The non-clustering merge that builds the
/// first-draft combined codebook before iterative consolidation.
pub fn merge_codebooks(books: Vec<Codebook>) -> Codebook {
    let mut combined = Codebook::new();
    for book in books {
        for code in book.into_codes() {
            match combined.get_mut(&code.label) {
                Some(existing) => merge_into(existing, &code),
                None => {
                    combined.insert(code);
                }
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(label: &str, definitions: &[&str], examples: &[&str]) -> Code {
        let mut code = Code::new(label);
        code.definitions = definitions.iter().map(|s| s.to_string()).collect();
        code.examples = examples.iter().map(|s| s.to_string()).collect();
        code
    }

    #[test]
    fn test_shorter_label_wins() {
        // Two codes cluster together at 0.97; the shorter label survives and
        // keeps the other as an alternative.
        let codes = vec![code("greeting", &[], &[]), code("hello there", &[], &[])];
        let clusters = ClusterAssignment::from_arrays(&[0, 0], &[0.97, 0.97]);

        let merged =
            merge_codes_by_cluster(&clusters, &codes, Representative::ShortestLabel).unwrap();
        assert_eq!(merged.len(), 1);
        let survivor = merged.get("greeting").unwrap();
        assert_eq!(survivor.label, "greeting");
        assert_eq!(survivor.alternatives, vec!["hello there".to_string()]);
        assert_eq!(survivor.old_labels, vec!["hello there".to_string()]);
    }

    #[test]
    fn test_merge_is_example_lossless() {
        let codes = vec![
            code("a", &["def a"], &["1|||x: one", "2|||y: two"]),
            code("b", &["def b"], &["2|||y: two", "3|||z: three"]),
        ];
        let clusters = ClusterAssignment::from_arrays(&[0, 0], &[0.99, 0.98]);

        let merged =
            merge_codes_by_cluster(&clusters, &codes, Representative::ShortestLabel).unwrap();
        let survivor = merged.get("a").unwrap();
        assert_eq!(
            survivor.examples,
            vec![
                "1|||x: one".to_string(),
                "2|||y: two".to_string(),
                "3|||z: three".to_string()
            ]
        );
        assert_eq!(
            survivor.definitions,
            vec!["def a".to_string(), "def b".to_string()]
        );
    }

    #[test]
    fn test_low_confidence_members_pass_through() {
        let codes = vec![
            code("a", &[], &[]),
            code("b", &[], &[]),
            code("c", &[], &[]),
        ];
        // c sits in cluster 0 but below the acceptance bar.
        let clusters = ClusterAssignment::from_arrays(&[0, 0, 0], &[0.99, 0.99, 0.5]);

        let merged =
            merge_codes_by_cluster(&clusters, &codes, Representative::ShortestLabel).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.get("c").unwrap().alternatives.is_empty());
    }

    #[test]
    fn test_unclustered_kept_as_singletons() {
        let codes = vec![code("a", &[], &[]), code("b", &[], &[])];
        let clusters = ClusterAssignment::from_arrays(&[-1, -1], &[1.0, 1.0]);

        let merged =
            merge_codes_by_cluster(&clusters, &codes, Representative::ShortestLabel).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_duplicate_survivor_is_an_error() {
        // Duplicate labels in the input let two clusters elect the same
        // survivor; that must never be a silent overwrite.
        let codes = vec![
            code("dup", &[], &[]),
            code("longer one", &[], &[]),
            code("dup", &[], &[]),
            code("another long", &[], &[]),
        ];
        let clusters =
            ClusterAssignment::from_arrays(&[0, 0, 1, 1], &[0.99, 0.99, 0.99, 0.99]);

        let err = merge_codes_by_cluster(&clusters, &codes, Representative::ShortestLabel)
            .unwrap_err();
        assert!(matches!(err, MergeError::DuplicateSurvivor { label, .. } if label == "dup"));
    }

    #[test]
    fn test_highest_probability_representative() {
        let codes = vec![code("longer label", &[], &[]), code("short", &[], &[])];
        let clusters = ClusterAssignment::from_arrays(&[0, 0], &[0.99, 0.96]);

        let merged =
            merge_codes_by_cluster(&clusters, &codes, Representative::HighestProbability).unwrap();
        let survivor = merged.get("longer label").unwrap();
        assert_eq!(survivor.alternatives, vec!["short".to_string()]);
    }

    #[test]
    fn test_alternatives_never_contain_own_label() {
        let mut survivor = code("Greeting", &[], &[]);
        let mut absorbed = code("hi", &[], &[]);
        absorbed.alternatives = vec!["greeting".to_string(), "salute".to_string()];

        merge_into(&mut survivor, &absorbed);
        assert!(survivor
            .alternatives
            .iter()
            .all(|alt| Codebook::key(alt) != "greeting"));
        assert!(survivor.alternatives.contains(&"salute".to_string()));
        assert!(survivor.alternatives.contains(&"hi".to_string()));
    }

    #[test]
    fn test_category_rename_rewrites_codes() {
        let names = vec![
            "Social Support".to_string(),
            "Support".to_string(),
            "Gameplay".to_string(),
        ];
        let clusters = ClusterAssignment::from_arrays(&[0, 0, -1], &[0.99, 0.99, 1.0]);
        let rename =
            merge_categories_by_cluster(&clusters, &names, Representative::ShortestLabel).unwrap();
        assert_eq!(rename.surviving("social support"), Some("Support"));
        assert_eq!(rename.merges(), 1);

        let mut book = Codebook::new();
        let mut a = Code::new("a");
        a.categories = vec!["Social Support".to_string(), "Support".to_string()];
        let mut b = Code::new("b");
        b.categories = vec!["Gameplay".to_string()];
        book.insert(a);
        book.insert(b);

        rename.apply(&mut book);
        assert_eq!(book.get("a").unwrap().categories, vec!["Support".to_string()]);
        assert_eq!(book.get("b").unwrap().categories, vec!["Gameplay".to_string()]);
    }

    #[test]
    fn test_merge_codebooks_by_exact_label() {
        let mut book1 = Codebook::new();
        book1.insert(code("Greeting", &["hello"], &["1|||x: hi"]));
        let mut book2 = Codebook::new();
        book2.insert(code("greeting", &["welcome"], &["2|||y: hey"]));
        book2.insert(code("farewell", &[], &[]));

        let combined = merge_codebooks(vec![book1, book2]);
        assert_eq!(combined.len(), 2);
        let greeting = combined.get("greeting").unwrap();
        assert_eq!(greeting.definitions.len(), 2);
        assert_eq!(greeting.examples.len(), 2);
        // Same label under case normalization is not an alternative.
        assert!(greeting.alternatives.is_empty());
    }
}
