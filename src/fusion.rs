//! Weighted reciprocal rank fusion with path-based boosting.
//!
//! Fusion is rank based: the native scores of the input lists are never
//! compared, only their 1-based positions. After fusion the scores are
//! boosted, re-sorted and normalized so the best hit scores `1.0`.

use std::{cmp::Ordering, collections::HashMap};

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;

/// Multiplier applied once per query keyword found in a result's path.
pub const PATH_KEYWORD_BOOST: f32 = 1.15;

/// Multiplier applied to `readme.md` / `index.md` documents.
pub const INDEX_FILE_BOOST: f32 = 1.25;

const INDEX_FILE_SUFFIXES: &[&str] = &["readme.md", "index.md"];

/// Tokens of this length or shorter are never treated as keywords.
const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "any", "are", "but", "can",
    "does", "for", "from", "get", "has", "have", "how", "into", "its", "not",
    "off", "one", "our", "out", "should", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "use", "using", "was", "way",
    "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// A hit from a single source. `score` is that source's native relevance
/// and is not comparable across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub id: String,
    pub content: String,
    pub path: String,
    pub package: String,
    pub title: String,
    pub score: f32,
}

/// 1-based rank a document held in each contributing source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRanks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulltext_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
}

/// A cross-source hit. After [`fuse`], `score` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub id: String,
    pub content: String,
    pub path: String,
    pub package: String,
    pub title: String,
    pub score: f32,
    pub sources: SourceRanks,
}

impl FusionResult {
    fn from_ranked(result: &RankedResult) -> Self {
        Self {
            id: result.id.clone(),
            content: result.content.clone(),
            path: result.path.clone(),
            package: result.package.clone(),
            title: result.title.clone(),
            score: 0.0,
            sources: SourceRanks::default(),
        }
    }
}

/// Full pipeline: fuse, boost, sort, normalize, truncate to `limit`.
///
/// Never fails; any combination of empty inputs yields a (possibly empty)
/// list.
pub fn fuse(
    fulltext: &[RankedResult],
    vector: &[RankedResult],
    query: &str,
    config: &FusionConfig,
    limit: usize,
) -> Vec<FusionResult> {
    let mut results = reciprocal_rank_fusion(fulltext, vector, config);
    let keywords = extract_keywords(query);
    apply_boosts(&mut results, &keywords);
    sort_results(&mut results);
    normalize_scores(&mut results);
    results.truncate(limit);
    results
}

/// `score(d) = Σ w_s / (k + rank_s(d))` over the sources `d` appears in.
///
/// Output is sorted by fused score, ties broken by id.
///
/// # Examples
///
/// ```
/// use docrank::config::FusionConfig;
/// use docrank::fusion::{reciprocal_rank_fusion, RankedResult};
///
/// let hit = |id: &str| RankedResult {
///     id: id.into(),
///     content: String::new(),
///     path: format!("{id}.md"),
///     package: "p".into(),
///     title: id.into(),
///     score: 1.0,
/// };
/// let fused = reciprocal_rank_fusion(&[hit("a")], &[hit("b")], &FusionConfig::default());
/// assert_eq!(fused[0].id, "b");
/// assert!((fused[0].score - 0.6 / 61.0).abs() < 1e-6);
/// ```
pub fn reciprocal_rank_fusion(
    fulltext: &[RankedResult],
    vector: &[RankedResult],
    config: &FusionConfig,
) -> Vec<FusionResult> {
    let k = config.k() as f32;
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, FusionResult> = HashMap::new();

    for (index, result) in fulltext.iter().enumerate() {
        let rank = index + 1;
        let entry = by_id.entry(result.id.clone()).or_insert_with(|| {
            order.push(result.id.clone());
            FusionResult::from_ranked(result)
        });
        // A source listing the same id twice only counts its best rank.
        if entry.sources.fulltext_rank.is_none() {
            entry.sources.fulltext_rank = Some(rank);
            entry.score += config.fulltext_weight() / (k + rank as f32);
        }
    }

    for (index, result) in vector.iter().enumerate() {
        let rank = index + 1;
        let entry = by_id.entry(result.id.clone()).or_insert_with(|| {
            order.push(result.id.clone());
            FusionResult::from_ranked(result)
        });
        if entry.sources.vector_rank.is_none() {
            entry.sources.vector_rank = Some(rank);
            entry.score += config.vector_weight() / (k + rank as f32);
        }
    }

    let mut fused: Vec<FusionResult> = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    sort_results(&mut fused);
    fused
}

/// Lowercased whitespace tokens, minus stop-words and short tokens.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Multiplier for keywords found in `path` (compounding per keyword).
pub fn path_keyword_boost(path: &str, keywords: &[String]) -> f32 {
    let path = path.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| path.contains(keyword.as_str()))
        .fold(1.0, |boost, _| boost * PATH_KEYWORD_BOOST)
}

/// Multiplier for canonical entry documents.
pub fn index_file_boost(path: &str) -> f32 {
    let path = path.to_lowercase();
    if INDEX_FILE_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
        INDEX_FILE_BOOST
    } else {
        1.0
    }
}

/// Apply both boosts to every result. Both are pure multipliers, so the
/// order they are applied in does not matter.
pub fn apply_boosts(results: &mut [FusionResult], keywords: &[String]) {
    for result in results.iter_mut() {
        result.score *= path_keyword_boost(&result.path, keywords);
        result.score *= index_file_boost(&result.path);
    }
}

/// Score descending, then id ascending for a deterministic order.
pub fn sort_results(results: &mut [FusionResult]) {
    results.sort_by(|a, b| {
        compare_score_desc(a.score, b.score).then_with(|| a.id.cmp(&b.id))
    });
}

fn compare_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Divide every score by the maximum. A non-positive maximum leaves the
/// scores untouched.
pub fn normalize_scores(results: &mut [FusionResult]) {
    let max = results
        .iter()
        .map(|r| r.score)
        .fold(f32::NEG_INFINITY, f32::max);

    if max > 0.0 {
        for result in results.iter_mut() {
            result.score /= max;
        }
    }
}
