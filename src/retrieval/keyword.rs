//! BM25 keyword search over document abstracts.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::SearchResult;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

/// Lowercase and split into `[a-z0-9]+` runs.
pub fn tokenize(text: &str) -> Vec<String> {
    let re = TOKEN_RE.get_or_init(|| Regex::new("[a-z0-9]+").unwrap());
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Term statistics over a document set.
#[derive(Debug, Default)]
pub struct Bm25Index {
    documents: HashMap<String, String>,
    term_freq: HashMap<String, HashMap<String, usize>>,
    doc_lengths: HashMap<String, usize>,
    avg_doc_length: f64,
    idf: HashMap<String, f64>,
    total_docs: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, uri: &str, content: &str) {
        self.documents.insert(uri.to_string(), content.to_string());

        let terms = tokenize(content);
        self.doc_lengths.insert(uri.to_string(), terms.len());

        let mut freq: HashMap<String, usize> = HashMap::new();
        for term in terms {
            *freq.entry(term).or_insert(0) += 1;
        }
        self.term_freq.insert(uri.to_string(), freq);
        self.total_docs += 1;
    }

    /// Recompute IDF scores and the average document length. Call after a
    /// batch of `add_document`s.
    pub fn build_idf(&mut self) {
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for freq in self.term_freq.values() {
            for term in freq.keys() {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let n = self.total_docs as f64;
        self.idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term.to_string(), idf)
            })
            .collect();

        let total_len: usize = self.doc_lengths.values().sum();
        if self.total_docs > 0 {
            self.avg_doc_length = total_len as f64 / self.total_docs as f64;
        }
    }

    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    pub fn document_uris(&self) -> impl Iterator<Item = &String> {
        self.documents.keys()
    }
}

/// BM25 scoring with the standard parameters.
#[derive(Debug, Clone, Copy)]
pub struct KeywordSearch {
    k1: f64,
    b: f64,
}

impl KeywordSearch {
    pub fn new() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }

    /// BM25 score of `query` against one document.
    pub fn score(&self, query: &str, index: &Bm25Index, uri: &str) -> f64 {
        let Some(doc_freq) = index.term_freq.get(uri) else {
            return 0.0;
        };
        let doc_len = *index.doc_lengths.get(uri).unwrap_or(&0) as f64;

        let mut score = 0.0;
        for term in tokenize(query) {
            let tf = *doc_freq.get(&term).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = *index.idf.get(&term).unwrap_or(&0.0);
            let numerator = tf * (self.k1 + 1.0);
            let denominator =
                tf + self.k1 * (1.0 - self.b + self.b * doc_len / index.avg_doc_length);
            score += idf * numerator / denominator;
        }
        score
    }

    /// Rank all indexed documents for `query`, dropping zero scores.
    pub fn search(&self, query: &str, index: &Bm25Index, limit: usize) -> Vec<SearchResult> {
        if index.total_docs == 0 {
            return Vec::new();
        }

        let mut results: Vec<SearchResult> = index
            .documents
            .keys()
            .filter_map(|uri| {
                let score = self.score(query, index, uri);
                (score > 0.0).then(|| SearchResult {
                    uri: uri.clone(),
                    score,
                    ..Default::default()
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uri.cmp(&b.uri))
        });
        if limit > 0 && results.len() > limit {
            results.truncate(limit);
        }
        results
    }
}

impl Default for KeywordSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(docs: &[(&str, &str)]) -> Bm25Index {
        let mut index = Bm25Index::new();
        for (uri, content) in docs {
            index.add_document(uri, content);
        }
        index.build_idf();
        index
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! v2.0"),
            vec!["hello", "world", "v2", "0"]
        );
        assert!(tokenize("!!!").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn matching_document_ranks_first() {
        let index = indexed(&[
            ("viking://a", "rust async runtime with tokio"),
            ("viking://b", "python data science pandas"),
            ("viking://c", "rust ownership and borrowing"),
        ]);
        let search = KeywordSearch::new();
        let results = search.search("rust tokio", &index, 10);
        assert_eq!(results[0].uri, "viking://a");
        assert!(results.iter().all(|r| r.score > 0.0));
        assert!(!results.iter().any(|r| r.uri == "viking://b"));
    }

    #[test]
    fn rare_terms_outweigh_common() {
        let index = indexed(&[
            ("viking://a", "shared shared shared unique"),
            ("viking://b", "shared words everywhere"),
            ("viking://c", "shared again here"),
        ]);
        let search = KeywordSearch::new();
        // "unique" appears in a single doc, so it dominates
        let results = search.search("unique", &index, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uri, "viking://a");
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = Bm25Index::new();
        let search = KeywordSearch::new();
        assert!(search.search("anything", &index, 10).is_empty());
    }

    #[test]
    fn no_match_returns_empty() {
        let index = indexed(&[("viking://a", "alpha bravo")]);
        let search = KeywordSearch::new();
        assert!(search.search("zulu", &index, 10).is_empty());
    }

    #[test]
    fn limit_truncates() {
        let index = indexed(&[
            ("viking://a", "term one"),
            ("viking://b", "term two"),
            ("viking://c", "term three"),
        ]);
        let search = KeywordSearch::new();
        let results = search.search("term", &index, 2);
        assert_eq!(results.len(), 2);
    }
}
