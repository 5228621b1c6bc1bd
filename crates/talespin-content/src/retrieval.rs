//! Lore and style retrieval port.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::era_pack::LoreEntry;

/// Why a retrieval call produced nothing.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The index could not be reached.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

/// What a snippet is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetKind {
    /// Setting facts.
    Lore,
    /// Voice and tone guidance.
    Style,
}

/// A ranked piece of retrieved text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Citation id.
    pub source_id: String,
    /// Lore or style.
    pub kind: SnippetKind,
    /// Text to place in the prompt.
    pub text: String,
    /// Relevance, higher is better.
    pub score: f32,
}

/// A retrieval request built from the current scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    /// Free text to match.
    pub text: String,
    /// Campaign time period.
    pub time_period: String,
    /// Approximate token budget for all returned snippets.
    pub token_budget: usize,
    /// Maximum snippet count.
    pub top_k: usize,
}

/// Approximate token count for budget accounting.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Returns ranked snippets for a scene.
#[async_trait]
pub trait LoreRetriever: Send + Sync {
    /// Ranked snippets whose combined size fits the query's token budget.
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>, RetrievalError>;
}

/// Retriever that always returns nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

#[async_trait]
impl LoreRetriever for NoRetrieval {
    async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<Snippet>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Ranks era-pack lore by keyword overlap with the query.
#[derive(Debug, Clone, Default)]
pub struct KeywordRetriever {
    entries: Vec<LoreEntry>,
}

impl KeywordRetriever {
    /// Creates a retriever over the given entries.
    #[must_use]
    pub fn new(entries: Vec<LoreEntry>) -> Self {
        Self { entries }
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl LoreRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>, RetrievalError> {
        let wanted = keywords(&query.text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(usize, &LoreEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let mut words = keywords(&entry.text);
                words.extend(entry.tags.iter().map(|t| t.to_lowercase()));
                let hits = words.intersection(&wanted).count();
                (hits > 0).then_some((hits, entry))
            })
            .collect();
        // Ties keep authoring order.
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let mut spent = 0;
        let mut snippets = Vec::new();
        for (hits, entry) in ranked {
            if snippets.len() == query.top_k {
                break;
            }
            let cost = estimate_tokens(&entry.text);
            if spent + cost > query.token_budget {
                continue;
            }
            spent += cost;
            #[allow(clippy::cast_precision_loss)]
            let score = hits as f32 / wanted.len() as f32;
            snippets.push(Snippet {
                source_id: entry.id.clone(),
                kind: if entry.kind == "style" {
                    SnippetKind::Style
                } else {
                    SnippetKind::Lore
                },
                text: entry.text.clone(),
                score,
            });
        }
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, kind: &str, text: &str, tags: &[&str]) -> LoreEntry {
        LoreEntry {
            id: id.to_owned(),
            kind: kind.to_owned(),
            text: text.to_owned(),
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    fn query(text: &str, token_budget: usize) -> RetrievalQuery {
        RetrievalQuery {
            text: text.to_owned(),
            time_period: "gaslight".to_owned(),
            token_budget,
            top_k: 3,
        }
    }

    fn retriever() -> KeywordRetriever {
        KeywordRetriever::new(vec![
            entry("fog", "lore", "Fog rolls off the river at dusk.", &["docks"]),
            entry("guild", "lore", "The smugglers guild owns the docks and the river boats.", &[]),
            entry("voice", "style", "Keep sentences short near the river.", &[]),
            entry("palace", "lore", "The palace gates never open.", &[]),
        ])
    }

    #[tokio::test]
    async fn test_ranks_by_keyword_overlap() {
        let snippets = retriever()
            .retrieve(&query("I sneak along the river docks", 500))
            .await
            .unwrap();

        let ids: Vec<&str> = snippets.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["fog", "guild", "voice"]);
        assert_eq!(snippets[2].kind, SnippetKind::Style);
        assert!(snippets[0].score >= snippets[2].score);
    }

    #[tokio::test]
    async fn test_respects_token_budget() {
        let snippets = retriever()
            .retrieve(&query("river docks", 10))
            .await
            .unwrap();

        let total: usize = snippets.iter().map(|s| estimate_tokens(&s.text)).sum();
        assert!(total <= 10);
        assert_eq!(snippets[0].source_id, "fog");
    }

    #[tokio::test]
    async fn test_no_retrieval_returns_nothing() {
        let snippets = NoRetrieval.retrieve(&query("river", 100)).await.unwrap();

        assert!(snippets.is_empty());
    }
}
