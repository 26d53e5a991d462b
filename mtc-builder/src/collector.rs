//! Identifier Collection
//!
//! Expands queries × publication years into one deduplicated identifier set,
//! remembering which queries matched each identifier.

use crate::sources::QuerySource;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use tracing::info;

/// Identifier → queries that returned it
///
/// Query sets only grow (set union) as further matches arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMatches {
    matches: HashMap<String, HashSet<String>>,
}

impl QueryMatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `query` returned `id`
    pub fn merge(&mut self, id: impl Into<String>, query: &str) {
        self.matches
            .entry(id.into())
            .or_default()
            .insert(query.to_string());
    }

    pub fn queries_for(&self, id: &str) -> Option<&HashSet<String>> {
        self.matches.get(id)
    }

    /// Matched queries for `id`, sorted for stable output
    pub fn sorted_queries_for(&self, id: &str) -> Vec<String> {
        let mut queries: Vec<String> = self
            .matches
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        queries.sort();
        queries
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.matches.keys()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Split counts into single-query and multi-query identifiers
    ///
    /// Reporting only: every identifier is retrieved regardless of how many
    /// queries matched it.
    pub fn report(&self) -> CollectionReport {
        let repeated = self.matches.values().filter(|q| q.len() > 1).count();
        CollectionReport {
            unique: self.matches.len(),
            single_query: self.matches.len() - repeated,
            multi_query: repeated,
        }
    }
}

/// Summary of a collection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReport {
    pub unique: usize,
    pub single_query: usize,
    pub multi_query: usize,
}

/// Run every query for every year and merge the results
///
/// Years are queried one at a time (`mindate == maxdate`). A failing
/// query/year contributes nothing; the source is responsible for logging it.
pub async fn collect<Q: QuerySource + ?Sized>(
    source: &Q,
    queries: &[String],
    years: RangeInclusive<i32>,
    max_results: u32,
) -> QueryMatches {
    let mut matches = QueryMatches::new();

    for query in queries {
        let mut query_total = 0usize;

        for year in years.clone() {
            let ids = source.fetch_ids(query, year, year, max_results).await;
            query_total += ids.len();
            for id in ids {
                matches.merge(id, query);
            }
        }

        info!(
            query = %query,
            years = %format!("{}-{}", years.start(), years.end()),
            ids = query_total,
            collected = matches.len(),
            "Query processed"
        );
    }

    let report = matches.report();
    info!(
        unique = report.unique,
        repeated = report.multi_query,
        "Identifier collection complete"
    );

    matches
}
