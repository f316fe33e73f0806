// src/index.rs
// Relationship index over the catalog, review states and attempt history.
// Built once per recompute cycle and shared by mastery, ladder and summary code.

use crate::catalog::{Catalog, CatalogProblem};
use crate::models::{Attempt, Problem};
use std::collections::{HashMap, HashSet};

pub struct RelationshipIndex<'a> {
    catalog: &'a Catalog,
    problems: Vec<Problem>,
    attempts: Vec<Attempt>,
    problem_by_id: HashMap<i64, usize>,
    attempts_by_problem: HashMap<i64, Vec<usize>>,
    attempts_by_tag: HashMap<String, Vec<usize>>,
    catalog_by_tag: HashMap<String, Vec<usize>>,
}

impl<'a> RelationshipIndex<'a> {
    pub fn build(catalog: &'a Catalog, problems: Vec<Problem>, mut attempts: Vec<Attempt>) -> Self {
        attempts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let problem_by_id = problems
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.id, idx))
            .collect();

        let mut attempts_by_problem: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut attempts_by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, attempt) in attempts.iter().enumerate() {
            attempts_by_problem
                .entry(attempt.problem_id)
                .or_default()
                .push(idx);
            for tag in &attempt.tags {
                attempts_by_tag.entry(tag.clone()).or_default().push(idx);
            }
        }

        let mut catalog_by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, p) in catalog.problems().iter().enumerate() {
            for tag in &p.tags {
                catalog_by_tag.entry(tag.clone()).or_default().push(idx);
            }
        }

        RelationshipIndex {
            catalog,
            problems,
            attempts,
            problem_by_id,
            attempts_by_problem,
            attempts_by_tag,
            catalog_by_tag,
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// All attempts, oldest first.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn problem_state(&self, id: i64) -> Option<&Problem> {
        self.problem_by_id.get(&id).map(|&idx| &self.problems[idx])
    }

    /// Attempts touching `tag`, oldest first.
    pub fn attempts_for_tag(&self, tag: &str) -> Vec<&Attempt> {
        self.attempts_by_tag
            .get(tag)
            .map(|ids| ids.iter().map(|&i| &self.attempts[i]).collect())
            .unwrap_or_default()
    }

    /// Catalog problems carrying `tag`, in catalog order.
    pub fn candidates_for_tag(&self, tag: &str) -> Vec<&'a CatalogProblem> {
        let problems = self.catalog.problems();
        self.catalog_by_tag
            .get(tag)
            .map(|ids| ids.iter().map(|&i| &problems[i]).collect())
            .unwrap_or_default()
    }

    pub fn attempted_ids(&self) -> HashSet<i64> {
        self.attempts_by_problem.keys().copied().collect()
    }
}
