// src/catalog.rs
// Static tag-tier graph and problem bank

use crate::error::{Result, SchedulerError};
use crate::models::{Difficulty, Tier};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyRatio {
    pub easy: f64,
    pub medium: f64,
    pub hard: f64,
}

impl Default for DifficultyRatio {
    fn default() -> Self {
        DifficultyRatio {
            easy: 0.4,
            medium: 0.4,
            hard: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNode {
    pub name: String,
    pub tier: Tier,
    #[serde(default)]
    pub ideal_ratio: DifficultyRatio,
    #[serde(default)]
    pub related: Vec<String>,
}

/// Canonical definition of a problem in the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProblem {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
}

impl CatalogProblem {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

// Used for loading
#[derive(Deserialize)]
struct JsonCatalog {
    tags: Vec<TagNode>,
    problems: Vec<CatalogProblem>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    tags: BTreeMap<String, TagNode>,
    problems: Vec<CatalogProblem>,
    by_id: HashMap<i64, usize>,
    by_slug: HashMap<String, usize>,
}

impl Catalog {
    /// The bank compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let data = include_str!("data/catalog.json");
        Self::from_json(data)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let parsed: JsonCatalog =
            serde_json::from_str(data).map_err(|e| SchedulerError::Catalog(e.to_string()))?;
        Ok(Self::new(parsed.tags, parsed.problems))
    }

    pub fn new(tags: Vec<TagNode>, problems: Vec<CatalogProblem>) -> Self {
        let tags: BTreeMap<String, TagNode> =
            tags.into_iter().map(|t| (t.name.clone(), t)).collect();

        let mut by_id = HashMap::new();
        let mut by_slug = HashMap::new();
        for (idx, p) in problems.iter().enumerate() {
            if by_id.insert(p.id, idx).is_some() {
                warn!("Duplicate problem id {} in catalog; keeping the last entry", p.id);
            }
            by_slug.insert(p.slug.to_lowercase(), idx);
            for tag in &p.tags {
                if !tags.contains_key(tag) {
                    debug!("Problem {} carries tag '{}' missing from the tag graph", p.id, tag);
                }
            }
        }

        Catalog {
            tags,
            problems,
            by_id,
            by_slug,
        }
    }

    pub fn problems(&self) -> &[CatalogProblem] {
        &self.problems
    }

    pub fn problem(&self, id: i64) -> Option<&CatalogProblem> {
        self.by_id.get(&id).map(|&idx| &self.problems[idx])
    }

    pub fn problem_by_slug(&self, slug: &str) -> Option<&CatalogProblem> {
        self.by_slug
            .get(&slug.to_lowercase())
            .map(|&idx| &self.problems[idx])
    }

    /// Look a problem up by whichever identifier the caller has; id wins.
    pub fn resolve(&self, id: Option<i64>, slug: Option<&str>) -> Option<&CatalogProblem> {
        id.and_then(|id| self.problem(id))
            .or_else(|| slug.and_then(|s| self.problem_by_slug(s)))
    }

    pub fn tag(&self, name: &str) -> Option<&TagNode> {
        self.tags.get(name)
    }

    pub fn tags(&self) -> impl Iterator<Item = &TagNode> {
        self.tags.values()
    }

    pub fn tier_of(&self, tag: &str) -> Option<Tier> {
        self.tags.get(tag).map(|t| t.tier)
    }

    /// Names of every tag whose tier is at or below `tier`.
    pub fn allowed_tags(&self, tier: Tier) -> HashSet<String> {
        let allowed = tier.allowed();
        self.tags
            .values()
            .filter(|t| allowed.contains(&t.tier))
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn tags_in_tier(&self, tier: Tier) -> Vec<&TagNode> {
        self.tags.values().filter(|t| t.tier == tier).collect()
    }

    /// Tier used to gate problems for a focus tag; unknown tags gate at Core.
    pub fn gating_tier(&self, tag: &str) -> Tier {
        self.tier_of(tag).unwrap_or(Tier::Core)
    }
}
