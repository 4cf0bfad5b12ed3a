//! The set of exercises submissions are judged against.
//!
//! The catalog is read once at startup and never changes afterwards. The
//! process-wide instance lives in a [`OnceCell`], so reading it needs no lock.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use err_derive::Error;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

static REGISTRY: OnceCell<Arc<Catalog>> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One exercise: a schema with seed data, and the query whose output counts as
/// correct.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemSpec {
    pub id: u32,
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub description: String,
    /// DDL and seed data, run before the query under test
    pub setup: String,
    /// The reference query
    pub solution: String,
    pub hints: Vec<String>,
}

/// A problem as it appears in the catalog file.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProblemEntry {
    id: u32,
    title: String,
    difficulty: Difficulty,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: String,
    setup: String,
    solution: String,
    #[serde(default)]
    hints: Vec<String>,
}

pub const DEFAULT_CATEGORY: &str = "General";

impl From<ProblemEntry> for ProblemSpec {
    fn from(e: ProblemEntry) -> Self {
        ProblemSpec {
            slug: e.slug.unwrap_or_else(|| make_slug(&e.title)),
            id: e.id,
            title: e.title,
            difficulty: e.difficulty,
            category: e.category.unwrap_or_else(|| DEFAULT_CATEGORY.into()),
            description: e.description,
            setup: e.setup,
            solution: e.solution,
            hints: e.hints,
        }
    }
}

/// Listing entry, without any of the problem's SQL.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSummary {
    pub id: u32,
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub category: String,
}

/// What a solver gets to see. The reference query is never included.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetail {
    #[serde(flatten)]
    pub summary: ProblemSummary,
    pub description: String,
    pub description_lines: Vec<String>,
    pub setup: String,
    pub hints: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProblemGroup {
    pub category: String,
    pub problems: Vec<ProblemSummary>,
}

impl ProblemSpec {
    pub fn summary(&self) -> ProblemSummary {
        ProblemSummary {
            id: self.id,
            slug: self.slug.clone(),
            title: self.title.clone(),
            difficulty: self.difficulty,
            category: self.category.clone(),
        }
    }

    pub fn detail(&self) -> ProblemDetail {
        ProblemDetail {
            summary: self.summary(),
            description: self.description.clone(),
            description_lines: self.description.lines().map(str::to_owned).collect(),
            setup: self.setup.clone(),
            hints: self.hints.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(display = "Invalid catalog JSON: {}", _0)]
    Json(#[error(source)] serde_json::Error),

    #[error(display = "Duplicate problem slug: {}", _0)]
    DuplicateSlug(String),

    #[error(display = "Problem {} has an empty slug", _0)]
    EmptySlug(u32),

    #[error(display = "The problem catalog was already installed")]
    AlreadyInstalled,
}

/// Lowercase the title and join its alphanumeric runs with dashes.
pub fn make_slug(title: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&title.to_lowercase(), "-")
        .trim_matches('-')
        .to_owned()
}

#[derive(Debug, Default)]
pub struct Catalog {
    problems: Vec<ProblemSpec>,
    by_slug: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(problems: Vec<ProblemSpec>) -> Result<Self, CatalogError> {
        let mut by_slug = HashMap::with_capacity(problems.len());
        for (idx, p) in problems.iter().enumerate() {
            if p.slug.is_empty() {
                return Err(CatalogError::EmptySlug(p.id));
            }
            if by_slug.insert(p.slug.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateSlug(p.slug.clone()));
            }
        }
        Ok(Catalog { problems, by_slug })
    }

    pub fn from_json(s: &str) -> Result<Self, CatalogError> {
        let entries: Vec<ProblemEntry> = serde_json::from_str(s)?;
        Self::new(entries.into_iter().map(ProblemSpec::from).collect())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read problem catalog {}", path.display()))?;
        let catalog = Self::from_json(&s)
            .with_context(|| format!("Failed to load problem catalog {}", path.display()))?;
        tracing::info!(count = catalog.len(), path = %path.display(), "Problem catalog loaded");
        Ok(catalog)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&ProblemSpec> {
        self.by_slug.get(slug).map(|&idx| &self.problems[idx])
    }

    pub fn problems(&self) -> &[ProblemSpec] {
        &self.problems
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn summaries(&self) -> Vec<ProblemSummary> {
        self.problems.iter().map(ProblemSpec::summary).collect()
    }

    /// Summaries grouped by category. Categories keep the order they first
    /// appear in; problems inside a group are ordered by id.
    pub fn grouped(&self) -> Vec<ProblemGroup> {
        let mut groups: Vec<ProblemGroup> = Vec::new();
        for p in &self.problems {
            match groups.iter_mut().find(|g| g.category == p.category) {
                Some(g) => g.problems.push(p.summary()),
                None => groups.push(ProblemGroup {
                    category: p.category.clone(),
                    problems: vec![p.summary()],
                }),
            }
        }
        for g in &mut groups {
            g.problems.sort_by_key(|p| p.id);
        }
        groups
    }
}

/// Install the process-wide catalog. Only the first call succeeds.
pub fn install(catalog: Catalog) -> Result<Arc<Catalog>, CatalogError> {
    let catalog = Arc::new(catalog);
    REGISTRY
        .set(catalog.clone())
        .map_err(|_| CatalogError::AlreadyInstalled)?;
    Ok(catalog)
}

/// The process-wide catalog, if one was installed.
pub fn installed() -> Option<Arc<Catalog>> {
    REGISTRY.get().cloned()
}
