use indexmap::IndexMap;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Massive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Implement,
    Fix,
    Refactor,
    Research,
    Test,
    Review,
    Document,
    Deploy,
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Standard,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Focused,
    Moderate,
    Broad,
    Unknown,
}

/// A keyword→category table: categories are tried in declaration (insertion)
/// order, and the category with the most keyword hits wins. Ties break toward
/// the earlier-declared category (fixed declared order, §4.E). Built once and
/// compiled into the binary via `once_cell::sync::Lazy`, the same pattern the
/// rest of the corpus uses for static lookup tables.
pub static COMPLEXITY_TABLE: Lazy<IndexMap<Complexity, &'static [&'static str]>> = Lazy::new(|| {
    IndexMap::from([
        (Complexity::Massive, ["entire codebase", "rewrite everything", "full migration", "all services"].as_slice()),
        (Complexity::Complex, ["multiple files", "architecture", "cross-cutting", "integrate", "distributed"].as_slice()),
        (Complexity::Simple, ["typo", "rename", "one-line", "small fix", "quick"].as_slice()),
        (Complexity::Moderate, ["feature", "endpoint", "module"].as_slice()),
    ])
});

pub static TASK_TYPE_TABLE: Lazy<IndexMap<TaskType, &'static [&'static str]>> = Lazy::new(|| {
    IndexMap::from([
        (TaskType::Research, ["research", "investigate", "look into", "compare options", "survey"].as_slice()),
        (TaskType::Plan, ["plan", "roadmap", "design doc", "proposal"].as_slice()),
        (TaskType::Fix, ["fix", "bug", "broken", "crash", "error"].as_slice()),
        (TaskType::Refactor, ["refactor", "clean up", "restructure", "simplify"].as_slice()),
        (TaskType::Test, ["test", "coverage", "unit test", "e2e"].as_slice()),
        (TaskType::Review, ["review", "audit", "critique"].as_slice()),
        (TaskType::Document, ["document", "docs", "readme", "comment"].as_slice()),
        (TaskType::Deploy, ["deploy", "release", "ship", "publish"].as_slice()),
        (TaskType::Implement, ["implement", "add", "build", "create"].as_slice()),
    ])
});

pub static QUALITY_TABLE: Lazy<IndexMap<Quality, &'static [&'static str]>> = Lazy::new(|| {
    IndexMap::from([
        (Quality::Critical, ["production", "critical", "security", "data loss", "payment"].as_slice()),
        (Quality::High, ["important", "careful", "thorough", "robust"].as_slice()),
    ])
});

pub static SCOPE_TABLE: Lazy<IndexMap<Scope, &'static [&'static str]>> = Lazy::new(|| {
    IndexMap::from([
        (Scope::Unknown, ["not sure", "somewhere", "figure out where"].as_slice()),
        (Scope::Broad, ["entire codebase", "all modules", "whole project", "everywhere"].as_slice()),
        (Scope::Moderate, ["this module", "this service", "a few files"].as_slice()),
        (Scope::Focused, ["this function", "this file", "this line"].as_slice()),
    ])
});

pub fn complexity_table() -> &'static IndexMap<Complexity, &'static [&'static str]> {
    &COMPLEXITY_TABLE
}

pub fn task_type_table() -> &'static IndexMap<TaskType, &'static [&'static str]> {
    &TASK_TYPE_TABLE
}

pub fn quality_table() -> &'static IndexMap<Quality, &'static [&'static str]> {
    &QUALITY_TABLE
}

pub fn scope_table() -> &'static IndexMap<Scope, &'static [&'static str]> {
    &SCOPE_TABLE
}

/// Returns the winning category and its keyword-hit count (0 if the default was
/// used because no keyword matched any category).
pub fn best_match<T: Copy + PartialEq + Eq + std::hash::Hash>(
    text: &str,
    table: &IndexMap<T, &'static [&'static str]>,
    default: T,
) -> (T, usize) {
    let mut best: Option<(T, usize)> = None;
    for (category, keywords) in table {
        let hits = keywords.iter().filter(|kw| text.contains(*kw)).count();
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, best_hits)) if hits <= best_hits => {}
            _ => best = Some((*category, hits)),
        }
    }
    match best {
        Some((category, hits)) => (category, hits),
        None => (default, 0),
    }
}
