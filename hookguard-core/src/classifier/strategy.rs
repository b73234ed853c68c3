use super::keywords::{Complexity, Quality, Scope, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    IterativeLoop,
    DelegatedResearch,
    Brainstorm,
    Direct,
    Orchestrate,
    Fusion,
}

/// Decision table from §4.E, evaluated top-to-bottom; first matching row wins.
pub fn select_strategy(scope: Scope, task_type: TaskType, complexity: Complexity, quality: Quality) -> Strategy {
    if scope == Scope::Unknown && task_type == TaskType::Research {
        return Strategy::IterativeLoop;
    }
    if scope == Scope::Broad
        && matches!(task_type, TaskType::Review | TaskType::Research)
    {
        return Strategy::IterativeLoop;
    }
    if complexity == Complexity::Massive {
        return Strategy::IterativeLoop;
    }
    if scope == Scope::Broad && matches!(complexity, Complexity::Moderate | Complexity::Complex) {
        return Strategy::IterativeLoop;
    }
    if task_type == TaskType::Research {
        return Strategy::DelegatedResearch;
    }
    if task_type == TaskType::Plan {
        return Strategy::Brainstorm;
    }
    table_lookup(complexity, quality)
}

fn table_lookup(complexity: Complexity, quality: Quality) -> Strategy {
    match (complexity, quality) {
        (Complexity::Simple, _) => Strategy::Direct,
        (Complexity::Moderate, Quality::Standard) => Strategy::Direct,
        (Complexity::Moderate, Quality::High | Quality::Critical) => Strategy::Orchestrate,
        (Complexity::Complex, Quality::Critical) => Strategy::Fusion,
        (Complexity::Complex, _) => Strategy::Orchestrate,
        (Complexity::Massive, _) => Strategy::IterativeLoop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scope_research_is_iterative_loop() {
        let strategy = select_strategy(Scope::Unknown, TaskType::Research, Complexity::Simple, Quality::Standard);
        assert_eq!(strategy, Strategy::IterativeLoop);
    }

    #[test]
    fn massive_complexity_always_iterative_loop() {
        let strategy = select_strategy(Scope::Focused, TaskType::Implement, Complexity::Massive, Quality::Standard);
        assert_eq!(strategy, Strategy::IterativeLoop);
    }

    #[test]
    fn plan_task_type_is_brainstorm() {
        let strategy = select_strategy(Scope::Moderate, TaskType::Plan, Complexity::Simple, Quality::Standard);
        assert_eq!(strategy, Strategy::Brainstorm);
    }

    #[test]
    fn table_lookup_for_simple_moderate_complex() {
        assert_eq!(
            select_strategy(Scope::Focused, TaskType::Implement, Complexity::Simple, Quality::Critical),
            Strategy::Direct
        );
        assert_eq!(
            select_strategy(Scope::Focused, TaskType::Fix, Complexity::Moderate, Quality::High),
            Strategy::Orchestrate
        );
        assert_eq!(
            select_strategy(Scope::Focused, TaskType::Fix, Complexity::Complex, Quality::Critical),
            Strategy::Fusion
        );
    }
}
