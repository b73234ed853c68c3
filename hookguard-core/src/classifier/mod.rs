//! Keyword-based four-axis request classifier with a decision table for execution
//! strategy selection and an optional low-confidence LLM refinement hook.

mod keywords;
mod strategy;

pub use keywords::{Complexity, Quality, Scope, TaskType};
pub use strategy::{Strategy, select_strategy};

use hookguard_config::ClassifierConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub complexity: Complexity,
    pub task_type: TaskType,
    pub quality: Quality,
    pub scope: Scope,
    pub confidence: f64,
    pub strategy: Strategy,
}

pub fn classify(prompt: &str, config: &ClassifierConfig) -> Classification {
    let lower = prompt.to_lowercase();

    let (complexity, complexity_hits) = keywords::best_match(&lower, keywords::complexity_table(), Complexity::Moderate);
    let (task_type, task_hits) = keywords::best_match(&lower, keywords::task_type_table(), TaskType::Implement);
    let (quality, _quality_hits) = keywords::best_match(&lower, keywords::quality_table(), Quality::Standard);
    let (scope, _scope_hits) = keywords::best_match(&lower, keywords::scope_table(), Scope::Unknown);

    let mut confidence = 0.5;
    if task_type != TaskType::Implement {
        confidence += 0.1;
    }
    if complexity_hits > 1 || task_hits > 1 {
        confidence += 0.1;
    }
    if prompt.len() > config.max_prompt_len_for_confidence {
        confidence += 0.1;
    }
    if prompt.len() < config.min_prompt_len_for_confidence {
        confidence -= 0.2;
    }
    if quality == Quality::Critical {
        confidence -= 0.1;
    }
    if complexity_hits == 0 && task_hits == 0 {
        confidence -= 0.2;
    }
    confidence = confidence.clamp(0.0, 1.0);

    let strategy = select_strategy(scope, task_type, complexity, quality);

    Classification {
        complexity,
        task_type,
        quality,
        scope,
        confidence,
        strategy,
    }
}

/// Whether the classification is confident enough to skip LLM refinement.
pub fn is_confident(classification: &Classification, config: &ClassifierConfig) -> bool {
    classification.confidence >= config.haiku_fallback_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_prompt_selects_delegated_research() {
        let config = ClassifierConfig::default();
        let classification = classify("please research the best caching library for this", &config);
        assert_eq!(classification.task_type, TaskType::Research);
    }

    #[test]
    fn short_prompt_lowers_confidence() {
        let config = ClassifierConfig::default();
        let classification = classify("fix it", &config);
        assert!(classification.confidence < 0.5);
    }

    #[test]
    fn long_detailed_prompt_raises_confidence() {
        let config = ClassifierConfig::default();
        let prompt = "implement ".to_string() + &"a robust caching layer with careful tests ".repeat(10);
        let classification = classify(&prompt, &config);
        assert!(classification.confidence > 0.5);
    }
}
