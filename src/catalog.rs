//! Known local models and task-aware model choice

use crate::actions::Task;
use std::collections::BTreeSet;

/// Files larger than this (in bytes) go to the fastest model
pub const LARGE_FILE_BYTES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerformanceClass {
    Fast,
    Balanced,
    Quality,
}

impl PerformanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceClass::Fast => "fast",
            PerformanceClass::Balanced => "balanced",
            PerformanceClass::Quality => "quality",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub name: &'static str,
    pub context_window: u32,
    pub specializations: &'static [&'static str],
    pub performance: PerformanceClass,
}

impl ModelCatalogEntry {
    pub fn specializes_in(&self, tag: &str) -> bool {
        self.specializations.iter().any(|s| s.eq_ignore_ascii_case(tag))
    }
}

const QWEN_CODER: &str = "qwen2.5-coder:32b-instruct-q4_K_M";
const QWEN_GENERAL: &str = "qwen2.5:7b-instruct-q4_K_M";
const DEEPSEEK: &str = "deepseek-v2:16b-lite-instruct-q4_K_M";
const CODELLAMA: &str = "codellama:70b-instruct-q4_K_M";

pub static CATALOG: [ModelCatalogEntry; 4] = [
    ModelCatalogEntry {
        name: QWEN_CODER,
        context_window: 32_768,
        specializations: &["code", "typescript", "python", "javascript"],
        performance: PerformanceClass::Quality,
    },
    ModelCatalogEntry {
        name: QWEN_GENERAL,
        context_window: 8_192,
        specializations: &["general", "explanation"],
        performance: PerformanceClass::Fast,
    },
    ModelCatalogEntry {
        name: DEEPSEEK,
        context_window: 16_384,
        specializations: &["code", "optimization", "refactoring"],
        performance: PerformanceClass::Balanced,
    },
    ModelCatalogEntry {
        name: CODELLAMA,
        context_window: 4_096,
        specializations: &["code", "debugging", "testing"],
        performance: PerformanceClass::Quality,
    },
];

pub fn get_model_info(name: &str) -> Option<&'static ModelCatalogEntry> {
    CATALOG.iter().find(|m| m.name == name)
}

/// Pick the catalog model best suited to a request.
///
/// File size wins over language, which wins over task.
pub fn select_best_model(task: Task, language: &str, file_size: usize) -> &'static str {
    if file_size > LARGE_FILE_BYTES {
        return CATALOG
            .iter()
            .find(|m| m.performance == PerformanceClass::Fast)
            .map(|m| m.name)
            .unwrap_or(CATALOG[0].name);
    }

    match language.to_ascii_lowercase().as_str() {
        "typescript" | "javascript" | "react" | "nextjs" => return QWEN_CODER,
        "python" => return DEEPSEEK,
        _ => {}
    }

    let tag = match task {
        Task::Debug => "debugging",
        Task::Test => "testing",
        Task::Optimize => "optimization",
        Task::Explain => "explanation",
        Task::Generate | Task::Review => return QWEN_CODER,
    };
    CATALOG
        .iter()
        .find(|m| m.specializes_in(tag))
        .map_or(QWEN_CODER, |m| m.name)
}

/// Catalog models that are not installed yet, in catalog order
pub fn missing_models(installed: &BTreeSet<String>) -> Vec<&'static ModelCatalogEntry> {
    CATALOG
        .iter()
        .filter(|m| !installed.contains(m.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_files_use_fast_model() {
        assert_eq!(select_best_model(Task::Debug, "python", 20_000), QWEN_GENERAL);
    }

    #[test]
    fn test_language_beats_task() {
        assert_eq!(select_best_model(Task::Debug, "TypeScript", 100), QWEN_CODER);
        assert_eq!(select_best_model(Task::Explain, "python", 100), DEEPSEEK);
    }

    #[test]
    fn test_task_choice_for_other_languages() {
        assert_eq!(select_best_model(Task::Test, "rust", 100), CODELLAMA);
        assert_eq!(select_best_model(Task::Optimize, "go", 100), DEEPSEEK);
        assert_eq!(select_best_model(Task::Explain, "go", 100), QWEN_GENERAL);
        assert_eq!(select_best_model(Task::Review, "go", 100), QWEN_CODER);
    }

    #[test]
    fn test_every_selection_is_in_catalog() {
        let tasks = [
            Task::Generate,
            Task::Explain,
            Task::Optimize,
            Task::Debug,
            Task::Test,
            Task::Review,
        ];
        for task in tasks {
            for lang in ["rust", "python", "javascript"] {
                for size in [0, LARGE_FILE_BYTES + 1] {
                    assert!(get_model_info(select_best_model(task, lang, size)).is_some());
                }
            }
        }
    }

    #[test]
    fn test_missing_models() {
        let installed: BTreeSet<String> = [QWEN_CODER, "llama3:8b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let missing: Vec<&str> = missing_models(&installed).iter().map(|m| m.name).collect();
        assert_eq!(missing, vec![QWEN_GENERAL, DEEPSEEK, CODELLAMA]);
    }

    #[test]
    fn test_model_info() {
        let info = get_model_info(CODELLAMA).unwrap();
        assert_eq!(info.context_window, 4_096);
        assert!(info.specializes_in("Debugging"));
        assert!(get_model_info("unknown").is_none());
    }
}
