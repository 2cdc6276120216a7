//! Coding tasks and the chat messages that ask for them

use crate::message::ChatMessage;
use std::fmt;
use std::path::Path;

/// Something the assistant can be asked to do with a piece of code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Generate,
    Explain,
    Optimize,
    Debug,
    Test,
    Review,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Generate => "generate",
            Task::Explain => "explain",
            Task::Optimize => "optimize",
            Task::Debug => "debug",
            Task::Test => "test",
            Task::Review => "review",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Task::Generate => "Write complete, production-ready code that meets the user's requirements.",
            Task::Explain => {
                "Explain the code in detail: its control flow, the patterns it uses, and where it could be improved."
            }
            Task::Optimize => {
                "Optimize the code for performance and readability while keeping its behavior."
            }
            Task::Debug => "Find bugs and likely problems in the code, then give fixes with explanations.",
            Task::Test => "Write thorough unit tests for the code, including edge cases.",
            Task::Review => {
                "Review the code for style, security, performance and maintainability."
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The code (or requirements) a task operates on
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub language: String,
    pub file_name: Option<String>,
    pub code: String,
}

impl TaskContext {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            file_name: None,
            code: code.into(),
        }
    }

    /// Context for a source file, with the language guessed from its extension
    pub fn for_file(path: &Path, code: impl Into<String>) -> Self {
        Self {
            language: language_for_path(path).to_string(),
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            code: code.into(),
        }
    }
}

/// Best-effort language name from a file extension
pub fn language_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        _ => "text",
    }
}

/// Build the system + user messages for `task`
pub fn task_messages(task: Task, context: &TaskContext) -> Vec<ChatMessage> {
    let mut system = String::from(
        "You are Dattoham AI, a coding assistant. Give complete, runnable answers that follow \
         the conventions of the language, handle errors, and consider security and performance.\n",
    );
    system.push_str(&format!("\nLanguage: {}", context.language));
    if let Some(name) = &context.file_name {
        system.push_str(&format!("\nFile: {}", name));
    }
    system.push_str(&format!("\n\nTask: {}", task.instruction()));

    let user = match task {
        Task::Generate => format!(
            "Generate code for these requirements:\n\n{}",
            context.code
        ),
        _ => format!(
            "Please {} the following code:\n\n```{}\n{}\n```",
            task, context.language, context.code
        ),
    };

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn test_task_names_are_lowercase() {
        assert_eq!(Task::Review.to_string(), "review");
        assert_eq!(Task::Optimize.as_str(), "optimize");
    }

    #[test]
    fn test_task_messages_fence_code() {
        let context = TaskContext::new("python", "print(1)");
        let messages = task_messages(Task::Debug, &context);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Language: python"));
        assert_eq!(
            messages[1].content,
            "Please debug the following code:\n\n```python\nprint(1)\n```"
        );
    }

    #[test]
    fn test_generate_takes_requirements_verbatim() {
        let context = TaskContext::new("rust", "a fizzbuzz function");
        let messages = task_messages(Task::Generate, &context);
        assert!(messages[1].content.ends_with("\n\na fizzbuzz function"));
        assert!(!messages[1].content.contains("```"));
    }

    #[test]
    fn test_context_for_file() {
        let context = TaskContext::for_file(Path::new("src/App.tsx"), "x");
        assert_eq!(context.language, "typescript");
        assert_eq!(context.file_name.as_deref(), Some("App.tsx"));
        assert!(task_messages(Task::Review, &context)[0]
            .content
            .contains("File: App.tsx"));
        assert_eq!(language_for_path(Path::new("Makefile")), "text");
    }
}
