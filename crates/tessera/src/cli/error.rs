//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn entity_not_found(key: &str) -> Self {
        Self::new(format!("Entity not found: {}", key))
            .with_context("Entities are matched by id or by name (case-insensitive)")
            .with_suggestions([
                "TRY: List known entities: tessera list".to_string(),
                "TRY: Import definitions first: tessera import entities.json".to_string(),
            ])
    }

    pub fn database_open_failed(path: &Path, reason: &str) -> Self {
        Self::new(format!("Failed to open metadata database: {}", reason))
            .with_context(format!("Database path: {}", path.display()))
            .with_suggestions([
                "TRY: Ensure the directory exists and is writable".to_string(),
                "TRY: Point at another database with --database or TESSERA_DATABASE".to_string(),
            ])
    }

    pub fn manifest_not_found(path: &Path) -> Self {
        Self::new(format!("Manifest not found: {}", path.display()))
            .with_context("The import command reads a JSON manifest of entities and enums")
            .with_suggestion(format!("TRY: Check that the file exists: ls -la {}", path.display()))
    }

    pub fn manifest_parse_error(path: &Path, details: &str) -> Self {
        Self::new(format!("Invalid manifest: {}", details))
            .with_context(format!("Failed to parse {}", path.display()))
            .with_suggestions([
                "TRY: A manifest is {\"enums\": [...], \"entities\": [...]}, an entity array, or one entity".to_string(),
                "TRY: Keys are camelCase: entityName, propertyName, dataType".to_string(),
            ])
    }

    pub fn entity_exists(name: &str) -> Self {
        Self::new(format!("Entity '{}' already exists", name))
            .with_context("Import creates new definitions unless asked to update")
            .with_suggestion("TRY: Re-run with --update to apply the manifest as an edit")
    }

    /// An engine operation that reported failure in its result.
    pub fn operation_failed(operation: &str, entity: &str, reason: &str) -> Self {
        Self::new(format!("{} failed for '{}': {}", operation, entity, reason))
            .with_suggestion(format!("TRY: Inspect the DDL audit log: tessera history {}", entity))
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a JSON object on stdout (for `--json` commands).
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({
            "error": format!("{:#}", err),
        }),
    };
    println!("{}", value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While publishing")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While publishing"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_entity_not_found() {
        let display = HelpfulError::entity_not_found("Order").to_string();
        assert!(display.contains("Entity not found: Order"));
        assert!(display.contains("tessera list"));
    }

    #[test]
    fn test_manifest_parse_error() {
        let path = PathBuf::from("/tmp/entities.json");
        let display = HelpfulError::manifest_parse_error(&path, "missing field `entityName`").to_string();
        assert!(display.contains("missing field `entityName`"));
        assert!(display.contains("/tmp/entities.json"));
        assert!(display.contains("TRY:"));
    }
}
