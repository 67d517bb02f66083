//! Grammar document loading.
//!
//! Any nested-map format works for grammar documents; this loader
//! picks the deserializer from the file extension. Unknown extensions
//! fall back to YAML, which also covers JSON-in-YAML documents.

use std::fs;
use std::path::Path;

use crate::error::{GrammarError, GrammarErrorKind};
use crate::grammar::raw::{RawGrammar, RawTranspilerGrammar};

/// Read and deserialize a grammar document.
pub fn load_grammar_file(path: &Path) -> Result<RawGrammar, GrammarError> {
    let text = read(path)?;
    let doc = match extension(path) {
        Some("json") => RawGrammar::from_json(&text),
        Some("toml") => RawGrammar::from_toml(&text),
        _ => RawGrammar::from_yaml(&text),
    };
    doc.map_err(|e| e.in_file(path))
}

/// Read and deserialize a transpiler grammar document.
pub fn load_transpiler_file(path: &Path) -> Result<RawTranspilerGrammar, GrammarError> {
    let text = read(path)?;
    let doc = match extension(path) {
        Some("json") => RawTranspilerGrammar::from_json(&text),
        _ => RawTranspilerGrammar::from_yaml(&text),
    };
    doc.map_err(|e| e.in_file(path))
}

fn read(path: &Path) -> Result<String, GrammarError> {
    fs::read_to_string(path).map_err(|e| {
        GrammarError::new(
            GrammarErrorKind::Io,
            format!("failed to read '{}': {}", path.display(), e),
        )
        .in_file(path)
    })
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_grammar_file(Path::new("/nonexistent/grammar.yaml")).unwrap_err();
        assert_eq!(err.kind, GrammarErrorKind::Io);
        assert!(err.file.is_some());
    }
}
