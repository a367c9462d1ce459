//! Authoring manuals embedded into prompts.
//!
//! Manuals are markdown files named `<type>_manual.md` under one directory.
//! Each is read at most once per process; a missing file caches as empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::items::model::ItemType;

pub struct ManualLibrary {
    dir: PathBuf,
    cache: Mutex<HashMap<&'static str, Arc<str>>>,
}

/// Manual key and excerpt limit (chars) per item type.
fn manual_for(kind: ItemType) -> (&'static str, usize) {
    match kind {
        ItemType::Blank => ("blank", 2000),
        ItemType::Vocabulary => ("vocabulary", 2000),
        ItemType::Grammar | ItemType::GrammarMulti => ("grammar", 2000),
        ItemType::Title => ("title", 1600),
        ItemType::Topic => ("topic", 1600),
    }
}

impl ManualLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The manual for `kind`, cut to its excerpt limit.
    pub fn excerpt(&self, kind: ItemType) -> String {
        let (key, limit) = manual_for(kind);
        let content = self.load(key);
        content.chars().take(limit).collect()
    }

    fn load(&self, key: &'static str) -> Arc<str> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(content) = cache.get(key) {
            return Arc::clone(content);
        }
        let path = self.dir.join(format!("{key}_manual.md"));
        let content: Arc<str> = match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded {key} manual");
                text.into()
            }
            Err(e) => {
                warn!(path = %path.display(), "No {key} manual available: {e}");
                "".into()
            }
        };
        cache.insert(key, Arc::clone(&content));
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_is_limited_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("title_manual.md");
        std::fs::write(&path, "가".repeat(2000)).unwrap();

        let library = ManualLibrary::new(dir.path());
        let excerpt = library.excerpt(ItemType::Title);
        assert_eq!(excerpt.chars().count(), 1600);

        // Cached: later edits are not observed.
        std::fs::write(&path, "changed").unwrap();
        assert_eq!(library.excerpt(ItemType::Title), excerpt);
    }

    #[test]
    fn test_grammar_types_share_a_manual() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("grammar_manual.md"), "# Grammar rules").unwrap();
        let library = ManualLibrary::new(dir.path());
        assert_eq!(library.excerpt(ItemType::Grammar), "# Grammar rules");
        assert_eq!(library.excerpt(ItemType::GrammarMulti), "# Grammar rules");
    }

    #[test]
    fn test_missing_manual_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let library = ManualLibrary::new(dir.path());
        assert_eq!(library.excerpt(ItemType::Blank), "");
    }
}
