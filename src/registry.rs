use std::collections::HashSet;

/// Client-side mirror of the backend's document store: the full list of
/// uploaded documents plus the subset selected to scope the next query.
///
/// The list is replaced wholesale from `/list_docs` after every mutation;
/// nothing is diffed incrementally.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    all: Vec<String>,
    selected: HashSet<String>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn docs(&self) -> &[String] {
        &self.all
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn is_selected(&self, doc: &str) -> bool {
        self.selected.contains(doc)
    }

    pub fn selection_is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn all_selected(&self) -> bool {
        !self.all.is_empty() && self.selected.len() == self.all.len()
    }

    /// Replace the document list with the authoritative one from the backend.
    /// Selections referring to documents no longer present are pruned so that
    /// `selected` stays a subset of `all`.
    pub fn apply_refresh(&mut self, docs: Vec<String>) {
        self.all = docs;
        let known: HashSet<&String> = self.all.iter().collect();
        self.selected.retain(|doc| known.contains(doc));
    }

    pub fn toggle(&mut self, doc: &str) {
        if !self.selected.remove(doc) {
            self.selected.insert(doc.to_string());
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.all.iter().cloned().collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// The documents a query is restricted to: the explicit selection if there
    /// is one, otherwise every known document. Order follows the backend list.
    pub fn effective_scope(&self) -> Vec<String> {
        if self.selected.is_empty() {
            self.all.clone()
        } else {
            self.selection()
        }
    }

    /// The selected documents, in backend list order.
    pub fn selection(&self) -> Vec<String> {
        self.all
            .iter()
            .filter(|doc| self.selected.contains(*doc))
            .cloned()
            .collect()
    }
}
