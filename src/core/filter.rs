//! Capability selection filter (§4.7 step 2): for each upstream server, the
//! subset of its tools/prompts/resources/resource-templates that a vMCP's
//! `selected_*` maps actually expose. An empty selection list for a server
//! id is treated as "select everything from this server" — the common case
//! of adding a server without hand-picking tools one at a time.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct CapabilityFilter {
    selected: Option<HashSet<String>>,
}

impl CapabilityFilter {
    pub fn from_selection(names: &[String]) -> Self {
        if names.is_empty() {
            Self { selected: None }
        } else {
            Self {
                selected: Some(names.iter().cloned().collect()),
            }
        }
    }

    pub fn is_selected(&self, name: &str) -> bool {
        match &self.selected {
            None => true,
            Some(set) => set.contains(name),
        }
    }

    pub fn retain_selected<T>(&self, items: Vec<T>, name_of: impl Fn(&T) -> &str) -> Vec<T> {
        items.into_iter().filter(|item| self.is_selected(name_of(item))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_allows_everything() {
        let filter = CapabilityFilter::from_selection(&[]);
        assert!(filter.is_selected("anything"));
    }

    #[test]
    fn non_empty_selection_restricts_to_named_items() {
        let filter = CapabilityFilter::from_selection(&["read_file".to_string()]);
        assert!(filter.is_selected("read_file"));
        assert!(!filter.is_selected("write_file"));
    }

    #[test]
    fn retain_selected_filters_a_vec() {
        let filter = CapabilityFilter::from_selection(&["a".to_string()]);
        let items = vec!["a".to_string(), "b".to_string()];
        let kept = filter.retain_selected(items, |s| s.as_str());
        assert_eq!(kept, vec!["a".to_string()]);
    }
}
