//! The case catalogue.
//!
//! Each module builds one top-level section of RFC 7540. [`suite`] assembles
//! them in report order.


use crate::config::SectionFilter;
use crate::testcase::{Case, Node, Section};

/// Every section, in the order they are run and reported.
pub fn suite() -> Section {
    Section::root()
        .section(frame_size::section())
        .section(header_compression::section())
        .section(http_exchange::section())
}

/// Look up a case by its `section#n` id.
pub fn find(id: &str) -> Option<Case> {
    suite().cases().into_iter().find(|c| c.id == id).cloned()
}

/// List all cases as `(id, description)`.
pub fn list_all() -> Vec<(String, &'static str)> {
    suite()
        .cases()
        .iter()
        .map(|case| (case.id.clone(), case.description))
        .collect()
}

/// List the cases `filter` selects.
pub fn list_selected(filter: &SectionFilter) -> Vec<(String, &'static str)> {
    list_all()
        .into_iter()
        .filter(|(case_id, _)| filter.selects(case_id))
        .collect()
}

/// Every section in traversal order, as `(id, title, depth)`.
pub fn sections() -> Vec<(String, String, usize)> {
    fn walk(section: &Section, out: &mut Vec<(String, String, usize)>) {
        for child in &section.children {
            if let Node::Section(s) = child {
                out.push((s.id.clone(), s.title.clone(), s.depth));
                walk(s, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(&suite(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_every_case() {
        let ids: Vec<String> = list_all().into_iter().map(|(id, _)| id).collect();
        assert_eq!(
            ids,
            vec![
                "4.2#1", "4.3#1", "8.1.2#1", "8.1.2.1#1", "8.1.2.1#2", "8.1.2.1#3", "8.1.2.2#1",
                "8.1.2.2#2", "8.1.2.3#1", "8.1.2.6#1",
            ]
        );
    }

    #[test]
    fn section_depths() {
        let depths: Vec<(String, usize)> = sections().into_iter().map(|(id, _, d)| (id, d)).collect();
        assert_eq!(
            depths,
            vec![
                ("4.2".to_string(), 0),
                ("4.3".to_string(), 0),
                ("8.1".to_string(), 0),
                ("8.1.2".to_string(), 1),
                ("8.1.2.1".to_string(), 2),
                ("8.1.2.2".to_string(), 2),
                ("8.1.2.3".to_string(), 2),
                ("8.1.2.6".to_string(), 2),
            ]
        );
    }

    #[test]
    fn every_case_has_an_expectation_and_requirement() {
        for case in suite().cases() {
            assert!(!case.expectations.is_empty(), "{}", case.id);
            assert!(case.requirement.contains("MUST"), "{}", case.id);
        }
    }

    fn selected(list: &str) -> Vec<String> {
        let filter = SectionFilter::parse(list).unwrap();
        list_selected(&filter).into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn listing_follows_the_run_filter() {
        assert_eq!(selected("8.1.2.1").len(), 3);
        assert_eq!(selected("8.1").len(), 8);
        assert!(selected("8.10").is_empty());
        assert_eq!(selected("4.2,4.3"), vec!["4.2#1", "4.3#1"]);
        assert_eq!(selected("8.1.2#1, 4.3."), vec!["4.3#1", "8.1.2#1"]);
        assert_eq!(selected("").len(), 10);
        assert_eq!(find("4.3#1").unwrap().description, "Sends invalid header block fragment");
        assert!(find("4.3#2").is_none());
    }
}
