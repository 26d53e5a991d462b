//! Hierarchical MeSH Classification
//!
//! Rolls flat descriptor annotations up into three levels of ancestor
//! categories, using the tree-number index of a loaded [`Taxonomy`].
//!
//! # Algorithm
//! For every tree number of every input descriptor (`C04.588.180`):
//! - **Level 1** (`C04`): major-class name for the leading letter, else the
//!   descriptor registered for `C04`, else the raw prefix
//! - **Level 2** (`C04.588`): the descriptor registered for `C04`, else the
//!   level-1 resolution applied to `C04.588`
//! - **Level 3** (`C04.588.180`): the descriptor registered for `C04.588`,
//!   else the level-1 resolution applied to `C04.588.180`
//!
//! Segments past the third are ignored. Names are appended without dedup:
//! a descriptor with two tree numbers under the same ancestor is listed twice.

use crate::taxonomy::Taxonomy;
use indexmap::{IndexMap, IndexSet};

/// The sixteen top-level MeSH branches
pub const MAJOR_CLASSES: [(char, &str); 16] = [
    ('A', "Anatomy"),
    ('B', "Organisms"),
    ('C', "Diseases"),
    ('D', "Chemicals and Drugs"),
    ('E', "Analytical, Diagnostic and Therapeutic Techniques, and Equipment"),
    ('F', "Psychiatry and Psychology"),
    ('G', "Phenomena and Processes"),
    ('H', "Disciplines and Occupations"),
    ('I', "Anthropology, Education, Sociology, and Social Phenomena"),
    ('J', "Technology, Industry, and Agriculture"),
    ('K', "Humanities"),
    ('L', "Information Science"),
    ('M', "Named Groups"),
    ('N', "Health Care"),
    ('V', "Publication Characteristics"),
    ('Z', "Geographicals"),
];

/// Major-class name for a single-letter branch code
pub fn major_class(code: char) -> Option<&'static str> {
    MAJOR_CLASSES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Category name → descriptor names, both in first-insertion order
pub type CategoryMap = IndexMap<String, Vec<String>>;

/// Three-level rollup for one set of descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    pub level1: CategoryMap,
    pub level2: CategoryMap,
    pub level3: CategoryMap,
}

impl ClassificationResult {
    pub fn is_empty(&self) -> bool {
        self.level1.is_empty() && self.level2.is_empty() && self.level3.is_empty()
    }

    pub fn levels(&self) -> [&CategoryMap; 3] {
        [&self.level1, &self.level2, &self.level3]
    }
}

/// Classify a set of descriptor names
///
/// The input is treated as a set (repeats are ignored, first-seen order is
/// kept). Names the taxonomy does not know contribute nothing. The result is
/// a pure function of the taxonomy and the input.
pub fn classify<I, S>(taxonomy: &Taxonomy, descriptor_names: I) -> ClassificationResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let names: IndexSet<String> = descriptor_names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .collect();

    let mut result = ClassificationResult::default();

    for name in &names {
        let Some(descriptor) = taxonomy.descriptor(name) else {
            continue;
        };

        for tree_number in &descriptor.tree_numbers {
            let segments: Vec<&str> = tree_number.split('.').collect();

            for depth in 1..=segments.len().min(3) {
                let prefix = segments[..depth].join(".");
                match depth {
                    1 => {
                        let category = resolve(taxonomy, &prefix);
                        append(&mut result.level1, category, name);
                    }
                    _ => {
                        let parent = segments[..depth - 1].join(".");
                        let category = match taxonomy.name_for_tree_number(&parent) {
                            Some(parent_name) => parent_name.to_string(),
                            None => resolve(taxonomy, &prefix),
                        };
                        let level = if depth == 2 {
                            &mut result.level2
                        } else {
                            &mut result.level3
                        };
                        append(level, category, name);
                    }
                }
            }
        }
    }

    result
}

/// Major class, then registered descriptor, then the raw prefix
fn resolve(taxonomy: &Taxonomy, prefix: &str) -> String {
    let major: Option<&str> = prefix.chars().next().and_then(major_class);
    major
        .or_else(|| taxonomy.name_for_tree_number(prefix))
        .unwrap_or(prefix)
        .to_string()
}

fn append(level: &mut CategoryMap, category: String, name: &str) {
    level.entry(category).or_default().push(name.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Descriptor;

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_descriptors([
            Descriptor::new("Neoplasms", ["C04"]),
            Descriptor::new("Neoplasms by Site", ["C04.588"]),
            Descriptor::new("Bone Neoplasms", ["C04.588.180"]),
            Descriptor::new("Respiratory Tract Diseases", ["C08"]),
            Descriptor::new("Lung Diseases", ["C08.381"]),
            Descriptor::new("Lung Neoplasms", ["C04.588.894.797.520", "C08.381.540"]),
            Descriptor::new("Orphan", ["Q99.001.002"]),
        ])
    }

    #[test]
    fn test_empty_input_yields_empty_levels() {
        let result = classify(&taxonomy(), Vec::<String>::new());
        assert!(result.is_empty());
        assert_eq!(result, ClassificationResult::default());
    }

    #[test]
    fn test_three_level_rollup() {
        let result = classify(&taxonomy(), ["Bone Neoplasms"]);

        assert_eq!(result.level1["Diseases"], vec!["Bone Neoplasms"]);
        assert_eq!(result.level2["Neoplasms"], vec!["Bone Neoplasms"]);
        assert_eq!(result.level3["Neoplasms by Site"], vec!["Bone Neoplasms"]);
        assert_eq!(result.level1.len(), 1);
        assert_eq!(result.level2.len(), 1);
        assert_eq!(result.level3.len(), 1);
    }

    #[test]
    fn test_unregistered_ancestors_fall_back() {
        // C04.588.180 with nothing registered above it
        let taxonomy = Taxonomy::from_descriptors([Descriptor::new("Bone Neoplasms", ["C04.588.180"])]);
        let result = classify(&taxonomy, ["Bone Neoplasms"]);

        assert!(result.level1.contains_key("Diseases"));
        // The fallback resolution of the prefix itself still hits the major class
        assert!(result.level2.contains_key("Diseases"));
        assert!(result.level3.contains_key("Diseases"));
    }

    #[test]
    fn test_unknown_major_class_uses_raw_prefix() {
        let result = classify(&taxonomy(), ["Orphan"]);
        assert_eq!(result.level1["Q99"], vec!["Orphan"]);
        assert_eq!(result.level2["Q99.001"], vec!["Orphan"]);
        // Parent Q99.001 is unregistered, but Q99.001.002 itself resolves
        assert_eq!(result.level3["Orphan"], vec!["Orphan"]);
    }

    #[test]
    fn test_unregistered_three_segment_path_uses_raw_prefix() {
        let taxonomy = Taxonomy::from_descriptors([Descriptor::new("Deep Orphan", ["Q98.001.002.003"])]);
        let result = classify(&taxonomy, ["Deep Orphan"]);

        assert_eq!(result.level1["Q98"], vec!["Deep Orphan"]);
        assert_eq!(result.level2["Q98.001"], vec!["Deep Orphan"]);
        assert_eq!(result.level3["Q98.001.002"], vec!["Deep Orphan"]);
    }

    #[test]
    fn test_shared_ancestor_appends_without_dedup() {
        let result = classify(&taxonomy(), ["Lung Neoplasms"]);

        // Two C-branch tree numbers → listed twice under Diseases
        assert_eq!(result.level1["Diseases"], vec!["Lung Neoplasms", "Lung Neoplasms"]);
        assert_eq!(result.level2["Neoplasms"], vec!["Lung Neoplasms"]);
        assert_eq!(result.level2["Respiratory Tract Diseases"], vec!["Lung Neoplasms"]);
        assert_eq!(result.level3["Neoplasms by Site"], vec!["Lung Neoplasms"]);
        assert_eq!(result.level3["Lung Diseases"], vec!["Lung Neoplasms"]);
    }

    #[test]
    fn test_short_tree_numbers_only_fill_their_levels() {
        let result = classify(&taxonomy(), ["Neoplasms"]);
        assert_eq!(result.level1["Diseases"], vec!["Neoplasms"]);
        assert!(result.level2.is_empty());
        assert!(result.level3.is_empty());
    }

    #[test]
    fn test_unknown_and_repeated_names() {
        let result = classify(&taxonomy(), ["Bone Neoplasms", "Not In MeSH", "Bone Neoplasms"]);
        assert_eq!(result.level1["Diseases"], vec!["Bone Neoplasms"]);
    }

    #[test]
    fn test_classification_is_repeatable() {
        let taxonomy = taxonomy();
        let input = ["Lung Neoplasms", "Bone Neoplasms", "Orphan"];
        assert_eq!(classify(&taxonomy, input), classify(&taxonomy, input));
    }

    #[test]
    fn test_major_class_table() {
        assert_eq!(major_class('C'), Some("Diseases"));
        assert_eq!(major_class('Z'), Some("Geographicals"));
        assert_eq!(major_class('Q'), None);
    }
}
