//! Boundary types for extracted-skill payloads.
//!
//! Extraction output is untrusted, free-text-derived data from an upstream
//! AI service. It is converted into typed `ExtractedSkill` values here,
//! before it touches the merge logic: unknown categories fall back to a
//! default bucket, broken entries are dropped, and nothing in this module
//! can fail the merge outright.

use serde::Deserialize;

pub const VALID_CATEGORIES: [&str; 5] = [
    "technical",
    "soft_skills",
    "languages",
    "tools",
    "certifications",
];

pub const DEFAULT_CATEGORY: &str = "technical";

const MAX_NAME_LEN: usize = 255;

/// Wire shape of one extracted skill, all fields optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExtractedSkill {
    #[serde(default)]
    pub skill_name: Option<String>,
    #[serde(default)]
    pub skill_category: Option<String>,
    #[serde(default)]
    pub experience_years: Option<f64>,
}

/// Validated skill ready for merging. Names are kept verbatim and matched
/// case-sensitively (open product question whether "Python" and "python"
/// should collapse; the observed behavior keeps them distinct).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSkill {
    pub skill_name: String,
    pub skill_category: String,
    pub experience_years: Option<f64>,
}

/// Maps a raw category to one of the valid buckets, defaulting to
/// `technical` for anything unrecognized.
pub fn normalize_category(raw: Option<&str>) -> String {
    let category = raw.unwrap_or("").trim().to_lowercase();
    if VALID_CATEGORIES.contains(&category.as_str()) {
        return category;
    }
    match category.as_str() {
        "programming" | "programmierung" => "technical",
        "sprachen" | "language" => "languages",
        "soft_skill" | "softskills" => "soft_skills",
        "tool" => "tools",
        "certification" | "zertifikat" | "zertifikate" => "certifications",
        _ => DEFAULT_CATEGORY,
    }
    .to_string()
}

/// Validates one raw entry; `None` drops it from the batch.
pub fn normalize_skill(raw: &RawExtractedSkill) -> Option<ExtractedSkill> {
    let name = raw.skill_name.as_deref().unwrap_or("").trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return None;
    }

    let experience_years = raw
        .experience_years
        .filter(|years| years.is_finite() && *years >= 0.0);

    Some(ExtractedSkill {
        skill_name: name.to_string(),
        skill_category: normalize_category(raw.skill_category.as_deref()),
        experience_years,
    })
}

pub fn normalize_batch(raw: &[RawExtractedSkill]) -> Vec<ExtractedSkill> {
    raw.iter().filter_map(normalize_skill).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: Option<&str>, category: Option<&str>, years: Option<f64>) -> RawExtractedSkill {
        RawExtractedSkill {
            skill_name: name.map(String::from),
            skill_category: category.map(String::from),
            experience_years: years,
        }
    }

    #[test]
    fn test_valid_categories_pass_through() {
        for category in VALID_CATEGORIES {
            assert_eq!(normalize_category(Some(category)), category);
        }
    }

    #[test]
    fn test_category_aliases_map() {
        assert_eq!(normalize_category(Some("programming")), "technical");
        assert_eq!(normalize_category(Some("Programmierung")), "technical");
        assert_eq!(normalize_category(Some("Sprachen")), "languages");
        assert_eq!(normalize_category(Some("soft_skill")), "soft_skills");
        assert_eq!(normalize_category(Some("tool")), "tools");
        assert_eq!(normalize_category(Some("Zertifikate")), "certifications");
    }

    #[test]
    fn test_unknown_and_empty_category_default_to_technical() {
        assert_eq!(normalize_category(Some("interpretive dance")), DEFAULT_CATEGORY);
        assert_eq!(normalize_category(Some("")), DEFAULT_CATEGORY);
        assert_eq!(normalize_category(None), DEFAULT_CATEGORY);
    }

    #[test]
    fn test_blank_name_is_dropped() {
        assert!(normalize_skill(&raw(None, Some("technical"), None)).is_none());
        assert!(normalize_skill(&raw(Some("   "), Some("technical"), None)).is_none());
    }

    #[test]
    fn test_name_is_trimmed_not_lowercased() {
        let skill = normalize_skill(&raw(Some("  Python "), None, None)).unwrap();
        assert_eq!(skill.skill_name, "Python");
    }

    #[test]
    fn test_negative_experience_becomes_none() {
        let skill = normalize_skill(&raw(Some("Python"), None, Some(-2.0))).unwrap();
        assert_eq!(skill.experience_years, None);
    }

    #[test]
    fn test_non_finite_experience_becomes_none() {
        let skill = normalize_skill(&raw(Some("Python"), None, Some(f64::NAN))).unwrap();
        assert_eq!(skill.experience_years, None);
    }

    #[test]
    fn test_batch_filters_invalid_entries() {
        let batch = [
            raw(Some("Python"), Some("technical"), Some(2.0)),
            raw(None, Some("technical"), Some(1.0)),
            raw(Some("Git"), Some("tool"), None),
        ];
        let normalized = normalize_batch(&batch);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].skill_name, "Python");
        assert_eq!(normalized[1].skill_category, "tools");
    }
}
