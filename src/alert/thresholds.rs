//! Flood stage thresholds, stage classification and risk levels.
//!
//! The risk engine only ever sees plain `name → stage` pairs; the category
//! ordering here exists for classification and for laying out tables.

use std::collections::BTreeMap;
use std::fmt;

/// Flood severity levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloodCategory {
    Action,
    Minor,
    Moderate,
    Major,
}

impl FloodCategory {
    pub const ALL: [FloodCategory; 4] = [
        FloodCategory::Action,
        FloodCategory::Minor,
        FloodCategory::Moderate,
        FloodCategory::Major,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FloodCategory::Action => "action",
            FloodCategory::Minor => "minor",
            FloodCategory::Moderate => "moderate",
            FloodCategory::Major => "major",
        }
    }

    /// Case-insensitive lookup; `"flood"` is accepted for minor flood stage.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "action" => Some(FloodCategory::Action),
            "minor" | "flood" => Some(FloodCategory::Minor),
            "moderate" => Some(FloodCategory::Moderate),
            "major" => Some(FloodCategory::Major),
            _ => None,
        }
    }
}

impl fmt::Display for FloodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named stage value, in feet.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodThreshold {
    pub name: String,
    pub stage: f64,
}

/// Unordered set of named flood stages for one gauge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FloodThresholds {
    stages: BTreeMap<String, f64>,
}

impl FloodThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        let mut thresholds = Self::new();
        for (name, stage) in pairs {
            thresholds.insert(name, *stage);
        }
        thresholds
    }

    /// Adds or replaces a threshold. Non-finite stages are ignored.
    pub fn insert(&mut self, name: &str, stage: f64) {
        if stage.is_finite() {
            self.stages.insert(name.to_string(), stage);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.stages.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.stages.iter().map(|(name, stage)| (name.as_str(), *stage))
    }

    /// Ascending by stage (ties broken by name), the order thresholds are drawn in.
    pub fn sorted(&self) -> Vec<FloodThreshold> {
        let mut out: Vec<FloodThreshold> = self
            .stages
            .iter()
            .map(|(name, stage)| FloodThreshold { name: name.clone(), stage: *stage })
            .collect();
        out.sort_by(|a, b| a.stage.total_cmp(&b.stage).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Thresholds whose names are known categories, least severe first.
    pub fn ordered_by_category(&self) -> Vec<(FloodCategory, f64)> {
        let mut out: Vec<(FloodCategory, f64)> = self
            .iter()
            .filter_map(|(name, stage)| FloodCategory::from_name(name).map(|c| (c, stage)))
            .collect();
        out.sort_by_key(|(category, _)| *category);
        out.dedup_by_key(|(category, _)| *category);
        out
    }

    /// Plain `name → stage` mapping for the exceedance engine.
    pub fn as_stage_map(&self) -> BTreeMap<String, f64> {
        self.stages.clone()
    }
}

/// A stage that has reached a flood category.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodAlert {
    pub category: FloodCategory,
    pub stage: f64,
    pub threshold_stage: f64,
    pub message: String,
}

/// Returns the most severe category whose stage `stage` meets or exceeds.
///
/// Returns `None` below the lowest known category or for a non-finite stage.
pub fn check_flood_stage(stage: f64, thresholds: &FloodThresholds) -> Option<FloodAlert> {
    if !stage.is_finite() {
        return None;
    }
    let (category, threshold_stage) = thresholds
        .ordered_by_category()
        .into_iter()
        .filter(|(_, threshold)| stage >= *threshold)
        .max_by_key(|(category, _)| *category)?;

    Some(FloodAlert {
        category,
        stage,
        threshold_stage,
        message: format!(
            "stage {:.2} ft at or above {} flood stage ({:.2} ft)",
            stage, category, threshold_stage
        ),
    })
}

/// Qualitative flood risk from a pair of exceedance probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Unlikely,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Grades the larger of two percentages: ≥50 high, ≥20 medium, ≥5 low.
    pub fn from_probabilities(short_term: f64, long_term: f64) -> Self {
        let finite = |p: f64| if p.is_finite() { p } else { 0.0 };
        let worst = finite(short_term).max(finite(long_term));
        if worst >= 50.0 {
            RiskLevel::High
        } else if worst >= 20.0 {
            RiskLevel::Medium
        } else if worst >= 5.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Unlikely
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Unlikely => write!(f, "Unlikely"),
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peoria() -> FloodThresholds {
        FloodThresholds::from_pairs(&[
            ("major", 24.0),
            ("action", 16.0),
            ("moderate", 20.0),
            ("minor", 18.0),
        ])
    }

    #[test]
    fn test_sorted_is_ascending_by_stage() {
        let names: Vec<String> = peoria().sorted().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["action", "minor", "moderate", "major"]);
    }

    #[test]
    fn test_non_finite_stages_are_skipped() {
        let thresholds = FloodThresholds::from_pairs(&[("action", f64::NAN), ("minor", 18.0)]);
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds.get("action"), None);
    }

    #[test]
    fn test_check_flood_stage_returns_highest_met_category() {
        let thresholds = peoria();
        assert_eq!(check_flood_stage(15.9, &thresholds), None);
        assert_eq!(
            check_flood_stage(16.0, &thresholds).map(|a| a.category),
            Some(FloodCategory::Action),
            "meeting the stage exactly counts"
        );
        let alert = check_flood_stage(21.3, &thresholds).expect("above moderate");
        assert_eq!(alert.category, FloodCategory::Moderate);
        assert_eq!(alert.threshold_stage, 20.0);
        assert_eq!(
            check_flood_stage(30.0, &thresholds).map(|a| a.category),
            Some(FloodCategory::Major)
        );
    }

    #[test]
    fn test_unknown_names_do_not_classify() {
        let thresholds = FloodThresholds::from_pairs(&[("record", 30.0)]);
        assert!(thresholds.ordered_by_category().is_empty());
        assert_eq!(check_flood_stage(35.0, &thresholds), None);
    }

    #[test]
    fn test_category_parsing_and_order() {
        assert_eq!(FloodCategory::from_name("Moderate"), Some(FloodCategory::Moderate));
        assert_eq!(FloodCategory::from_name("flood"), Some(FloodCategory::Minor));
        assert!(FloodCategory::Action < FloodCategory::Major);
    }

    #[test]
    fn test_risk_level_uses_worse_window() {
        assert_eq!(RiskLevel::from_probabilities(0.0, 50.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_probabilities(20.0, 3.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probabilities(5.0, 0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probabilities(4.9, 4.9), RiskLevel::Unlikely);
        assert_eq!(RiskLevel::from_probabilities(f64::NAN, 0.0), RiskLevel::Unlikely);
    }
}
