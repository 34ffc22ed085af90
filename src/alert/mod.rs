/// Flood categories and risk grading.
///
/// Submodules:
/// - `thresholds`: named flood stages, stage classification, risk levels.

pub mod thresholds;
