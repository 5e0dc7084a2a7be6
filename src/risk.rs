use crate::models::{AcademicFlags, Escalation, RiskLevel, CRITICAL_PRIORITY};

/// Risk tier for a student, first matching tier wins.
pub fn score(escalations: &[Escalation], flags: AcademicFlags) -> RiskLevel {
    let urgent = escalations
        .iter()
        .filter(|escalation| escalation.priority >= CRITICAL_PRIORITY)
        .count();

    tier(escalations.len(), urgent, flags)
}

/// Same policy as [`score`], from counts alone. Stores that aggregate in SQL
/// call this directly.
pub fn tier(total: usize, urgent: usize, flags: AcademicFlags) -> RiskLevel {
    if flags.is_failing && urgent >= 1 {
        return RiskLevel::Critical;
    }

    match total {
        0..=2 => RiskLevel::Low,
        3..=4 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}
