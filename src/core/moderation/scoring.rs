// Scoring engine - turns analyses into scores and a decision.
//
// Every function here is deterministic: the same issues and scores always
// produce the same decision.

use super::moderation_models::{Issue, ModerationStatus, Severity};

/// Total score at or above which a listing is approved.
pub const APPROVE_THRESHOLD: u32 = 85;
/// Total score below which a listing is rejected.
pub const REJECT_THRESHOLD: u32 = 60;

const CONTENT_WEIGHT: f64 = 0.4;
const IMAGE_WEIGHT: f64 = 0.4;
const COMPLIANCE_WEIGHT: f64 = 0.2;

const NO_ISSUES_REASON: &str = "Product does not meet platform standards.";
const ISSUE_LIST_PREFIX: &str = "Product rejected for the following reasons: ";

/// Clamp a signed intermediate score into [0, 100].
pub fn clamp_score(score: i64) -> u32 {
    score.clamp(0, 100) as u32
}

/// Penalty applied to the compliance score per issue.
fn compliance_penalty(severity: Severity) -> i64 {
    match severity {
        Severity::High => 40,
        Severity::Medium => 20,
        Severity::Low => 10,
    }
}

/// Compliance score from all issues. A banned category forces 0.
pub fn compliance_score<'a>(
    category_banned: bool,
    issues: impl IntoIterator<Item = &'a Issue>,
) -> u32 {
    if category_banned {
        return 0;
    }

    let penalty: i64 = issues
        .into_iter()
        .map(|issue| compliance_penalty(issue.severity))
        .sum();
    clamp_score(100 - penalty)
}

/// Weighted total, rounded half away from zero.
pub fn total_score(content_score: u32, image_score: u32, compliance_score: u32) -> u32 {
    let weighted = content_score as f64 * CONTENT_WEIGHT
        + image_score as f64 * IMAGE_WEIGHT
        + compliance_score as f64 * COMPLIANCE_WEIGHT;
    clamp_score(weighted.round() as i64)
}

pub fn decide(total_score: u32) -> ModerationStatus {
    if total_score >= APPROVE_THRESHOLD {
        ModerationStatus::Approved
    } else if total_score < REJECT_THRESHOLD {
        ModerationStatus::Rejected
    } else {
        ModerationStatus::InReview
    }
}

/// Human-readable explanation for a rejection. Never empty.
pub fn rejection_reason(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return NO_ISSUES_REASON.to_string();
    }

    let high: Vec<&str> = issues
        .iter()
        .filter(|i| i.severity == Severity::High)
        .map(|i| i.description.as_str())
        .collect();
    if !high.is_empty() {
        return high.join(". ");
    }

    let all: Vec<&str> = issues.iter().map(|i| i.description.as_str()).collect();
    format!("{}{}", ISSUE_LIST_PREFIX, all.join("; "))
}

/// Scores and decision for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub compliance_score: u32,
    pub total_score: u32,
    pub status: ModerationStatus,
    pub rejection_reason: Option<String>,
}

/// Combine the analyzer scores into a verdict.
pub fn score(
    content_score: u32,
    image_score: u32,
    category_banned: bool,
    issues: &[Issue],
) -> Verdict {
    let compliance = compliance_score(category_banned, issues);
    let mut total = total_score(content_score, image_score, compliance);
    if category_banned {
        // A banned category can never leave the rejected band
        total = total.min(REJECT_THRESHOLD - 1);
    }
    let status = decide(total);
    let rejection_reason = (status == ModerationStatus::Rejected).then(|| rejection_reason(issues));

    Verdict {
        compliance_score: compliance,
        total_score: total,
        status,
        rejection_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::IssueField;

    fn issue(severity: Severity, description: &str) -> Issue {
        Issue::content(severity, IssueField::Content, description)
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(decide(100), ModerationStatus::Approved);
        assert_eq!(decide(85), ModerationStatus::Approved);
        assert_eq!(decide(84), ModerationStatus::InReview);
        assert_eq!(decide(60), ModerationStatus::InReview);
        assert_eq!(decide(59), ModerationStatus::Rejected);
        assert_eq!(decide(0), ModerationStatus::Rejected);
    }

    #[test]
    fn test_decision_partitions_every_score() {
        for total in 0..=100u32 {
            let status = decide(total);
            assert_eq!(status == ModerationStatus::Approved, total >= 85);
            assert_eq!(status == ModerationStatus::Rejected, total < 60);
            assert_eq!(
                status == ModerationStatus::InReview,
                (60..85).contains(&total)
            );
        }
    }

    #[test]
    fn test_banned_category_forces_zero_compliance() {
        assert_eq!(compliance_score(true, &[]), 0);
        assert_eq!(compliance_score(false, &[]), 100);
    }

    #[test]
    fn test_compliance_penalties_and_clamp() {
        let issues = vec![
            issue(Severity::High, "a"),
            issue(Severity::Medium, "b"),
            issue(Severity::Low, "c"),
        ];
        assert_eq!(compliance_score(false, &issues), 30);

        let many = vec![issue(Severity::High, "x"); 5];
        assert_eq!(compliance_score(false, &many), 0);
    }

    #[test]
    fn test_total_score_weights_and_rounding() {
        assert_eq!(total_score(100, 100, 100), 100);
        assert_eq!(total_score(0, 0, 0), 0);
        // 75*0.4 + 100*0.4 + 100*0.2 = 90
        assert_eq!(total_score(75, 100, 100), 90);
        // 61*0.4 + 61*0.4 + 62*0.2 = 61.2
        assert_eq!(total_score(61, 61, 62), 61);
        // 64*0.4 + 60*0.4 + 60*0.2 = 61.6
        assert_eq!(total_score(64, 60, 60), 62);
    }

    #[test]
    fn test_rejection_reason_prefers_high_severity() {
        let issues = vec![
            issue(Severity::Low, "Title is too short"),
            issue(Severity::High, "First"),
            issue(Severity::High, "Second"),
        ];
        assert_eq!(rejection_reason(&issues), "First. Second");
    }

    #[test]
    fn test_rejection_reason_lists_all_without_high() {
        let issues = vec![
            issue(Severity::Low, "Title is too short"),
            issue(Severity::Medium, "Invalid price: 0"),
        ];
        assert_eq!(
            rejection_reason(&issues),
            "Product rejected for the following reasons: Title is too short; Invalid price: 0"
        );
    }

    #[test]
    fn test_rejection_reason_without_issues() {
        assert_eq!(rejection_reason(&[]), NO_ISSUES_REASON);
    }

    #[test]
    fn test_banned_category_caps_total_below_rejection() {
        let verdict = score(100, 100, true, &[]);
        assert_eq!(verdict.compliance_score, 0);
        assert_eq!(verdict.total_score, REJECT_THRESHOLD - 1);
        assert_eq!(verdict.status, ModerationStatus::Rejected);
    }

    #[test]
    fn test_verdict_only_rejected_has_reason() {
        let approved = score(100, 100, false, &[]);
        assert_eq!(approved.status, ModerationStatus::Approved);
        assert!(approved.rejection_reason.is_none());

        let rejected = score(10, 0, true, &[]);
        assert_eq!(rejected.status, ModerationStatus::Rejected);
        assert_eq!(rejected.compliance_score, 0);
        assert!(!rejected.rejection_reason.unwrap().is_empty());
    }
}
