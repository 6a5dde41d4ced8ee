// Rule matcher - static deny-list checks over listing text.
//
// Pure functions only. Matching is best-effort: plain case-insensitive
// substring search for keywords, exact match for categories.

use super::moderation_config::PolicyLists;

/// What the deny-lists caught in one listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleMatches {
    /// Banned keywords found in the text, in deny-list order.
    pub keywords: Vec<String>,
    /// The category, if it is on the banned list.
    pub banned_category: Option<String>,
}

impl RuleMatches {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.banned_category.is_none()
    }
}

pub struct RuleMatcher<'a> {
    policy: &'a PolicyLists,
}

impl<'a> RuleMatcher<'a> {
    pub fn new(policy: &'a PolicyLists) -> Self {
        Self { policy }
    }

    /// Build the lower-cased blob the keyword check runs over.
    pub fn text_blob(title: &str, description: &str, tags: &[String]) -> String {
        format!("{} {} {}", title, description, tags.join(" "))
            .trim()
            .to_lowercase()
    }

    /// Run keyword and category checks.
    pub fn check(&self, text_blob: &str, category: &str) -> RuleMatches {
        RuleMatches {
            keywords: self.matching_keywords(text_blob),
            banned_category: self.banned_category(category),
        }
    }

    pub fn matching_keywords(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        if text.trim().is_empty() {
            return Vec::new();
        }

        self.keywords()
            .filter(|keyword| text.contains(keyword.as_str()))
            .collect()
    }

    pub fn banned_category(&self, category: &str) -> Option<String> {
        let category = category.trim().to_lowercase();
        if category.is_empty() {
            return None;
        }

        self.policy
            .banned_categories
            .iter()
            .any(|c| c.trim().to_lowercase() == category)
            .then_some(category)
    }

    /// First banned keyword contained in an image label, if any.
    pub fn first_keyword_in_label(&self, label: &str) -> Option<String> {
        let label = label.to_lowercase();
        if label.trim().is_empty() {
            return None;
        }
        self.keywords().find(|keyword| label.contains(keyword.as_str()))
    }

    fn keywords(&self) -> impl Iterator<Item = String> + '_ {
        // A blank keyword would match every listing
        self.policy
            .banned_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PolicyLists {
        PolicyLists {
            version: "test".to_string(),
            banned_keywords: vec!["dao".to_string(), "Súng".to_string(), " ".to_string()],
            banned_categories: vec!["vũ khí".to_string()],
        }
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let policy = policy();
        let matcher = RuleMatcher::new(&policy);

        let blob = RuleMatcher::text_blob("Bán SÚNG đồ chơi", "", &[]);
        let matches = matcher.check(&blob, "đồ chơi");

        assert_eq!(matches.keywords, vec!["súng".to_string()]);
        assert!(matches.banned_category.is_none());
    }

    #[test]
    fn test_empty_text_matches_nothing() {
        let policy = policy();
        let matcher = RuleMatcher::new(&policy);

        let blob = RuleMatcher::text_blob("", "", &[]);
        assert!(blob.is_empty());
        assert!(matcher.check(&blob, "").is_empty());
    }

    #[test]
    fn test_blank_keyword_never_matches() {
        let policy = policy();
        let matcher = RuleMatcher::new(&policy);

        let matches = matcher.matching_keywords("áo thun nam size l");
        assert!(matches.is_empty());
    }

    #[test]
    fn test_category_requires_exact_match() {
        let policy = policy();
        let matcher = RuleMatcher::new(&policy);

        assert_eq!(matcher.banned_category("Vũ Khí"), Some("vũ khí".to_string()));
        assert_eq!(matcher.banned_category("vũ khí đồ chơi"), None);
    }

    #[test]
    fn test_first_keyword_in_label() {
        let policy = policy();
        let matcher = RuleMatcher::new(&policy);

        assert_eq!(
            matcher.first_keyword_in_label("Con dao bếp"),
            Some("dao".to_string())
        );
        assert_eq!(matcher.first_keyword_in_label("T-shirt"), None);
    }
}
