use kesef_core::category::{OTHER, OTHER_INCOME};
use kesef_core::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::NormalizedTransaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub match_type: MatchType,
    /// Restrict the rule to one direction; `None` applies to both.
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    pub fn new(category: &str, keywords: &[&str], direction: Option<Direction>) -> Self {
        Self {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            match_type: MatchType::Contains,
            direction,
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to parse category rules: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Rule for {category:?} has no keywords")]
    NoKeywords { category: String },
}

#[derive(Deserialize)]
struct RulesFile {
    #[serde(default)]
    rule: Vec<CategoryRule>,
}

/// A rule with its keywords lowered or compiled once up front.
#[derive(Clone)]
struct CompiledRule {
    rule: CategoryRule,
    lowered: Vec<String>,
    regexes: Vec<regex::Regex>,
}

impl CompiledRule {
    fn new(rule: CategoryRule) -> Self {
        let lowered = rule.keywords.iter().map(|k| k.to_lowercase()).collect();
        let regexes = if rule.match_type == MatchType::Regex {
            rule.keywords
                .iter()
                .filter_map(|pattern| {
                    regex::RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            tracing::warn!(category = %rule.category, pattern = %pattern, error = %e, "ignoring invalid rule pattern");
                        })
                        .ok()
                })
                .collect()
        } else {
            Vec::new()
        };
        Self { rule, lowered, regexes }
    }

    fn matches(&self, text: &str, lowered_text: &str, direction: Direction) -> bool {
        if self.rule.direction.is_some_and(|d| d != direction) {
            return false;
        }
        match self.rule.match_type {
            MatchType::Contains => self.lowered.iter().any(|k| lowered_text.contains(k.as_str())),
            MatchType::Exact => self.lowered.iter().any(|k| lowered_text == k.as_str()),
            MatchType::Regex => self.regexes.iter().any(|re| re.is_match(text)),
        }
    }
}

/// Maps merchant text and direction to a category label. First matching rule
/// wins; rules are tried by descending priority, then in table order.
#[derive(Clone)]
pub struct Categorizer {
    rules: Vec<CompiledRule>,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

/// Bilingual keyword table for Hebrew and English statements.
pub fn default_rules() -> Vec<CategoryRule> {
    use Direction::{Expense, Income};
    vec![
        CategoryRule::new("Salary", &["salary", "משכורת"], Some(Income)),
        CategoryRule::new("Credit Card Payment", &["credit", "ישראכרט"], Some(Expense)),
        CategoryRule::new("Loan Payment", &["loan", "הלוואה"], Some(Expense)),
        CategoryRule::new("Bank Fees", &["fee", "דמי", "עמלה"], Some(Expense)),
        CategoryRule::new("Transfer", &["transfer", "העברה"], Some(Expense)),
    ]
}

impl Categorizer {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules.into_iter().map(CompiledRule::new).collect();
        // Highest priority first; sort_by is stable so ties keep table order.
        compiled.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Self { rules: compiled }
    }

    pub fn from_toml(toml_content: &str) -> Result<Self, RulesError> {
        let file: RulesFile = toml::from_str(toml_content)?;
        if let Some(empty) = file.rule.iter().find(|r| r.keywords.is_empty()) {
            return Err(RulesError::NoKeywords {
                category: empty.category.clone(),
            });
        }
        Ok(Self::new(file.rule))
    }

    pub fn find_matching_rule(&self, text: &str, direction: Direction) -> Option<&CategoryRule> {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|cr| cr.matches(text, &lowered, direction))
            .map(|cr| &cr.rule)
    }

    /// Match `text` against the rules, falling back to `Other` or
    /// `Other Income` by direction.
    pub fn categorize(&self, text: &str, direction: Direction) -> &str {
        match self.find_matching_rule(text, direction) {
            Some(rule) => &rule.category,
            None => match direction {
                Direction::Income => OTHER_INCOME,
                Direction::Expense => OTHER,
            },
        }
    }

    /// Category for a normalized row: an extracted category is kept, anything
    /// else goes through the rules.
    ///
    /// Rules see the full source description (bidi marks removed), not the
    /// cleaned `merchant_name`. For `"PAYBOX/Dana"` the merchant is `"Dana"`
    /// but a `paybox` keyword still matches, so write keywords against the
    /// statement line as printed.
    pub fn category_for(&self, tx: &NormalizedTransaction) -> String {
        match &tx.category_hint {
            Some(hint) => hint.clone(),
            None => self.categorize(&tx.description, tx.direction).to_string(),
        }
    }
}
