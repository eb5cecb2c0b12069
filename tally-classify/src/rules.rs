//! Deterministic keyword categorization.
//!
//! No network, no model. Ordered case-insensitive keyword tables cover the
//! bulk of real statements; anything unmatched is handed to the
//! model-assisted categorizer instead of being guessed at.

use tally_core::Category;

/// One category's matcher. Rules are evaluated in table order and the
/// first match wins, so the table's order is part of the contract.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: Category,
    pub keywords: Vec<String>,
    /// Sign pre-filter: the rule only applies to positive (inflow)
    /// amounts. A positive amount alone never matches; a keyword is
    /// still required.
    pub requires_credit: bool,
}

#[derive(Debug, Clone)]
pub struct SubcategoryRule {
    pub category: Category,
    pub name: String,
    pub keywords: Vec<String>,
}

/// Explicit rule configuration passed into [`RuleCategorizer::new`].
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub categories: Vec<CategoryRule>,
    pub subcategories: Vec<SubcategoryRule>,
}

fn rule(category: Category, requires_credit: bool, keywords: &[&str]) -> CategoryRule {
    CategoryRule {
        category,
        keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        requires_credit,
    }
}

fn subrule(category: Category, name: &str, keywords: &[&str]) -> SubcategoryRule {
    SubcategoryRule {
        category,
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
    }
}

impl Default for RuleSet {
    /// The built-in table. Income leads so deposits are never
    /// misclassified as expenses; more specific expense tables come
    /// before the catch-all-ish Shopping table.
    fn default() -> Self {
        let categories = vec![
            rule(
                Category::Income,
                true,
                &[
                    "salary", "payroll", "direct deposit", "paycheck", "bonus", "refund",
                    "wage", "stipend",
                ],
            ),
            rule(
                Category::Entertainment,
                false,
                &[
                    "spotify", "netflix", "hulu", "disney", "amazon prime", "youtube",
                    "twitch", "steam", "xbox", "playstation", "apple music", "pandora",
                    "itunes", "google play",
                ],
            ),
            rule(
                Category::Groceries,
                false,
                &[
                    "food lion", "kroger", "walmart", "target", "whole foods",
                    "trader joe", "aldi", "publix", "safeway", "h-e-b", "grocery",
                    "supermarket",
                ],
            ),
            rule(
                Category::Transportation,
                false,
                &[
                    "shell", "exxon", "bp ", "chevron", "gas station", "fuel", "uber",
                    "lyft", "taxi", "parking", "toll", "transit", "metro", "subway",
                    "amtrak",
                ],
            ),
            rule(
                Category::Housing,
                false,
                &["rent", "mortgage", "apartment", "property", "landlord", "lease"],
            ),
            rule(
                Category::Subscriptions,
                false,
                &["subscription", "recurring", "auto-pay", "autopay", "membership"],
            ),
            rule(
                Category::Dining,
                false,
                &[
                    "restaurant", "cafe", "coffee", "starbucks", "dunkin", "mcdonald",
                    "burger king", "kfc", "chipotle", "pizza", "doordash", "grubhub",
                    "uber eats",
                ],
            ),
            rule(
                Category::Utilities,
                false,
                &[
                    "electric", "water", "internet", "cable", "t-mobile", "verizon",
                    "at&t", "utility", "power", "sewer", "trash",
                ],
            ),
            rule(
                Category::Healthcare,
                false,
                &[
                    "pharmacy", "medical", "doctor", "hospital", "clinic", "dental",
                    "vision", "prescription", "cvs", "walgreens", "rite aid",
                ],
            ),
            rule(
                Category::Shopping,
                false,
                &["amazon", "ebay", "etsy", "retail", "mall", "department store"],
            ),
        ];

        let subcategories = vec![
            subrule(Category::Entertainment, "Streaming", &["netflix", "hulu", "disney", "amazon prime", "youtube"]),
            subrule(Category::Entertainment, "Gaming", &["steam", "xbox", "playstation", "twitch"]),
            subrule(Category::Entertainment, "Music", &["spotify", "apple music", "pandora", "itunes"]),
            subrule(Category::Transportation, "Gas", &["shell", "exxon", "bp ", "chevron", "gas station", "fuel"]),
            subrule(Category::Transportation, "Rideshare", &["uber", "lyft", "taxi"]),
            subrule(Category::Transportation, "Parking", &["parking", "toll"]),
            subrule(Category::Dining, "Coffee", &["starbucks", "dunkin", "coffee", "cafe"]),
            subrule(Category::Dining, "Fast Food", &["mcdonald", "burger king", "kfc", "chipotle"]),
            subrule(Category::Dining, "Delivery", &["doordash", "grubhub", "uber eats"]),
        ];

        Self {
            categories,
            subcategories,
        }
    }
}

pub struct RuleCategorizer {
    rules: RuleSet,
}

impl RuleCategorizer {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// First matching rule in table order wins. Returns `None` rather than
    /// guessing when nothing matches.
    pub fn categorize(&self, description: &str, amount: f64) -> Option<(Category, Option<String>)> {
        let desc = description.to_lowercase();

        for rule in &self.rules.categories {
            if rule.requires_credit && amount <= 0.0 {
                continue;
            }
            if rule.keywords.iter().any(|k| desc.contains(k.as_str())) {
                return Some((rule.category, self.subcategory(rule.category, &desc)));
            }
        }
        None
    }

    fn subcategory(&self, category: Category, desc: &str) -> Option<String> {
        self.rules
            .subcategories
            .iter()
            .filter(|s| s.category == category)
            .find(|s| s.keywords.iter().any(|k| desc.contains(k.as_str())))
            .map(|s| s.name.clone())
    }
}

impl Default for RuleCategorizer {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_table() {
        let rc = RuleCategorizer::default();
        let cases: &[(&str, f64, Category, Option<&str>)] = &[
            ("SPOTIFY PREMIUM", -12.99, Category::Entertainment, Some("Music")),
            ("NETFLIX.COM", -25.50, Category::Entertainment, Some("Streaming")),
            ("FOOD LION #1234", -45.67, Category::Groceries, None),
            ("SHELL GAS STATION", -89.50, Category::Transportation, Some("Gas")),
            ("UBER TRIP HELP.UBER.COM", -35.00, Category::Transportation, Some("Rideshare")),
            ("SALARY DEPOSIT", 2500.00, Category::Income, None),
            ("RENT PAYMENT JUNE", -1200.00, Category::Housing, None),
            ("STARBUCKS STORE 1234", -8.50, Category::Dining, Some("Coffee")),
            ("CITY WATER AND SEWER", -200.00, Category::Utilities, None),
            ("CVS/PHARMACY #06", -45.00, Category::Healthcare, None),
            ("AMAZON MKTPLACE", -120.00, Category::Shopping, None),
        ];
        for (desc, amount, category, sub) in cases {
            let (c, s) = rc.categorize(desc, *amount).unwrap_or_else(|| {
                panic!("no match for {desc:?}");
            });
            assert_eq!(c, *category, "category for {desc:?}");
            assert_eq!(s.as_deref(), *sub, "subcategory for {desc:?}");
        }
    }

    #[test]
    fn test_income_requires_keyword_not_just_sign() {
        let rc = RuleCategorizer::default();
        // Positive amount, no income keyword: not forced into Income.
        assert_eq!(rc.categorize("ZELLE FROM JOHN", 50.00), None);
    }

    #[test]
    fn test_income_keyword_on_debit_does_not_match_income() {
        let rc = RuleCategorizer::default();
        // A payroll-correction debit must not come out as Income.
        let got = rc.categorize("PAYROLL ADJUSTMENT", -100.00);
        assert_ne!(got.map(|(c, _)| c), Some(Category::Income));
    }

    #[test]
    fn test_refund_credit_beats_shopping() {
        let rc = RuleCategorizer::default();
        // Income is checked first, so a credited refund from a retailer
        // is income rather than shopping.
        let (c, _) = rc.categorize("AMAZON REFUND", 30.00).unwrap();
        assert_eq!(c, Category::Income);
    }

    #[test]
    fn test_no_match_returns_none() {
        let rc = RuleCategorizer::default();
        assert_eq!(rc.categorize("WIRE 8891-A", -500.00), None);
        assert_eq!(rc.categorize("", -1.00), None);
    }

    #[test]
    fn test_custom_rule_set() {
        let rules = RuleSet {
            categories: vec![rule(Category::Dining, false, &["tacos"])],
            subcategories: vec![],
        };
        let rc = RuleCategorizer::new(rules);
        assert_eq!(
            rc.categorize("TACOS EL REY", -9.00),
            Some((Category::Dining, None))
        );
        assert_eq!(rc.categorize("STARBUCKS", -5.00), None);
    }
}
