//! Model-assisted categorization for records the rule table cannot match.

use std::time::Duration;

use tally_core::Category;
use tally_llm::{with_one_retry, ChatModel};

use crate::error::ClassifyError;

const SYSTEM: &str = "You are a financial transaction classifier. \
You answer with exactly one category from the allowed list, optionally \
followed by a colon and a short subcategory.";

pub struct ModelCategorizer<M> {
    model: M,
    retry_backoff: Duration,
}

impl<M: ChatModel> ModelCategorizer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Classify one transaction. A reply outside the closed enumeration is
    /// treated the same as an unreachable capability.
    pub async fn categorize(
        &self,
        description: &str,
        amount: f64,
    ) -> Result<(Category, Option<String>), ClassifyError> {
        let prompt = classification_prompt(description, amount);
        let reply = with_one_retry(self.retry_backoff, || {
            self.model.complete(SYSTEM.to_string(), prompt.clone())
        })
        .await
        .map_err(|e| ClassifyError::Unavailable(e.to_string()))?;

        parse_reply(&reply).ok_or_else(|| {
            ClassifyError::Unavailable(format!("reply outside category enumeration: {reply:?}"))
        })
    }
}

fn classification_prompt(description: &str, amount: f64) -> String {
    let allowed = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Categorize this bank transaction.\n\n\
         Transaction: {description}\n\
         Amount: {amount:.2}\n\n\
         Allowed categories: {allowed}\n\n\
         Respond with \"Category\" or \"Category: Subcategory\" and nothing else."
    )
}

/// Parse a `Category` or `Category: Subcategory` reply against the closed
/// enumeration.
fn parse_reply(reply: &str) -> Option<(Category, Option<String>)> {
    let line = reply.trim().lines().next()?.trim();
    let (cat_str, sub) = match line.split_once(':') {
        Some((c, s)) => (c, Some(s.trim())),
        None => (line, None),
    };
    let category = Category::parse(cat_str)?;
    let subcategory = sub
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        // A subcategory is only meaningful alongside a real category.
        .filter(|_| category != Category::Other);
    Some((category, subcategory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_llm::LlmError;

    struct FixedModel(Result<String, ()>);

    impl ChatModel for FixedModel {
        fn complete(
            &self,
            _system: String,
            _user: String,
        ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send {
            let reply = self.0.clone();
            async move { reply.map_err(|_| LlmError::Empty) }
        }
    }

    fn categorizer(reply: Result<&str, ()>) -> ModelCategorizer<FixedModel> {
        ModelCategorizer::new(FixedModel(reply.map(str::to_string)))
            .with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_category_with_subcategory() {
        let mc = categorizer(Ok("Dining: Coffee"));
        let (c, s) = mc.categorize("BLUE BOTTLE", -6.50).await.unwrap();
        assert_eq!(c, Category::Dining);
        assert_eq!(s.as_deref(), Some("Coffee"));
    }

    #[tokio::test]
    async fn test_bare_category_case_insensitive() {
        let mc = categorizer(Ok("utilities"));
        let (c, s) = mc.categorize("CITY POWER", -80.00).await.unwrap();
        assert_eq!(c, Category::Utilities);
        assert_eq!(s, None);
    }

    #[tokio::test]
    async fn test_out_of_enumeration_reply_is_unavailable() {
        let mc = categorizer(Ok("Gambling: Slots"));
        let err = mc.categorize("CASINO ROYALE", -100.00).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_capability_failure_is_unavailable() {
        let mc = categorizer(Err(()));
        let err = mc.categorize("ANYTHING", -1.00).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_other_reply_drops_subcategory() {
        let mc = categorizer(Ok("Other: mystery"));
        let (c, s) = mc.categorize("WIRE 8891-A", -500.00).await.unwrap();
        assert_eq!(c, Category::Other);
        assert_eq!(s, None);
    }
}
