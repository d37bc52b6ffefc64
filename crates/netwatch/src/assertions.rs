// Exchange assertions - auto-retry assertions over captured traffic
//
// Listeners append to the history asynchronously, so assertions poll the
// history until the condition holds or the timeout elapses.

use crate::context::NetworkContext;
use crate::error::{Error, Result};
use crate::exchange::ExchangeRecord;
use crate::pattern::UrlPattern;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Creates an auto-retrying assertion over exchanges matching `pattern`.
///
/// Timeout and poll interval default to the context's
/// [`EngineOptions`](crate::EngineOptions) (5 seconds and 100ms).
///
/// # Example
///
/// ```ignore
/// use netwatch::expect_exchanges;
///
/// expect_exchanges(&context, "/api/login")?
///     .to_have_status(200)
///     .await?;
/// expect_exchanges(&context, "/api/analytics")?
///     .not()
///     .to_have_been_captured()
///     .await?;
/// ```
///
/// # Errors
///
/// Returns an error if `pattern` is not a valid regex.
pub fn expect_exchanges(context: &NetworkContext, pattern: &str) -> Result<ExchangeAssertion> {
    Ok(ExchangeAssertion {
        context: context.clone(),
        pattern: UrlPattern::new(pattern)?,
        timeout: context.options().assertion_timeout(),
        poll_interval: context.options().poll_interval(),
        negate: false,
    })
}

/// Assertion over the exchanges matching one URL pattern.
pub struct ExchangeAssertion {
    context: NetworkContext,
    pattern: UrlPattern,
    timeout: Duration,
    poll_interval: Duration,
    negate: bool,
}

#[allow(clippy::wrong_self_convention)]
impl ExchangeAssertion {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Negates the assertion.
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Asserts that at least one matching exchange was captured.
    pub async fn to_have_been_captured(self) -> Result<()> {
        let description = "to have been captured".to_string();
        self.poll(description, |records| !records.is_empty()).await
    }

    /// Asserts that exactly `expected` matching exchanges were captured.
    pub async fn to_have_count(self, expected: usize) -> Result<()> {
        let description = format!("to have count {expected}");
        self.poll(description, move |records| records.len() == expected)
            .await
    }

    /// Asserts that the most recent matching exchange has `status`.
    pub async fn to_have_status(self, status: u16) -> Result<()> {
        let description = format!("to have status {status}");
        self.poll(description, move |records| {
            records
                .last()
                .is_some_and(|record| record.status_code == Some(status))
        })
        .await
    }

    /// Asserts that the most recent matching exchange was answered by a mock.
    pub async fn to_be_mocked(self) -> Result<()> {
        let description = "to be mocked".to_string();
        self.poll(description, |records| {
            records.last().is_some_and(|record| record.mocked)
        })
        .await
    }

    async fn poll<F>(self, description: String, condition: F) -> Result<()>
    where
        F: Fn(&[Arc<ExchangeRecord>]) -> bool,
    {
        let start = Instant::now();
        loop {
            let records = self.context.history().by_url_pattern(&self.pattern);
            let holds = condition(&records);
            if holds != self.negate {
                return Ok(());
            }

            if start.elapsed() >= self.timeout {
                let message = format!(
                    "Expected exchanges matching '{}' {}{} after {:?}, but {} matched: [{}]",
                    self.pattern,
                    if self.negate { "NOT " } else { "" },
                    description,
                    self.timeout,
                    records.len(),
                    describe_records(&records)
                );
                return Err(Error::AssertionTimeout(message));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn describe_records(records: &[Arc<ExchangeRecord>]) -> String {
    records
        .iter()
        .map(|record| match record.status_code {
            Some(status) => format!("{} {} -> {}", record.http_method, record.url, status),
            None => format!("{} {} -> forwarded", record.http_method, record.url),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::tests::record;

    fn fast(context: &NetworkContext, pattern: &str) -> ExchangeAssertion {
        expect_exchanges(context, pattern)
            .unwrap()
            .with_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_captured_after_late_append() {
        let context = NetworkContext::new();
        let writer = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.history().append(record("GET", "https://x/users", 200));
        });

        expect_exchanges(&context, "/users")
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
            .to_have_been_captured()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_message_lists_matches() {
        let context = NetworkContext::new();
        context.history().append(record("GET", "https://x/users", 500));

        let err = fast(&context, "/users").to_have_status(200).await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::AssertionTimeout(_)));
        assert!(message.contains("to have status 200"));
        assert!(message.contains("GET https://x/users -> 500"));
    }

    #[tokio::test]
    async fn test_not_and_count() {
        let context = NetworkContext::new();
        context.history().append(record("GET", "https://x/a", 200));
        context.history().append(record("GET", "https://x/a", 200));

        fast(&context, "/a").to_have_count(2).await.unwrap();
        fast(&context, "/b").not().to_have_been_captured().await.unwrap();
        assert!(fast(&context, "/a").not().to_have_count(2).await.is_err());
        assert!(fast(&context, "/a").to_be_mocked().await.is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected_up_front() {
        assert!(expect_exchanges(&NetworkContext::new(), "(.*").is_err());
    }
}
