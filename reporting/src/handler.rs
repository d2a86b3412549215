//! Handler for `UserRegistered` facts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use user_reporting_core::fact::{Fact, UserRegisteredFact};
use user_reporting_core::handler::{FactHandler, HandlerError};
use user_reporting_core::report::{ReportRecord, ReportRepository, Upserted};

/// Projects a [`UserRegisteredFact`] into the reporting read model.
///
/// Idempotent by construction: the write is an upsert keyed by
/// `user_id`, so handling the same fact N times leaves exactly one
/// record. Duplicate deliveries are absorbed silently and logged at
/// debug level.
pub struct UserRegisteredHandler {
    repository: Arc<dyn ReportRepository>,
}

impl UserRegisteredHandler {
    /// Create a handler writing to the given repository.
    #[must_use]
    pub fn new(repository: Arc<dyn ReportRepository>) -> Self {
        Self { repository }
    }
}

impl FactHandler for UserRegisteredHandler {
    fn handle(
        &self,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let payload = payload.to_vec();
        Box::pin(async move {
            // A payload that does not decode is permanently malformed;
            // a repository failure is transient and worth a redelivery.
            let fact = UserRegisteredFact::from_bytes(&payload)
                .map_err(|e| HandlerError::Malformed(e.to_string()))?;

            let record = ReportRecord::from(&fact);
            let outcome = self
                .repository
                .upsert(&record)
                .await
                .map_err(|e| HandlerError::Transient(e.to_string()))?;

            match outcome {
                Upserted::Inserted => {
                    tracing::info!(
                        user_id = %fact.user_id,
                        username = %fact.username,
                        registered_at = %fact.registered_at,
                        "User registration recorded"
                    );
                }
                Upserted::AlreadyPresent => {
                    tracing::debug!(
                        user_id = %fact.user_id,
                        "Duplicate delivery absorbed"
                    );
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use user_reporting_testing::InMemoryReportRepository;
    use uuid::Uuid;

    fn sample_fact() -> UserRegisteredFact {
        UserRegisteredFact {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn handling_twice_leaves_one_record() {
        let repo = Arc::new(InMemoryReportRepository::new());
        let handler = UserRegisteredHandler::new(repo.clone());
        let fact = sample_fact();
        let payload = fact.to_bytes().unwrap();

        handler.handle(&payload).await.unwrap();
        handler.handle(&payload).await.unwrap();

        assert_eq!(repo.len(), 1);
        let record = repo.get(fact.user_id).unwrap();
        assert_eq!(record.username, fact.username);
        assert_eq!(record.email, fact.email);
        assert_eq!(record.registered_at, fact.registered_at);
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let repo = Arc::new(InMemoryReportRepository::new());
        let handler = UserRegisteredHandler::new(repo);

        let result = handler.handle(&[0xff, 0x00]).await;
        assert!(matches!(result, Err(HandlerError::Malformed(_))));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn repository_outage_is_transient() {
        let repo = Arc::new(InMemoryReportRepository::new());
        repo.fail_next_upserts(1);
        let handler = UserRegisteredHandler::new(repo.clone());
        let payload = sample_fact().to_bytes().unwrap();

        let result = handler.handle(&payload).await;
        assert!(matches!(result, Err(HandlerError::Transient(_))));

        // The retry after the outage succeeds.
        handler.handle(&payload).await.unwrap();
        assert_eq!(repo.len(), 1);
    }
}
