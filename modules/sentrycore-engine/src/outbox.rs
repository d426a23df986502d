//! Outbox drain and SMTP delivery behind a pluggable backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use sentrycore_common::types::{OutboxEmail, OutboxStatus};
use sentrycore_store::{DecisionRepo, OutboxRepo};

use crate::deps::Deps;

/// Pluggable delivery backend.
#[async_trait]
pub trait EmailBackend: Send + Sync {
    async fn send(&self, email: &OutboxEmail) -> Result<()>;
}

/// Logs instead of sending. Used in tests and SMTP-less deployments.
pub struct NoopBackend;

#[async_trait]
impl EmailBackend for NoopBackend {
    async fn send(&self, email: &OutboxEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "noop email backend: drop");
        Ok(())
    }
}

/// SMTP+TLS delivery via lettre, multipart text/plain + text/html.
pub struct SmtpBackend {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpBackend {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("failed to build SMTP transport")?
            .port(port)
            .timeout(Some(std::time::Duration::from_secs(30)));
        if !username.is_empty() {
            builder = builder.credentials(lettre::transport::smtp::authentication::Credentials::new(
                username.to_string(),
                password.to_string(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.parse().context("invalid EMAIL_FROM address")?,
        })
    }
}

#[async_trait]
impl EmailBackend for SmtpBackend {
    async fn send(&self, email: &OutboxEmail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("invalid recipient address")?)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .context("failed to build email")?;

        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }
}

/// Drains due outbox rows through the backend with capped exponential retry.
pub struct EmailSender {
    deps: Deps,
    backend: Arc<dyn EmailBackend>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SendStats {
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

impl EmailSender {
    pub fn new(deps: Deps, backend: Arc<dyn EmailBackend>) -> Self {
        Self { deps, backend }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SendStats> {
        let due = self.deps.outbox.due_outbox(now, 20).await?;
        let mut stats = SendStats::default();

        for mut email in due {
            match self.backend.send(&email).await {
                Ok(()) => {
                    email.mark_sent(Utc::now());
                    self.deps.outbox.update_outbox(email).await?;
                    stats.sent += 1;
                }
                Err(e) => {
                    warn!(to = %email.to, error = %e, attempts = email.attempts + 1, "email delivery failed");
                    email.mark_attempt_failed(e.to_string(), Utc::now());
                    let gave_up = email.status == OutboxStatus::Failed;
                    let decision_ids = email.decision_ids.clone();
                    self.deps.outbox.update_outbox(email).await?;

                    if gave_up {
                        stats.failed += 1;
                        // Final failure flows back onto the decision rows.
                        for id in decision_ids {
                            if let Some(mut decision) =
                                self.deps.decisions.get_decision(id).await?
                            {
                                decision.mark_failed();
                                self.deps.decisions.update_decision(decision).await?;
                            }
                        }
                    } else {
                        stats.retried += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrycore_common::types::{PushDecision, PushDecisionRecord, PushStatus};
    use sentrycore_store::{DecisionRepo, OutboxRepo};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct FlakyBackend {
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmailBackend for FlakyBackend {
        async fn send(&self, _email: &OutboxEmail) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                anyhow::bail!("connection refused")
            }
            Ok(())
        }
    }

    fn outbox_email(decision_ids: Vec<Uuid>) -> OutboxEmail {
        OutboxEmail::new(decision_ids, "user@example.com", "s", "<p>h</p>", "t")
    }

    #[tokio::test]
    async fn successful_send_marks_sent() {
        let (deps, store) = Deps::in_memory();
        let sender = EmailSender::new(
            deps,
            Arc::new(FlakyBackend {
                fail: AtomicBool::new(false),
            }),
        );
        let email = outbox_email(vec![]);
        let id = email.id;
        store.insert_outbox(email).await.unwrap();

        let stats = sender.run_once(Utc::now()).await.unwrap();
        assert_eq!(stats.sent, 1);

        let due = store.due_outbox(Utc::now(), 10).await.unwrap();
        assert!(due.is_empty(), "sent email {id} must leave the due queue");
    }

    #[tokio::test]
    async fn transient_failure_schedules_retry() {
        let (deps, store) = Deps::in_memory();
        let backend = Arc::new(FlakyBackend {
            fail: AtomicBool::new(true),
        });
        let sender = EmailSender::new(deps, backend.clone());
        store.insert_outbox(outbox_email(vec![])).await.unwrap();

        let stats = sender.run_once(Utc::now()).await.unwrap();
        assert_eq!(stats.retried, 1);

        // Not due immediately: backoff applied.
        let stats = sender.run_once(Utc::now()).await.unwrap();
        assert_eq!(stats, SendStats::default());

        // Due again after the backoff; once the backend recovers it sends.
        backend.fail.store(false, Ordering::Relaxed);
        let later = Utc::now() + chrono::Duration::minutes(5);
        let stats = sender.run_once(later).await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn final_failure_marks_decisions_failed() {
        let (deps, store) = Deps::in_memory();
        let sender = EmailSender::new(
            deps,
            Arc::new(FlakyBackend {
                fail: AtomicBool::new(true),
            }),
        );

        let mut decision =
            PushDecisionRecord::new(Uuid::new_v4(), Uuid::new_v4(), PushDecision::Immediate);
        decision.mark_sent();
        let decision_id = decision.id;
        store.insert_decision_if_new(decision).await.unwrap();
        store
            .insert_outbox(outbox_email(vec![decision_id]))
            .await
            .unwrap();

        // Five failing attempts exhaust the retry budget.
        let mut at = Utc::now();
        for _ in 0..5 {
            sender.run_once(at).await.unwrap();
            at += chrono::Duration::hours(2);
        }

        let decision = store.get_decision(decision_id).await.unwrap().unwrap();
        assert_eq!(decision.status, PushStatus::Failed);
    }
}
