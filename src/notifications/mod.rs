use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

/// A rendered email ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Mail gateway rejected the message with status {0}")]
    Gateway(u16),
}

/// Outbound email transport. Sends are always best-effort: callers log
/// failures and move on, they never fail an order on a mail error.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError>;
}

/// Posts rendered emails as JSON to a configured mail-gateway endpoint.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

#[derive(Serialize)]
struct GatewayPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl HttpMailer {
    pub fn new(endpoint: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GatewayPayload {
                from: &self.from,
                to: &email.to,
                subject: &email.subject,
                body: &email.body,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MailerError::Gateway(response.status().as_u16()));
        }

        info!("email handed to gateway");
        Ok(())
    }
}

/// Default transport when no gateway is configured: logs the email and
/// reports success.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        info!(to = %email.to, subject = %email.subject, "email (log-only transport)");
        Ok(())
    }
}

/// Renders the order-placed email carrying the confirmation link.
pub fn placement_email(to: &str, order_number: &str, confirmation_link: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Please confirm your order {order_number}"),
        body: format!(
            "Thank you for your order {order_number}.\n\n\
             Please confirm it within 2 hours by opening this link:\n{confirmation_link}\n\n\
             If you did not place this order, you can ignore this email."
        ),
    }
}

/// Renders the status-change email sent on every admin transition and on
/// successful confirmation.
pub fn status_email(to: &str, order_number: &str, new_status: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Update on your order {order_number}"),
        body: format!("Your order {order_number} is now: {new_status}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_email_contains_link() {
        let email = placement_email(
            "a@b.test",
            "ORDER-000007",
            "http://localhost/confirm?token=t&order=ORDER-000007",
        );
        assert_eq!(email.to, "a@b.test");
        assert!(email.subject.contains("ORDER-000007"));
        assert!(email.body.contains("token=t"));
    }

    #[test]
    fn status_email_names_the_status() {
        let email = status_email("a@b.test", "ORDER-000007", "SHIPPED");
        assert!(email.body.contains("SHIPPED"));
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = LogMailer;
        let result = mailer
            .send(placement_email("a@b.test", "ORDER-000001", "http://x"))
            .await;
        assert!(result.is_ok());
    }
}
