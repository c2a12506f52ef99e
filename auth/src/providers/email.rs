//! Email delivery seam shared by the local-password reset flow and the
//! magic-link provider.

use crate::error::{AuthError, Result};

/// An outbound email message, already rendered.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body. HTML rendering is out of scope for this subsystem.
    pub body: String,
}

/// Anything that can deliver an [`EmailMessage`].
#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    /// Send `message`, failing with [`AuthError::Internal`] on transport
    /// error. Delivery failures never leak transport detail to the client.
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// SMTP-backed [`EmailSender`] using `lettre`.
pub struct SmtpEmailSender {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpEmailSender {
    /// Build a sender from a pre-configured `lettre` transport and `From` address.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if `from` is not a valid mailbox.
    pub fn new(transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>, from: &str) -> Result<Self> {
        let from = from.parse().map_err(|_| AuthError::Internal)?;
        Ok(Self { transport, from })
    }
}

#[async_trait::async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        use lettre::AsyncTransport;

        let to: lettre::message::Mailbox = message.to.parse().map_err(|_| AuthError::Internal)?;
        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .body(message.body)
            .map_err(|_| AuthError::Internal)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "smtp delivery failed");
                AuthError::Internal
            })?;
        Ok(())
    }
}

/// An [`EmailSender`] that logs messages instead of delivering them, for
/// local development and integration tests that don't need real delivery.
#[derive(Debug, Clone, Default)]
pub struct ConsoleEmailSender;

#[async_trait::async_trait]
impl EmailSender for ConsoleEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        tracing::info!(to = %message.to, subject = %message.subject, body = %message.body, "email (console sender)");
        Ok(())
    }
}
