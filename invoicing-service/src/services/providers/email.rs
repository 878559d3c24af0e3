use super::{EmailMessage, Mailer, ProviderError};
use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, ProviderError> {
        if !config.is_configured() {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }

    fn build_message(&self, email: &EmailMessage) -> Result<Message, ProviderError> {
        let from_mailbox: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.body_html.clone()));
        for attachment in &email.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                ProviderError::SendFailed(format!(
                    "Invalid attachment content type {}: {}",
                    attachment.content_type, e
                ))
            })?;
            body = body.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }

        Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&email.subject)
            .multipart(body)
            .map_err(|e| ProviderError::SendFailed(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            ProviderError::NotEnabled("SMTP host is not configured".to_string())
        })?;

        let message = self.build_message(email)?;

        transport
            .send(message)
            .await
            .map_err(|e| ProviderError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email sent successfully"
        );

        Ok(())
    }
}

/// Mailer that records messages instead of sending them.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail as a rejected SMTP transaction would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &EmailMessage) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::SendFailed(
                "Mock mailer is set to fail".to_string(),
            ));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "[MOCK] Email would be sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::EmailAttachment;
    use secrecy::Secret;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.test".to_string(),
            port: 587,
            user: "user".to_string(),
            password: Secret::new("password".to_string()),
            from_name: "Acme Billing".to_string(),
            from_email: "billing@acme.test".to_string(),
        }
    }

    fn email() -> EmailMessage {
        EmailMessage {
            to: "customer@example.test".to_string(),
            subject: "Invoice INV-202610-0001".to_string(),
            body_html: "<p>Hello</p>".to_string(),
            attachments: vec![EmailAttachment {
                filename: "invoice-INV-202610-0001.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                content: b"%PDF-1.4".to_vec(),
            }],
        }
    }

    #[tokio::test]
    async fn message_carries_attachment() {
        let mailer = SmtpMailer::new(config()).unwrap();
        let message = mailer.build_message(&email()).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();

        assert!(raw.contains("Subject: Invoice INV-202610-0001"));
        assert!(raw.contains("application/pdf"));
        assert!(raw.contains("invoice-INV-202610-0001.pdf"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected() {
        let mailer = SmtpMailer::new(config()).unwrap();
        let mut email = email();
        email.to = "not-an-address".to_string();

        assert!(matches!(
            mailer.build_message(&email),
            Err(ProviderError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_mailer_refuses_to_send() {
        let mut config = config();
        config.host = String::new();
        let mailer = SmtpMailer::new(config).unwrap();

        assert!(matches!(
            mailer.send(&email()).await,
            Err(ProviderError::NotEnabled(_))
        ));
    }

    #[tokio::test]
    async fn mock_records_and_fails_on_demand() {
        let mailer = MockMailer::new();
        mailer.send(&email()).await.unwrap();
        assert_eq!(mailer.sent().len(), 1);

        mailer.set_failing(true);
        assert!(mailer.send(&email()).await.is_err());
        assert_eq!(mailer.sent().len(), 1);
    }
}
