use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{Alert, NotificationChannel, NotificationConfig, NotificationError, SmtpTls};

/// Mails the alert body as plain text to every configured recipient at once
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| NotificationError::Config("SMTP_HOST not set".into()))?;
        let (from, to) = mailboxes(config)?;

        let builder = match config.smtp_tls {
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)),
        }
        .map_err(|e| NotificationError::Smtp(format!("SMTP transport error: {}", e)))?
        .port(config.smtp_port);

        let transport = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(pass)) => builder
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .build(),
            _ => builder.build(),
        };

        Ok(Self { transport, from, to })
    }
}

fn mailboxes(config: &NotificationConfig) -> Result<(Mailbox, Vec<Mailbox>), NotificationError> {
    let from_addr = config
        .smtp_from
        .as_deref()
        .ok_or_else(|| NotificationError::Config("SMTP_FROM_ADDRESS not set".into()))?;
    let from: Mailbox = from_addr
        .parse()
        .map_err(|e| NotificationError::Config(format!("Invalid from address: {}", e)))?;

    let to: Vec<Mailbox> = config
        .smtp_to
        .iter()
        .filter_map(|addr| match addr.parse() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                tracing::warn!("Skipping invalid recipient {}: {}", addr, e);
                None
            }
        })
        .collect();

    if to.is_empty() {
        return Err(NotificationError::Config(
            "No valid NOTIFICATION_EMAIL_TO addresses".into(),
        ));
    }

    Ok((from, to))
}

fn build_message(from: &Mailbox, to: &[Mailbox], alert: &Alert) -> Result<Message, NotificationError> {
    let mut builder = Message::builder().from(from.clone()).subject(&alert.title);
    for recipient in to {
        builder = builder.to(recipient.clone());
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(alert.message.clone())
        .map_err(|e| NotificationError::Smtp(format!("Failed to build email: {}", e)))
}

#[async_trait]
impl NotificationChannel for SmtpNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let email = build_message(&self.from, &self.to, alert)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotificationError::Smtp(format!("Failed to send email: {}", e)))?;

        tracing::info!("Email alert sent to {} recipients", self.to.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}
