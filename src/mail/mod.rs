//! Outbound email.
//!
//! Every message in this service is a notification: `notify` hands it to a
//! spawned task and any failure ends up in the log, never in the caller.

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::config::Config;

pub mod templates;

pub use templates::Notice;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Clone)]
enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    /// Writes messages to the log instead of sending them.
    Console,
}

#[derive(Clone)]
pub struct Mailer {
    transport: Transport,
    from: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let transport = match &config.smtp {
            Some(smtp) => {
                let mut builder =
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?.port(smtp.port);
                if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }
                Transport::Smtp(builder.build())
            }
            None => {
                tracing::info!("SMTP_HOST not set, emails will be written to the log");
                Transport::Console
            }
        };

        Ok(Self {
            transport,
            from: config.default_from_email.clone(),
        })
    }

    pub fn console(from: impl Into<String>) -> Self {
        Self {
            transport: Transport::Console,
            from: from.into(),
        }
    }

    pub async fn send(&self, to: &str, notice: &Notice) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.parse::<Mailbox>()?)
            .to(to.parse::<Mailbox>()?)
            .subject(notice.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notice.body.clone())?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message).await?;
            }
            Transport::Console => {
                tracing::info!(to, subject = %notice.subject, body = %notice.body, "email");
            }
        }
        Ok(())
    }

    /// Fire-and-forget delivery.
    pub fn notify(&self, to: impl Into<String>, notice: Notice) {
        let mailer = self.clone();
        let to = to.into();
        tokio::spawn(async move {
            if let Err(e) = mailer.send(&to, &notice).await {
                tracing::warn!(to = %to, subject = %notice.subject, error = %e, "notification email failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_transport_accepts_well_formed_mail() {
        let mailer = Mailer::console("noreply@example.com");
        let notice = Notice {
            subject: "hello".into(),
            body: "body".into(),
        };
        assert!(mailer.send("user@example.com", &notice).await.is_ok());
    }

    #[tokio::test]
    async fn bad_recipient_is_an_error_for_send_but_not_for_notify() {
        let mailer = Mailer::console("noreply@example.com");
        let notice = Notice {
            subject: "hello".into(),
            body: "body".into(),
        };
        assert!(matches!(
            mailer.send("not an address", &notice).await,
            Err(MailError::Address(_))
        ));

        // returns immediately; the failure is only logged
        mailer.notify("not an address", notice);
        tokio::task::yield_now().await;
    }
}
