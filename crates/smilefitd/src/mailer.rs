//! Mails captured result images to the user over SMTP.

use crate::config::SmtpConfig;
use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

const SUBJECT: &str = "SMILE FIT result images";
const BODY: &str = "The attached photos were taken during your SMILE FIT session.";

#[derive(Error, Debug)]
pub enum MailError {
    #[error("no sender address configured")]
    NoSender,
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("attachment {index}: {reason}")]
    InvalidAttachment { index: usize, reason: String },
    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Payload of a `data:` URL. Everything after the first comma is base64.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, String> {
    let (_, data) = url
        .split_once(',')
        .ok_or_else(|| "not a data URL".to_string())?;
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| e.to_string())
}

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl Mailer {
    /// Fails without a sender address (`sender`, else `username`).
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        let sender = config
            .sender
            .as_ref()
            .or(config.username.as_ref())
            .map(|s| s.parse::<Mailbox>().map_err(|_| MailError::InvalidAddress(s.clone())))
            .transpose()?
            .ok_or(MailError::NoSender)?;

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }

    /// Send each data-URL image as `image_<n>.png` to `address`.
    pub async fn send_images(&self, address: &str, images: &[String]) -> Result<(), MailError> {
        let message = build_message(self.sender.clone(), address, images)?;
        self.transport.send(message).await?;
        tracing::info!(to = address, attachments = images.len(), "result email sent");
        Ok(())
    }
}

fn build_message(from: Mailbox, address: &str, images: &[String]) -> Result<Message, MailError> {
    let to: Mailbox = address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))?;
    let png = ContentType::parse("image/png").map_err(|e| MailError::InvalidAttachment {
        index: 0,
        reason: e.to_string(),
    })?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(BODY.to_string()));
    for (i, url) in images.iter().enumerate() {
        let bytes = decode_data_url(url).map_err(|reason| MailError::InvalidAttachment { index: i, reason })?;
        body = body.singlepart(Attachment::new(format!("image_{}.png", i + 1)).body(bytes, png.clone()));
    }

    Ok(Message::builder()
        .from(from)
        .to(to)
        .subject(SUBJECT)
        .multipart(body)?)
}
