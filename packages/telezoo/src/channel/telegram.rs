//! Telegram adapter built on teloxide.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::payloads::{EditMessageTextSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ChannelError, InboundMessage, MessageChannel, MessageHandle};
use crate::config::ParseModeSetting;
use crate::models::ChannelId;
use crate::service::RelayService;

/// Build a bot whose HTTP timeout outlasts the long-polling timeout.
pub fn build_bot(token: &str) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build Telegram HTTP client")?;
    Ok(Bot::with_client(token, client))
}

pub struct TelegramChannel {
    bot: Bot,
    parse_mode: Option<ParseMode>,
}

impl TelegramChannel {
    pub fn new(bot: Bot, parse_mode: ParseModeSetting) -> Self {
        let parse_mode = match parse_mode {
            // Legacy mode, deprecated upstream but still served by the Bot API
            #[allow(deprecated)]
            ParseModeSetting::Markdown => Some(ParseMode::Markdown),
            ParseModeSetting::MarkdownV2 => Some(ParseMode::MarkdownV2),
            ParseModeSetting::None => None,
        };
        Self { bot, parse_mode }
    }

    async fn send_with(
        &self,
        chat: ChatId,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<Message, RequestError> {
        let request = self.bot.send_message(chat, text);
        match parse_mode {
            Some(mode) => request.parse_mode(mode).await,
            None => request.await,
        }
    }

    async fn edit_with(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<Message, RequestError> {
        let request = self.bot.edit_message_text(chat, message_id, text);
        match parse_mode {
            Some(mode) => request.parse_mode(mode).await,
            None => request.await,
        }
    }
}

/// Bot API limit on message text, counted in UTF-16 code units.
pub const TELEGRAM_MAX_TEXT_LEN: usize = 4096;

/// Telegram refused the markup; the text is still deliverable as plain text.
fn is_entity_error(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::CantParseEntities(_)))
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn send(&self, recipient: ChannelId, text: &str) -> Result<MessageHandle, ChannelError> {
        let chat = ChatId(recipient.0);
        let sent = match self.send_with(chat, text, self.parse_mode).await {
            Err(e) if self.parse_mode.is_some() && is_entity_error(&e) => {
                debug!(user = %recipient, "Markup rejected, sending as plain text: {}", e);
                self.send_with(chat, text, None).await
            }
            other => other,
        };
        let message = sent.map_err(|e| ChannelError::Send {
            recipient,
            reason: e.to_string(),
        })?;
        Ok(MessageHandle {
            recipient,
            message_id: message.id.0.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let edit_error = |reason: String| ChannelError::Edit {
            recipient: handle.recipient,
            message_id: handle.message_id.clone(),
            reason,
        };
        let message_id: i32 = handle
            .message_id
            .parse()
            .map_err(|_| edit_error("invalid message id".to_string()))?;
        let chat = ChatId(handle.recipient.0);

        let edited = match self
            .edit_with(chat, MessageId(message_id), text, self.parse_mode)
            .await
        {
            Err(e) if self.parse_mode.is_some() && is_entity_error(&e) => {
                debug!(user = %handle.recipient, "Markup rejected, editing as plain text: {}", e);
                self.edit_with(chat, MessageId(message_id), text, None).await
            }
            other => other,
        };
        match edited {
            Ok(_) => Ok(()),
            // Same text as before; nothing to change
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(edit_error(e.to_string())),
        }
    }

    fn max_text_len(&self) -> Option<usize> {
        Some(TELEGRAM_MAX_TEXT_LEN)
    }
}

/// Extract the relay's view of a Telegram message. Non-text messages and
/// messages without a sender are ignored.
fn inbound_from(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?;
    let sender = msg.from.as_ref()?;
    let channel_id = i64::try_from(sender.id.0).ok()?;
    Some(InboundMessage {
        channel_id: ChannelId(channel_id),
        username: sender.username.clone(),
        text: text.to_string(),
    })
}

/// Long-poll Telegram and feed every text message to `service` until `cancel` fires.
///
/// Each message runs in its own task. teloxide handles updates of one chat
/// sequentially, and the relay's admission gate is what orders a user's prompts.
pub async fn run_bot(bot: Bot, service: Arc<RelayService>, cancel: CancellationToken) {
    let handler = Update::filter_message().endpoint(move |msg: Message| {
        let service = service.clone();
        async move {
            match inbound_from(&msg) {
                Some(inbound) => {
                    tokio::spawn(async move { service.handle(inbound).await });
                }
                None => debug!("Ignoring message without text or sender"),
            }
            respond(())
        }
    });

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler).build();
    let shutdown_token = dispatcher.shutdown_token();

    tokio::spawn(async move {
        cancel.cancelled().await;
        // Shutdown fails while the dispatcher is still starting up
        loop {
            match shutdown_token.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    let polling = teloxide::update_listeners::Polling::builder(bot)
        .timeout(Duration::from_secs(10))
        .build();

    info!("Listening for Telegram updates");
    dispatcher
        .dispatch_with_listener(
            polling,
            teloxide::error_handlers::LoggingErrorHandler::with_custom_text(
                "Telegram polling error (will retry)",
            ),
        )
        .await;
    info!("Telegram dispatcher stopped");
}
