//! Incremental delivery of job output to the messaging channel.
//!
//! A job's output is cumulative: each poll returns everything produced so
//! far. The relay keeps a single outbound message per job, sends it once the
//! output becomes non-empty and edits it whenever the rendered text changes.

pub mod escape;

use std::borrow::Cow;
use std::sync::Arc;

pub use escape::escape_markdown;

use crate::channel::{ChannelError, MessageChannel, MessageHandle};
use crate::models::ChannelId;

/// End-of-text markers some models leak into their output. Everything from
/// the first marker on is dropped and the job counts as complete.
pub const STOP_SENTINELS: [&str; 2] = ["<|eot_id|>", "<|end_of_text|>"];

/// Output ready to show to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    /// The model signalled end of output in-band
    pub terminal: bool,
}

/// Escape, cut at the first stop sentinel and trim.
pub fn render(raw: &str) -> Rendered {
    let escaped = escape_markdown(raw);
    let cut = STOP_SENTINELS
        .iter()
        .filter_map(|sentinel| escaped.find(sentinel))
        .min();

    match cut {
        Some(at) => Rendered {
            text: escaped[..at].trim().to_string(),
            terminal: true,
        },
        None => Rendered {
            text: escaped.trim().to_string(),
            terminal: false,
        },
    }
}

/// Marks text cut to fit the channel.
const CLIPPED: char = '…';

/// Cut `text` to at most `limit` UTF-16 code units on a char boundary,
/// ending the kept prefix with `…`.
pub fn clip(text: &str, limit: usize) -> Cow<'_, str> {
    if text.encode_utf16().count() <= limit {
        return Cow::Borrowed(text);
    }
    let budget = limit.saturating_sub(CLIPPED.len_utf16());
    let mut used = 0;
    let mut end = 0;
    for (at, c) in text.char_indices() {
        used += c.len_utf16();
        if used > budget {
            break;
        }
        end = at + c.len_utf8();
    }
    Cow::Owned(format!("{}{}", text[..end].trim_end(), CLIPPED))
}

/// Per-job reconciliation between rendered output and what the user sees.
///
/// Output longer than the channel's message limit is shown clipped; once the
/// visible prefix stops changing there is nothing left to edit.
pub struct OutputRelay {
    channel: Arc<dyn MessageChannel>,
    recipient: ChannelId,
    limit: Option<usize>,
    message: Option<MessageHandle>,
    /// Text currently displayed in `message`
    shown: String,
    latest: Rendered,
}

impl OutputRelay {
    pub fn new(channel: Arc<dyn MessageChannel>, recipient: ChannelId) -> Self {
        Self {
            limit: channel.max_text_len(),
            channel,
            recipient,
            message: None,
            shown: String::new(),
            latest: Rendered::default(),
        }
    }

    /// Render one poll's output and bring the outbound message up to date.
    ///
    /// The rendered result is kept even when delivery fails, see [`Self::latest`].
    pub async fn update(&mut self, raw: &str) -> Result<(), ChannelError> {
        self.latest = render(raw);
        self.flush().await
    }

    /// Deliver the latest rendering if the user does not see it yet.
    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        if !self.is_dirty() {
            return Ok(());
        }
        let text = self.outbound().into_owned();
        match &self.message {
            None => {
                self.message = Some(self.channel.send(self.recipient, &text).await?);
            }
            Some(handle) => {
                self.channel.edit(handle, &text).await?;
            }
        }
        self.shown = text;
        Ok(())
    }

    /// Whether the latest rendering still has to be delivered.
    ///
    /// Empty text is never delivered: there is nothing to send, and an
    /// existing message cannot be edited to nothing.
    pub fn is_dirty(&self) -> bool {
        let outbound = self.outbound();
        !outbound.is_empty() && outbound != self.shown.as_str()
    }

    /// The latest rendering as it fits in one message.
    fn outbound(&self) -> Cow<'_, str> {
        match self.limit {
            Some(limit) => clip(&self.latest.text, limit),
            None => Cow::Borrowed(self.latest.text.as_str()),
        }
    }

    pub fn latest(&self) -> &Rendered {
        &self.latest
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    /// Close out a failed job. An existing message gets `notice` appended
    /// after a blank line, otherwise `notice` goes out on its own.
    pub async fn abandon(&mut self, notice: &str) -> Result<(), ChannelError> {
        match &self.message {
            Some(handle) => {
                let kept = match self.limit {
                    Some(limit) => {
                        let room = limit.saturating_sub(notice.encode_utf16().count() + 2);
                        clip(&self.shown, room)
                    }
                    None => Cow::Borrowed(self.shown.as_str()),
                };
                let text = format!("{}\n\n{}", kept, notice);
                self.channel.edit(handle, &text).await?;
                self.shown = text;
            }
            None => {
                let text = match self.limit {
                    Some(limit) => clip(notice, limit).into_owned(),
                    None => notice.to_string(),
                };
                self.message = Some(self.channel.send(self.recipient, &text).await?);
                self.shown = text;
            }
        }
        Ok(())
    }
}
