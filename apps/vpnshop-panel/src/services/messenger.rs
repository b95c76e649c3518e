use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{LabeledPrice, MessageId};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// The chat transport, reduced to the calls the shop needs.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Returns the id of the sent message.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    /// Mints a payable in-app stars invoice link.
    async fn create_invoice_link(
        &self,
        title: &str,
        description: &str,
        payload: &str,
        stars_amount: u32,
    ) -> Result<String>;
}

pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

async fn bounded<T, E, F>(what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    tokio::time::timeout(CALL_TIMEOUT, call)
        .await
        .with_context(|| format!("{what} timed out"))?
        .with_context(|| format!("{what} failed"))
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32> {
        let msg = bounded(
            "sendMessage",
            self.bot.send_message(ChatId(chat_id), text.to_string()).into_future(),
        )
        .await?;
        Ok(msg.id.0)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        bounded(
            "deleteMessage",
            self.bot
                .delete_message(ChatId(chat_id), MessageId(message_id))
                .into_future(),
        )
        .await?;
        Ok(())
    }

    async fn create_invoice_link(
        &self,
        title: &str,
        description: &str,
        payload: &str,
        stars_amount: u32,
    ) -> Result<String> {
        let prices = vec![LabeledPrice {
            label: title.to_string(),
            amount: stars_amount,
        }];
        bounded(
            "createInvoiceLink",
            self.bot
                .create_invoice_link(title, description, payload, "XTR", prices)
                .into_future(),
        )
        .await
    }
}
