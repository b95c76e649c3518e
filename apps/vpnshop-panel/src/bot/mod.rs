use teloxide::types::{Message, PreCheckoutQuery, Update};
use teloxide::{dptree, prelude::*};
use tracing::{error, info, warn};
use vpnshop_db::models::promo::MAX_MONTHS;
use vpnshop_db::models::purchase::InvoiceType;

use crate::AppState;
use crate::error::ShopError;
use crate::i18n::format_money;
use crate::services::pay_service::BalancePurchase;
use crate::services::wizard_service::WizardReply;

/// Who sent a message.
#[derive(Debug, Clone)]
pub struct Sender {
    pub telegram_id: i64,
    pub language: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Set when the reply is a payment prompt to remember for this purchase.
    pub prompt_for: Option<i64>,
}

impl Reply {
    fn text(text: String) -> Self {
        Self {
            text,
            prompt_for: None,
        }
    }
}

fn user_error(state: &AppState, language: &str, e: &ShopError) -> Option<Reply> {
    let key = match e {
        ShopError::PromoInvalid => "promo_invalid",
        ShopError::PromoAlreadyUsed => "promo_already_used",
        ShopError::InsufficientBalance { needed, available } => {
            return Some(Reply::text(state.translations.render(
                language,
                "insufficient_balance",
                &[
                    ("price", format_money(*needed)),
                    ("balance", format_money(*available)),
                ],
            )));
        }
        ShopError::Validation(msg) => return Some(Reply::text(format!("❌ {msg}"))),
        _ => return None,
    };
    Some(Reply::text(state.translations.text(language, key).to_string()))
}

fn parse_invoice_type(raw: &str) -> Option<InvoiceType> {
    match raw.trim().to_lowercase().as_str() {
        "crypto" => Some(InvoiceType::Crypto),
        "stars" | "telegram" => Some(InvoiceType::Stars),
        "tribute" => Some(InvoiceType::Tribute),
        _ => None,
    }
}

/// Text commands, independent of the transport. User mistakes get a reply;
/// infrastructure failures are logged and answered with nothing.
pub async fn handle_text(state: &AppState, sender: &Sender, text: &str) -> Option<Reply> {
    let result = dispatch(state, sender, text).await;
    match result {
        Ok(reply) => reply,
        Err(e) if e.is_user_facing() => user_error(state, &sender.language, &e),
        Err(e) => {
            error!(telegram_id = sender.telegram_id, "Command '{}' failed: {}", text, e);
            None
        }
    }
}

async fn dispatch(state: &AppState, sender: &Sender, text: &str) -> Result<Option<Reply>, ShopError> {
    let mut parts = text.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    let lang = sender.language.as_str();

    if !command.starts_with('/') {
        return wizard_step(state, sender, text).await;
    }

    let (customer, created) = state
        .customers
        .get_or_create(sender.telegram_id, lang)
        .await?;

    match command {
        "/start" => {
            if let Some(payload) = args.first() {
                state
                    .referral_service
                    .register_from_start(&customer, created, payload)
                    .await?;
            }
            Ok(Some(Reply::text(state.translations.render(
                lang,
                "start",
                &[("balance", format_money(customer.balance))],
            ))))
        }
        "/promo" => {
            let code = args
                .first()
                .ok_or_else(|| ShopError::Validation("usage: /promo CODE".into()))?;
            // The service confirms the redemption itself.
            state.promo_service.apply_promocode(customer.id, code).await?;
            Ok(None)
        }
        "/buy" => {
            let months = parse_months(args.first())?;
            match state.pay_service.purchase_from_balance(customer.id, months).await? {
                // Both outcomes were already messaged by the ledger.
                BalancePurchase::Activated(_) | BalancePurchase::InsufficientBalance { .. } => {
                    Ok(None)
                }
            }
        }
        "/pay" => {
            let months = parse_months(args.first())?;
            let invoice_type = args
                .get(1)
                .and_then(|raw| parse_invoice_type(raw))
                .ok_or_else(|| ShopError::Validation("usage: /pay MONTHS crypto|stars|tribute".into()))?;
            let amount = state.pay_service.quote(months);
            let invoice = state
                .pay_service
                .create_purchase(amount, months, &customer, invoice_type, sender.username.clone())
                .await?;
            Ok(Some(Reply {
                text: state.translations.render(
                    lang,
                    "pay_link",
                    &[("url", invoice.payment_url)],
                ),
                prompt_for: Some(invoice.purchase_id),
            }))
        }
        "/mypromo" => {
            let months = parse_months(args.first())?;
            let uses = args
                .get(1)
                .and_then(|u| u.parse::<i32>().ok())
                .ok_or_else(|| ShopError::Validation("usage: /mypromo MONTHS USES".into()))?;
            let promo = state
                .promo_service
                .create_promocode(&customer, months, uses)
                .await?;
            Ok(Some(Reply::text(state.translations.render(
                lang,
                "promo_created",
                &[("code", promo.code)],
            ))))
        }
        "/referrals" => {
            let count = state
                .referral_service
                .referral_count(sender.telegram_id)
                .await?;
            Ok(Some(Reply::text(state.translations.render(
                lang,
                "referral_stats",
                &[
                    ("count", count.to_string()),
                    ("link", format!("ref_{}", sender.telegram_id)),
                ],
            ))))
        }
        "/newpromo" if state.config.is_admin(sender.telegram_id) => {
            match state.wizard.start(sender.telegram_id) {
                WizardReply::Ask(key) | WizardReply::Retry(key) => {
                    Ok(Some(Reply::text(state.translations.text(lang, key).to_string())))
                }
                WizardReply::Done(_) => Ok(None),
            }
        }
        "/cancel" => {
            state.wizard.cancel(sender.telegram_id);
            Ok(None)
        }
        _ => Ok(None),
    }
}

async fn wizard_step(
    state: &AppState,
    sender: &Sender,
    text: &str,
) -> Result<Option<Reply>, ShopError> {
    let lang = sender.language.as_str();
    match state.wizard.advance(sender.telegram_id, text) {
        None => Ok(None),
        Some(WizardReply::Ask(key)) | Some(WizardReply::Retry(key)) => {
            Ok(Some(Reply::text(state.translations.text(lang, key).to_string())))
        }
        Some(WizardReply::Done(draft)) => {
            let promo = draft
                .submit(&state.promo_service, sender.telegram_id)
                .await?;
            Ok(Some(Reply::text(state.translations.render(
                lang,
                "promo_created",
                &[("code", promo.code)],
            ))))
        }
    }
}

fn parse_months(raw: Option<&&str>) -> Result<i32, ShopError> {
    raw.and_then(|m| m.parse::<i32>().ok())
        .filter(|m| (1..=MAX_MONTHS).contains(m))
        .ok_or_else(|| {
            ShopError::Validation(format!("months must be a number from 1 to {MAX_MONTHS}"))
        })
}

async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    if let Some(payment) = msg.successful_payment() {
        info!("Stars payment received: {} XTR", payment.total_amount);
        if let Err(e) = state
            .pay_service
            .handle_successful_payment(&payment.invoice_payload)
            .await
        {
            error!("Failed to process stars payment: {}", e);
        }
        return Ok(());
    }

    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
        return Ok(());
    };
    let sender = Sender {
        telegram_id: user.id.0 as i64,
        language: user
            .language_code
            .clone()
            .unwrap_or_else(|| state.config.default_language.clone()),
        username: user.username.clone(),
    };

    if let Some(reply) = handle_text(&state, &sender, text).await {
        let sent = bot.send_message(msg.chat.id, reply.text).await?;
        if let Some(purchase_id) = reply.prompt_for {
            state
                .pay_service
                .remember_payment_prompt(purchase_id, msg.chat.id.0, sent.id.0);
        }
    }
    Ok(())
}

async fn pre_checkout_handler(bot: Bot, q: PreCheckoutQuery) -> Result<(), teloxide::RequestError> {
    bot.answer_pre_checkout_query(q.id, true).await?;
    Ok(())
}

/// Runs the long-polling dispatcher until `shutdown` fires.
pub async fn run_bot(
    bot: Bot,
    state: AppState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    match bot.get_me().await {
        Ok(me) => info!(
            "Bot connected as @{}",
            me.username.clone().unwrap_or_else(|| "unknown".into())
        ),
        Err(e) => {
            warn!("Bot failed to connect, chat commands disabled: {}", e);
            return;
        }
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_pre_checkout_query().endpoint(pre_checkout_handler));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    tokio::select! {
        _ = dispatcher.dispatch() => info!("Bot dispatcher exited"),
        _ = shutdown.changed() => info!("Bot stopping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_type_aliases() {
        assert_eq!(parse_invoice_type("Stars"), Some(InvoiceType::Stars));
        assert_eq!(parse_invoice_type("crypto"), Some(InvoiceType::Crypto));
        assert_eq!(parse_invoice_type("card"), None);
    }

    #[test]
    fn months_must_be_in_range() {
        assert_eq!(parse_months(Some(&"3")).ok(), Some(3));
        assert!(parse_months(Some(&"0")).is_err());
        assert!(parse_months(Some(&"30370005")).is_err());
        assert!(parse_months(None).is_err());
    }
}
