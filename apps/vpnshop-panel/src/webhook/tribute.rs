use serde::Deserialize;

pub const SIGNATURE_HEADER: &str = "trbt-signature";

#[derive(Debug, Deserialize)]
pub struct TributeWebhook {
    pub name: String,
    #[serde(default)]
    pub payload: TributePayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct TributePayload {
    #[serde(default)]
    pub telegram_user_id: i64,
    #[serde(default)]
    pub period: String,
    /// Minor units.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub subscription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Paid {
        telegram_id: i64,
        amount: i64,
        currency: String,
        months: i32,
    },
    Cancelled {
        telegram_id: i64,
    },
    Ignored(String),
}

/// Month count for a subscription period name. Unknown periods count as one
/// month.
pub fn months_for_period(period: &str) -> i32 {
    match period.trim().to_lowercase().as_str() {
        "monthly" | "month" | "1m" => 1,
        "quarterly" | "3-month" | "3m" | "three_months" => 3,
        "halfyearly" | "half-year" | "6m" | "six_months" => 6,
        "yearly" | "annual" | "annually" | "12m" => 12,
        _ => 1,
    }
}

pub fn parse_event(body: &[u8]) -> Result<SubscriptionEvent, serde_json::Error> {
    let webhook: TributeWebhook = serde_json::from_slice(body)?;
    let p = webhook.payload;
    Ok(match webhook.name.as_str() {
        "new_subscription" if p.telegram_user_id > 0 => SubscriptionEvent::Paid {
            telegram_id: p.telegram_user_id,
            amount: p.amount,
            currency: p.currency.to_uppercase(),
            months: months_for_period(&p.period),
        },
        "cancelled_subscription" if p.telegram_user_id > 0 => SubscriptionEvent::Cancelled {
            telegram_id: p.telegram_user_id,
        },
        other => SubscriptionEvent::Ignored(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_aliases() {
        assert_eq!(months_for_period("monthly"), 1);
        assert_eq!(months_for_period("Quarterly"), 3);
        assert_eq!(months_for_period("half-year"), 6);
        assert_eq!(months_for_period("annually"), 12);
        assert_eq!(months_for_period("fortnightly"), 1);
        assert_eq!(months_for_period(""), 1);
    }

    #[test]
    fn parses_new_subscription() {
        let body = br#"{"name":"new_subscription","payload":{"telegram_user_id":77,"period":"quarterly","amount":27000,"currency":"rub"}}"#;
        assert_eq!(
            parse_event(body).ok(),
            Some(SubscriptionEvent::Paid {
                telegram_id: 77,
                amount: 27_000,
                currency: "RUB".into(),
                months: 3,
            })
        );
    }

    #[test]
    fn unknown_events_are_ignored_and_garbage_fails() {
        let body = br#"{"name":"digital_product","payload":{}}"#;
        assert!(matches!(parse_event(body), Ok(SubscriptionEvent::Ignored(_))));
        assert!(parse_event(b"not json").is_err());
    }
}
