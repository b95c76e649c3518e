//! Conversational admin wizard for creating promocodes.
//!
//! Per-user state lives only in memory and is lost on restart.

use dashmap::DashMap;
use vpnshop_db::models::promo::{PromoKind, PromoUses, Promocode};

use crate::error::{ShopError, ShopResult};
use crate::services::promo_service::PromoService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardState {
    ChooseKind,
    EnterValue { kind: PromoKind },
    EnterUses { kind: PromoKind, value: i64 },
    EnterCode { kind: PromoKind, value: i64, uses: PromoUses },
}

/// Collected answers. `value` is minor units for balance codes, days otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoDraft {
    pub kind: PromoKind,
    pub value: i64,
    pub uses: PromoUses,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardReply {
    /// Next question to ask, by translation key.
    Ask(&'static str),
    /// Input was rejected; the same question stands.
    Retry(&'static str),
    Done(PromoDraft),
}

fn prompt_for(state: &WizardState) -> &'static str {
    match state {
        WizardState::ChooseKind => "wizard_choose_kind",
        WizardState::EnterValue { kind: PromoKind::Balance } => "wizard_enter_amount",
        WizardState::EnterValue { kind: PromoKind::Subscription } => "wizard_enter_days",
        WizardState::EnterUses { .. } => "wizard_enter_uses",
        WizardState::EnterCode { .. } => "wizard_enter_code",
    }
}

/// Parses `150` or `150.5` into minor units.
pub fn parse_money(input: &str) -> Option<i64> {
    let input = input.trim().replace(',', ".");
    let (whole, frac) = input.split_once('.').unwrap_or((input.as_str(), ""));
    if frac.len() > 2 || whole.is_empty() {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<2}").parse().ok()?
    };
    whole.checked_mul(100)?.checked_add(frac).filter(|v| *v > 0)
}

fn parse_uses(input: &str) -> Option<PromoUses> {
    match input.trim().to_lowercase().as_str() {
        "∞" | "unlimited" | "inf" => Some(PromoUses::Unlimited),
        other => other
            .parse::<i32>()
            .ok()
            .filter(|n| *n > 0)
            .map(PromoUses::Limited),
    }
}

#[derive(Default)]
pub struct PromoWizard {
    sessions: DashMap<i64, WizardState>,
}

impl PromoWizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, user_id: i64) -> WizardReply {
        self.sessions.insert(user_id, WizardState::ChooseKind);
        WizardReply::Ask(prompt_for(&WizardState::ChooseKind))
    }

    pub fn cancel(&self, user_id: i64) -> bool {
        self.sessions.remove(&user_id).is_some()
    }

    pub fn state(&self, user_id: i64) -> Option<WizardState> {
        self.sessions.get(&user_id).map(|s| s.clone())
    }

    /// Feeds one answer. `None` when the user has no wizard running.
    pub fn advance(&self, user_id: i64, input: &str) -> Option<WizardReply> {
        let current = self.state(user_id)?;
        let next = match current {
            WizardState::ChooseKind => match input.trim().to_lowercase().as_str() {
                "balance" => WizardState::EnterValue { kind: PromoKind::Balance },
                "subscription" | "days" => WizardState::EnterValue {
                    kind: PromoKind::Subscription,
                },
                _ => return Some(WizardReply::Retry(prompt_for(&current))),
            },
            WizardState::EnterValue { kind } => {
                let value = match kind {
                    PromoKind::Balance => parse_money(input),
                    PromoKind::Subscription => {
                        input.trim().parse::<i64>().ok().filter(|d| (1..=3650).contains(d))
                    }
                };
                match value {
                    Some(value) => WizardState::EnterUses { kind, value },
                    None => return Some(WizardReply::Retry(prompt_for(&current))),
                }
            }
            WizardState::EnterUses { kind, value } => match parse_uses(input) {
                Some(uses) => WizardState::EnterCode { kind, value, uses },
                None => return Some(WizardReply::Retry(prompt_for(&current))),
            },
            WizardState::EnterCode { kind, value, uses } => {
                let code = match input.trim() {
                    "-" | "" => None,
                    c if c.eq_ignore_ascii_case("auto") => None,
                    c => Some(c.to_string()),
                };
                self.sessions.remove(&user_id);
                return Some(WizardReply::Done(PromoDraft {
                    kind,
                    value,
                    uses,
                    code,
                }));
            }
        };

        let reply = WizardReply::Ask(prompt_for(&next));
        self.sessions.insert(user_id, next);
        Some(reply)
    }
}

impl PromoDraft {
    pub async fn submit(self, promos: &PromoService, created_by: i64) -> ShopResult<Promocode> {
        match self.kind {
            PromoKind::Balance => {
                promos
                    .create_balance_promocode(created_by, self.value, self.uses, self.code.as_deref())
                    .await
            }
            PromoKind::Subscription => {
                let days = i32::try_from(self.value)
                    .map_err(|_| ShopError::Validation("too many days".into()))?;
                promos
                    .create_subscription_promocode(created_by, days, 0, self.uses, self.code.as_deref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_through_balance_code() {
        let wizard = PromoWizard::new();
        assert_eq!(wizard.start(1), WizardReply::Ask("wizard_choose_kind"));
        assert_eq!(wizard.advance(1, "balance"), Some(WizardReply::Ask("wizard_enter_amount")));
        assert_eq!(wizard.advance(1, "150.5"), Some(WizardReply::Ask("wizard_enter_uses")));
        assert_eq!(wizard.advance(1, "∞"), Some(WizardReply::Ask("wizard_enter_code")));
        assert_eq!(
            wizard.advance(1, "-"),
            Some(WizardReply::Done(PromoDraft {
                kind: PromoKind::Balance,
                value: 15_050,
                uses: PromoUses::Unlimited,
                code: None,
            }))
        );
        assert_eq!(wizard.state(1), None);
    }

    #[test]
    fn bad_input_keeps_the_step() {
        let wizard = PromoWizard::new();
        wizard.start(2);
        wizard.advance(2, "subscription");
        assert_eq!(wizard.advance(2, "zero"), Some(WizardReply::Retry("wizard_enter_days")));
        wizard.advance(2, "30");
        assert_eq!(wizard.advance(2, "0"), Some(WizardReply::Retry("wizard_enter_uses")));
        assert!(matches!(wizard.state(2), Some(WizardState::EnterUses { value: 30, .. })));
    }

    #[test]
    fn no_session_means_no_reply() {
        let wizard = PromoWizard::new();
        assert_eq!(wizard.advance(3, "balance"), None);
        wizard.start(3);
        assert!(wizard.cancel(3));
        assert!(!wizard.cancel(3));
    }

    #[test]
    fn money_parsing() {
        assert_eq!(parse_money("150"), Some(15_000));
        assert_eq!(parse_money("1,05"), Some(105));
        assert_eq!(parse_money("1.234"), None);
        assert_eq!(parse_money("0"), None);
        assert_eq!(parse_money(".5"), None);
    }
}
