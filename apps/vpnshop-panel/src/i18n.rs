use std::collections::HashMap;

const EN: &[(&str, &str)] = &[
    ("payment_received", "✅ Payment received: +{amount} added to your balance."),
    ("insufficient_balance", "❌ Not enough balance. Price: {price}, balance: {balance}."),
    ("subscription_activated", "✅ Subscription active until {expire}.\n{link}"),
    ("referral_bonus", "🎉 Referral bonus: +{amount} for inviting a friend!"),
    ("promo_balance", "🎁 Promocode applied: +{amount} added to your balance."),
    ("promo_subscription", "🎁 Promocode applied: subscription extended until {expire}.\n{link}"),
    ("promo_invalid", "❌ This promocode is invalid, expired or already exhausted."),
    ("promo_already_used", "❌ You have already used this promocode."),
    ("promo_created", "✅ Promocode created: {code}"),
    ("pay_link", "💳 Pay here: {url}"),
    ("wizard_choose_kind", "What should the code grant? Reply `balance` or `subscription`."),
    ("wizard_enter_amount", "Enter the balance amount, e.g. 150 or 150.50."),
    ("wizard_enter_days", "Enter the number of subscription days."),
    ("wizard_enter_uses", "How many redemptions? A positive number or ∞ for unlimited."),
    ("wizard_enter_code", "Enter the code, or `-` to generate one."),
    ("referral_stats", "👥 Friends invited: {count}\nYour link: {link}"),
    ("start", "👋 Welcome! Balance: {balance}."),
];

const RU: &[(&str, &str)] = &[
    ("payment_received", "✅ Оплата получена: на баланс зачислено {amount}."),
    ("insufficient_balance", "❌ Недостаточно средств. Цена: {price}, баланс: {balance}."),
    ("subscription_activated", "✅ Подписка активна до {expire}.\n{link}"),
    ("referral_bonus", "🎉 Реферальный бонус: +{amount} за приглашённого друга!"),
    ("promo_balance", "🎁 Промокод применён: на баланс зачислено {amount}."),
    ("promo_subscription", "🎁 Промокод применён: подписка продлена до {expire}.\n{link}"),
    ("promo_invalid", "❌ Промокод недействителен или исчерпан."),
    ("promo_already_used", "❌ Вы уже использовали этот промокод."),
    ("promo_created", "✅ Промокод создан: {code}"),
    ("pay_link", "💳 Оплатить: {url}"),
    ("wizard_choose_kind", "Что даёт код? Ответьте `balance` или `subscription`."),
    ("wizard_enter_amount", "Введите сумму, например 150 или 150.50."),
    ("wizard_enter_days", "Введите количество дней подписки."),
    ("wizard_enter_uses", "Сколько активаций? Положительное число или ∞ без ограничений."),
    ("wizard_enter_code", "Введите код или `-` для генерации."),
    ("referral_stats", "👥 Приглашено друзей: {count}\nВаша ссылка: {link}"),
    ("start", "👋 Добро пожаловать! Баланс: {balance}."),
];

/// Message catalog, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Translations {
    default_language: String,
    catalogs: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

impl Translations {
    pub fn new(default_language: &str) -> Self {
        let catalogs = [("en", EN), ("ru", RU)]
            .into_iter()
            .map(|(lang, entries)| (lang, entries.iter().copied().collect()))
            .collect();
        Self {
            default_language: default_language.to_string(),
            catalogs,
        }
    }

    pub fn text<'a>(&'a self, language: &str, key: &'a str) -> &'a str {
        self.catalogs
            .get(language)
            .and_then(|c| c.get(key))
            .or_else(|| {
                self.catalogs
                    .get(self.default_language.as_str())
                    .and_then(|c| c.get(key))
            })
            .copied()
            .unwrap_or(key)
    }

    /// Looks up `key` and substitutes `{name}` placeholders.
    pub fn render(&self, language: &str, key: &str, args: &[(&str, String)]) -> String {
        let mut out = self.text(language, key).to_string();
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

/// Formats minor units as `123.45`.
pub fn format_money(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_language_then_key() {
        let t = Translations::new("en");
        assert!(t.text("de", "promo_invalid").contains("invalid"));
        assert_eq!(t.text("ru", "no_such_key"), "no_such_key");
    }

    #[test]
    fn renders_placeholders() {
        let t = Translations::new("en");
        let msg = t.render("ru", "promo_created", &[("code", "ABCD".to_string())]);
        assert!(msg.ends_with("ABCD"));
    }

    #[test]
    fn money_formatting() {
        assert_eq!(format_money(50_000), "500.00");
        assert_eq!(format_money(5), "0.05");
        assert_eq!(format_money(-150), "-1.50");
    }
}
