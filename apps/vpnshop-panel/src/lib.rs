pub mod bot;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod i18n;
pub mod services;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use vpnshop_db::{CustomerStore, Stores};

use config::Config;
use i18n::Translations;
use services::message_cache::MessageCache;
use services::messenger::Messenger;
use services::pay_service::PayService;
use services::payment::ProviderRegistry;
use services::payment::crypto_pay::{CryptoInvoiceApi, CryptoProvider};
use services::payment::stars::StarsProvider;
use services::payment::tribute::TributeProvider;
use services::promo_service::PromoService;
use services::provisioning::Provisioner;
use services::referral_service::ReferralService;
use services::wizard_service::PromoWizard;
use webhook::dedup::DedupCache;

pub const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;
const MESSAGE_CACHE_SWEEP: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub translations: Arc<Translations>,
    pub customers: Arc<dyn CustomerStore>,
    pub pay_service: Arc<PayService>,
    pub promo_service: Arc<PromoService>,
    pub referral_service: Arc<ReferralService>,
    pub wizard: Arc<PromoWizard>,
    pub dedup: DedupCache,
    pub message_cache: Arc<MessageCache>,
}

impl AppState {
    /// Wires the services. Must run inside a tokio runtime.
    pub fn new(
        config: Config,
        stores: Stores,
        provisioner: Arc<dyn Provisioner>,
        messenger: Arc<dyn Messenger>,
        crypto_api: Option<Arc<dyn CryptoInvoiceApi>>,
    ) -> Self {
        let config = Arc::new(config);
        let translations = Arc::new(Translations::new(&config.default_language));
        let message_cache = MessageCache::start(config.message_cache_ttl, MESSAGE_CACHE_SWEEP);

        let providers = ProviderRegistry::new()
            .register(Arc::new(CryptoProvider::new(
                crypto_api,
                stores.purchases.clone(),
                config.currency.clone(),
            )))
            .register(Arc::new(StarsProvider::new(
                config.stars_enabled,
                messenger.clone(),
                stores.purchases.clone(),
                config.stars_pricing.clone(),
            )))
            .register(Arc::new(TributeProvider::new(
                config.tribute.clone(),
                stores.purchases.clone(),
                config.currency.clone(),
            )));

        let referral_service = Arc::new(ReferralService::new(
            stores.referrals.clone(),
            stores.customers.clone(),
            messenger.clone(),
            translations.clone(),
            config.referral_bonus,
        ));
        let pay_service = Arc::new(PayService::new(
            config.clone(),
            stores.customers.clone(),
            stores.purchases.clone(),
            providers,
            provisioner.clone(),
            messenger.clone(),
            translations.clone(),
            message_cache.clone(),
            referral_service.clone(),
        ));
        let promo_service = Arc::new(PromoService::new(
            config.clone(),
            stores.promos.clone(),
            stores.customers.clone(),
            provisioner,
            messenger,
            translations.clone(),
        ));

        Self {
            config,
            translations,
            customers: stores.customers,
            pay_service,
            promo_service,
            referral_service,
            wizard: Arc::new(PromoWizard::new()),
            dedup: DedupCache::default(),
            message_cache,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let webhooks = Router::new()
        .route(
            "/tribute",
            post(handlers::webhooks::tribute_webhook)
                .fallback(handlers::webhooks::method_not_allowed),
        )
        .route(
            "/cryptopay",
            post(handlers::webhooks::cryptopay_webhook)
                .fallback(handlers::webhooks::method_not_allowed),
        )
        .layer(RequestBodyLimitLayer::new(WEBHOOK_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/webhooks", webhooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
