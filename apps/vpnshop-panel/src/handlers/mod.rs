pub mod webhooks;

pub async fn health() -> &'static str {
    "ok"
}
