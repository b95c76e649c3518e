use serde::Deserialize;
use sha2::{Digest, Sha256};

pub const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";

#[derive(Debug, Deserialize)]
pub struct CryptoPayUpdate {
    pub update_type: String,
    pub payload: CryptoPayInvoice,
}

#[derive(Debug, Deserialize)]
pub struct CryptoPayInvoice {
    pub invoice_id: i64,
    #[serde(default)]
    pub status: String,
    /// The purchase id we attached when minting the invoice.
    #[serde(default)]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceEvent {
    Paid { purchase_id: i64, invoice_id: i64 },
    Ignored(String),
}

/// Crypto Pay signs updates with `SHA256(api token)` as the HMAC key.
pub fn signing_secret(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

pub fn parse_event(body: &[u8]) -> Result<InvoiceEvent, serde_json::Error> {
    let update: CryptoPayUpdate = serde_json::from_slice(body)?;
    if update.update_type != "invoice_paid" {
        return Ok(InvoiceEvent::Ignored(update.update_type));
    }
    let purchase_id = update
        .payload
        .payload
        .as_deref()
        .and_then(|p| p.trim().parse::<i64>().ok());
    Ok(match purchase_id {
        Some(purchase_id) => InvoiceEvent::Paid {
            purchase_id,
            invoice_id: update.payload.invoice_id,
        },
        None => InvoiceEvent::Ignored(format!(
            "invoice {} without purchase payload",
            update.payload.invoice_id
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_invoice_carries_purchase_id() {
        let body = br#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":9,"status":"paid","payload":"41"}}"#;
        assert_eq!(
            parse_event(body).ok(),
            Some(InvoiceEvent::Paid {
                purchase_id: 41,
                invoice_id: 9
            })
        );
    }

    #[test]
    fn other_updates_are_ignored() {
        let body = br#"{"update_type":"invoice_expired","payload":{"invoice_id":9}}"#;
        assert!(matches!(parse_event(body), Ok(InvoiceEvent::Ignored(_))));
    }
}
