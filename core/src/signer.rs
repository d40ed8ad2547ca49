use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const MIN_RECV_WINDOW_MS: u64 = 1;
const MAX_RECV_WINDOW_MS: u64 = 60_000;
const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

/// Clamps a requested `recvWindow` to `[1, 60000]`, defaulting to 5000 when
/// the input is non-positive.
pub fn clamp_recv_window(requested_ms: i64) -> u64 {
    let value = if requested_ms > 0 {
        requested_ms as u64
    } else {
        DEFAULT_RECV_WINDOW_MS
    };
    value.clamp(MIN_RECV_WINDOW_MS, MAX_RECV_WINDOW_MS)
}

/// HMAC-keyed request signer. Never holds the API key: that rides in the
/// `X-MBX-APIKEY`-style header, injected by the REST pipeline, not here.
pub struct Signer {
    api_secret: String,
    recv_window_ms: u64,
}

pub struct SignedRequest {
    pub timestamp_ms: i64,
    pub recv_window_ms: u64,
    pub signature_hex: String,
    /// Full canonical query string, including `timestamp` and `recvWindow`
    /// but excluding `signature` (callers append `&signature=...`).
    pub canonical_query: String,
}

impl Signer {
    pub fn new(api_secret: impl Into<String>, recv_window_ms: i64) -> Self {
        Self {
            api_secret: api_secret.into(),
            recv_window_ms: clamp_recv_window(recv_window_ms),
        }
    }

    /// Appends `timestamp`/`recvWindow`, builds the canonical (ascending
    /// byte-order, URL-encoded) query string over `params` plus those two,
    /// and signs it with HMAC-SHA256 over `api_secret`.
    pub fn sign(&self, mut params: Vec<(String, String)>, now_ms: i64) -> SignedRequest {
        params.push(("recvWindow".to_owned(), self.recv_window_ms.to_string()));
        params.push(("timestamp".to_owned(), now_ms.to_string()));
        params.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let canonical_query = encode_query(&params);
        let signature_hex = hex_hmac_sha256(&self.api_secret, &canonical_query);

        SignedRequest {
            timestamp_ms: now_ms,
            recv_window_ms: self.recv_window_ms,
            signature_hex,
            canonical_query,
        }
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn hex_hmac_sha256(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(message.as_bytes());
    let bytes = mac.finalize().into_bytes();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_applies_default_for_non_positive_input() {
        assert_eq!(clamp_recv_window(0), 5_000);
        assert_eq!(clamp_recv_window(-1), 5_000);
    }

    #[test]
    fn clamp_bounds_to_spec_range() {
        assert_eq!(clamp_recv_window(70_000), 60_000);
        assert_eq!(clamp_recv_window(1), 1);
    }

    #[test]
    fn signed_ping_matches_known_vector() {
        let signer = Signer::new("s", 5000);
        let signed = signer.sign(
            vec![
                ("symbol".to_owned(), "BTCUSDT".to_owned()),
                ("side".to_owned(), "BUY".to_owned()),
            ],
            1_700_000_000_000,
        );

        assert_eq!(
            signed.canonical_query,
            "recvWindow=5000&side=BUY&symbol=BTCUSDT&timestamp=1700000000000"
        );

        let expected_signature = hex_hmac_sha256("s", &signed.canonical_query);
        assert_eq!(signed.signature_hex, expected_signature);
    }

    #[test]
    fn params_sort_ascending_by_raw_byte_order() {
        let signer = Signer::new("secret", 5000);
        let signed = signer.sign(
            vec![
                ("type".to_owned(), "LIMIT".to_owned()),
                ("price".to_owned(), "0.1".to_owned()),
                ("quantity".to_owned(), "1".to_owned()),
            ],
            1_499_827_319_559,
        );

        assert!(signed.canonical_query.starts_with("price=0.1&quantity=1&recvWindow=5000&timestamp=1499827319559&type=LIMIT"));
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let signer = Signer::new("secret", 5000);
        let signed = signer.sign(vec![], 1);
        assert!(signed.signature_hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(signed.signature_hex.len(), 64);
    }
}
