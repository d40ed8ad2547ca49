use anyhow::{anyhow, Result};
use xconn_domain::symbol::Symbol;

/// Quote assets Binance actually lists, longest-first so e.g. `BUSD` is tried
/// before `USD` and doesn't shadow it. Used only as the cold-start fallback
/// before `refresh_symbols` has populated the authoritative exchange-info map
/// (mirroring the pack's `strip_suffix("USDT").or_else(|| strip_suffix("USD"))`
/// idiom for mapping a Binance ticker back to its base asset).
const KNOWN_QUOTE_ASSETS: &[&str] = &[
    "USDT", "BUSD", "USDC", "TUSD", "BIDR", "BKRW", "IDRT", "BVND", "DAI", "EUR", "GBP", "TRY",
    "BRL", "RUB", "AUD", "NGN", "UAH", "VAI", "BTC", "ETH", "BNB", "USD",
];

/// Splits a native Binance symbol (`BTCUSDT`) into `(base, quote)` by trying
/// known quote-asset suffixes longest-first.
pub fn split_native(native: &str) -> Result<(&str, &str)> {
    let upper_len = native.len();
    for quote in KNOWN_QUOTE_ASSETS {
        if let Some(base) = native.strip_suffix(quote) {
            if !base.is_empty() && base.len() < upper_len {
                return Ok((base, quote));
            }
        }
    }
    Err(anyhow!("unable to split native symbol '{native}' into base/quote"))
}

pub fn normalize(native: &str) -> Result<Symbol> {
    let (base, quote) = split_native(&native.to_ascii_uppercase())?;
    Ok(Symbol::new(base, quote))
}

pub fn denormalize(symbol: &Symbol) -> String {
    format!("{}{}", symbol.base(), symbol.quote())
}

/// Builds the lowercase `<symbol>@<channel>[@<param>...]` stream identifier
/// used both for subscription URLs and as the routing key in `decode_frame`.
pub fn stream_id(symbol: &Symbol, channel: &str, params: &[&str]) -> String {
    let native = denormalize(symbol).to_ascii_lowercase();
    let mut id = format!("{native}@{channel}");
    for param in params {
        id.push('@');
        id.push_str(param);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_common_usdt_pair() {
        assert_eq!(split_native("BTCUSDT").unwrap(), ("BTC", "USDT"));
    }

    #[test]
    fn splits_without_shadowing_busd_by_usd() {
        assert_eq!(split_native("BTCBUSD").unwrap(), ("BTC", "BUSD"));
    }

    #[test]
    fn normalize_round_trips_through_denormalize() {
        let symbol = normalize("ethusdt").unwrap();
        assert_eq!(symbol, Symbol::new("ETH", "USDT"));
        assert_eq!(denormalize(&symbol), "ETHUSDT");
    }

    #[test]
    fn stream_id_is_lowercase_and_joins_params() {
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(stream_id(&symbol, "depth", &["100ms"]), "btcusdt@depth@100ms");
        assert_eq!(stream_id(&symbol, "ticker", &[]), "btcusdt@ticker");
    }

    #[test]
    fn rejects_unknown_quote_asset() {
        assert!(split_native("FOOBAR").is_err());
    }
}
