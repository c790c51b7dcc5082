// =============================================================================
// Catalog — static instrument definitions (C1)
// =============================================================================
//
// Immutable after load. ~135 synthetic instruments spanning the four
// instrument types the price engine treats differently (bonds get a flat,
// low volatility floor; everything else scales off `baseVolatility`).
// =============================================================================

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Growth,
    Dividend,
    Etf,
    Bond,
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentType::Growth => write!(f, "growth"),
            InstrumentType::Dividend => write!(f, "dividend"),
            InstrumentType::Etf => write!(f, "etf"),
            InstrumentType::Bond => write!(f, "bond"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub display_name: String,
    pub base_price: f64,
    #[serde(rename = "type")]
    pub kind: InstrumentType,
    pub base_volatility: f64,
}

/// Word banks combined to synthesize a convincing, internally consistent
/// catalog without typing out 135 literal rows by hand. Deterministic: the
/// same indices always produce the same symbol/name/price/volatility.
const GROWTH_ROOTS: &[&str] = &[
    "Nova", "Quantum", "Vertex", "Helix", "Pulse", "Orbit", "Catalyst", "Forge",
    "Cipher", "Lumen", "Drift", "Summit", "Axiom", "Zenith", "Flux",
];
const DIVIDEND_ROOTS: &[&str] = &[
    "Meridian", "Anchor", "Granite", "Harbor", "Sterling", "Ironclad", "Bedrock",
    "Keystone", "Evergreen", "Continental",
];
const ETF_ROOTS: &[&str] = &[
    "Broad", "Sector", "Global", "Horizon", "Compass", "Aggregate",
];
const BOND_ROOTS: &[&str] = &[
    "Treasury", "Municipal", "Sovereign", "Ladder", "Coupon",
];
const SUFFIXES: &[&str] = &["Corp", "Holdings", "Group", "Industries", "Partners", "Co"];

fn make_symbol(root: &str, suffix_idx: usize, n: usize) -> String {
    let mut s: String = root.chars().take(3).collect::<String>().to_uppercase();
    let suffix_letter = SUFFIXES[suffix_idx % SUFFIXES.len()]
        .chars()
        .next()
        .unwrap_or('X');
    s.push(suffix_letter.to_ascii_uppercase());
    if n > 0 {
        s.push(char::from(b'A' + (n % 26) as u8));
    }
    s.truncate(5);
    s
}

fn build_catalog() -> Vec<Instrument> {
    let mut out = Vec::with_capacity(135);
    let mut seen_symbols = std::collections::HashSet::new();

    let mut push = |symbol: String,
                    display_name: String,
                    base_price: f64,
                    kind: InstrumentType,
                    base_volatility: f64,
                    out: &mut Vec<Instrument>| {
        if seen_symbols.insert(symbol.clone()) {
            out.push(Instrument {
                symbol,
                display_name,
                base_price,
                kind,
                base_volatility,
            });
        }
    };

    // Growth: 60 instruments, higher volatility, wide price spread.
    for i in 0..60 {
        let root = GROWTH_ROOTS[i % GROWTH_ROOTS.len()];
        let suffix = SUFFIXES[(i / GROWTH_ROOTS.len()) % SUFFIXES.len()];
        let symbol = make_symbol(root, i / GROWTH_ROOTS.len(), i);
        let price = 15.0 + (i as f64 * 7.3) % 480.0;
        let vol = 0.015 + (i as f64 % 11.0) * 0.003;
        push(
            symbol,
            format!("{root} {suffix}"),
            (price * 100.0).round() / 100.0,
            InstrumentType::Growth,
            vol,
            &mut out,
        );
    }

    // Dividend: 40 instruments, lower volatility, steadier price band.
    for i in 0..40 {
        let root = DIVIDEND_ROOTS[i % DIVIDEND_ROOTS.len()];
        let suffix = SUFFIXES[(i / DIVIDEND_ROOTS.len()) % SUFFIXES.len()];
        let symbol = make_symbol(root, i / DIVIDEND_ROOTS.len() + 1, i);
        let price = 25.0 + (i as f64 * 4.1) % 200.0;
        let vol = 0.006 + (i as f64 % 7.0) * 0.001;
        push(
            symbol,
            format!("{root} {suffix}"),
            (price * 100.0).round() / 100.0,
            InstrumentType::Dividend,
            vol,
            &mut out,
        );
    }

    // ETF: 20 instruments, moderate volatility, round prices.
    for i in 0..20 {
        let root = ETF_ROOTS[i % ETF_ROOTS.len()];
        let symbol = make_symbol(root, i / ETF_ROOTS.len() + 2, i);
        let price = 40.0 + (i as f64 * 9.0) % 360.0;
        let vol = 0.008 + (i as f64 % 5.0) * 0.0015;
        push(
            symbol,
            format!("{root} Index Fund"),
            (price * 100.0).round() / 100.0,
            InstrumentType::Etf,
            vol,
            &mut out,
        );
    }

    // Bond: 15 instruments, near-flat price, lowest volatility (the price
    // engine floors bond volatility to 0.002 regardless of this field).
    for i in 0..15 {
        let root = BOND_ROOTS[i % BOND_ROOTS.len()];
        let symbol = make_symbol(root, i / BOND_ROOTS.len() + 3, i);
        let price = 95.0 + (i as f64 % 10.0);
        push(
            symbol,
            format!("{root} Bond Fund"),
            (price * 100.0).round() / 100.0,
            InstrumentType::Bond,
            0.002,
            &mut out,
        );
    }

    out
}

pub static CATALOG: Lazy<Vec<Instrument>> = Lazy::new(build_catalog);

pub static CATALOG_BY_SYMBOL: Lazy<HashMap<String, Instrument>> = Lazy::new(|| {
    CATALOG
        .iter()
        .cloned()
        .map(|i| (i.symbol.clone(), i))
        .collect()
});

/// Look up an instrument by symbol.
pub fn lookup(symbol: &str) -> Option<&'static Instrument> {
    CATALOG_BY_SYMBOL.get(symbol)
}

/// All catalog symbols, in definition order.
pub fn all_symbols() -> Vec<String> {
    CATALOG.iter().map(|i| i.symbol.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_no_duplicate_symbols() {
        let mut seen = std::collections::HashSet::new();
        for inst in CATALOG.iter() {
            assert!(seen.insert(&inst.symbol), "duplicate symbol {}", inst.symbol);
        }
    }

    #[test]
    fn catalog_is_roughly_135_instruments() {
        let n = CATALOG.len();
        assert!(n >= 120 && n <= 140, "expected ~135 instruments, got {n}");
    }

    #[test]
    fn every_symbol_is_short_uppercase() {
        for inst in CATALOG.iter() {
            assert!(inst.symbol.len() >= 1 && inst.symbol.len() <= 5);
            assert!(inst.symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn every_base_price_and_volatility_is_positive() {
        for inst in CATALOG.iter() {
            assert!(inst.base_price > 0.0);
            assert!(inst.base_volatility > 0.0);
        }
    }

    #[test]
    fn lookup_finds_known_symbol() {
        let sym = &CATALOG[0].symbol;
        assert!(lookup(sym).is_some());
        assert!(lookup("ZZZZZ_NOPE").is_none());
    }
}
