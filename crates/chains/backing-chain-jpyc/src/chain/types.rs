use alloy_primitives::{Address, U256, address};
use backing_types::Yen;

/// Polygon PoS mainnet.
pub const POLYGON_CHAIN_ID: u64 = 137;

/// JPYC token deployment on Polygon PoS.
pub const JPYC_POLYGON: Address = address!("0xE7C3D8C9a439feDe00D2600032D5dB0Be71C3c29");

pub const JPYC_DECIMALS: u8 = 18;

/// Base units per yen: 10^18.
pub fn units_per_yen() -> U256 {
    U256::from(10u64).pow(U256::from(JPYC_DECIMALS))
}

/// Converts a yen total into JPYC base units (`yen × 10^18`).
///
/// ```
/// use backing_chain_jpyc::chain::jpyc_units;
/// use backing_types::Yen;
///
/// let units = jpyc_units(Yen::new(10_500));
/// assert_eq!(units.to_string(), "10500000000000000000000");
/// ```
pub fn jpyc_units(amount: Yen) -> U256 {
    U256::from(amount.get()) * units_per_yen()
}

/// Converts base units back to whole yen. Returns `None` for fractional
/// amounts and for values beyond `u64` yen.
pub fn yen_from_units(units: U256) -> Option<Yen> {
    let (quotient, remainder) = units.div_rem(units_per_yen());
    if !remainder.is_zero() {
        return None;
    }
    u64::try_from(quotient).ok().map(Yen::new)
}
