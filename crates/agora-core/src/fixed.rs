use fixed::types::I32F32;

/// Q32.32 fixed-point quantity. All commodity amounts flow through this type
/// so that clearing is bit-for-bit reproducible.
pub type Quantity = I32F32;

/// One discrete unit of simulated time. Signed so that a negative schedule
/// entry can be detected and rejected instead of wrapping.
pub type Tick = i64;

/// Convert an f64 to a Quantity. Use only for configuration, never in the tick loop.
///
/// Panics if the value does not fit; use [`checked_qty`] for untrusted input.
#[inline]
pub fn qty(v: f64) -> Quantity {
    Quantity::from_num(v)
}

/// Convert an f64 to a Quantity, returning None for NaN or out-of-range values.
#[inline]
pub fn checked_qty(v: f64) -> Option<Quantity> {
    if v.is_finite() {
        Quantity::checked_from_num(v)
    } else {
        None
    }
}

/// Convert a Quantity to f64. Use only for display and reporting.
#[inline]
pub fn qty_to_f64(v: Quantity) -> f64 {
    v.to_num::<f64>()
}
