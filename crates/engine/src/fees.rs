use rust_decimal::Decimal;

/// The math for a conversion: apply the exchange rate, then take the
/// exchange fee off the converted amount.
///
/// Exact decimal arithmetic throughout; `send + fee` always equals
/// `from_amount * ex_rate` with no drift.
///
/// `fee_pct` is a flat percentage number: `1` means a 1% fee.
pub fn amount_converted(
    from_amount: Decimal,
    ex_rate: Decimal,
    fee_pct: Decimal,
) -> (Decimal, Decimal) {
    let conv_amount = from_amount * ex_rate;
    let ex_fee = conv_amount * (fee_pct * Decimal::new(1, 2));
    let send_amount = conv_amount - ex_fee;
    (send_amount, ex_fee)
}
