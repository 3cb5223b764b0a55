use rust_decimal::{Decimal, RoundingStrategy};

/// VND is settled with two decimal places at the gateway (amount x 100).
pub const MINOR_UNIT_SCALE: u32 = 2;

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, rounded to the minor unit.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_money(amount * percent / Decimal::ONE_HUNDRED)
}

/// Splits `total` across `weights` proportionally using the largest-remainder method on
/// minor units. Shares always sum to `total` exactly and, when `total <= sum(weights)`, no
/// share exceeds its weight.
pub fn allocate_proportionally(total: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    if weights.is_empty() {
        return Vec::new();
    }

    let scale = Decimal::from(10u32.pow(MINOR_UNIT_SCALE));
    let total_units = (round_money(total) * scale).trunc();
    let weight_sum: Decimal = weights.iter().copied().sum();

    if total_units.is_zero() || weight_sum <= Decimal::ZERO {
        let mut shares = vec![Decimal::ZERO; weights.len()];
        if let Some(last) = shares.last_mut() {
            *last = round_money(total);
        }
        return shares;
    }

    let mut units: Vec<Decimal> = Vec::with_capacity(weights.len());
    let mut fractions: Vec<(usize, Decimal)> = Vec::with_capacity(weights.len());
    for (idx, weight) in weights.iter().enumerate() {
        let exact = total_units * *weight / weight_sum;
        let floor = exact.floor();
        units.push(floor);
        fractions.push((idx, exact - floor));
    }

    let allocated: Decimal = units.iter().copied().sum();
    let mut remainder = total_units - allocated;

    // Stable sort keeps earlier lines first among equal fractions.
    fractions.sort_by(|a, b| b.1.cmp(&a.1));
    for (idx, _) in fractions {
        if remainder <= Decimal::ZERO {
            break;
        }
        units[idx] += Decimal::ONE;
        remainder -= Decimal::ONE;
    }

    units.into_iter().map(|u| u / scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_percent_of_rounds_to_minor_unit() {
        assert_eq!(percent_of(dec!(350000), dec!(30)), dec!(105000));
        assert_eq!(percent_of(dec!(99.99), dec!(30)), dec!(30.00));
        assert_eq!(percent_of(dec!(0.05), dec!(50)), dec!(0.03));
    }

    #[test]
    fn test_allocation_is_exact() {
        let shares = allocate_proportionally(dec!(100), &[dec!(1), dec!(1), dec!(1)]);
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(100));
        assert_eq!(shares, vec![dec!(33.34), dec!(33.33), dec!(33.33)]);
    }

    #[test]
    fn test_allocation_never_exceeds_weight() {
        let weights = [dec!(0.01), dec!(0.01), dec!(99.98)];
        let shares = allocate_proportionally(dec!(100), &weights);
        for (share, weight) in shares.iter().zip(weights.iter()) {
            assert!(share <= weight);
        }
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(100));
    }

    #[test]
    fn test_allocation_single_line_takes_everything() {
        assert_eq!(allocate_proportionally(dec!(50000), &[dec!(400000)]), vec![dec!(50000)]);
    }
}
