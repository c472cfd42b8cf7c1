//! Balance arithmetic and settlement rules, kept free of I/O.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::error::AppError;

use super::model::{AssetType, TransactionStatus, TransactionType};

/// Decimal places of every stored amount (NUMERIC(18, 8)).
pub const AMOUNT_SCALE: u32 = 8;
/// Digits left of the point in a stored amount.
pub const AMOUNT_INTEGER_DIGITS: u32 = 10;
/// Decimal places of stored exchange rates (NUMERIC(24, 12)).
pub const RATE_SCALE: u32 = 12;
/// Digits left of the point in a stored rate.
pub const RATE_INTEGER_DIGITS: u32 = 12;

fn integer_limit(digits: u32) -> Decimal {
    Decimal::from(10u64.pow(digits))
}

pub fn check_positive(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation("amount must be greater than zero".into()));
    }
    if amount.scale() > AMOUNT_SCALE {
        return Err(AppError::Validation(format!(
            "amount supports at most {} decimal places",
            AMOUNT_SCALE
        )));
    }
    check_fits(amount)
}

/// Refuses anything a NUMERIC(18, 8) column would overflow on.
pub fn check_fits(amount: Decimal) -> Result<(), AppError> {
    if amount.round_dp(AMOUNT_SCALE).abs() >= integer_limit(AMOUNT_INTEGER_DIGITS) {
        return Err(AppError::Validation(format!(
            "amount must have at most {} digits before the decimal point",
            AMOUNT_INTEGER_DIGITS
        )));
    }
    Ok(())
}

/// Balance after crediting `amount`, or an error if the wallet could not hold it.
pub fn credited(balance: Decimal, amount: Decimal) -> Result<Decimal, AppError> {
    let next = balance + amount;
    check_fits(next)?;
    Ok(next)
}

pub fn check_rate(rate: Decimal) -> Result<(), AppError> {
    if rate <= Decimal::ZERO {
        return Err(AppError::Validation("rate must be greater than zero".into()));
    }
    if rate.round_dp(RATE_SCALE) >= integer_limit(RATE_INTEGER_DIGITS) {
        return Err(AppError::Validation(format!(
            "rate must have at most {} digits before the decimal point",
            RATE_INTEGER_DIGITS
        )));
    }
    Ok(())
}

pub fn check_funds(balance: Decimal, amount: Decimal) -> Result<(), AppError> {
    if balance < amount {
        return Err(AppError::InsufficientBalance);
    }
    Ok(())
}

/// Balance is checked before the plan minimum.
pub fn check_stake(
    balance: Decimal,
    amount: Decimal,
    minimum: Decimal,
    asset: AssetType,
) -> Result<(), AppError> {
    check_funds(balance, amount)?;
    if amount < minimum {
        return Err(AppError::BelowMinimum { minimum, asset });
    }
    Ok(())
}

pub fn swap_quote(amount: Decimal, rate: Decimal) -> Decimal {
    (amount * rate).round_dp(AMOUNT_SCALE)
}

pub fn stake_reward(amount: Decimal, roi_percentage: Decimal) -> Decimal {
    (amount * roi_percentage / Decimal::ONE_HUNDRED).round_dp(AMOUNT_SCALE)
}

pub fn stake_end(start: DateTime<Utc>, duration_days: i32) -> DateTime<Utc> {
    start + Duration::days(i64::from(duration_days))
}

/// Calendar days left, negative once the end date has passed.
pub fn days_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (end.date_naive() - now.date_naive()).num_days()
}

/// USD-equivalent of a balance using to-USDT rates. Assets without a rate are
/// worth zero here.
pub fn usd_value(asset: AssetType, amount: Decimal, to_usdt: &HashMap<AssetType, Decimal>) -> Decimal {
    if asset == AssetType::Usdt {
        return amount;
    }
    to_usdt
        .get(&asset)
        .map(|rate| amount * rate)
        .unwrap_or(Decimal::ZERO)
}

/// Wallet ids in the order their row locks must be taken.
pub fn lock_order(a: i64, b: i64) -> [i64; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Review {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletEffect {
    None,
    /// Credit `amount` back to (or onto) the source wallet.
    CreditSource,
    /// Credit `amount` to the source wallet and debit `to_amount` from the destination.
    ReverseSwap,
}

/// Decides what an operator review does to a transaction. Only PENDING rows move;
/// anything already settled yields `None` so a repeated review is a no-op.
pub fn review_outcome(
    kind: TransactionType,
    status: TransactionStatus,
    review: Review,
) -> Option<(TransactionStatus, WalletEffect)> {
    if status != TransactionStatus::Pending {
        return None;
    }

    let outcome = match (review, kind) {
        (Review::Approve, TransactionType::Deposit) => {
            (TransactionStatus::Confirmed, WalletEffect::CreditSource)
        }
        (Review::Approve, _) => (TransactionStatus::Confirmed, WalletEffect::None),
        (Review::Reject, TransactionType::Withdrawal) => {
            (TransactionStatus::Rejected, WalletEffect::CreditSource)
        }
        (Review::Reject, TransactionType::Swap) => {
            (TransactionStatus::Rejected, WalletEffect::ReverseSwap)
        }
        (Review::Reject, _) => (TransactionStatus::Rejected, WalletEffect::None),
    };
    Some(outcome)
}

/// Reference USDT prices used to seed the rate table.
pub fn default_usdt_prices() -> Vec<(AssetType, Decimal)> {
    use AssetType::*;
    [
        (Btc, "97305.60"),
        (Eth, "3000.00"),
        (Usdt, "1.00"),
        (Ltc, "85.00"),
        (Xrp, "0.50"),
        (Ada, "0.40"),
        (Sol, "150.00"),
        (Dot, "6.50"),
        (Bnb, "550.00"),
        (Doge, "0.15"),
        (Link, "15.00"),
        (Matic, "0.60"),
        (Eos, "0.70"),
    ]
    .into_iter()
    .filter_map(|(asset, price)| price.parse().ok().map(|p| (asset, p)))
    .collect()
}

/// Every ordered pair of distinct priced assets with rate = price(from) / price(to).
/// The reverse direction is computed independently, so A→B × B→A need not be 1.
pub fn cross_rates(prices: &[(AssetType, Decimal)]) -> Vec<(AssetType, AssetType, Decimal)> {
    let mut rates = Vec::with_capacity(prices.len() * prices.len().saturating_sub(1));
    for (from, from_price) in prices {
        for (to, to_price) in prices {
            if from == to || to_price.is_zero() {
                continue;
            }
            let rate = if *to == AssetType::Usdt {
                *from_price
            } else {
                (from_price / to_price).round_dp(RATE_SCALE)
            };
            rates.push((*from, *to, rate));
        }
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn swap_credits_amount_times_rate() {
        assert_eq!(swap_quote(dec("0.5"), dec("32.435200000000")), dec("16.2176"));
        assert_eq!(swap_quote(dec("2"), dec("97305.60")), dec("194611.20"));
    }

    #[test]
    fn stake_lifecycle_example() {
        let start = Utc::now();
        let balance = dec("1000");
        let amount = dec("500");

        check_stake(balance, amount, dec("100"), AssetType::Usdt).unwrap();
        let after_stake = balance - amount;
        assert_eq!(after_stake, dec("500"));
        assert_eq!(stake_end(start, 30) - start, Duration::days(30));

        let reward = stake_reward(amount, dec("5.00"));
        assert_eq!(reward, dec("25"));
        assert_eq!(after_stake + amount + reward, dec("1025"));
    }

    #[test]
    fn stake_checks_balance_before_minimum() {
        assert!(matches!(
            check_stake(dec("50"), dec("60"), dec("100"), AssetType::Usdt),
            Err(AppError::InsufficientBalance)
        ));
        assert!(matches!(
            check_stake(dec("500"), dec("60"), dec("100"), AssetType::Eth),
            Err(AppError::BelowMinimum { asset: AssetType::Eth, .. })
        ));
    }

    #[test]
    fn amounts_must_be_positive_and_fit_storage() {
        assert!(check_positive(dec("0")).is_err());
        assert!(check_positive(dec("-1")).is_err());
        assert!(check_positive(dec("0.000000001")).is_err());
        assert!(check_positive(dec("0.00000001")).is_ok());
        assert!(check_positive(dec("9999999999.99999999")).is_ok());
        assert!(matches!(
            check_positive(dec("10000000000")),
            Err(AppError::Validation(_))
        ));
        assert!(check_positive(dec("100000000000")).is_err());
    }

    #[test]
    fn oversized_swap_quotes_are_refused() {
        // 20000 BTC into DOGE lands at 11 integer digits
        let quote = swap_quote(dec("20000"), dec("648704"));
        assert_eq!(quote, dec("12974080000"));
        assert!(check_fits(quote).is_err());
        // rounding to storage scale can carry into the eleventh digit
        assert!(check_fits(dec("9999999999.999999995")).is_err());
        assert!(check_fits(swap_quote(dec("1"), dec("648704"))).is_ok());
    }

    #[test]
    fn credits_must_leave_a_storable_balance() {
        assert_eq!(credited(dec("9999999998"), dec("1")).unwrap(), dec("9999999999"));
        assert!(matches!(
            credited(dec("9999999999"), dec("1")),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn rates_must_fit_storage() {
        assert!(check_rate(dec("648704.000000000000")).is_ok());
        assert!(check_rate(dec("0")).is_err());
        assert!(check_rate(dec("1000000000000")).is_err());
    }

    #[test]
    fn unpriced_assets_are_worth_nothing() {
        let rates = HashMap::from([(AssetType::Btc, dec("97305.60"))]);
        assert_eq!(usd_value(AssetType::Usdt, dec("12.5"), &rates), dec("12.5"));
        assert_eq!(usd_value(AssetType::Btc, dec("0.01"), &rates), dec("973.0560"));
        assert_eq!(usd_value(AssetType::Doge, dec("1000"), &rates), Decimal::ZERO);
    }

    #[test]
    fn deposit_is_credited_on_first_approval_only() {
        let first = review_outcome(TransactionType::Deposit, TransactionStatus::Pending, Review::Approve);
        assert_eq!(first, Some((TransactionStatus::Confirmed, WalletEffect::CreditSource)));

        let again = review_outcome(TransactionType::Deposit, TransactionStatus::Confirmed, Review::Approve);
        assert_eq!(again, None);
    }

    #[test]
    fn rejected_withdrawal_is_refunded_once() {
        assert_eq!(
            review_outcome(TransactionType::Withdrawal, TransactionStatus::Pending, Review::Reject),
            Some((TransactionStatus::Rejected, WalletEffect::CreditSource))
        );
        assert_eq!(
            review_outcome(TransactionType::Withdrawal, TransactionStatus::Rejected, Review::Reject),
            None
        );
        assert_eq!(
            review_outcome(TransactionType::Withdrawal, TransactionStatus::Pending, Review::Approve),
            Some((TransactionStatus::Confirmed, WalletEffect::None))
        );
    }

    #[test]
    fn settled_rows_never_flip() {
        // approving a rejected deposit must not credit it
        assert_eq!(
            review_outcome(TransactionType::Deposit, TransactionStatus::Rejected, Review::Approve),
            None
        );
        // swaps self-confirm, so rejecting one later does nothing
        assert_eq!(
            review_outcome(TransactionType::Swap, TransactionStatus::Confirmed, Review::Reject),
            None
        );
    }

    #[test]
    fn lock_order_is_ascending() {
        assert_eq!(lock_order(9, 3), [3, 9]);
        assert_eq!(lock_order(3, 9), [3, 9]);
    }

    #[test]
    fn seeded_rates_cover_every_pair() {
        let prices = default_usdt_prices();
        assert_eq!(prices.len(), AssetType::ALL.len());

        let rates = cross_rates(&prices);
        assert_eq!(rates.len(), 13 * 12);

        let find = |from, to| {
            rates
                .iter()
                .find(|(f, t, _)| *f == from && *t == to)
                .map(|(_, _, r)| *r)
                .unwrap()
        };
        assert_eq!(find(AssetType::Btc, AssetType::Usdt), dec("97305.60"));
        assert_eq!(find(AssetType::Btc, AssetType::Eth), dec("32.4352"));
        assert_eq!(find(AssetType::Usdt, AssetType::Xrp), dec("2"));
        assert_eq!(find(AssetType::Usdt, AssetType::Eth), dec("0.000333333333"));
    }

    #[test]
    fn days_remaining_counts_calendar_days() {
        let now = Utc::now();
        assert_eq!(days_remaining(now + Duration::days(30), now), 30);
        assert_eq!(days_remaining(now - Duration::days(2), now), -2);
    }
}
