//! Gas cost in wei, native token and USD.

use alloy::primitives::utils::format_ether;
use alloy::primitives::U256;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;

use crate::gas::types::GasCost;
use crate::services::ServiceResult;

/// L1 data fee fetched once and shared by every caller that needs it.
#[derive(Clone)]
pub enum PreparedL1Fee {
    Ready(U256),
    Pending(Shared<BoxFuture<'static, ServiceResult<U256>>>),
}

impl PreparedL1Fee {
    pub fn pending<F>(fetch: F) -> Self
    where
        F: Future<Output = ServiceResult<U256>> + Send + 'static,
    {
        PreparedL1Fee::Pending(fetch.boxed().shared())
    }

    pub async fn resolve(self) -> ServiceResult<U256> {
        match self {
            PreparedL1Fee::Ready(fee) => Ok(fee),
            PreparedL1Fee::Pending(fetch) => fetch.await,
        }
    }
}

impl std::fmt::Debug for PreparedL1Fee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreparedL1Fee::Ready(fee) => f.debug_tuple("Ready").field(fee).finish(),
            PreparedL1Fee::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Wei → native units as a float, for display and USD maths only.
pub fn wei_to_native(wei: U256) -> f64 {
    format_ether(wei).parse().unwrap_or(0.0)
}

/// Expected cost from `gas_used`, worst case from `gas_limit`, both plus the L1 fee.
pub fn compute_gas_cost(gas_used: u64, gas_limit: u64, gas_price: u128, l1_fee: U256, native_token_price: f64) -> GasCost {
    let price = U256::from(gas_price);
    let gas_cost_wei = U256::from(gas_used) * price + l1_fee;
    let max_gas_cost_wei = U256::from(gas_limit) * price + l1_fee;

    let gas_cost_amount = wei_to_native(gas_cost_wei);
    GasCost {
        gas_cost_wei,
        max_gas_cost_wei,
        l1_fee_wei: l1_fee,
        gas_cost_amount,
        max_gas_cost_amount: wei_to_native(max_gas_cost_wei),
        gas_cost_usd: gas_cost_amount * native_token_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const GWEI: u128 = 1_000_000_000;

    #[test]
    fn test_cost_without_l1_fee() {
        let cost = compute_gas_cost(21_000, 31_500, 10 * GWEI, U256::ZERO, 2_000.0);
        assert_eq!(cost.gas_cost_wei, U256::from(210_000u128 * GWEI));
        assert_eq!(cost.max_gas_cost_wei, U256::from(315_000u128 * GWEI));
        assert!((cost.gas_cost_amount - 0.00021).abs() < 1e-12);
        assert!((cost.gas_cost_usd - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_l1_fee_added_to_both_costs() {
        let l1 = U256::from(5_000u64);
        let cost = compute_gas_cost(10, 20, 1, l1, 0.0);
        assert_eq!(cost.gas_cost_wei, U256::from(5_010u64));
        assert_eq!(cost.max_gas_cost_wei, U256::from(5_020u64));
        assert_eq!(cost.l1_fee_wei, l1);
    }

    #[tokio::test]
    async fn test_prepared_fee_fetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let prepared = PreparedL1Fee::pending(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ServiceError>(U256::from(7u64))
        });

        let (a, b) = tokio::join!(prepared.clone().resolve(), prepared.resolve());
        assert_eq!(a.unwrap(), U256::from(7u64));
        assert_eq!(b.unwrap(), U256::from(7u64));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
