//! Claim pricing against member accumulators.
//!
//! Order: deductible on the full cost, then copay/coinsurance on the
//! remaining balance, limited by what is left of the out-of-pocket maximum. `quote` is pure; `commit` applies a quote once.

use rust_decimal::Decimal;

use crate::models::{AccumulatorKind, AccumulatorSet, CostShare, PricingBreakdown};

use super::{AdjudicationError, AdjudicationResult};

/// Price a fill without touching the member's accumulators.
pub fn quote(
    ingredient_cost: Decimal,
    dispensing_fee: Decimal,
    cost_share: CostShare,
    accumulators: &AccumulatorSet,
) -> PricingBreakdown {
    let total_cost = ingredient_cost + dispensing_fee;
    let mut scratch = accumulators.clone();
    let oop_remaining = scratch.remaining(AccumulatorKind::OutOfPocket);

    let deductible_applied = scratch.apply(AccumulatorKind::Deductible, total_cost);

    // the out-of-pocket cap only limits the copay/coinsurance portion
    let copay_headroom = (oop_remaining - deductible_applied).max(Decimal::ZERO);
    let copay_amount = cost_share
        .owed_on(total_cost - deductible_applied)
        .min(copay_headroom);

    let member_paid = (copay_amount + deductible_applied)
        .min(total_cost)
        .max(Decimal::ZERO);
    let plan_paid = (total_cost - member_paid).max(Decimal::ZERO);
    let out_of_pocket_applied = scratch.apply(AccumulatorKind::OutOfPocket, member_paid);

    PricingBreakdown {
        ingredient_cost,
        dispensing_fee,
        total_cost,
        deductible_applied,
        copay_amount,
        member_paid,
        plan_paid,
        out_of_pocket_applied,
        deductible_remaining: scratch.remaining(AccumulatorKind::Deductible),
        out_of_pocket_remaining: scratch.remaining(AccumulatorKind::OutOfPocket),
    }
}

/// Apply a quote to the member's accumulators in one step.
///
/// Fails without mutating if the accumulators moved since the quote.
pub fn commit(accumulators: &mut AccumulatorSet, pricing: &PricingBreakdown) -> AdjudicationResult<()> {
    let mut next = accumulators.clone();
    let deductible = next.apply(AccumulatorKind::Deductible, pricing.deductible_applied);
    let out_of_pocket = next.apply(AccumulatorKind::OutOfPocket, pricing.out_of_pocket_applied);
    if deductible != pricing.deductible_applied || out_of_pocket != pricing.out_of_pocket_applied {
        return Err(AdjudicationError::StaleAccumulators(format!(
            "expected deductible {} / out-of-pocket {}, could apply {} / {}",
            pricing.deductible_applied, pricing.out_of_pocket_applied, deductible, out_of_pocket
        )));
    }
    *accumulators = next;
    Ok(())
}
