//! Member eligibility and cost-share accumulator models.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Patient gender as carried on eligibility and rule tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    /// NCPDP patient gender code.
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Unknown => "0",
            Gender::Male => "1",
            Gender::Female => "2",
        }
    }

    /// Parse from an NCPDP code or a spelled-out value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "1" | "m" | "male" => Some(Gender::Male),
            "2" | "f" | "female" => Some(Gender::Female),
            "0" | "u" | "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }
}

/// Which running total an amount is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccumulatorKind {
    Deductible,
    OutOfPocket,
}

/// One running total against a plan-year limit.
///
/// `applied + remaining == limit` holds after every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator {
    limit: Decimal,
    applied: Decimal,
}

impl Accumulator {
    /// Fresh accumulator with nothing applied. Negative limits are treated as zero.
    pub fn new(limit: Decimal) -> Self {
        Self {
            limit: limit.max(Decimal::ZERO),
            applied: Decimal::ZERO,
        }
    }

    /// Restore an accumulator from persisted totals, clamping `applied` into `[0, limit]`.
    pub fn with_applied(limit: Decimal, applied: Decimal) -> Self {
        let limit = limit.max(Decimal::ZERO);
        Self {
            limit,
            applied: applied.max(Decimal::ZERO).min(limit),
        }
    }

    pub fn limit(&self) -> Decimal {
        self.limit
    }

    pub fn applied(&self) -> Decimal {
        self.applied
    }

    pub fn remaining(&self) -> Decimal {
        self.limit - self.applied
    }

    pub fn is_met(&self) -> bool {
        self.remaining() <= Decimal::ZERO
    }

    /// Apply up to `amount`, never overdrawing. Returns the amount actually applied.
    fn apply(&mut self, amount: Decimal) -> Decimal {
        if amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let taken = amount.min(self.remaining());
        self.applied += taken;
        taken
    }
}

/// Per-member deductible and out-of-pocket totals.
///
/// `apply` is the only mutator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorSet {
    deductible: Accumulator,
    out_of_pocket: Accumulator,
}

impl AccumulatorSet {
    /// Start a plan year with the given limits.
    pub fn new(deductible_limit: Decimal, out_of_pocket_limit: Decimal) -> Self {
        Self {
            deductible: Accumulator::new(deductible_limit),
            out_of_pocket: Accumulator::new(out_of_pocket_limit),
        }
    }

    /// Rebuild from persisted accumulators.
    pub fn from_parts(deductible: Accumulator, out_of_pocket: Accumulator) -> Self {
        Self {
            deductible,
            out_of_pocket,
        }
    }

    pub fn get(&self, kind: AccumulatorKind) -> &Accumulator {
        match kind {
            AccumulatorKind::Deductible => &self.deductible,
            AccumulatorKind::OutOfPocket => &self.out_of_pocket,
        }
    }

    pub fn remaining(&self, kind: AccumulatorKind) -> Decimal {
        self.get(kind).remaining()
    }

    pub fn applied(&self, kind: AccumulatorKind) -> Decimal {
        self.get(kind).applied()
    }

    /// Apply `min(amount, remaining)` to one accumulator and return what was applied.
    ///
    /// Amounts at or below zero are a no-op.
    pub fn apply(&mut self, kind: AccumulatorKind, amount: Decimal) -> Decimal {
        match kind {
            AccumulatorKind::Deductible => self.deductible.apply(amount),
            AccumulatorKind::OutOfPocket => self.out_of_pocket.apply(amount),
        }
    }
}

/// A plan member: eligibility window, routing identifiers and accumulators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Cardholder/member identifier
    pub member_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    /// Routing identifiers; a claim must match all three exactly
    pub bin: String,
    pub pcn: String,
    pub group_number: String,
    /// First covered day
    pub effective_date: NaiveDate,
    /// First uncovered day (exclusive end); None means open-ended
    pub termination_date: Option<NaiveDate>,
    pub accumulators: AccumulatorSet,
}

impl Member {
    /// Age in whole years on the given date.
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        age_between(self.date_of_birth, date)
    }

    /// True when the date falls inside `[effective_date, termination_date)`.
    pub fn is_eligible_on(&self, date: NaiveDate) -> bool {
        if date < self.effective_date {
            return false;
        }
        match self.termination_date {
            Some(term) => date < term,
            None => true,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Whole years from `born` to `on`; zero if `on` precedes `born`.
pub fn age_between(born: NaiveDate, on: NaiveDate) -> u32 {
    if on < born {
        return 0;
    }
    let mut years = on.year() - born.year();
    if (on.month(), on.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    years.max(0) as u32
}
