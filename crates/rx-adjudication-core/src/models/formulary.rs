//! Formulary reference data.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::member::Gender;
use super::ndc::{Gpi, Ndc};

/// Member cost share owed after the deductible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostShare {
    /// Flat dollar copay
    Copay(Decimal),
    /// Fraction of the post-deductible cost (0.20 = 20%)
    Coinsurance(Decimal),
}

impl CostShare {
    /// Amount owed on the post-deductible balance, rounded to cents.
    pub fn owed_on(&self, balance: Decimal) -> Decimal {
        if balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        match self {
            CostShare::Copay(amount) => (*amount).max(Decimal::ZERO).min(balance),
            CostShare::Coinsurance(rate) => {
                let rate = (*rate).max(Decimal::ZERO).min(Decimal::ONE);
                (balance * rate).round_dp(2)
            }
        }
    }
}

/// A drug's listing on the plan formulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormularyEntry {
    pub ndc: Ndc,
    pub gpi: Gpi,
    pub drug_name: String,
    /// False for listed-but-excluded products
    pub covered: bool,
    pub tier: u8,
    pub cost_share: CostShare,
    pub requires_prior_auth: bool,
    pub requires_step_therapy: bool,
    pub step_therapy_protocol: Option<String>,
    pub quantity_limit: Option<Decimal>,
    pub days_supply_limit: Option<u32>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender_restriction: Option<Gender>,
}

impl FormularyEntry {
    /// Covered entry with no restrictions.
    pub fn covered(ndc: Ndc, gpi: Gpi, drug_name: impl Into<String>, tier: u8, cost_share: CostShare) -> Self {
        Self {
            ndc,
            gpi,
            drug_name: drug_name.into(),
            covered: true,
            tier,
            cost_share,
            requires_prior_auth: false,
            requires_step_therapy: false,
            step_therapy_protocol: None,
            quantity_limit: None,
            days_supply_limit: None,
            min_age: None,
            max_age: None,
            gender_restriction: None,
        }
    }
}

/// Coverage terms returned for a covered drug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageDetails {
    pub ndc: Ndc,
    pub drug_name: String,
    pub tier: u8,
    pub cost_share: CostShare,
    pub requires_prior_auth: bool,
    pub requires_step_therapy: bool,
    pub step_therapy_protocol: Option<String>,
    pub quantity_limit: Option<Decimal>,
    pub days_supply_limit: Option<u32>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender_restriction: Option<Gender>,
}

/// Result of a formulary lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormularyStatus {
    /// No entry for the drug
    NotListed { ndc: Ndc },
    /// Listed but excluded from coverage
    Excluded { ndc: Ndc, drug_name: String },
    Covered(CoverageDetails),
}

impl FormularyStatus {
    pub fn is_covered(&self) -> bool {
        matches!(self, FormularyStatus::Covered(_))
    }

    pub fn details(&self) -> Option<&CoverageDetails> {
        match self {
            FormularyStatus::Covered(details) => Some(details),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            FormularyStatus::NotListed { ndc } => format!("Drug {} not on formulary", ndc),
            FormularyStatus::Excluded { drug_name, .. } => {
                format!("{} is excluded from coverage", drug_name)
            }
            FormularyStatus::Covered(details) => {
                format!("{} covered at tier {}", details.drug_name, details.tier)
            }
        }
    }
}

/// Formulary snapshot keyed by NDC. Read-only during adjudication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Formulary {
    entries: HashMap<Ndc, FormularyEntry>,
}

impl Formulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from entries; later duplicates replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = FormularyEntry>) -> Self {
        let mut formulary = Self::new();
        for entry in entries {
            formulary.insert(entry);
        }
        formulary
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, entry: FormularyEntry) {
        self.entries.insert(entry.ndc.clone(), entry);
    }

    pub fn get(&self, ndc: &Ndc) -> Option<&FormularyEntry> {
        self.entries.get(ndc)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FormularyEntry> {
        self.entries.values()
    }

    /// Coverage lookup for a drug.
    pub fn check_coverage(&self, ndc: &Ndc) -> FormularyStatus {
        match self.entries.get(ndc) {
            None => FormularyStatus::NotListed { ndc: ndc.clone() },
            Some(entry) if !entry.covered => FormularyStatus::Excluded {
                ndc: entry.ndc.clone(),
                drug_name: entry.drug_name.clone(),
            },
            Some(entry) => FormularyStatus::Covered(CoverageDetails {
                ndc: entry.ndc.clone(),
                drug_name: entry.drug_name.clone(),
                tier: entry.tier,
                cost_share: entry.cost_share,
                requires_prior_auth: entry.requires_prior_auth,
                requires_step_therapy: entry.requires_step_therapy,
                step_therapy_protocol: entry.step_therapy_protocol.clone(),
                quantity_limit: entry.quantity_limit,
                days_supply_limit: entry.days_supply_limit,
                min_age: entry.min_age,
                max_age: entry.max_age,
                gender_restriction: entry.gender_restriction,
            }),
        }
    }

    /// Covered entries in the same therapeutic class, cheapest tier first.
    pub fn covered_alternatives(&self, gpi_prefix: &str, exclude: &Ndc) -> Vec<&FormularyEntry> {
        let mut found: Vec<&FormularyEntry> = self
            .entries
            .values()
            .filter(|e| e.covered && &e.ndc != exclude && e.gpi.matches_prefix(gpi_prefix))
            .collect();
        found.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.drug_name.cmp(&b.drug_name)));
        found
    }
}
