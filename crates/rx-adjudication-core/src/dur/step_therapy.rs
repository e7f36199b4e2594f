//! Step therapy protocols evaluated against paid-fill history.

use chrono::{Duration, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::models::{DrugInfo, PriorFill};

use super::{DurError, DurResult};

/// Default lookback window for prerequisite fills.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 365;

/// A drug class that satisfies a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredDrug {
    pub gpi_prefix: String,
    pub name: String,
}

/// One ordered prerequisite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub description: String,
    /// Any one of these satisfies the step
    pub required: Vec<RequiredDrug>,
    /// Minimum summed days supply within the lookback
    pub min_days_supply: u32,
    pub min_fills: u32,
}

/// Target classes and the ordered steps a member must complete first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTherapyProtocol {
    pub protocol_id: String,
    pub name: String,
    pub target_classes: Vec<String>,
    pub steps: Vec<Step>,
    pub lookback_days: u32,
}

impl StepTherapyProtocol {
    pub fn applies_to(&self, drug: &DrugInfo) -> bool {
        self.target_classes.iter().any(|c| drug.gpi.matches_prefix(c))
    }
}

/// Outcome of a step therapy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTherapyResult {
    /// None when no protocol applies
    pub protocol_id: Option<String>,
    pub required: bool,
    pub satisfied: bool,
    pub completed_steps: Vec<u32>,
    /// First unsatisfied step
    pub current_step: Option<u32>,
    /// Drugs that would satisfy the current step
    pub required_alternatives: Vec<String>,
    pub message: String,
}

impl StepTherapyResult {
    fn not_required() -> Self {
        Self {
            protocol_id: None,
            required: false,
            satisfied: true,
            completed_steps: Vec::new(),
            current_step: None,
            required_alternatives: Vec::new(),
            message: "No step therapy protocol applies".into(),
        }
    }
}

/// Registry of step therapy protocols.
#[derive(Debug, Clone)]
pub struct StepTherapyManager {
    protocols: Vec<StepTherapyProtocol>,
}

impl Default for StepTherapyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTherapyManager {
    /// Manager seeded with the default protocols.
    pub fn new() -> Self {
        Self {
            protocols: Self::default_protocols(DEFAULT_LOOKBACK_DAYS),
        }
    }

    /// Default protocols with a different lookback window.
    pub fn with_lookback_days(lookback_days: u32) -> Self {
        Self {
            protocols: Self::default_protocols(lookback_days),
        }
    }

    pub fn empty() -> Self {
        Self { protocols: Vec::new() }
    }

    /// Add a protocol, replacing any with the same id.
    pub fn add_protocol(&mut self, protocol: StepTherapyProtocol) {
        self.protocols.retain(|p| p.protocol_id != protocol.protocol_id);
        self.protocols.push(protocol);
    }

    pub fn protocol(&self, protocol_id: &str) -> Option<&StepTherapyProtocol> {
        self.protocols.iter().find(|p| p.protocol_id == protocol_id)
    }

    /// First protocol whose target classes include the drug.
    pub fn protocol_for(&self, drug: &DrugInfo) -> Option<&StepTherapyProtocol> {
        self.protocols.iter().find(|p| p.applies_to(drug))
    }

    /// Evaluate whichever protocol targets the drug.
    pub fn check_satisfied(
        &self,
        target: &DrugInfo,
        history: &[PriorFill],
        service_date: NaiveDate,
    ) -> StepTherapyResult {
        match self.protocol_for(target) {
            Some(protocol) => evaluate(protocol, history, service_date),
            None => StepTherapyResult::not_required(),
        }
    }

    /// Evaluate a named protocol.
    pub fn check_protocol(
        &self,
        protocol_id: &str,
        history: &[PriorFill],
        service_date: NaiveDate,
    ) -> DurResult<StepTherapyResult> {
        let protocol = self
            .protocol(protocol_id)
            .ok_or_else(|| DurError::UnknownProtocol(protocol_id.to_string()))?;
        Ok(evaluate(protocol, history, service_date))
    }

    fn default_protocols(lookback_days: u32) -> Vec<StepTherapyProtocol> {
        vec![
            StepTherapyProtocol {
                protocol_id: "ST-GLP1".into(),
                name: "GLP-1 receptor agonists".into(),
                target_classes: vec!["2717".into()],
                steps: vec![
                    Step {
                        number: 1,
                        description: "Trial of metformin".into(),
                        required: vec![required("2725", "Metformin")],
                        min_days_supply: 90,
                        min_fills: 1,
                    },
                    Step {
                        number: 2,
                        description: "Trial of a second oral agent".into(),
                        required: vec![
                            required("2720", "Sulfonylurea"),
                            required("2755", "DPP-4 inhibitor"),
                        ],
                        min_days_supply: 90,
                        min_fills: 1,
                    },
                ],
                lookback_days,
            },
            StepTherapyProtocol {
                protocol_id: "ST-ROSUVA".into(),
                name: "Rosuvastatin".into(),
                target_classes: vec!["39400060".into()],
                steps: vec![Step {
                    number: 1,
                    description: "Trial of a generic statin".into(),
                    required: vec![
                        required("39400010", "Atorvastatin"),
                        required("39400075", "Simvastatin"),
                    ],
                    min_days_supply: 60,
                    min_fills: 2,
                }],
                lookback_days,
            },
        ]
    }
}

fn required(gpi_prefix: &str, name: &str) -> RequiredDrug {
    RequiredDrug {
        gpi_prefix: gpi_prefix.into(),
        name: name.into(),
    }
}

/// Walk steps in order, stopping at the first one not met.
fn evaluate(protocol: &StepTherapyProtocol, history: &[PriorFill], service_date: NaiveDate) -> StepTherapyResult {
    let window_start = service_date
        .checked_sub_signed(Duration::days(i64::from(protocol.lookback_days)))
        .unwrap_or(NaiveDate::MIN);
    let in_window: Vec<&PriorFill> = history
        .iter()
        .filter(|f| f.fill_date >= window_start && f.fill_date <= service_date)
        .collect();

    let mut completed = Vec::new();
    for step in &protocol.steps {
        if step_met(step, &in_window) {
            completed.push(step.number);
            continue;
        }
        let alternatives: Vec<String> = step.required.iter().map(|r| r.name.clone()).collect();
        debug!(
            "Protocol {} stopped at step {} ({} completed)",
            protocol.protocol_id,
            step.number,
            completed.len()
        );
        return StepTherapyResult {
            protocol_id: Some(protocol.protocol_id.clone()),
            required: true,
            satisfied: false,
            completed_steps: completed,
            current_step: Some(step.number),
            message: format!(
                "Step {} not met: requires trial of {}",
                step.number,
                alternatives.join(" or ")
            ),
            required_alternatives: alternatives,
        };
    }

    StepTherapyResult {
        protocol_id: Some(protocol.protocol_id.clone()),
        required: true,
        satisfied: true,
        completed_steps: completed,
        current_step: None,
        required_alternatives: Vec::new(),
        message: format!("Step therapy requirements met for {}", protocol.name),
    }
}

fn step_met(step: &Step, fills: &[&PriorFill]) -> bool {
    step.required.iter().any(|req| {
        let matching = fills.iter().filter(|f| f.drug.gpi.matches_prefix(&req.gpi_prefix));
        let (count, days) = matching.fold((0u32, 0u32), |(n, d), f| (n + 1, d + f.days_supply));
        count >= step.min_fills && days >= step.min_days_supply
    })
}
