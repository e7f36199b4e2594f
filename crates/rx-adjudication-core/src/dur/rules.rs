//! DUR rule tables and stateless check functions.
//!
//! Every rule names therapeutic classes as GPI prefixes and is matched with
//! plain string-prefix comparison.

use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;

use crate::models::{DrugInfo, DurAlert, DurAlertType, Gender, PriorFill, Severity};

/// Default early-refill threshold: a refill is allowed once 80% of the
/// previous supply should have been used.
pub const DEFAULT_EARLY_REFILL_THRESHOLD_PERCENT: u8 = 80;

/// Two classes that should not be taken together.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRule {
    pub class_a: String,
    pub class_b: String,
    pub severity: Severity,
    pub description: String,
}

impl InteractionRule {
    /// Order-independent match between a new drug and an existing one.
    pub fn matches(&self, new_drug: &DrugInfo, existing: &DrugInfo) -> bool {
        let (new, old) = (&new_drug.gpi, &existing.gpi);
        (new.matches_prefix(&self.class_a) && old.matches_prefix(&self.class_b))
            || (new.matches_prefix(&self.class_b) && old.matches_prefix(&self.class_a))
    }
}

/// A class where concurrent therapy should be limited.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicationRule {
    pub class: String,
    /// Existing concurrent drugs in the class at which a new fill alerts
    pub max_concurrent: usize,
    pub description: String,
}

/// Age and/or gender restriction on a class.
#[derive(Debug, Clone, PartialEq)]
pub struct DemographicRule {
    pub class: String,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub gender: Option<Gender>,
    pub severity: Severity,
    pub message: String,
}

/// Holds the rule tables. Checks are pure functions of the tables and inputs.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    interactions: Vec<InteractionRule>,
    duplications: Vec<DuplicationRule>,
    demographics: Vec<DemographicRule>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine {
    /// Engine seeded with the default rule tables.
    pub fn new() -> Self {
        Self {
            interactions: Self::default_interactions(),
            duplications: Self::default_duplications(),
            demographics: Self::default_demographics(),
        }
    }

    /// Engine with no rules, for callers that load their own tables.
    pub fn empty() -> Self {
        Self {
            interactions: Vec::new(),
            duplications: Vec::new(),
            demographics: Vec::new(),
        }
    }

    pub fn add_interaction(&mut self, rule: InteractionRule) {
        self.interactions.push(rule);
    }

    pub fn add_duplication(&mut self, rule: DuplicationRule) {
        self.duplications.push(rule);
    }

    pub fn add_demographic(&mut self, rule: DemographicRule) {
        self.demographics.push(rule);
    }

    pub fn interactions(&self) -> &[InteractionRule] {
        &self.interactions
    }

    pub fn duplications(&self) -> &[DuplicationRule] {
        &self.duplications
    }

    pub fn demographics(&self) -> &[DemographicRule] {
        &self.demographics
    }

    /// One alert per (current medication, matching rule).
    pub fn check_interactions(&self, drug: &DrugInfo, current: &[&PriorFill]) -> Vec<DurAlert> {
        let mut alerts = Vec::new();
        for med in current {
            for rule in &self.interactions {
                if rule.matches(drug, &med.drug) {
                    debug!(
                        "Interaction {}+{} between {} and {}",
                        rule.class_a, rule.class_b, drug.name, med.drug.name
                    );
                    alerts.push(DurAlert::new(
                        DurAlertType::DrugInteraction,
                        rule.severity,
                        drug.name.clone(),
                        Some(med.drug.name.clone()),
                        format!("{} with {}: {}", drug.name, med.drug.name, rule.description),
                    ));
                }
            }
        }
        alerts
    }

    /// Counts current medications in each rule class the new drug belongs to.
    ///
    /// The count is taken before the new fill is added. Once it reaches the
    /// rule's `max_concurrent`, every counted medication gets its own alert.
    pub fn check_duplication(&self, drug: &DrugInfo, current: &[&PriorFill]) -> Vec<DurAlert> {
        let mut alerts = Vec::new();
        for rule in &self.duplications {
            if !drug.gpi.matches_prefix(&rule.class) {
                continue;
            }
            let same_class: Vec<&&PriorFill> = current
                .iter()
                .filter(|f| f.drug.gpi.matches_prefix(&rule.class))
                .collect();
            if same_class.len() < rule.max_concurrent {
                continue;
            }
            for med in same_class {
                alerts.push(DurAlert::new(
                    DurAlertType::TherapeuticDuplication,
                    Severity::Moderate,
                    drug.name.clone(),
                    Some(med.drug.name.clone()),
                    format!("{} duplicates {}: {}", drug.name, med.drug.name, rule.description),
                ));
            }
        }
        alerts
    }

    /// Compares the service date against the most recent fill of the same NDC.
    ///
    /// Alerts when the days remaining on that fill exceed
    /// `days_supply * (100 - threshold_percent) / 100`.
    pub fn check_early_refill(
        &self,
        drug: &DrugInfo,
        history: &[PriorFill],
        service_date: NaiveDate,
        threshold_percent: u8,
    ) -> Option<DurAlert> {
        let last = history
            .iter()
            .filter(|f| f.drug.ndc == drug.ndc && f.fill_date <= service_date)
            .max_by_key(|f| f.fill_date)?;

        let days_early = (last.supply_end() - service_date).num_days();
        let unused_percent = Decimal::from(100u8.saturating_sub(threshold_percent.min(100)));
        let allowed_early = Decimal::from(last.days_supply) * unused_percent / Decimal::from(100u8);

        if Decimal::from(days_early) <= allowed_early {
            return None;
        }

        debug!(
            "Early refill of {}: {} days early, {} allowed",
            drug.name, days_early, allowed_early
        );
        let mut alert = DurAlert::new(
            DurAlertType::EarlyRefill,
            Severity::Major,
            drug.name.clone(),
            None,
            format!(
                "Refill {} days early (last filled {} for {} days)",
                days_early, last.fill_date, last.days_supply
            ),
        );
        alert.days_early = Some(days_early);
        Some(alert)
    }

    /// Age and gender precautions for the drug's class.
    pub fn check_age_gender(&self, drug: &DrugInfo, age: u32, gender: Gender) -> Vec<DurAlert> {
        let mut alerts = Vec::new();
        for rule in &self.demographics {
            if !drug.gpi.matches_prefix(&rule.class) {
                continue;
            }
            let too_young = rule.min_age.map(|min| age < min).unwrap_or(false);
            let too_old = rule.max_age.map(|max| age > max).unwrap_or(false);
            if too_young || too_old {
                alerts.push(DurAlert::new(
                    DurAlertType::DrugAge,
                    rule.severity,
                    drug.name.clone(),
                    None,
                    format!("{} (patient age {})", rule.message, age),
                ));
            }
            if let Some(required) = rule.gender {
                if gender != required {
                    alerts.push(DurAlert::new(
                        DurAlertType::DrugGender,
                        rule.severity,
                        drug.name.clone(),
                        None,
                        rule.message.clone(),
                    ));
                }
            }
        }
        alerts
    }

    /// Default interaction pairs.
    fn default_interactions() -> Vec<InteractionRule> {
        vec![
            interaction("8320", "6610", Severity::Major, "Increased bleeding risk (anticoagulant + NSAID)"),
            interaction("6510", "5710", Severity::Major, "Respiratory depression (opioid + benzodiazepine)"),
            interaction("5816", "5810", Severity::Major, "Serotonin syndrome risk (SSRI + MAOI)"),
            interaction("3940", "03", Severity::Moderate, "Myopathy risk (statin + macrolide)"),
            interaction("3610", "3720", Severity::Moderate, "Hyperkalemia risk (ACE inhibitor + potassium-sparing diuretic)"),
        ]
    }

    /// Default duplication classes.
    fn default_duplications() -> Vec<DuplicationRule> {
        vec![
            duplication("5816", 1, "Multiple SSRIs"),
            duplication("6510", 1, "Multiple opioid analgesics"),
            duplication("5710", 1, "Multiple benzodiazepines"),
            duplication("3940", 1, "Multiple statins"),
            duplication("3610", 1, "Multiple ACE inhibitors"),
        ]
    }

    /// Default age/gender restrictions.
    fn default_demographics() -> Vec<DemographicRule> {
        vec![
            DemographicRule {
                class: "2410".into(),
                min_age: None,
                max_age: None,
                gender: Some(Gender::Female),
                severity: Severity::Moderate,
                message: "Estrogen therapy indicated for female patients".into(),
            },
            DemographicRule {
                class: "2540".into(),
                min_age: None,
                max_age: None,
                gender: Some(Gender::Female),
                severity: Severity::Moderate,
                message: "Contraceptive indicated for female patients".into(),
            },
            DemographicRule {
                class: "5652".into(),
                min_age: None,
                max_age: None,
                gender: Some(Gender::Male),
                severity: Severity::Moderate,
                message: "BPH agent indicated for male patients".into(),
            },
            DemographicRule {
                class: "6140".into(),
                min_age: Some(6),
                max_age: None,
                gender: None,
                severity: Severity::Major,
                message: "Stimulant not recommended under age 6".into(),
            },
            DemographicRule {
                class: "04".into(),
                min_age: Some(8),
                max_age: None,
                gender: None,
                severity: Severity::Major,
                message: "Tetracyclines not recommended under age 8".into(),
            },
            DemographicRule {
                class: "5710".into(),
                min_age: None,
                max_age: Some(64),
                gender: None,
                severity: Severity::Moderate,
                message: "Benzodiazepines are potentially inappropriate over age 64".into(),
            },
        ]
    }
}

fn interaction(a: &str, b: &str, severity: Severity, description: &str) -> InteractionRule {
    InteractionRule {
        class_a: a.into(),
        class_b: b.into(),
        severity,
        description: description.into(),
    }
}

fn duplication(class: &str, max_concurrent: usize, description: &str) -> DuplicationRule {
    DuplicationRule {
        class: class.into(),
        max_concurrent,
        description: description.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gpi, Ndc};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn drug(ndc: &str, gpi: &str, name: &str) -> DrugInfo {
        DrugInfo::new(Ndc::parse(ndc).unwrap(), Gpi::parse(gpi).unwrap(), name)
    }

    fn fill(drug: DrugInfo, fill_date: NaiveDate, days: u32) -> PriorFill {
        PriorFill {
            claim_id: format!("H-{}", drug.ndc),
            member_id: "M100".into(),
            drug,
            fill_date,
            days_supply: days,
            quantity: dec!(30),
            prescriber_npi: None,
        }
    }

    fn warfarin() -> DrugInfo {
        drug("00056017270", "83200030200305", "Warfarin 5mg")
    }

    fn ibuprofen() -> DrugInfo {
        drug("00904585461", "66100020000310", "Ibuprofen 800mg")
    }

    #[test]
    fn test_interaction_is_order_independent() {
        let engine = RulesEngine::new();
        let today = date(2024, 3, 1);

        let existing = fill(ibuprofen(), today, 30);
        let alerts = engine.check_interactions(&warfarin(), &[&existing]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Major);

        let existing = fill(warfarin(), today, 30);
        let reversed = engine.check_interactions(&ibuprofen(), &[&existing]);
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].severity, alerts[0].severity);
        assert_eq!(reversed[0].other_drug.as_deref(), Some("Warfarin 5mg"));
    }

    #[test]
    fn test_no_interaction_for_unrelated_classes() {
        let engine = RulesEngine::new();
        let omeprazole = drug("00173071220", "49270060000310", "Omeprazole 20mg");
        let existing = fill(ibuprofen(), date(2024, 3, 1), 30);
        assert!(engine.check_interactions(&omeprazole, &[&existing]).is_empty());
    }

    #[test]
    fn test_duplication_counts_every_active_class_member() {
        let engine = RulesEngine::new();
        let sertraline = drug("00049490066", "58160060000310", "Sertraline 50mg");
        let fluoxetine = drug("00777310502", "58160040000110", "Fluoxetine 20mg");
        let today = date(2024, 3, 1);

        let same = fill(sertraline.clone(), today, 30);
        let alerts = engine.check_duplication(&sertraline, &[&same]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].other_drug.as_deref(), Some("Sertraline 50mg"));

        let other = fill(fluoxetine, today, 30);
        let alerts = engine.check_duplication(&sertraline, &[&other]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, DurAlertType::TherapeuticDuplication);
        assert_eq!(alerts[0].severity, Severity::Moderate);

        assert!(engine.check_duplication(&sertraline, &[]).is_empty());
    }

    #[test]
    fn test_duplication_threshold_above_one() {
        let mut engine = RulesEngine::empty();
        engine.add_duplication(duplication("3610", 2, "Multiple ACE inhibitors"));
        let lisinopril = drug("00172375810", "36100030000310", "Lisinopril 10mg");
        let today = date(2024, 3, 1);
        let active: Vec<PriorFill> = ["00093111301", "00185004101", "00378044201"]
            .iter()
            .map(|ndc| fill(drug(ndc, "36100010000310", "Enalapril 5mg"), today, 30))
            .collect();

        let count_for = |n: usize| {
            let current: Vec<&PriorFill> = active.iter().take(n).collect();
            engine.check_duplication(&lisinopril, &current).len()
        };
        assert_eq!(count_for(1), 0);
        assert_eq!(count_for(2), 2);
        assert_eq!(count_for(3), 3);
    }

    #[test]
    fn test_early_refill_example() {
        let engine = RulesEngine::new();
        let atorvastatin = drug("00378395077", "39400010000310", "Atorvastatin 10mg");
        let day0 = date(2024, 1, 1);
        let history = vec![fill(atorvastatin.clone(), day0, 30)];

        let alert = engine
            .check_early_refill(&atorvastatin, &history, day0 + Duration::days(20), 80)
            .unwrap();
        assert_eq!(alert.days_early, Some(10));
        assert_eq!(alert.severity, Severity::Major);

        // 6 days early is exactly at the threshold
        assert!(engine
            .check_early_refill(&atorvastatin, &history, day0 + Duration::days(24), 80)
            .is_none());
    }

    #[test]
    fn test_early_refill_uses_most_recent_fill() {
        let engine = RulesEngine::new();
        let atorvastatin = drug("00378395077", "39400010000310", "Atorvastatin 10mg");
        let history = vec![
            fill(atorvastatin.clone(), date(2024, 2, 1), 30),
            fill(atorvastatin.clone(), date(2024, 1, 1), 30),
        ];
        let alert = engine
            .check_early_refill(&atorvastatin, &history, date(2024, 2, 5), 80)
            .unwrap();
        assert_eq!(alert.days_early, Some(26));
        assert!(engine
            .check_early_refill(&atorvastatin, &[], date(2024, 2, 5), 80)
            .is_none());
    }

    #[test]
    fn test_age_and_gender_restrictions() {
        let engine = RulesEngine::new();
        let doxycycline = drug("00143314250", "04000020100105", "Doxycycline 100mg");
        let alerts = engine.check_age_gender(&doxycycline, 6, Gender::Male);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, DurAlertType::DrugAge);
        assert!(engine.check_age_gender(&doxycycline, 8, Gender::Male).is_empty());

        let tamsulosin = drug("00597005801", "56520050000120", "Tamsulosin 0.4mg");
        let alerts = engine.check_age_gender(&tamsulosin, 60, Gender::Female);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, DurAlertType::DrugGender);
        assert!(engine.check_age_gender(&tamsulosin, 60, Gender::Male).is_empty());
    }

    #[test]
    fn test_empty_engine_finds_nothing() {
        let engine = RulesEngine::empty();
        let existing = fill(ibuprofen(), date(2024, 3, 1), 30);
        assert!(engine.check_interactions(&warfarin(), &[&existing]).is_empty());
        assert!(engine.check_age_gender(&warfarin(), 2, Gender::Unknown).is_empty());
    }
}
