//! Auto-approval policy hook.

use crate::config::AdjudicationConfig;
use crate::models::{PaRequest, RequestType, Urgency};

/// An automatic approval and how long it lasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoApproval {
    pub duration_days: u32,
    pub reason: String,
}

/// Decides whether a request can be approved without review.
///
/// Returning `None` leaves the request pending for an explicit decision.
pub trait AutoApprovalPolicy: Send + Sync {
    fn evaluate(&self, request: &PaRequest) -> Option<AutoApproval>;
}

/// Approves emergencies for a short period and renewals for a full term.
#[derive(Debug, Clone)]
pub struct DefaultAutoApprovalPolicy {
    pub emergency_duration_days: u32,
    pub renewal_duration_days: u32,
}

impl Default for DefaultAutoApprovalPolicy {
    fn default() -> Self {
        Self::from_config(&AdjudicationConfig::default())
    }
}

impl DefaultAutoApprovalPolicy {
    pub fn from_config(config: &AdjudicationConfig) -> Self {
        Self {
            emergency_duration_days: config.pa_emergency_duration_days,
            renewal_duration_days: config.pa_default_duration_days,
        }
    }
}

impl AutoApprovalPolicy for DefaultAutoApprovalPolicy {
    fn evaluate(&self, request: &PaRequest) -> Option<AutoApproval> {
        if request.urgency == Urgency::Emergency {
            return Some(AutoApproval {
                duration_days: self.emergency_duration_days,
                reason: "Emergency supply auto-approved".into(),
            });
        }
        if request.request_type == RequestType::Renewal {
            return Some(AutoApproval {
                duration_days: self.renewal_duration_days,
                reason: "Renewal auto-approved".into(),
            });
        }
        None
    }
}

/// Never auto-approves; every request needs a reviewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualReviewPolicy;

impl AutoApprovalPolicy for ManualReviewPolicy {
    fn evaluate(&self, _request: &PaRequest) -> Option<AutoApproval> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DrugInfo, Gpi, Ndc};
    use rust_decimal_macros::dec;

    fn request() -> PaRequest {
        let drug = DrugInfo::new(
            Ndc::parse("00169413013").unwrap(),
            Gpi::parse("27175080").unwrap(),
            "Semaglutide 1mg",
        );
        PaRequest::new("M100", drug, dec!(4), 28, "1234567893")
    }

    #[test]
    fn test_default_policy() {
        let policy = DefaultAutoApprovalPolicy::default();
        assert_eq!(policy.evaluate(&request()), None);

        let emergency = policy
            .evaluate(&request().with_urgency(Urgency::Emergency))
            .unwrap();
        assert_eq!(emergency.duration_days, 30);

        let renewal = policy
            .evaluate(&request().with_request_type(RequestType::Renewal))
            .unwrap();
        assert_eq!(renewal.duration_days, 365);

        // urgent is not emergency
        assert_eq!(policy.evaluate(&request().with_urgency(Urgency::Urgent)), None);
    }

    #[test]
    fn test_manual_policy_never_approves() {
        let request = request().with_urgency(Urgency::Emergency);
        assert_eq!(ManualReviewPolicy.evaluate(&request), None);
    }
}
