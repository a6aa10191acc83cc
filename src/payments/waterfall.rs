use chrono::NaiveDate;

use crate::config::{CollectionOffsetSequence, CompanyPolicy};
use crate::decimal::Money;
use crate::records::Demand;
use crate::state::Loan;
use crate::types::{DemandId, DemandSubtype, DemandType, PaymentApplication};

/// amount settled on one demand
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub demand: DemandId,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PaymentComponent {
    Principal,
    Interest,
    Penalty,
    Charges,
}

impl PaymentComponent {
    fn of(demand: &Demand) -> Self {
        match (&demand.demand_type, &demand.demand_subtype) {
            (DemandType::Charges, _) | (_, DemandSubtype::Charge(_)) => PaymentComponent::Charges,
            (_, DemandSubtype::Penalty) | (_, DemandSubtype::AdditionalInterest) => PaymentComponent::Penalty,
            (_, DemandSubtype::Interest) => PaymentComponent::Interest,
            (_, DemandSubtype::Principal) => PaymentComponent::Principal,
        }
    }
}

/// orders overdue demands and spreads a payment over them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallAllocator {
    sequence: CollectionOffsetSequence,
}

impl WaterfallAllocator {
    pub fn new(sequence: CollectionOffsetSequence) -> Self {
        Self { sequence }
    }

    /// standard or sub-standard sequence for the loan's asset class
    pub fn for_loan(loan: &Loan, policy: &CompanyPolicy, offset_based_on_npa: bool) -> Self {
        if offset_based_on_npa && loan.is_sub_standard(policy) {
            Self::new(policy.sub_standard_asset_sequence)
        } else {
            Self::new(policy.standard_asset_sequence)
        }
    }

    pub fn sequence(&self) -> CollectionOffsetSequence {
        self.sequence
    }

    fn rank(&self, demand: &Demand) -> (u8, NaiveDate, u8) {
        let component = PaymentComponent::of(demand);
        let subtype_rank = match demand.demand_subtype {
            DemandSubtype::AdditionalInterest => 1,
            _ => 0,
        };

        match (self.sequence, component) {
            // per period interest then principal
            (CollectionOffsetSequence::InterestPrincipalByPeriod, PaymentComponent::Interest) => {
                (0, demand.demand_date, 0)
            }
            (CollectionOffsetSequence::InterestPrincipalByPeriod, PaymentComponent::Principal) => {
                (0, demand.demand_date, 1)
            }
            (CollectionOffsetSequence::InterestPrincipalByPeriod, PaymentComponent::Penalty) => {
                (1, demand.demand_date, subtype_rank)
            }
            (CollectionOffsetSequence::InterestPrincipalByPeriod, PaymentComponent::Charges) => {
                (2, demand.demand_date, 0)
            }
            (CollectionOffsetSequence::PrincipalThenInterest, PaymentComponent::Principal) => {
                (0, demand.demand_date, 0)
            }
            (CollectionOffsetSequence::PrincipalThenInterest, PaymentComponent::Interest) => {
                (1, demand.demand_date, 0)
            }
            (CollectionOffsetSequence::PrincipalThenInterest, PaymentComponent::Penalty) => {
                (2, demand.demand_date, subtype_rank)
            }
            (CollectionOffsetSequence::PrincipalThenInterest, PaymentComponent::Charges) => {
                (3, demand.demand_date, 0)
            }
        }
    }

    /// demands in settlement order
    pub fn order<'d>(&self, demands: &'d [Demand]) -> Vec<&'d Demand> {
        let mut ordered: Vec<&Demand> = demands.iter().collect();
        ordered.sort_by_key(|demand| self.rank(demand));
        ordered
    }

    /// spread the amount over the demands, oldest first within each component
    pub fn allocate(&self, demands: &[Demand], amount: Money) -> (Vec<Allocation>, PaymentApplication) {
        let mut remaining = amount;
        let mut allocations = Vec::new();
        let mut application = PaymentApplication::default();

        for demand in self.order(demands) {
            if !remaining.is_positive() {
                break;
            }

            let paid = remaining.min(demand.outstanding_amount);
            if !paid.is_positive() {
                continue;
            }
            remaining -= paid;

            let applied = match PaymentComponent::of(demand) {
                PaymentComponent::Principal => &mut application.to_principal,
                PaymentComponent::Interest => &mut application.to_interest,
                PaymentComponent::Penalty => &mut application.to_penalties,
                PaymentComponent::Charges => &mut application.to_charges,
            };
            *applied += paid;

            allocations.push(Allocation {
                demand: demand.id,
                amount: paid,
            });
        }

        application.excess = remaining;
        (allocations, application)
    }
}
