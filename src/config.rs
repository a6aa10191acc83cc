use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decimal::{Money, Rate};
use crate::errors::{Result, ServicingError};
use crate::interest::DayCountConvention;
use crate::types::{Applicant, ScheduleType};

/// ledger accounts a loan product routes postings to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountRole {
    LoanAccount,
    PaymentAccount,
    DisbursementAccount,
    InterestIncome,
    InterestReceivable,
    PenaltyIncome,
    PenaltyReceivable,
    AdditionalInterestIncome,
    AdditionalInterestReceivable,
    SuspenseInterestReceivable,
    SuspenseInterestIncome,
    SuspensePenaltyReceivable,
    SuspensePenaltyIncome,
    InterestWaiver,
    PenaltyWaiver,
    ChargesWaiver,
    ChargesReceivable,
    WriteOff,
    CustomerRefund,
    SecurityDeposit,
}

impl AccountRole {
    pub fn field_name(&self) -> &'static str {
        match self {
            AccountRole::LoanAccount => "loan_account",
            AccountRole::PaymentAccount => "payment_account",
            AccountRole::DisbursementAccount => "disbursement_account",
            AccountRole::InterestIncome => "interest_income_account",
            AccountRole::InterestReceivable => "interest_receivable_account",
            AccountRole::PenaltyIncome => "penalty_income_account",
            AccountRole::PenaltyReceivable => "penalty_receivable_account",
            AccountRole::AdditionalInterestIncome => "additional_interest_income",
            AccountRole::AdditionalInterestReceivable => "additional_interest_receivable",
            AccountRole::SuspenseInterestReceivable => "suspense_interest_receivable",
            AccountRole::SuspenseInterestIncome => "suspense_interest_income",
            AccountRole::SuspensePenaltyReceivable => "suspense_penalty_receivable",
            AccountRole::SuspensePenaltyIncome => "suspense_penalty_income",
            AccountRole::InterestWaiver => "interest_waiver_account",
            AccountRole::PenaltyWaiver => "penalty_waiver_account",
            AccountRole::ChargesWaiver => "charges_waiver_account",
            AccountRole::ChargesReceivable => "charges_receivable_account",
            AccountRole::WriteOff => "write_off_account",
            AccountRole::CustomerRefund => "customer_refund_account",
            AccountRole::SecurityDeposit => "security_deposit_account",
        }
    }
}

/// loan product: rates, tolerances and account routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanProduct {
    pub name: String,
    pub is_term_loan: bool,
    pub rate_of_interest: Rate,
    pub penalty_interest_rate: Rate,
    pub grace_period_in_days: u32,
    /// zero disables npa marking
    pub days_past_due_threshold_for_npa: u32,
    /// write-off tolerance on closure
    pub write_off_amount: Money,
    /// residual dues tolerated when a fully repaid loan auto closes
    pub auto_close_tolerance: Money,
    pub cyclic_day_of_the_month: u32,
    pub min_days_bw_disbursement_first_repayment: u32,
    pub repayment_schedule_type: ScheduleType,
    pub maximum_loan_amount: Option<Money>,
    pub cost_center: Option<String>,
    pub accounts: BTreeMap<AccountRole, String>,
}

impl LoanProduct {
    /// parse a product definition
    pub fn from_json(json: &str) -> Result<Self> {
        let product: LoanProduct = serde_json::from_str(json)?;
        product.validate()?;
        Ok(product)
    }

    /// standard amortizing term loan product
    pub fn term_loan(name: &str, rate_of_interest: Rate, schedule_type: ScheduleType) -> Self {
        Self {
            name: name.to_string(),
            is_term_loan: true,
            rate_of_interest,
            penalty_interest_rate: Rate::from_percentage(25),
            grace_period_in_days: 0,
            days_past_due_threshold_for_npa: 90,
            write_off_amount: Money::from_major(100),
            auto_close_tolerance: Money::ZERO,
            cyclic_day_of_the_month: 5,
            min_days_bw_disbursement_first_repayment: 15,
            repayment_schedule_type: schedule_type,
            maximum_loan_amount: None,
            cost_center: Some("Main".to_string()),
            accounts: standard_accounts(),
        }
    }

    /// demand loan product without a repayment schedule
    pub fn demand_loan(name: &str, rate_of_interest: Rate, penalty_interest_rate: Rate) -> Self {
        Self {
            name: name.to_string(),
            is_term_loan: false,
            rate_of_interest,
            penalty_interest_rate,
            grace_period_in_days: 0,
            days_past_due_threshold_for_npa: 90,
            write_off_amount: Money::from_major(100),
            auto_close_tolerance: Money::ZERO,
            cyclic_day_of_the_month: 0,
            min_days_bw_disbursement_first_repayment: 0,
            repayment_schedule_type: ScheduleType::MonthlyAsPerRepaymentStartDate,
            maximum_loan_amount: None,
            cost_center: Some("Main".to_string()),
            accounts: standard_accounts(),
        }
    }

    /// builder-style grace period override
    pub fn with_grace_period(mut self, days: u32) -> Self {
        self.grace_period_in_days = days;
        self
    }

    /// resolve an account or fail with a configuration error
    pub fn account(&self, role: AccountRole) -> Result<String> {
        self.accounts
            .get(&role)
            .filter(|account| !account.is_empty())
            .cloned()
            .ok_or_else(|| ServicingError::missing_account(&self.name, role.field_name()))
    }

    /// accounts every loan needs before it can be booked
    pub fn validate(&self) -> Result<()> {
        for role in [
            AccountRole::LoanAccount,
            AccountRole::PaymentAccount,
            AccountRole::InterestIncome,
            AccountRole::PenaltyIncome,
        ] {
            self.account(role)?;
        }

        if !self.rate_of_interest.is_zero() && self.cost_center.is_none() {
            return Err(ServicingError::InvalidConfiguration {
                message: format!(
                    "cost center is mandatory for loan product {} with a non-zero rate of interest",
                    self.name
                ),
            });
        }

        Ok(())
    }
}

fn standard_accounts() -> BTreeMap<AccountRole, String> {
    [
        (AccountRole::LoanAccount, "Loan Account"),
        (AccountRole::PaymentAccount, "Payment Account"),
        (AccountRole::DisbursementAccount, "Disbursement Account"),
        (AccountRole::InterestIncome, "Interest Income Account"),
        (AccountRole::InterestReceivable, "Interest Receivable"),
        (AccountRole::PenaltyIncome, "Penalty Income Account"),
        (AccountRole::PenaltyReceivable, "Penalty Receivable"),
        (AccountRole::AdditionalInterestIncome, "Additional Interest Income"),
        (AccountRole::AdditionalInterestReceivable, "Additional Interest Receivable"),
        (AccountRole::SuspenseInterestReceivable, "Suspense Interest Receivable"),
        (AccountRole::SuspenseInterestIncome, "Suspense Interest Income"),
        (AccountRole::SuspensePenaltyReceivable, "Suspense Penalty Receivable"),
        (AccountRole::SuspensePenaltyIncome, "Suspense Penalty Income"),
        (AccountRole::InterestWaiver, "Interest Waiver Account"),
        (AccountRole::PenaltyWaiver, "Penalty Waiver Account"),
        (AccountRole::ChargesWaiver, "Charges Waiver Account"),
        (AccountRole::ChargesReceivable, "Charges Receivable"),
        (AccountRole::WriteOff, "Write Off Account"),
        (AccountRole::CustomerRefund, "Customer Refund Account"),
        (AccountRole::SecurityDeposit, "Security Deposit Account"),
    ]
    .into_iter()
    .map(|(role, account)| (role, account.to_string()))
    .collect()
}

/// dpd bucket, max_dpd of none is open ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRange {
    pub min_dpd: u32,
    pub max_dpd: Option<u32>,
    pub code: String,
    pub name: String,
}

impl ClassificationRange {
    pub fn new(min_dpd: u32, max_dpd: Option<u32>, code: &str, name: &str) -> Self {
        Self {
            min_dpd,
            max_dpd,
            code: code.to_string(),
            name: name.to_string(),
        }
    }

    pub fn contains(&self, days_past_due: u32) -> bool {
        days_past_due >= self.min_dpd && self.max_dpd.map_or(true, |max| days_past_due <= max)
    }
}

/// what decides whether a loan collects on the sub-standard sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetLogic {
    NpaFlag,
    DaysPastDue,
}

/// order in which overdue components are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionOffsetSequence {
    /// per period interest then principal, then penalty, then charges
    InterestPrincipalByPeriod,
    /// all principal, then all interest, then penalty, then charges
    PrincipalThenInterest,
}

/// company-wide servicing switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyPolicy {
    pub company: String,
    pub day_count_convention: DayCountConvention,
    pub classification_ranges: Vec<ClassificationRange>,
    pub collection_offset_logic_based_on: OffsetLogic,
    pub days_past_due_threshold: u32,
    pub standard_asset_sequence: CollectionOffsetSequence,
    pub sub_standard_asset_sequence: CollectionOffsetSequence,
    pub watch_period_post_loan_restructure_in_days: u32,
    pub days_past_due_threshold_for_auto_write_off: Option<u32>,
    pub write_off_account: Option<String>,
    pub cost_center: String,
}

impl CompanyPolicy {
    /// parse company policy
    pub fn from_json(json: &str) -> Result<Self> {
        let mut policy: CompanyPolicy = serde_json::from_str(json)?;
        policy.classification_ranges.sort_by_key(|range| range.min_dpd);
        Ok(policy)
    }

    /// regulator style sma/d buckets with npa-flag based offsetting
    pub fn standard(company: &str) -> Self {
        Self {
            company: company.to_string(),
            day_count_convention: DayCountConvention::ActualActual,
            classification_ranges: vec![
                ClassificationRange::new(0, Some(30), "SMA-0", "Special Mention Account - 0"),
                ClassificationRange::new(31, Some(60), "SMA-1", "Special Mention Account - 1"),
                ClassificationRange::new(61, Some(90), "SMA-2", "Special Mention Account - 2"),
                ClassificationRange::new(91, Some(365), "D1", "Doubtful - 1"),
                ClassificationRange::new(366, Some(1098), "D2", "Doubtful - 2"),
                ClassificationRange::new(1099, None, "D3", "Doubtful - 3"),
            ],
            collection_offset_logic_based_on: OffsetLogic::NpaFlag,
            days_past_due_threshold: 90,
            standard_asset_sequence: CollectionOffsetSequence::InterestPrincipalByPeriod,
            sub_standard_asset_sequence: CollectionOffsetSequence::PrincipalThenInterest,
            watch_period_post_loan_restructure_in_days: 180,
            days_past_due_threshold_for_auto_write_off: None,
            write_off_account: Some("Write Off Account".to_string()),
            cost_center: "Main".to_string(),
        }
    }

    /// map days past due to (code, name)
    pub fn classify(&self, days_past_due: u32) -> Option<(&str, &str)> {
        self.classification_ranges
            .iter()
            .find(|range| range.contains(days_past_due))
            .map(|range| (range.code.as_str(), range.name.as_str()))
    }
}

/// co-lending partner with first loss default guarantee
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPartner {
    pub name: String,
    pub fldg_trigger_dpd: Option<u32>,
    /// percent of the pledge base covered
    pub fldg_percentage: Decimal,
    pub fldg_account: Option<String>,
    pub partner_payable_account: Option<String>,
}

impl LoanPartner {
    pub fn new(name: &str, fldg_trigger_dpd: u32, fldg_percentage: Decimal) -> Self {
        Self {
            name: name.to_string(),
            fldg_trigger_dpd: Some(fldg_trigger_dpd),
            fldg_percentage,
            fldg_account: Some("FLDG Account".to_string()),
            partner_payable_account: Some("Partner Payable".to_string()),
        }
    }
}

/// everything the engines read but never write
#[derive(Debug, Clone)]
pub struct Catalog {
    pub policy: CompanyPolicy,
    pub products: BTreeMap<String, LoanProduct>,
    pub partners: BTreeMap<String, LoanPartner>,
    pub sanctioned_limits: BTreeMap<Applicant, Money>,
}

impl Catalog {
    pub fn new(policy: CompanyPolicy) -> Self {
        Self {
            policy,
            products: BTreeMap::new(),
            partners: BTreeMap::new(),
            sanctioned_limits: BTreeMap::new(),
        }
    }

    pub fn with_product(mut self, product: LoanProduct) -> Self {
        self.products.insert(product.name.clone(), product);
        self
    }

    pub fn with_partner(mut self, partner: LoanPartner) -> Self {
        self.partners.insert(partner.name.clone(), partner);
        self
    }

    pub fn with_sanctioned_limit(mut self, applicant: Applicant, limit: Money) -> Self {
        self.sanctioned_limits.insert(applicant, limit);
        self
    }

    pub fn product(&self, name: &str) -> Result<&LoanProduct> {
        self.products
            .get(name)
            .ok_or_else(|| ServicingError::InvalidConfiguration {
                message: format!("loan product {} is not defined", name),
            })
    }

    pub fn partner(&self, name: &str) -> Result<&LoanPartner> {
        self.partners
            .get(name)
            .ok_or_else(|| ServicingError::InvalidConfiguration {
                message: format!("loan partner {} is not defined", name),
            })
    }

    /// product cost center, else the company default
    pub fn cost_center(&self, product: &LoanProduct) -> String {
        product
            .cost_center
            .clone()
            .unwrap_or_else(|| self.policy.cost_center.clone())
    }

    /// write-off account from the product, else the company default
    pub fn write_off_account(&self, product: &LoanProduct) -> Result<String> {
        product.account(AccountRole::WriteOff).or_else(|err| {
            self.policy.write_off_account.clone().ok_or(err)
        })
    }
}

impl Default for CompanyPolicy {
    fn default() -> Self {
        CompanyPolicy::standard("Default Company")
    }
}

/// fldg cover amount for a pledge base
pub fn fldg_amount(partner: &LoanPartner, pledge_base: Money) -> Money {
    pledge_base.percentage(partner.fldg_percentage).round_currency()
}
