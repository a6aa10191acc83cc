use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::Catalog;
use crate::decimal::{Money, Rate};
use crate::errors::Result;
use crate::events::Event;
use crate::interest::day_count::{add_days, date_diff};
use crate::interest::IncomeAccounts;
use crate::ledger::{GlPair, VoucherType};
use crate::records::{Demand, InterestAccrual};
use crate::state::Loan;
use crate::store::LoanBook;
use crate::types::{
    AccrualId, AccrualType, DemandFilter, DemandId, DemandSubtype, DemandType, DocStatus,
    InterestType, LoanId,
};

/// penal charge for one overdue demand
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyLine {
    pub demand: DemandId,
    pub from_date: NaiveDate,
    pub days: i64,
    pub base_amount: Money,
    pub penalty_amount: Money,
    pub additional_interest_amount: Money,
}

impl PenaltyLine {
    pub fn total(&self) -> Money {
        self.penalty_amount + self.additional_interest_amount
    }
}

/// engine for penal and additional interest on overdue demands
pub struct PenaltyEngine<'a> {
    catalog: &'a Catalog,
}

impl<'a> PenaltyEngine<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// penal interest due up to the date, nothing is booked
    pub fn calculate_penalty(
        &self,
        book: &LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
    ) -> Result<Vec<PenaltyLine>> {
        let loan = book.loan(loan_id)?;
        let product = self.catalog.product(&loan.loan_product)?;
        let cutoff = loan.servicing_cutoff(posting_date);

        let overdue: Vec<&Demand> = book
            .unpaid_demands(loan_id, cutoff, DemandFilter::All)
            .into_iter()
            .filter(|demand| is_penalizable(demand))
            .collect();

        let mut lines = Vec::new();
        for demand in &overdue {
            let grace_end = add_days(demand.demand_date, i64::from(product.grace_period_in_days))?;
            if cutoff <= grace_end {
                continue;
            }

            let from_date = self
                .last_penal_date(book, demand.id)
                .map_or(demand.demand_date, |last| last.max(demand.demand_date));
            let days = date_diff(cutoff, from_date);
            if days <= 0 {
                continue;
            }

            let penalty_amount = yearly_interest(demand.outstanding_amount, loan.penalty_interest_rate, days);

            let additional_interest_amount = if demand.demand_subtype == DemandSubtype::Interest {
                let principal_due: Money = overdue
                    .iter()
                    .filter(|other| {
                        other.demand_subtype == DemandSubtype::Principal
                            && other.demand_date == demand.demand_date
                    })
                    .map(|other| other.outstanding_amount)
                    .sum();
                yearly_interest(principal_due, loan.rate_of_interest, days)
            } else {
                Money::ZERO
            };

            lines.push(PenaltyLine {
                demand: demand.id,
                from_date,
                days,
                base_amount: demand.outstanding_amount,
                penalty_amount,
                additional_interest_amount,
            });
        }

        Ok(lines)
    }

    /// book penal interest up to the date with its penalty demands
    pub fn accrue_penal_interest(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<Vec<AccrualId>> {
        let loan = book.loan(loan_id)?.clone();
        let posting_date = loan.servicing_cutoff(posting_date);

        let mut booked = Vec::new();
        for line in self.calculate_penalty(book, loan_id, posting_date)? {
            if !line.total().is_positive() {
                continue;
            }
            booked.push(self.book_penalty(book, &loan, &line, posting_date, accrual_type)?);
        }
        Ok(booked)
    }

    /// penal interest not yet booked as of the date
    pub fn unbooked_penalty(&self, book: &LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<Money> {
        Ok(self
            .calculate_penalty(book, loan_id, posting_date)?
            .iter()
            .map(PenaltyLine::total)
            .sum())
    }

    /// posting date of the latest penal accrual charged on a demand
    pub fn last_penal_date(&self, book: &LoanBook, demand: DemandId) -> Option<NaiveDate> {
        book.accruals
            .values()
            .filter(|accrual| {
                accrual.is_submitted()
                    && accrual.interest_type == InterestType::PenalInterest
                    && accrual.loan_demand == Some(demand)
            })
            .map(|accrual| accrual.posting_date)
            .max()
    }

    fn book_penalty(
        &self,
        book: &mut LoanBook,
        loan: &Loan,
        line: &PenaltyLine,
        posting_date: NaiveDate,
        accrual_type: AccrualType,
    ) -> Result<AccrualId> {
        let product = self.catalog.product(&loan.loan_product)?;
        let in_suspense = loan.is_npa || loan.manual_npa;

        let start_date = add_days(line.from_date, 1)?;
        let mut accrual = InterestAccrual::new(
            loan.id,
            posting_date,
            start_date,
            InterestType::PenalInterest,
            accrual_type,
        );
        accrual.last_accrual_date = Some(line.from_date);
        accrual.base_amount = line.base_amount;
        accrual.rate_of_interest = loan.penalty_interest_rate;
        accrual.interest_amount = line.penalty_amount;
        accrual.additional_interest_amount = line.additional_interest_amount;
        accrual.loan_demand = Some(line.demand);
        accrual.is_npa = in_suspense;
        accrual.in_suspense = in_suspense;

        let mut pairs = Vec::new();
        for (subtype, amount, accounts) in [
            (DemandSubtype::Penalty, line.penalty_amount, IncomeAccounts::PENAL),
            (
                DemandSubtype::AdditionalInterest,
                line.additional_interest_amount,
                IncomeAccounts::ADDITIONAL,
            ),
        ] {
            if !amount.is_positive() {
                continue;
            }

            let mut demand = Demand::new(loan.id, posting_date, DemandType::Penalty, subtype.clone(), amount);
            demand.interest_accrual = Some(accrual.id);
            book.emit(Event::DemandRaised {
                loan_id: loan.id,
                demand_type: DemandType::Penalty,
                demand_subtype: subtype,
                amount,
                demand_date: posting_date,
            });
            book.demands.insert(demand.id, demand);

            pairs.push(accounts.accrual_pair(product, amount, in_suspense, "penal interest accrued")?);
        }

        book.post(
            loan.id,
            posting_date,
            &self.catalog.cost_center(product),
            VoucherType::InterestAccrual,
            accrual.id,
            &pairs,
        )?;

        debug!(
            loan = %loan.id,
            demand = %line.demand,
            days = line.days,
            penalty = %line.penalty_amount,
            additional = %line.additional_interest_amount,
            "penal interest accrued"
        );
        book.emit(Event::InterestAccrued {
            loan_id: loan.id,
            interest_type: InterestType::PenalInterest,
            amount: line.penalty_amount,
            additional_interest: line.additional_interest_amount,
            posting_date,
        });

        let id = accrual.id;
        book.accruals.insert(id, accrual);
        Ok(id)
    }

    /// cancel unsettled penal accruals dated on or after the date with their demands
    ///
    /// An accrual whose demand already took a payment or waiver stays booked, so
    /// recalculation resumes after it.
    pub fn reverse_penal_accruals(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        from_date: NaiveDate,
    ) -> Result<(Vec<AccrualId>, Vec<DemandId>)> {
        let penalty_demands: Vec<&Demand> = book
            .demands_of(loan_id)
            .into_iter()
            .filter(|demand| demand.demand_type == DemandType::Penalty)
            .collect();
        let settled = |accrual: AccrualId| {
            penalty_demands
                .iter()
                .any(|demand| demand.interest_accrual == Some(accrual) && is_settled(demand))
        };

        let accruals: Vec<AccrualId> = book
            .accruals_of(loan_id)
            .into_iter()
            .filter(|accrual| {
                accrual.interest_type == InterestType::PenalInterest && accrual.posting_date >= from_date
            })
            .map(|accrual| accrual.id)
            .filter(|accrual| !settled(*accrual))
            .collect();

        let demands: Vec<DemandId> = penalty_demands
            .iter()
            .filter(|demand| !is_settled(demand))
            .filter(|demand| {
                demand
                    .interest_accrual
                    .map_or(demand.demand_date >= from_date, |accrual| accruals.contains(&accrual))
            })
            .map(|demand| demand.id)
            .collect();

        for id in &demands {
            book.demand_mut(*id)?.docstatus = DocStatus::Cancelled;
        }
        for id in &accruals {
            book.accrual_mut(*id)?.docstatus = DocStatus::Cancelled;
            book.ledger.reverse(*id, from_date);
        }

        if !accruals.is_empty() {
            debug!(loan = %loan_id, count = accruals.len(), from = %from_date, "penal accruals reversed");
        }
        Ok((accruals, demands))
    }

    /// put back accruals and demands removed by reverse_penal_accruals
    pub fn restore_penal_accruals(
        &self,
        book: &mut LoanBook,
        accruals: &[AccrualId],
        demands: &[DemandId],
    ) -> Result<()> {
        for id in demands {
            book.demand_mut(*id)?.docstatus = DocStatus::Submitted;
        }

        for id in accruals {
            let accrual = book.accrual_mut(*id)?;
            accrual.docstatus = DocStatus::Submitted;
            let accrual = accrual.clone();

            let loan = book.loan(accrual.loan)?;
            let product = self.catalog.product(&loan.loan_product)?;
            let pairs: Vec<GlPair> = [
                (IncomeAccounts::PENAL, accrual.interest_amount),
                (IncomeAccounts::ADDITIONAL, accrual.additional_interest_amount),
            ]
            .into_iter()
            .filter(|(_, amount)| amount.is_positive())
            .map(|(accounts, amount)| {
                accounts.accrual_pair(product, amount, accrual.in_suspense, "penal interest accrued")
            })
            .collect::<Result<_>>()?;

            let cost_center = self.catalog.cost_center(product);
            book.post(
                accrual.loan,
                accrual.posting_date,
                &cost_center,
                VoucherType::InterestAccrual,
                accrual.id,
                &pairs,
            )?;
        }
        Ok(())
    }
}

fn is_settled(demand: &Demand) -> bool {
    demand.paid_amount.is_positive() || demand.waived_amount.is_positive()
}

/// overdue principal and interest of regular demands attract penalty
fn is_penalizable(demand: &Demand) -> bool {
    matches!(demand.demand_type, DemandType::Emi | DemandType::Normal)
        && matches!(demand.demand_subtype, DemandSubtype::Principal | DemandSubtype::Interest)
}

/// simple interest on a 365 day year, rounded to currency
fn yearly_interest(amount: Money, rate: Rate, days: i64) -> Money {
    if days <= 0 || !amount.is_positive() {
        return Money::ZERO;
    }
    (amount * rate.as_decimal() * Decimal::from(days) / Decimal::from(365)).round_currency()
}
