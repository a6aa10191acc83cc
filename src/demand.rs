use chrono::NaiveDate;
use tracing::debug;

use crate::config::Catalog;
use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::events::Event;
use crate::interest::AccrualEngine;
use crate::records::Demand;
use crate::store::LoanBook;
use crate::types::{
    AccrualType, DemandFilter, DemandId, DemandSubtype, DemandType, DocStatus, LoanId,
};

/// turns due schedule rows into demands
pub struct DemandGenerator<'a> {
    catalog: &'a Catalog,
}

impl<'a> DemandGenerator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// raise emi demands for every due row not yet demanded
    pub fn generate_demands(&self, book: &mut LoanBook, loan_id: LoanId, posting_date: NaiveDate) -> Result<Vec<DemandId>> {
        let loan = book.loan(loan_id)?.clone();
        if !loan.is_scheduled() {
            return Ok(Vec::new());
        }

        let cutoff = loan.servicing_cutoff(posting_date);
        let schedule = match book.active_schedule(loan_id) {
            Some(schedule) => schedule.clone(),
            None => return Ok(Vec::new()),
        };

        let accruals = AccrualEngine::new(self.catalog);
        let mut raised = Vec::new();

        for row in schedule
            .rows
            .iter()
            .filter(|row| row.payment_date <= cutoff && !row.demand_generated)
        {
            let accrual_id = match accruals.accrue_schedule_row(book, &loan, &schedule, row.idx, AccrualType::Regular)? {
                Some(id) => id,
                None => accruals
                    .row_accrual(book, loan_id, schedule.id, row.idx, row.payment_date)
                    .ok_or_else(|| ServicingError::CalculationError {
                        message: format!("no accrual for row {} of schedule {}", row.idx, schedule.id),
                    })?,
            };
            let interest_amount = book
                .accruals
                .get(&accrual_id)
                .map_or(Money::ZERO, |accrual| accrual.interest_amount);

            // principal left once earlier demands are collected
            let demanded_principal: Money = book
                .demands_of(loan_id)
                .into_iter()
                .filter(|demand| demand.demand_subtype == DemandSubtype::Principal)
                .map(|demand| demand.outstanding_amount)
                .sum();
            let book_loan = book.loan(loan_id)?;
            let principal_amount = row
                .principal_amount
                .min(book_loan.pending_principal_amount() - demanded_principal)
                .non_negative();

            for (subtype, amount) in [
                (DemandSubtype::Principal, principal_amount),
                (DemandSubtype::Interest, interest_amount),
            ] {
                if !amount.is_positive() {
                    continue;
                }

                let mut demand = Demand::new(loan_id, row.payment_date, DemandType::Emi, subtype.clone(), amount);
                demand.repayment_schedule = Some(schedule.id);
                demand.repayment_schedule_detail = Some(row.idx);
                demand.interest_accrual = Some(accrual_id);

                if subtype == DemandSubtype::Interest {
                    book.accrual_mut(accrual_id)?.loan_demand = Some(demand.id);
                }

                debug!(loan = %loan_id, row = row.idx, subtype = ?subtype, amount = %amount, "emi demand raised");
                book.emit(Event::DemandRaised {
                    loan_id,
                    demand_type: DemandType::Emi,
                    demand_subtype: subtype,
                    amount,
                    demand_date: row.payment_date,
                });
                raised.push(demand.id);
                book.demands.insert(demand.id, demand);
            }

            if let Some(stored) = book.schedule_mut(schedule.id)?.rows.get_mut(row.idx as usize) {
                stored.demand_generated = true;
            }
        }

        Ok(raised)
    }

    /// cancel unpaid demands dated on or after the date
    pub fn reverse_demands(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        from_date: NaiveDate,
        filter: DemandFilter,
    ) -> Result<Vec<DemandId>> {
        let targets: Vec<Demand> = book
            .demands_of(loan_id)
            .into_iter()
            .filter(|demand| demand.demand_date >= from_date)
            .filter(|demand| filter.matches(demand.demand_type, &demand.demand_subtype))
            .cloned()
            .collect();

        if let Some(settled) = targets
            .iter()
            .find(|demand| demand.paid_amount.is_positive() || demand.waived_amount.is_positive())
        {
            return Err(ServicingError::FutureEntryExists {
                loan: loan_id,
                document: "Loan Repayment against demand".to_string(),
                date: settled.demand_date,
            });
        }

        for demand in &targets {
            book.demand_mut(demand.id)?.docstatus = DocStatus::Cancelled;
            book.ledger.reverse(demand.id, from_date);

            if let (Some(schedule), Some(idx)) = (demand.repayment_schedule, demand.repayment_schedule_detail) {
                if let Some(row) = book.schedule_mut(schedule)?.rows.get_mut(idx as usize) {
                    row.demand_generated = false;
                }
            }
            if let Some(accrual) = demand.interest_accrual.and_then(|id| book.accruals.get_mut(&id)) {
                if accrual.loan_demand == Some(demand.id) {
                    accrual.loan_demand = None;
                }
            }
        }

        if !targets.is_empty() {
            debug!(loan = %loan_id, count = targets.len(), from = %from_date, "demands reversed");
        }
        Ok(targets.into_iter().map(|demand| demand.id).collect())
    }
}
