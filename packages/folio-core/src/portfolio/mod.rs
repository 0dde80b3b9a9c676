//! Portfolio management module.
//!
//! Provides holdings persistence, valuation and performance analytics.

mod performance;
mod store;
mod table;
mod valuation;

pub use performance::{annualize_return, PerformanceReport, SeriesPerformance};
pub use store::HoldingsStore;
pub use table::{load_portfolio, read_portfolio, save_portfolio, write_portfolio};
pub use valuation::{
    compute_allocation, compute_sector_breakdown, compute_value, dividend_income, income_summary,
    Allocation, IncomeSummary, PortfolioValue, PositionAllocation, SectorBreakdown, SectorWeight,
    CASH_SECTOR,
};
