//! # Report Tables
//!
//! Plain-text tables for performance summaries and allocations.

use prettytable::row;
use prettytable::Table;

use super::types::PortfolioPerformance;
use super::weights::Weights;

pub fn performance_table(perf: &PortfolioPerformance) -> Table {
  let mut table = Table::new();
  table.set_titles(row!["Metric", "Value"]);
  table.add_row(row![
    "Expected annual return",
    format!("{:.1}%", 100.0 * perf.expected_return)
  ]);
  table.add_row(row![
    "Annual volatility",
    format!("{:.1}%", 100.0 * perf.volatility)
  ]);
  table.add_row(row!["Sharpe Ratio", format!("{:.2}", perf.sharpe_ratio)]);
  table
}

pub fn weights_table(weights: &Weights) -> Table {
  let mut table = Table::new();
  table.set_titles(row!["Ticker", "Weight"]);
  for (ticker, w) in weights.iter() {
    table.add_row(row![ticker, format!("{w:.5}")]);
  }
  table
}
