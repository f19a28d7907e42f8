//! Portfolio summary for a wallet's current positions.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::Position;

/// Aggregate view over a wallet's open positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub wallet: String,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
    pub positions: usize,
    pub profitable: usize,
    pub losing: usize,
    /// Profitable positions as a fraction of all positions (0.0 to 1.0)
    pub win_rate: f64,
    pub mean_pnl: f64,
    /// Sample standard deviation of per-position P&L; zero below two positions
    pub pnl_std_dev: f64,
    pub redeemable: usize,
    /// Largest positions by current value
    pub top: Vec<Position>,
}

impl PortfolioSummary {
    pub fn from_positions(wallet: &str, positions: &[Position], top_n: usize) -> Self {
        let open: Vec<&Position> = positions.iter().filter(|p| p.is_open()).collect();
        let count = open.len();

        let total_value: Decimal = open.iter().map(|p| p.current_value).sum();
        let total_pnl: Decimal = open.iter().map(|p| p.cash_pnl).sum();
        let profitable = open.iter().filter(|p| p.cash_pnl > Decimal::ZERO).count();
        let losing = open.iter().filter(|p| p.cash_pnl < Decimal::ZERO).count();
        let redeemable = open.iter().filter(|p| p.redeemable).count();

        let pnls: Vec<f64> = open
            .iter()
            .map(|p| p.cash_pnl.to_f64().unwrap_or(0.0))
            .collect();

        let win_rate = if count == 0 {
            0.0
        } else {
            profitable as f64 / count as f64
        };
        let mean_pnl = if pnls.is_empty() { 0.0 } else { pnls.iter().mean() };
        let pnl_std_dev = if pnls.len() < 2 { 0.0 } else { pnls.iter().std_dev() };

        let mut top: Vec<Position> = open.into_iter().cloned().collect();
        top.sort_by(|a, b| b.current_value.cmp(&a.current_value));
        top.truncate(top_n);

        Self {
            wallet: wallet.to_string(),
            total_value,
            total_pnl,
            positions: count,
            profitable,
            losing,
            win_rate,
            mean_pnl,
            pnl_std_dev,
            redeemable,
            top,
        }
    }
}

impl fmt::Display for PortfolioSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Portfolio: {} ===", self.wallet)?;
        writeln!(f, "Total Value:      ${:.2}", self.total_value)?;
        writeln!(f, "Total P&L:        ${:.2}", self.total_pnl)?;
        writeln!(f, "Positions:        {}", self.positions)?;
        writeln!(f, "Profitable:       {}", self.profitable)?;
        writeln!(f, "Losing:           {}", self.losing)?;
        writeln!(f, "Win Rate:         {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Mean P&L:         ${:.2}", self.mean_pnl)?;
        writeln!(f, "P&L Std Dev:      ${:.2}", self.pnl_std_dev)?;
        write!(f, "Redeemable:       {}", self.redeemable)?;

        if !self.top.is_empty() {
            write!(f, "\n\n--- Largest Positions ---")?;
            for p in &self.top {
                write!(
                    f,
                    "\n  {} {} | {:.2} @ {:.3} | ${:.2} (P&L ${:.2})",
                    truncate(&p.title, 40),
                    p.outcome,
                    p.size,
                    p.current_price,
                    p.current_value,
                    p.cash_pnl
                )?;
            }
        }

        Ok(())
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{position, FOLLOWER};
    use rust_decimal_macros::dec;

    fn with_pnl(asset: &str, size: Decimal, pnl: Decimal) -> Position {
        let mut p = position(FOLLOWER, asset, size);
        p.cash_pnl = pnl;
        p
    }

    #[test]
    fn test_empty_portfolio() {
        let summary = PortfolioSummary::from_positions(FOLLOWER, &[], 5);
        assert_eq!(summary.positions, 0);
        assert_eq!(summary.total_value, Decimal::ZERO);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.mean_pnl, 0.0);
        assert_eq!(summary.pnl_std_dev, 0.0);
    }

    #[test]
    fn test_summary_counts() {
        let mut redeemable = with_pnl("c", dec!(10), dec!(-1));
        redeemable.redeemable = true;
        let positions = vec![
            with_pnl("a", dec!(100), dec!(4)),
            with_pnl("b", dec!(20), dec!(2)),
            redeemable,
            with_pnl("closed", dec!(0), dec!(50)),
        ];

        let summary = PortfolioSummary::from_positions(FOLLOWER, &positions, 2);
        assert_eq!(summary.positions, 3);
        assert_eq!(summary.total_value, dec!(65));
        assert_eq!(summary.total_pnl, dec!(5));
        assert_eq!(summary.profitable, 2);
        assert_eq!(summary.losing, 1);
        assert_eq!(summary.redeemable, 1);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.mean_pnl - 5.0 / 3.0).abs() < 1e-9);
        assert!(summary.pnl_std_dev > 0.0);

        assert_eq!(summary.top.len(), 2);
        assert_eq!(summary.top[0].asset_id, "a");
        assert_eq!(summary.top[1].asset_id, "b");
    }

    #[test]
    fn test_display() {
        let summary =
            PortfolioSummary::from_positions(FOLLOWER, &[with_pnl("a", dec!(10), dec!(1.5))], 5);
        let shown = summary.to_string();
        assert!(shown.contains("Total Value:      $5.00"));
        assert!(shown.contains("Win Rate:         100.0%"));
        assert!(shown.contains("Largest Positions"));
    }
}
