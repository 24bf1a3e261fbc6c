use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use tracing::info;

use crate::analysis::AnalysisReport;
use crate::error::{EngineError, Result};

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for EngineError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        EngineError::Plot(err.to_string())
    }
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = ((hi - lo) * 0.1).max(1e-6);
    (lo - pad, hi + pad)
}

pub fn plot_efficient_frontier(report: &AnalysisReport, output_path: &str) -> Result<()> {
    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let tangency = &report.tangency;
    let gmv = &report.frontier.global_minimum_variance;
    let x_max = report
        .frontier
        .points
        .iter()
        .map(|pt| pt.portfolio_std)
        .chain(std::iter::once(tangency.portfolio_std))
        .fold(0.0, f64::max)
        * 1.1;
    let (y_min, y_max) = padded_range(
        report
            .frontier
            .points
            .iter()
            .map(|pt| pt.target_mean)
            .chain([tangency.expected_return, tangency.risk_free_rate]),
    );

    let mut chart = ChartBuilder::on(&root)
        .caption("Efficient Frontier", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_max.max(1e-6), y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Standard Deviation (Risk)")
        .y_desc("Expected Return")
        .draw()?;

    chart
        .draw_series(
            report
                .frontier
                .points
                .iter()
                .map(|pt| Circle::new((pt.portfolio_std, pt.target_mean), 2, BLUE.filled())),
        )?
        .label("Minimum-variance frontier")
        .legend(|(x, y)| Circle::new((x, y), 3, BLUE.filled()));

    chart
        .draw_series(std::iter::once(Circle::new(
            (gmv.portfolio_std, gmv.target_mean),
            5,
            GREEN.filled(),
        )))?
        .label("Global Minimum Variance")
        .legend(|(x, y)| Circle::new((x, y), 5, GREEN.filled()));

    chart
        .draw_series(std::iter::once(Circle::new(
            (tangency.portfolio_std, tangency.expected_return),
            5,
            RED.filled(),
        )))?
        .label("Tangency Portfolio")
        .legend(|(x, y)| Circle::new((x, y), 5, RED.filled()));

    // Capital allocation line from (0, r_f) through the tangency portfolio
    let cal_points: Vec<(f64, f64)> = report
        .capital_allocation_line
        .iter()
        .map(|pt| (pt.portfolio_std, pt.expected_return))
        .filter(|(x, y)| *x <= x_max && *y >= y_min && *y <= y_max)
        .collect();
    chart
        .draw_series(LineSeries::new(cal_points, BLACK))?
        .label("Capital Allocation Line")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], BLACK));

    chart.configure_series_labels().border_style(BLACK).draw()?;

    root.present()?;
    info!(path = output_path, "efficient frontier saved");
    Ok(())
}

pub fn plot_portfolio(asset_labels: &[String], weights: &[f64], output_path: &str) -> Result<()> {
    let root = BitMapBackend::new(output_path, (640, 480)).into_drawing_area();
    root.fill(&WHITE)?;

    // Short positions are allowed, so the axis is symmetric
    let max_weight = weights.iter().map(|w| w.abs()).fold(1.0, f64::max);

    let mut chart = ChartBuilder::on(&root)
        .caption("Tangency Portfolio Weights", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0..weights.len(), -max_weight * 1.2..max_weight * 1.2)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(weights.len())
        .x_label_formatter(&|idx| asset_labels.get(*idx).cloned().unwrap_or_default())
        .x_desc("Assets")
        .y_desc("Weight")
        .draw()?;

    chart.draw_series(weights.iter().enumerate().map(|(i, &w)| {
        let color = if w >= 0.0 { BLUE } else { RED };
        Rectangle::new([(i, 0.0), (i + 1, w)], color.filled())
    }))?;

    root.present()?;
    info!(path = output_path, "portfolio chart saved");
    Ok(())
}

fn histogram(values: &[f64], num_bins: usize) -> (f64, f64, Vec<usize>) {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = ((max - min) / num_bins as f64).max(f64::MIN_POSITIVE);
    let mut bins = vec![0; num_bins];
    for v in values {
        let bin = (((*v - min) / width) as usize).min(num_bins - 1);
        bins[bin] += 1;
    }
    (min, width, bins)
}

/// Return histogram with the VaR and CVaR loss thresholds marked.
pub fn plot_return_distribution(
    title: &str,
    returns: &[f64],
    var: f64,
    cvar: f64,
    significance_level: f64,
    output_path: &str,
) -> Result<()> {
    if returns.is_empty() {
        return Ok(());
    }
    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let num_bins = 30;
    let (min_return, bin_width, bins) = histogram(returns, num_bins);
    let max_count = bins.iter().cloned().max().unwrap_or(1);
    let x_min = min_return.min(-cvar);
    let x_max = min_return + bin_width * num_bins as f64;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, 0..max_count)?;

    chart
        .configure_mesh()
        .x_desc("Return")
        .y_desc("Frequency")
        .draw()?;

    chart.draw_series(bins.iter().enumerate().map(|(i, count)| {
        let x0 = min_return + i as f64 * bin_width;
        Rectangle::new([(x0, 0), (x0 + bin_width, *count)], BLUE.filled())
    }))?;

    let confidence = (1.0 - significance_level) * 100.0;
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(-var, 0), (-var, max_count)],
            RED,
        )))?
        .label(format!("VaR({:.0}%): {:.2}%", confidence, var * 100.0))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(-cvar, 0), (-cvar, max_count)],
            BLACK,
        )))?
        .label(format!("CVaR({:.0}%): {:.2}%", confidence, cvar * 100.0))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart.configure_series_labels().border_style(BLACK).draw()?;

    root.present()?;
    info!(path = output_path, "return distribution saved");
    Ok(())
}

pub fn plot_drawdown_distribution(title: &str, drawdowns: &[f64], output_path: &str) -> Result<()> {
    if drawdowns.is_empty() {
        return Ok(());
    }
    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let num_bins = 40;
    let (min_dd, bin_width, bins) = histogram(drawdowns, num_bins);
    let max_count = bins.iter().cloned().max().unwrap_or(1);

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(min_dd..min_dd + bin_width * num_bins as f64, 0..max_count)?;

    chart
        .configure_mesh()
        .x_desc("Max Drawdown")
        .y_desc("Paths")
        .draw()?;

    chart.draw_series(bins.iter().enumerate().map(|(i, count)| {
        let x0 = min_dd + i as f64 * bin_width;
        Rectangle::new([(x0, 0), (x0 + bin_width, *count)], RED.mix(0.6).filled())
    }))?;

    root.present()?;
    info!(path = output_path, "drawdown distribution saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_every_value() {
        let (min, width, bins) = histogram(&[0.0, 0.1, 0.2, 0.2, 1.0], 5);
        assert_eq!(min, 0.0);
        assert!((width - 0.2).abs() < 1e-12);
        assert_eq!(bins.iter().sum::<usize>(), 5);
        assert_eq!(bins[4], 1);
    }

    #[test]
    fn drawing_failures_become_plot_errors() {
        let err: EngineError = DrawingAreaErrorKind::<std::io::Error>::LayoutError.into();
        assert!(matches!(err, EngineError::Plot(_)));
        assert!(err.to_string().starts_with("Plot error"));
    }

    #[test]
    fn degenerate_histogram_uses_one_bin() {
        let (_, _, bins) = histogram(&[0.0, 0.0, 0.0], 4);
        assert_eq!(bins[0], 3);
    }
}
