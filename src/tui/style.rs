//! Color constants and auto-scaling helpers for the TUI.

use ratatui::style::Color;

/// State-of-charge line color.
pub const SOC_LINE: Color = Color::Cyan;
/// Meter line color.
pub const METER_LINE: Color = Color::DarkGray;
/// Fill gauge color when high (>= 50%).
pub const SOC_HIGH: Color = Color::Green;
/// Fill gauge color when medium (>= 20%).
pub const SOC_MID: Color = Color::Yellow;
/// Fill gauge color when low (< 20%).
pub const SOC_LOW: Color = Color::Red;
/// Header bar foreground.
pub const HEADER_FG: Color = Color::White;
/// Header bar background.
pub const HEADER_BG: Color = Color::DarkGray;
/// Footer help text color.
pub const FOOTER_FG: Color = Color::DarkGray;
/// Highlighted table row background.
pub const SELECTED_BG: Color = Color::Blue;

/// Returns a color for a fill fraction in `[0, 1]`.
pub fn soc_color(fill: f64) -> Color {
    if fill >= 0.5 {
        SOC_HIGH
    } else if fill >= 0.2 {
        SOC_MID
    } else {
        SOC_LOW
    }
}

/// Returns a color for a credit value: positive means more charge than
/// accounted for.
pub fn credit_color(credit: f64) -> Color {
    if credit < -1e-6 { SOC_LOW } else { Color::Reset }
}

/// Computes Y-axis bounds from chart data points with 10% padding.
pub fn auto_bounds_y(a: &[(f64, f64)], b: &[(f64, f64)]) -> [f64; 2] {
    let all = a.iter().chain(b.iter()).map(|&(_, y)| y);
    let min = all.clone().fold(f64::INFINITY, f64::min);
    let max = all.fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return [-1.0, 1.0];
    }
    let range = (max - min).max(0.1);
    let pad = range * 0.1;
    [min - pad, max + pad]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_gets_default_bounds() {
        assert_eq!(auto_bounds_y(&[], &[]), [-1.0, 1.0]);
    }

    #[test]
    fn flat_series_is_padded() {
        let [lo, hi] = auto_bounds_y(&[(0.0, 5.0), (1.0, 5.0)], &[]);
        assert!(lo < 5.0 && hi > 5.0);
    }

    #[test]
    fn fill_thresholds() {
        assert_eq!(soc_color(0.9), SOC_HIGH);
        assert_eq!(soc_color(0.3), SOC_MID);
        assert_eq!(soc_color(0.1), SOC_LOW);
    }
}
