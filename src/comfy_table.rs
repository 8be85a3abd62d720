use crate::cumulative_price_change::MoverRow;
use crate::indicators::{IndicatorBar, IndicatorFrame};
use crate::volatility::TrendDirection;
use crate::volatility_screen::VolatilityRow;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

pub const TAIL_ROWS: usize = 10;

/// Dims smaller values relative to the largest one, never below 40%.
fn visibility_ratio(current: f64, top: f64) -> f64 {
    if !current.is_finite() || !top.is_finite() || top == 0.0 {
        return 0.4;
    }
    (0.4 + 0.6 * (current / top)).clamp(0.4, 1.0)
}

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn number(value: f64, decimals: usize) -> Cell {
    let text = if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{:.*}", decimals, value)
    };
    Cell::new(text).set_alignment(CellAlignment::Right)
}

fn shade(r: f64, g: f64, b: f64, ratio: f64) -> Color {
    Color::Rgb {
        r: (r * ratio) as u8,
        g: (g * ratio) as u8,
        b: (b * ratio) as u8,
    }
}

pub fn print_movers(rows: &[MoverRow]) {
    if rows.is_empty() {
        println!("No data found.");
        return;
    }

    let mut table = base_table(&["Rank", "Symbol", "Start Date", "Period", "Percentage Change"]);
    let top = rows
        .iter()
        .map(|r| r.percentage_change.abs())
        .fold(0.0_f64, f64::max);

    for (rank, row) in rows.iter().enumerate() {
        let ratio = visibility_ratio(row.percentage_change.abs(), top);
        let pct_color = if row.percentage_change < 0.0 {
            shade(255.0, 0.0, 0.0, ratio)
        } else {
            shade(0.0, 255.0, 0.0, ratio)
        };
        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(&row.symbol).fg(shade(0.0, 255.0, 255.0, ratio)),
            Cell::new(row.start_date),
            Cell::new(&row.period).fg(shade(150.0, 150.0, 150.0, ratio)),
            Cell::new(format!("{:.2}%", row.percentage_change))
                .fg(pct_color)
                .set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\n{}", table);
}

pub fn print_volatility(rows: &[VolatilityRow]) {
    if rows.is_empty() {
        println!("No data found.");
        return;
    }

    let mut table = base_table(&["Rank", "Company Name", "VIS", "Trend"]);
    let top = rows
        .iter()
        .map(|r| r.vis)
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);

    for (rank, row) in rows.iter().enumerate() {
        let ratio = visibility_ratio(row.vis, top);
        let trend_color = match row.trend {
            TrendDirection::Up => Color::Green,
            TrendDirection::Down => Color::Red,
            TrendDirection::Flat => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(&row.company_name).fg(shade(0.0, 255.0, 255.0, ratio)),
            number(row.vis, 6).fg(shade(255.0, 200.0, 0.0, ratio)),
            Cell::new(row.trend).fg(trend_color),
        ]);
    }

    println!(
        "\n(VIS from {} to {})\n{}",
        rows[0].start_date, rows[0].end_date, table
    );
}

/// Last `TAIL_ROWS` rows of the indicator columns.
fn indicator_tail_table(frame: &IndicatorFrame) -> Table {
    let mut table = base_table(&[
        "Date", "Close", "SMA 20", "SMA 50", "EMA 20", "EMA 50", "Upper Band", "Middle Band",
        "Lower Band", "RSI", "MACD", "Signal", "ATR", "OBV", "+DI", "-DI", "ADX",
    ]);

    let start = frame.rows.len().saturating_sub(TAIL_ROWS);
    for row in &frame.rows[start..] {
        table.add_row(vec![
            Cell::new(row.bar.timestamp.format("%Y-%m-%d")),
            number(row.bar.close, 2),
            number(row.sma_20, 2),
            number(row.sma_50, 2),
            number(row.ema_20, 2),
            number(row.ema_50, 2),
            number(row.upper_band, 2),
            number(row.middle_band, 2),
            number(row.lower_band, 2),
            number(row.rsi, 2),
            number(row.macd, 3),
            number(row.signal_line, 3),
            number(row.atr, 2),
            number(row.obv, 0),
            number(row.plus_di, 2),
            number(row.minus_di, 2),
            number(row.adx, 2),
        ]);
    }
    table
}

pub fn print_indicator_tail(frame: &IndicatorFrame) {
    println!("\n{}", indicator_tail_table(frame));
}

pub fn print_levels(row: &IndicatorBar) {
    let mut table = base_table(&["Level", "Value"]);
    let p = &row.pivot;
    let levels = [
        ("R3", p.r3, Color::Green),
        ("R2", p.r2, Color::Green),
        ("R1", p.r1, Color::Green),
        ("Pivot", p.pivot, Color::Yellow),
        ("S1", p.s1, Color::Red),
        ("S2", p.s2, Color::Red),
        ("S3", p.s3, Color::Red),
        ("Swing High", row.swing_high, Color::Cyan),
        ("Swing Low", row.swing_low, Color::Cyan),
        ("ATR", row.atr, Color::DarkGrey),
    ];
    for (name, value, color) in levels {
        table.add_row(vec![Cell::new(name).fg(color), number(value, 2)]);
    }

    println!(
        "\n(Levels as of {})\n{}",
        row.bar.timestamp.format("%Y-%m-%d"),
        table
    );
}
