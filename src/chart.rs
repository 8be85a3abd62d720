//! PNG bar charts of VIS rankings.

use anyhow::{Result, anyhow};
use plotters::prelude::*;
use plotters::style::{FontStyle, FontTransform, register_font};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

const FONT_FAMILY: &str = "sans-serif";

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT_READY: OnceLock<bool> = OnceLock::new();

/// Registers a TrueType font for labels once per process. Returns whether one
/// is available.
fn ensure_font(configured: Option<&Path>) -> bool {
    *FONT_READY.get_or_init(|| {
        let candidates = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            // plotters keeps a 'static reference to the font data.
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                return true;
            }
        }
        warn!("no usable TrueType font found; charts will be drawn without labels");
        false
    })
}

/// Draws one bar per entry, in the given order.
pub fn render_bar_chart(
    path: &Path,
    title: &str,
    y_label: &str,
    entries: &[(String, f64)],
    font: Option<&Path>,
) -> Result<()> {
    let labelled = ensure_font(font);

    let root = BitMapBackend::new(path, (1200, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("chart fill failed: {e}"))?;

    let values = || entries.iter().map(|(_, v)| *v).filter(|v| v.is_finite());
    let y_max = values().fold(0.0_f64, f64::max);
    let y_min = values().fold(0.0_f64, f64::min);
    let y_top = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let mut builder = ChartBuilder::on(&root);
    builder
        .margin(20)
        .x_label_area_size(if labelled { 260 } else { 10 })
        .y_label_area_size(if labelled { 80 } else { 10 });
    if labelled {
        builder.caption(title, (FONT_FAMILY, 28));
    }

    let mut chart = builder
        .build_cartesian_2d((0..entries.len()).into_segmented(), y_min..y_top)
        .map_err(|e| anyhow!("chart layout failed: {e}"))?;

    if labelled {
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(entries.len())
            .x_label_formatter(&|v| match v {
                SegmentValue::CenterOf(i) => entries.get(*i).map(|(n, _)| n.clone()).unwrap_or_default(),
                _ => String::new(),
            })
            .x_label_style(
                (FONT_FAMILY, 13)
                    .into_font()
                    .transform(FontTransform::Rotate90),
            )
            .x_desc("Company Name")
            .y_desc(y_label)
            .draw()
            .map_err(|e| anyhow!("chart axes failed: {e}"))?;
    }

    let sky_blue = RGBColor(135, 206, 235);
    chart
        .draw_series(
            Histogram::vertical(&chart)
                .style(sky_blue.filled())
                .margin(4)
                .data(
                    entries
                        .iter()
                        .enumerate()
                        .filter(|(_, (_, v))| v.is_finite())
                        .map(|(i, (_, v))| (i, *v)),
                ),
        )
        .map_err(|e| anyhow!("chart bars failed: {e}"))?;

    root.present()
        .map_err(|e| anyhow!("failed to write {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn writes_png_and_skips_unscored_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("30_least_volatile_stocks.png");
        let entries = vec![
            ("Calm Holdings".to_string(), 0.12),
            ("Ghost Ltd".to_string(), f64::NAN),
            ("Wild Industries".to_string(), 0.87),
        ];

        render_bar_chart(
            &path,
            "30 Least Volatile Companies (VIS)",
            "VIS",
            &entries,
            Some(&tmp.path().join("no-such-font.ttf")),
        )
        .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn unwritable_target_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing/chart.png");
        let entries = vec![("Calm Holdings".to_string(), 0.12)];
        assert!(render_bar_chart(&path, "VIS", "VIS", &entries, None).is_err());
    }
}
