//! Reading-order reconstruction from positioned text runs.

use crate::models::config::PdfConfig;

/// A string drawn at a page position, in PDF user space (y grows upwards).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedTextRun {
    pub text: String,
    /// Left edge of the run.
    pub x: f32,
    /// Baseline of the run.
    pub y: f32,
    /// Horizontal extent of the run.
    pub width: f32,
}

impl PositionedTextRun {
    pub fn new(text: impl Into<String>, x: f32, y: f32, width: f32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
        }
    }

    fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// Thresholds used to rebuild lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    /// Runs whose baselines differ by at most this much share a line.
    pub line_tolerance: f32,
    /// A wider horizontal gap gets a space.
    pub space_gap: f32,
    /// A wider horizontal gap gets a tab, keeping columns apart.
    pub column_gap: f32,
}

impl LayoutOptions {
    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            line_tolerance: config.line_tolerance,
            space_gap: config.space_gap,
            column_gap: config.column_gap,
        }
    }
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            line_tolerance: 2.0,
            space_gap: 3.0,
            column_gap: 20.0,
        }
    }
}

/// Rebuild the text of one page, top line first, each line ending in `\n`.
pub fn reconstruct_lines(runs: &[PositionedTextRun], options: &LayoutOptions) -> String {
    let mut ordered: Vec<&PositionedTextRun> = runs.iter().collect();
    ordered.sort_by(|a, b| {
        b.y.total_cmp(&a.y).then_with(|| a.x.total_cmp(&b.x))
    });

    let mut lines: Vec<Vec<&PositionedTextRun>> = Vec::new();
    let mut anchor = f32::NAN;
    for run in ordered {
        match lines.last_mut() {
            Some(line) if (run.y - anchor).abs() <= options.line_tolerance => line.push(run),
            _ => {
                anchor = run.y;
                lines.push(vec![run]);
            }
        }
    }

    let mut text = String::new();
    for mut line in lines {
        line.sort_by(|a, b| a.x.total_cmp(&b.x));

        let mut previous: Option<&PositionedTextRun> = None;
        for run in line {
            if let Some(prev) = previous {
                let gap = run.x - prev.right();
                if gap > options.column_gap {
                    text.push('\t');
                } else if gap > options.space_gap {
                    text.push(' ');
                }
            }
            text.push_str(&run.text);
            previous = Some(run);
        }
        text.push('\n');
    }

    text
}
