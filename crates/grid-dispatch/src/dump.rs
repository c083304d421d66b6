//! Text dump of the three output grids.
//!
//! Each grid is written `x` slab by slab: one line of `z` values per `y`, each
//! value followed by a space, and an empty line after every slab. Grids are
//! separated by [`DELIMITER`] and an empty line.

use crate::error::FatalSetupError;
use crate::grid::{DeviceOutputs, Grid};
use std::{fs, path::Path};
use tracing::debug;

pub const DELIMITER: &str = "***********************************";

/// Formats like C's `%g`: six significant digits, trailing zeros removed,
/// scientific notation outside `1e-4 <= |v| < 1e6`.
pub fn format_value(value: f32) -> String {
    const PRECISION: i32 = 6;

    let v = f64::from(value);
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }

    // The exponent has to be taken after rounding to the target precision.
    let scientific = format!("{v:.prec$e}", prec = (PRECISION - 1) as usize);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..PRECISION).contains(&exponent) {
        let decimals = (PRECISION - 1 - exponent) as usize;
        trim_fraction(&format!("{v:.decimals$}")).to_owned()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.unsigned_abs())
    }
}

fn trim_fraction(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

fn render_grid(text: &mut String, grid: &Grid) {
    let width = grid.extents().width as usize;
    for (row_index, row) in grid.rows().enumerate() {
        for &value in row {
            text.push_str(&format_value(value));
            text.push(' ');
        }
        text.push('\n');
        if (row_index + 1) % width == 0 {
            text.push('\n');
        }
    }
}

pub fn render(outputs: &DeviceOutputs) -> String {
    let mut text = String::new();
    for (n, grid) in outputs.grids().into_iter().enumerate() {
        if n > 0 {
            text.push_str(DELIMITER);
            text.push_str("\n\n");
        }
        render_grid(&mut text, grid);
    }
    text
}

/// Renders `outputs` and writes the file in one go.
pub fn write_file(path: &Path, outputs: &DeviceOutputs) -> Result<(), FatalSetupError> {
    let text = render(outputs);
    fs::write(path, &text).map_err(|source| FatalSetupError::Io {
        tag: "write output".into(),
        path: Some(path.to_path_buf()),
        source,
    })?;
    debug!(path = %path.display(), bytes = text.len(), "wrote grids");
    Ok(())
}
