//! Protocol tables.
//!
//! Two on-disk forms are supported:
//!
//! - `.prtcl` tables: one header line starting with `#` that names the columns
//!   (comma separated), then one whitespace/tab separated row per volume
//! - FSL `bval`/`bvec` pairs (b in s/mm², directions as 3 × M or M × 3)
//!
//! All values are SI inside the crate. When a table has no `b` column but
//! carries `G`, `Delta` and `delta`, b is computed from the Stejskal–Tanner
//! relation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{Protocol, ProtocolRow};
use crate::error::{Error, Result};

/// Gyromagnetic ratio of ¹H, rad s⁻¹ T⁻¹.
pub const GYROMAGNETIC_RATIO: f64 = 267.513e6;

/// FSL b-values are in s/mm²; we work in s/m².
const FSL_B_TO_SI: f64 = 1e6;

/// Load a protocol from a `.prtcl` table.
pub fn load_protocol(path: &Path) -> Result<Protocol> {
    let text = fs::read_to_string(path).map_err(|e| Error::io("failed to read protocol", path, e))?;
    parse_protocol(&text, path)
}

/// Parse `.prtcl` text; `path` is only used in error messages.
pub fn parse_protocol(text: &str, path: &Path) -> Result<Protocol> {
    let err = |line: usize, message: String| Error::Protocol {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| err(1, "empty protocol file".into()))?;
    let Some(header) = header.strip_prefix('#') else {
        return Err(err(header_line, "expected a '#' header naming the columns".into()));
    };
    let columns = header_map(&read_header(header).map_err(|e| err(header_line, e))?);

    for required in ["gx", "gy", "gz"] {
        if !columns.contains_key(required) {
            return Err(err(header_line, format!("missing required column `{required}`")));
        }
    }
    let has_b = columns.contains_key("b");
    if !has_b && !["G", "Delta", "delta"].iter().all(|c| columns.contains_key(*c)) {
        return Err(err(
            header_line,
            "missing column `b` (or `G`, `Delta` and `delta` to compute it)".into(),
        ));
    }

    // Data rows: collapse whitespace runs to tabs so the csv reader sees one
    // delimiter, and keep original line numbers for errors.
    let data: Vec<(usize, String)> = lines
        .filter(|(_, l)| !l.starts_with('#'))
        .map(|(n, l)| (n, l.split_whitespace().collect::<Vec<_>>().join("\t")))
        .collect();
    let joined = data.iter().map(|(_, l)| l.as_str()).collect::<Vec<_>>().join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(joined.as_bytes());

    let mut rows = Vec::with_capacity(data.len());
    for (record, (line, _)) in reader.records().zip(&data) {
        let record = record.map_err(|e| err(*line, format!("parse error: {e}")))?;
        if record.len() != columns.len() {
            return Err(err(
                *line,
                format!("expected {} values, found {}", columns.len(), record.len()),
            ));
        }
        rows.push(parse_row(&record, &columns, has_b).map_err(|m| err(*line, m))?);
    }
    Ok(Protocol::new(rows))
}

fn read_header(header: &str) -> std::result::Result<StringRecord, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(header.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) if !record.is_empty() => Ok(record),
        Some(Err(e)) => Err(format!("invalid header: {e}")),
        _ => Err("header names no columns".into()),
    }
}

/// Column name → index. Names are case-sensitive (`Delta` and `delta`
/// differ) except for the gradient and `b` columns.
fn header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let name = name.trim().trim_start_matches('\u{feff}');
            let lower = name.to_ascii_lowercase();
            let canonical = if matches!(lower.as_str(), "gx" | "gy" | "gz" | "b") {
                lower
            } else {
                name.to_string()
            };
            (canonical, idx)
        })
        .collect()
}

fn parse_row(record: &StringRecord, columns: &HashMap<String, usize>, has_b: bool) -> std::result::Result<ProtocolRow, String> {
    let value = |name: &str| -> std::result::Result<Option<f64>, String> {
        let Some(&idx) = columns.get(name) else {
            return Ok(None);
        };
        let cell = record.get(idx).unwrap_or("").trim();
        cell.parse::<f64>()
            .map(Some)
            .map_err(|_| format!("column `{name}`: '{cell}' is not a number"))
    };
    let required = |name: &str| -> std::result::Result<f64, String> {
        value(name)?.ok_or_else(|| format!("missing column `{name}`"))
    };

    let g = [required("gx")?, required("gy")?, required("gz")?];
    let big_delta = value("Delta")?;
    let delta = value("delta")?;
    let gradient_amplitude = value("G")?;
    let b = if has_b {
        required("b")?
    } else {
        match (gradient_amplitude, big_delta, delta) {
            (Some(g_amp), Some(big), Some(small)) => stejskal_tanner_b(g_amp, big, small),
            _ => return Err("cannot compute b without `G`, `Delta` and `delta`".into()),
        }
    };

    Ok(ProtocolRow {
        g,
        b,
        big_delta,
        delta,
        gradient_amplitude,
        te: value("TE")?,
        tr: value("TR")?,
    })
}

/// `b = (γ G δ)² (Δ - δ/3)` in s/m².
pub fn stejskal_tanner_b(gradient_amplitude: f64, big_delta: f64, delta: f64) -> f64 {
    (GYROMAGNETIC_RATIO * gradient_amplitude * delta).powi(2) * (big_delta - delta / 3.0)
}

/// Load an FSL `bvec`/`bval` pair.
pub fn load_bvec_bval(bvec_path: &Path, bval_path: &Path) -> Result<Protocol> {
    let read = |path: &Path| -> Result<Vec<Vec<f64>>> {
        let text = fs::read_to_string(path).map_err(|e| Error::io("failed to read gradient table", path, e))?;
        text.lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| {
                l.split_whitespace()
                    .map(|cell| {
                        cell.parse::<f64>().map_err(|_| Error::Protocol {
                            path: path.to_path_buf(),
                            line: i + 1,
                            message: format!("'{cell}' is not a number"),
                        })
                    })
                    .collect()
            })
            .collect()
    };

    let bvals: Vec<f64> = read(bval_path)?.into_iter().flatten().collect();
    let bvecs = read(bvec_path)?;
    let m = bvals.len();

    let directions: Vec<[f64; 3]> = if bvecs.len() == 3 && bvecs.iter().all(|r| r.len() == m) {
        (0..m).map(|j| [bvecs[0][j], bvecs[1][j], bvecs[2][j]]).collect()
    } else if bvecs.len() == m && bvecs.iter().all(|r| r.len() == 3) {
        bvecs.iter().map(|r| [r[0], r[1], r[2]]).collect()
    } else {
        return Err(Error::Protocol {
            path: bvec_path.to_path_buf(),
            line: 1,
            message: format!("expected 3 × {m} or {m} × 3 gradient directions"),
        });
    };

    Ok(Protocol::new(
        directions
            .into_iter()
            .zip(bvals)
            .map(|(g, b)| ProtocolRow::new(g, b * FSL_B_TO_SI))
            .collect(),
    ))
}

/// Write `protocol` as a `.prtcl` table readable by [`load_protocol`].
pub fn write_protocol(path: &Path, protocol: &Protocol) -> Result<()> {
    let mut out = String::from("#gx,gy,gz,b\n");
    for row in protocol.rows() {
        out.push_str(&format!("{:e}\t{:e}\t{:e}\t{:e}\n", row.g[0], row.g[1], row.g[2], row.b));
    }
    fs::write(path, out).map_err(|e| Error::io("failed to write protocol", path, e))
}
