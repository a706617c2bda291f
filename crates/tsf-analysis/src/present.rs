//! Tabular rendering of efficiency and scale factor archives.

use std::fmt::Write;

use tsf_core::VariationSet;

fn fmt_value(v: f64) -> String {
    if v.is_nan() { "nan".to_string() } else { format!("{}", v) }
}

/// Per-bin edges of every axis plus the three variations, row-major.
fn rows(set: &VariationSet) -> Vec<(Vec<(f64, f64)>, [f64; 3])> {
    let shape: Vec<usize> = set.axes.iter().map(|a| a.n_bins()).collect();
    let n: usize = shape.iter().product();
    let mut out = Vec::with_capacity(n);
    let mut index = vec![0usize; shape.len()];
    for flat in 0..n {
        let mut rest = flat;
        for (slot, &size) in index.iter_mut().zip(&shape).rev() {
            *slot = rest % size;
            rest /= size;
        }
        let bins = set
            .axes
            .iter()
            .zip(&index)
            .map(|(axis, &i)| (axis.edges[i], axis.edges[i + 1]))
            .collect();
        let values = [set.nominal.as_slice()[flat], set.up.as_slice()[flat], set.down.as_slice()[flat]];
        out.push((bins, values));
    }
    out
}

/// CSV with one row per bin: `<axis>_lo,<axis>_hi` for every axis, then
/// `nominal,up,down`. NaN is written as `nan`.
pub fn to_csv(set: &VariationSet) -> String {
    let mut header: Vec<String> = Vec::new();
    for axis in &set.axes {
        header.push(format!("{}_lo", axis.name));
        header.push(format!("{}_hi", axis.name));
    }
    header.extend(VariationSet::variation_names().iter().map(|s| s.to_string()));

    let mut out = header.join(",");
    out.push('\n');
    for (bins, values) in rows(set) {
        let mut fields: Vec<String> = Vec::with_capacity(bins.len() * 2 + 3);
        for (lo, hi) in bins {
            fields.push(fmt_value(lo));
            fields.push(fmt_value(hi));
        }
        fields.extend(values.iter().map(|&v| fmt_value(v)));
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Fixed-width text table for terminals, with axis titles in the header.
pub fn to_text_table(set: &VariationSet) -> String {
    let mut header: Vec<String> = set.axes.iter().map(|a| a.title.clone()).collect();
    header.extend(VariationSet::variation_names().iter().map(|s| s.to_string()));

    let mut body: Vec<Vec<String>> = Vec::new();
    for (bins, values) in rows(set) {
        let mut line: Vec<String> =
            bins.iter().map(|(lo, hi)| format!("[{}, {})", lo, hi)).collect();
        line.extend(values.iter().map(|&v| {
            if v.is_nan() { "nan".to_string() } else { format!("{:.4}", v) }
        }));
        body.push(line);
    }

    let widths: Vec<usize> = (0..header.len())
        .map(|c| {
            body.iter().map(|l| l[c].len()).chain(std::iter::once(header[c].len())).max().unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for line in std::iter::once(&header).chain(body.iter()) {
        let cells: Vec<String> =
            line.iter().zip(&widths).map(|(cell, &w)| format!("{:>w$}", cell, w = w)).collect();
        let _ = writeln!(out, "{}", cells.join("  ").trim_end());
    }
    out
}
