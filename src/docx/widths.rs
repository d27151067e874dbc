//! Conservative table-width repair: align `w:tcW` with the grid it spans.
//!
//! Only existing `dxa` (or untyped) cell widths of top-level tables are touched. Percentage
//! and auto widths, cells without `w:tcW`, spans running past the grid, and nested tables are
//! left alone. No element is ever created.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::docx::package::{DocxPackage, DOCUMENT};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::vocab::W;
use crate::docx::xml::{parse_part, write_tree};

/// Relative difference above which a cell width is rewritten.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

pub fn fix_table_widths(tree: &mut XmlTree, tolerance: f64) -> usize {
    let Some(root) = tree.root() else {
        return 0;
    };
    let mut fixes = 0;
    for tbl in tree.find_all(root, W, "tbl") {
        if is_nested(tree, tbl) {
            debug!("skipping nested table");
            continue;
        }
        let Some(grid) = grid_widths(tree, tbl) else {
            continue;
        };
        for tr in tree.find_children(tbl, W, "tr") {
            fixes += fix_row(tree, tr, &grid, tolerance);
        }
    }
    fixes
}

fn is_nested(tree: &XmlTree, tbl: NodeId) -> bool {
    tree.ancestors(tbl).any(|a| tree.is(a, W, "tbl"))
}

/// Integer `w:gridCol/@w:w` values; `None` if the grid is missing, empty or malformed.
pub(crate) fn grid_widths(tree: &XmlTree, tbl: NodeId) -> Option<Vec<i64>> {
    let grid = tree.find_child(tbl, W, "tblGrid")?;
    let cols = tree.find_children(grid, W, "gridCol");
    if cols.is_empty() {
        return None;
    }
    cols.into_iter()
        .map(|c| tree.ns_attr(c, W, "w")?.trim().parse::<i64>().ok())
        .collect()
}

fn fix_row(tree: &mut XmlTree, tr: NodeId, grid: &[i64], tolerance: f64) -> usize {
    let mut fixes = 0;
    let mut col = 0usize;
    for tc in tree.find_children(tr, W, "tc") {
        if col >= grid.len() {
            break;
        }
        let Some(tc_pr) = tree.find_child(tc, W, "tcPr") else {
            col += 1;
            continue;
        };
        let Some(tc_w) = tree.find_child(tc_pr, W, "tcW") else {
            col += 1;
            continue;
        };
        if !matches!(tree.ns_attr(tc_w, W, "type"), None | Some("dxa") | Some("")) {
            col += 1;
            continue;
        }
        let span = tree
            .find_child(tc_pr, W, "gridSpan")
            .and_then(|g| tree.ns_attr(g, W, "val"))
            .map_or(Some(1), |v| v.trim().parse::<usize>().ok());
        let Some(span) = span.filter(|s| *s > 0) else {
            debug!(col, "skipping cell with malformed gridSpan");
            col += 1;
            continue;
        };
        // A span running past the grid leaves the rest of the row unaligned.
        let Some(end) = col.checked_add(span).filter(|e| *e <= grid.len()) else {
            break;
        };
        let expected = grid[col..end].iter().try_fold(0i64, |acc, w| acc.checked_add(*w));
        let current = tree
            .ns_attr(tc_w, W, "w")
            .and_then(|v| v.trim().parse::<i64>().ok());
        if let (Some(current), Some(expected)) = (current, expected) {
            if expected > 0 && current.abs_diff(expected) as f64 > expected as f64 * tolerance {
                tree.set_ns_attr(tc_w, W, "w", expected.to_string());
                fixes += 1;
            }
        }
        col = end;
    }
    fixes
}

/// Fix cell widths of the main document at `input`, writing to `output` only when something
/// changed. Returns the number of rewritten cells.
pub fn fix_file(input: &Path, output: &Path, tolerance: f64) -> anyhow::Result<usize> {
    let mut pkg = DocxPackage::read(input)?;
    let bytes = pkg
        .part(DOCUMENT)
        .with_context(|| format!("missing part: {DOCUMENT}"))?;
    let mut tree = parse_part(DOCUMENT, bytes).with_context(|| format!("parse part: {DOCUMENT}"))?;
    let fixes = fix_table_widths(&mut tree, tolerance);
    if fixes > 0 {
        pkg.set_part(DOCUMENT, write_tree(&tree));
        pkg.write(output)?;
        info!(fixes, output = %output.display(), "fixed table widths");
    } else if input != output {
        std::fs::copy(input, output)
            .with_context(|| format!("copy {} -> {}", input.display(), output.display()))?;
    }
    Ok(fixes)
}
