//! Business-rule validator: checks the schema itself cannot express.
//!
//! Everything here is read-only. Findings are data, never errors.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::docx::image::image_dimensions;
use crate::docx::package::{DocxPackage, DOCUMENT, DOCUMENT_RELS};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::vocab::{A, PKG_RELS, R, W, W14, WP};
use crate::docx::widths::grid_widths;
use crate::docx::xml::parse_part;

/// Access to raw parts by name, from a zip in memory or an unpacked directory.
pub trait PartSource {
    fn read_part(&self, name: &str) -> Option<Cow<'_, [u8]>>;

    fn has_part(&self, name: &str) -> bool {
        self.read_part(name).is_some()
    }
}

impl PartSource for DocxPackage {
    fn read_part(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        self.part(name).map(Cow::Borrowed)
    }
}

impl PartSource for Path {
    fn read_part(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        std::fs::read(self.join(name)).ok().map(Cow::Owned)
    }

    fn has_part(&self, name: &str) -> bool {
        self.join(name).is_file()
    }
}

fn parse_source(parts: &(impl PartSource + ?Sized), name: &str) -> Option<XmlTree> {
    let bytes = parts.read_part(name)?;
    match parse_part(name, &bytes) {
        Ok(t) => Some(t),
        Err(e) => {
            debug!(part = name, error = %e, "unreadable part skipped");
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuleSettings {
    /// Allowed relative difference between a cell width and its grid column.
    pub width_tolerance: f64,
    /// Allowed relative difference between display and intrinsic aspect ratios.
    pub aspect_tolerance: f64,
    /// Margins below this (twips) on all four sides count as zero.
    pub min_margin_twips: i64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            width_tolerance: 0.05,
            aspect_tolerance: 0.05,
            min_margin_twips: 360,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Grid presence and first-row cell/grid width agreement for every table.
pub fn check_table_grid(doc: &XmlTree, settings: &RuleSettings) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = doc.root() else {
        return errors;
    };
    for (n, tbl) in doc.find_all(root, W, "tbl").into_iter().enumerate() {
        let n = n + 1;
        if doc.find_child(tbl, W, "tblGrid").is_none() {
            errors.push(format!("TABLE[{n}]: missing tblGrid (required for proper rendering)"));
            continue;
        }
        let grid: Vec<Option<i64>> = match grid_widths(doc, tbl) {
            Some(all) => all.into_iter().map(Some).collect(),
            None => doc
                .find_child(tbl, W, "tblGrid")
                .map(|g| {
                    doc.find_children(g, W, "gridCol")
                        .into_iter()
                        .map(|c| doc.ns_attr(c, W, "w").and_then(|v| v.trim().parse().ok()))
                        .collect()
                })
                .unwrap_or_default(),
        };
        let Some(first_row) = doc.find_child(tbl, W, "tr") else {
            continue;
        };
        for (col, (tc, grid_w)) in doc.find_children(first_row, W, "tc").into_iter().zip(grid).enumerate() {
            let Some(grid_w) = grid_w.filter(|g| *g != 0) else {
                continue;
            };
            let Some(tc_w) = doc
                .find_child(tc, W, "tcPr")
                .and_then(|p| doc.find_child(p, W, "tcW"))
            else {
                continue;
            };
            if matches!(doc.ns_attr(tc_w, W, "type"), Some("pct") | Some("auto") | Some("nil")) {
                continue;
            }
            let Some(width) = doc.ns_attr(tc_w, W, "w").and_then(|v| v.trim().parse::<i64>().ok()) else {
                continue;
            };
            if width.abs_diff(grid_w) as f64 > grid_w as f64 * settings.width_tolerance {
                errors.push(format!(
                    "TABLE[{n}]: gridCol[{col}].w={grid_w} != tc[{col}].tcW={width} (will skew)"
                ));
            }
        }
    }
    errors
}

/// Relationship id to package part name for `word/document.xml`.
pub fn document_relationships(parts: &(impl PartSource + ?Sized)) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(rels) = parse_source(parts, DOCUMENT_RELS) else {
        return map;
    };
    let Some(root) = rels.root() else {
        return map;
    };
    for rel in rels.find_all(root, PKG_RELS, "Relationship") {
        if rels.attr(rel, "TargetMode") == Some("External") {
            continue;
        }
        if let (Some(id), Some(target)) = (rels.attr(rel, "Id"), rels.attr(rel, "Target")) {
            map.insert(id.to_string(), resolve_target("word", target));
        }
    }
    map
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("{base_dir}/{target}"),
    };
    let mut segs: Vec<&str> = Vec::new();
    for s in joined.split('/') {
        match s {
            "" | "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    segs.join("/")
}

/// Display extent vs. intrinsic pixel ratio for every embedded picture.
pub fn check_image_aspect(doc: &XmlTree, parts: &(impl PartSource + ?Sized), settings: &RuleSettings) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = doc.root() else {
        return errors;
    };
    let rels = document_relationships(parts);
    for (i, drawing) in doc.find_all(root, W, "drawing").into_iter().enumerate() {
        let i = i + 1;
        let Some(extent) = doc.find_first(drawing, WP, "extent") else { continue };
        let (Some(cx), Some(cy)) = (
            doc.attr(extent, "cx").and_then(|v| v.trim().parse::<i64>().ok()),
            doc.attr(extent, "cy").and_then(|v| v.trim().parse::<i64>().ok()),
        ) else {
            continue;
        };
        if cy == 0 {
            continue;
        }
        let Some(blip) = doc.find_first(drawing, A, "blip") else { continue };
        let Some(target) = doc.ns_attr(blip, R, "embed").and_then(|id| rels.get(id)) else {
            continue;
        };
        let Some(data) = parts.read_part(target) else { continue };
        let Some((w, h)) = image_dimensions(&data) else { continue };
        if h == 0 || w == 0 {
            continue;
        }
        let display = cx as f64 / cy as f64;
        let actual = f64::from(w) / f64::from(h);
        if (display - actual).abs() / actual > settings.aspect_tolerance {
            let file = target.rsplit('/').next().unwrap_or(target);
            errors.push(format!(
                "IMAGE[{i}] {file}: display={display:.2} != actual={actual:.2} (distorted)"
            ));
        }
    }
    errors
}

/// Threaded comments need their companion parts; anchors need a comment entry.
pub fn check_comments_integrity(doc: &XmlTree, parts: &(impl PartSource + ?Sized)) -> Vec<String> {
    let mut errors = Vec::new();
    let comments = parse_source(parts, "word/comments.xml");

    let mut known: BTreeSet<String> = BTreeSet::new();
    if let Some(c) = &comments {
        if let Some(root) = c.root() {
            let entries = c.find_all(root, W, "comment");
            let threaded = entries.iter().any(|e| {
                c.find_child(*e, W, "p")
                    .is_some_and(|p| c.ns_attr(p, W14, "paraId").is_some())
            });
            if threaded {
                if !parts.has_part("word/commentsExtended.xml") {
                    errors.push("COMMENTS: has threaded replies but missing commentsExtended.xml".to_string());
                }
                if !parts.has_part("word/commentsIds.xml") {
                    errors.push("COMMENTS: has threaded replies but missing commentsIds.xml".to_string());
                }
            }
            known.extend(entries.iter().filter_map(|e| c.ns_attr(*e, W, "id").map(str::to_string)));
        }
    }

    if let Some(root) = doc.root() {
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        for local in ["commentRangeStart", "commentRangeEnd", "commentReference"] {
            for a in doc.find_all(root, W, local) {
                if let Some(id) = doc.ns_attr(a, W, "id") {
                    referenced.insert(id.to_string());
                }
            }
        }
        for id in referenced.difference(&known) {
            errors.push(format!("COMMENTS: anchor references missing comment id={id}"));
        }
    }
    errors
}

fn section_properties(doc: &XmlTree) -> Vec<(NodeId, bool)> {
    let Some(body) = doc.root().and_then(|r| doc.find_first(r, W, "body")) else {
        return Vec::new();
    };
    let mut out: Vec<(NodeId, bool)> = doc
        .find_all(body, W, "p")
        .into_iter()
        .filter_map(|p| doc.find_child(p, W, "pPr"))
        .filter_map(|ppr| doc.find_child(ppr, W, "sectPr"))
        .map(|s| (s, false))
        .collect();
    if let Some(last) = doc.find_child(body, W, "sectPr") {
        out.push((last, true));
    }
    out
}

/// Zero-margin sections. Single-section documents and the first section are exempt.
pub fn check_section_margins(doc: &XmlTree, settings: &RuleSettings) -> Vec<String> {
    let mut warnings = Vec::new();
    let sections = section_properties(doc);
    if sections.len() < 2 {
        return warnings;
    }
    for (idx, (sect, is_final)) in sections.iter().enumerate() {
        let Some(pg_mar) = doc.find_child(*sect, W, "pgMar") else { continue };
        let side = |name: &str| -> Option<i64> {
            match doc.ns_attr(pg_mar, W, name) {
                Some(v) => v.trim().parse::<i64>().ok().map(i64::saturating_abs),
                None => Some(1440),
            }
        };
        let (Some(top), Some(bottom), Some(left), Some(right)) =
            (side("top"), side("bottom"), side("left"), side("right"))
        else {
            continue;
        };
        let min = settings.min_margin_twips;
        if !(top < min && bottom < min && left < min && right < min) {
            continue;
        }
        let is_first = idx == 0;
        let is_last = idx == sections.len() - 1 && *is_final;
        if is_last && sections.len() > 2 {
            warnings.push(
                "MARGIN: final section has zero margins - may affect body content if intermediate sections lack sectPr"
                    .to_string(),
            );
        } else if !is_first && !is_last {
            warnings.push(format!(
                "MARGIN: section[{}] has zero margins (top={top}, left={left}) - body content may touch page edges",
                idx + 1
            ));
        }
    }
    warnings
}

/// A table of contents without `w:updateFields` stays stale until refreshed by hand.
pub fn check_settings(doc: &XmlTree, parts: &(impl PartSource + ?Sized)) -> Vec<String> {
    let Some(settings) = parse_source(parts, "word/settings.xml") else {
        return Vec::new();
    };
    let Some(root) = doc.root() else {
        return Vec::new();
    };
    let has_toc = doc
        .find_all(root, W, "instrText")
        .into_iter()
        .any(|t| doc.text(t).contains("TOC"))
        || doc
            .find_all(root, W, "fldSimple")
            .into_iter()
            .any(|f| doc.ns_attr(f, W, "instr").is_some_and(|i| i.contains("TOC")));
    let update_fields = settings
        .root()
        .is_some_and(|r| !settings.find_all(r, W, "updateFields").is_empty());
    if has_toc && !update_fields {
        vec!["TOC: consider adding <w:updateFields w:val=\"true\"/> in settings.xml for auto-update".to_string()]
    } else {
        Vec::new()
    }
}

/// All checks against a parsed main document.
pub fn validate_document(doc: &XmlTree, parts: &(impl PartSource + ?Sized), settings: &RuleSettings) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.errors.extend(check_table_grid(doc, settings));
    report.errors.extend(check_image_aspect(doc, parts, settings));
    report.errors.extend(check_comments_integrity(doc, parts));
    report.warnings.extend(check_section_margins(doc, settings));
    report.warnings.extend(check_settings(doc, parts));
    report
}

/// Validate a package on disk. Structural problems become findings rather than failures.
pub fn validate_file(path: &Path, settings: &RuleSettings) -> ValidationReport {
    let pkg = match DocxPackage::read(path) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %format!("{e:#}"), "package unreadable");
            return ValidationReport {
                errors: vec!["STRUCTURE: File corrupted or not valid docx".to_string()],
                warnings: Vec::new(),
            };
        }
    };
    let Some(bytes) = pkg.part(DOCUMENT) else {
        return ValidationReport {
            errors: vec!["STRUCTURE: word/document.xml missing".to_string()],
            warnings: Vec::new(),
        };
    };
    match parse_part(DOCUMENT, bytes) {
        Ok(doc) => validate_document(&doc, &pkg, settings),
        Err(e) => ValidationReport {
            errors: vec![format!("PARSE: {e}")],
            warnings: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::image::png_header;
    use crate::docx::package::fixture;
    use crate::docx::xml::parse_str;

    fn doc(body: &str) -> XmlTree {
        parse_str(DOCUMENT, &fixture::document(body))
    }

    fn empty_source() -> DocxPackage {
        DocxPackage { entries: Vec::new() }
    }

    #[test]
    fn skewed_first_row_reports_one_defect() {
        let tree = doc(
            r#"<w:tbl><w:tblGrid><w:gridCol w:w="5000"/></w:tblGrid><w:tr><w:tc><w:tcPr><w:tcW w:w="4000" w:type="dxa"/></w:tcPr><w:p/></w:tc></w:tr></w:tbl>"#,
        );
        let errors = check_table_grid(&tree, &RuleSettings::default());
        assert_eq!(errors, vec!["TABLE[1]: gridCol[0].w=5000 != tc[0].tcW=4000 (will skew)"]);
    }

    #[test]
    fn missing_grid_is_structural() {
        let tree = doc(r#"<w:p/><w:tbl><w:tr><w:tc><w:p/></w:tc></w:tr></w:tbl>"#);
        let errors = check_table_grid(&tree, &RuleSettings::default());
        assert_eq!(errors, vec!["TABLE[1]: missing tblGrid (required for proper rendering)"]);
    }

    #[test]
    fn percentage_widths_are_not_skew() {
        let tree = doc(
            r#"<w:tbl><w:tblGrid><w:gridCol w:w="5000"/></w:tblGrid><w:tr><w:tc><w:tcPr><w:tcW w:w="2500" w:type="pct"/></w:tcPr><w:p/></w:tc></w:tr></w:tbl>"#,
        );
        assert!(check_table_grid(&tree, &RuleSettings::default()).is_empty());
    }

    #[test]
    fn extreme_widths_are_reported_not_fatal() {
        let tree = doc(
            r#"<w:tbl><w:tblGrid><w:gridCol w:w="9223372036854775807"/><w:gridCol w:w="5000"/></w:tblGrid><w:tr><w:tc><w:tcPr><w:tcW w:w="-9223372036854775808"/></w:tcPr><w:p/></w:tc><w:tc><w:tcPr><w:tcW w:w="-9223372036854775808"/></w:tcPr><w:p/></w:tc></w:tr></w:tbl>"#,
        );
        let errors = check_table_grid(&tree, &RuleSettings::default());
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("tcW=-9223372036854775808"));
    }

    const DRAWING: &str = r#"<w:p><w:r><w:drawing><wp:inline><wp:extent cx="200" cy="100"/><a:graphic><a:graphicData><pic:pic><pic:blipFill><a:blip r:embed="rId9"/></pic:blipFill></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#;

    fn image_package(png: Vec<u8>) -> DocxPackage {
        let rels = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/></Relationships>"#;
        let mut pkg = empty_source();
        pkg.set_part(DOCUMENT_RELS, rels.as_bytes().to_vec());
        pkg.set_part("word/media/image1.png", png);
        pkg
    }

    #[test]
    fn distorted_image_is_reported() {
        let tree = doc(DRAWING);
        let pkg = image_package(png_header(100, 100));
        let errors = check_image_aspect(&tree, &pkg, &RuleSettings::default());
        assert_eq!(errors, vec!["IMAGE[1] image1.png: display=2.00 != actual=1.00 (distorted)"]);
    }

    #[test]
    fn proportional_or_unresolvable_images_pass() {
        let tree = doc(DRAWING);
        let pkg = image_package(png_header(400, 200));
        assert!(check_image_aspect(&tree, &pkg, &RuleSettings::default()).is_empty());
        assert!(check_image_aspect(&tree, &empty_source(), &RuleSettings::default()).is_empty());
        let pkg = image_package(b"not an image".to_vec());
        assert!(check_image_aspect(&tree, &pkg, &RuleSettings::default()).is_empty());
    }

    #[test]
    fn threaded_comments_need_companion_parts() {
        let comments = r#"<w:comments xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:w14="http://schemas.microsoft.com/office/word/2010/wordml"><w:comment w:id="0"><w:p w14:paraId="1A2B3C4D"/></w:comment></w:comments>"#;
        let mut pkg = empty_source();
        pkg.set_part("word/comments.xml", comments.as_bytes().to_vec());
        let tree = doc(r#"<w:p><w:commentRangeStart w:id="0"/><w:commentRangeEnd w:id="0"/></w:p>"#);
        let errors = check_comments_integrity(&tree, &pkg);
        assert_eq!(
            errors,
            vec![
                "COMMENTS: has threaded replies but missing commentsExtended.xml",
                "COMMENTS: has threaded replies but missing commentsIds.xml",
            ]
        );
    }

    #[test]
    fn dangling_anchor_is_reported() {
        let tree = doc(r#"<w:p><w:commentRangeStart w:id="3"/><w:commentRangeEnd w:id="3"/></w:p>"#);
        let errors = check_comments_integrity(&tree, &empty_source());
        assert_eq!(errors, vec!["COMMENTS: anchor references missing comment id=3"]);
    }

    const ZERO: &str = r#"<w:pgMar w:top="0" w:bottom="0" w:left="0" w:right="0"/>"#;
    const NORMAL: &str = r#"<w:pgMar w:top="1440" w:bottom="1440" w:left="1800" w:right="1800"/>"#;

    fn inline_section(mar: &str) -> String {
        format!("<w:p><w:pPr><w:sectPr>{mar}</w:sectPr></w:pPr></w:p>")
    }

    #[test]
    fn single_section_is_exempt() {
        let tree = doc(&format!("<w:p/><w:sectPr>{ZERO}</w:sectPr>"));
        assert!(check_section_margins(&tree, &RuleSettings::default()).is_empty());
    }

    #[test]
    fn middle_zero_section_warns_once() {
        let body = format!(
            "{}{}<w:sectPr>{NORMAL}</w:sectPr>",
            inline_section(ZERO),
            inline_section(ZERO)
        );
        let warnings = check_section_margins(&doc(&body), &RuleSettings::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("MARGIN: section[2] has zero margins"));
    }

    #[test]
    fn extreme_margin_values_do_not_abort() {
        let extreme = r#"<w:pgMar w:top="-9223372036854775808" w:bottom="0" w:left="0" w:right="0"/>"#;
        let body = format!(
            "{}{}<w:sectPr>{NORMAL}</w:sectPr>",
            inline_section(ZERO),
            inline_section(extreme)
        );
        assert!(check_section_margins(&doc(&body), &RuleSettings::default()).is_empty());
    }

    #[test]
    fn final_zero_section_warns_softly() {
        let body = format!(
            "{}{}<w:sectPr>{ZERO}</w:sectPr>",
            inline_section(NORMAL),
            inline_section(NORMAL)
        );
        let warnings = check_section_margins(&doc(&body), &RuleSettings::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("MARGIN: final section"));
    }

    #[test]
    fn toc_without_update_fields_warns() {
        let mut pkg = empty_source();
        pkg.set_part("word/settings.xml", fixture::SETTINGS_XML.as_bytes().to_vec());
        let tree = doc(r#"<w:p><w:r><w:instrText xml:space="preserve"> TOC \o "1-3" </w:instrText></w:r></w:p>"#);
        assert_eq!(check_settings(&tree, &pkg).len(), 1);
    }

    #[test]
    fn validate_file_reports_structure_findings() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.docx");
        std::fs::write(&bogus, b"nope").unwrap();
        let report = validate_file(&bogus, &RuleSettings::default());
        assert_eq!(report.errors, vec!["STRUCTURE: File corrupted or not valid docx"]);

        let no_doc = dir.path().join("nodoc.docx");
        fixture::write_zip(&no_doc, &[("[Content_Types].xml", fixture::CONTENT_TYPES_XML.as_bytes())]);
        let report = validate_file(&no_doc, &RuleSettings::default());
        assert_eq!(report.errors, vec!["STRUCTURE: word/document.xml missing"]);
        assert!(!report.passed());

        let ok = fixture::docx(dir.path(), "ok.docx", "<w:p/>");
        let report = validate_file(&ok, &RuleSettings::default());
        assert!(report.passed());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn directory_source_reads_unpacked_parts() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("word").join("media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("image1.png"), png_header(100, 100)).unwrap();
        let src: &Path = dir.path();
        assert!(src.has_part("word/media/image1.png"));
        assert!(!src.has_part("word/comments.xml"));
    }
}
