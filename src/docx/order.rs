//! Element-order corrector.
//!
//! Reorders the children of every regulated WordprocessingML element into the sequence the
//! schema mandates. Regulated children are sorted by rank; everything else keeps its relative
//! order and trails them. Only element slots are permuted, so interleaved whitespace and
//! comments stay where they were. Nothing is ever dropped or duplicated.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::docx::package::{DocxPackage, DOCUMENT};
use crate::docx::tree::{NodeId, XmlTree};
use crate::docx::vocab::{ElementKind, Ordering, Registry, PARAGRAPH_BORDER_SIDES, W};
use crate::docx::xml::{parse_part, write_tree};

pub struct OrderCorrector<'r> {
    registry: &'r Registry,
}

impl<'r> OrderCorrector<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Correct every regulated element in `tree`. Returns the number of structural changes:
    /// one per reordered element plus one per border descriptor moved into `w:pBdr`.
    pub fn correct(&self, tree: &mut XmlTree) -> usize {
        let Some(root) = tree.root() else {
            return 0;
        };
        let mut fixes = 0;
        for id in tree.descendants(root) {
            let Some(kind) = self.regulated_kind(tree, id) else {
                continue;
            };
            if kind == ElementKind::ParagraphProperties && self.registry.wraps_paragraph_borders() {
                fixes += wrap_border_elements(tree, id);
            }
            if correct_children(tree, id, kind) {
                fixes += 1;
            }
        }
        fixes
    }

    fn regulated_kind(&self, tree: &XmlTree, id: NodeId) -> Option<ElementKind> {
        let local = tree.local_name(id)?;
        let kind = self.registry.kind_for(local)?;
        tree.is(id, W, local).then_some(kind)
    }
}

/// Rank of a child under `kind`, or `None` when the child is unregulated.
fn rank(tree: &XmlTree, id: NodeId, kind: ElementKind) -> Option<usize> {
    let local = tree.local_name(id)?;
    let r = kind.rank_of(local)?;
    tree.is(id, W, local).then_some(r)
}

fn correct_children(tree: &mut XmlTree, parent: NodeId, kind: ElementKind) -> bool {
    let elements = tree.child_elements(parent);
    if elements.is_empty() {
        return false;
    }
    let sorted = match kind.ordering() {
        Ordering::Sequence(_) => {
            let mut ranked: Vec<(usize, NodeId)> = Vec::new();
            let mut rest: Vec<NodeId> = Vec::new();
            for e in &elements {
                match rank(tree, *e, kind) {
                    Some(r) => ranked.push((r, *e)),
                    None => rest.push(*e),
                }
            }
            // Stable: equal ranks keep their original order.
            ranked.sort_by_key(|(r, _)| *r);
            ranked.into_iter().map(|(_, e)| e).chain(rest).collect::<Vec<_>>()
        }
        Ordering::SectionLast => {
            let Some(pos) = elements.iter().position(|e| rank(tree, *e, kind).is_some()) else {
                return false;
            };
            let mut v = elements.clone();
            let sect = v.remove(pos);
            v.push(sect);
            v
        }
    };
    permute_elements(tree, parent, &elements, sorted)
}

/// Rewrite the element slots of `parent` with `sorted`, leaving non-element children in place.
fn permute_elements(tree: &mut XmlTree, parent: NodeId, current: &[NodeId], sorted: Vec<NodeId>) -> bool {
    if current == sorted.as_slice() {
        return false;
    }
    let mut next = sorted.into_iter();
    let order: Vec<NodeId> = tree
        .children(parent)
        .iter()
        .map(|c| {
            if tree.element(*c).is_some() {
                next.next().unwrap_or(*c)
            } else {
                *c
            }
        })
        .collect();
    tree.reorder_children(parent, order);
    true
}

/// Insert `child` under `parent` before the first sibling that ranks after it in `kind`'s
/// sequence. Unranked children are appended.
pub fn insert_in_order(tree: &mut XmlTree, parent: NodeId, child: NodeId, kind: ElementKind) {
    let own = tree.local_name(child).and_then(|l| kind.rank_of(l));
    let Some(own) = own else {
        tree.append_child(parent, child);
        return;
    };
    let next = tree
        .child_elements(parent)
        .into_iter()
        .find(|c| *c != child && rank(tree, *c, kind).is_some_and(|r| r > own));
    match next {
        Some(sibling) => tree.insert_before(sibling, child),
        None => tree.append_child(parent, child),
    }
}

/// Move border descriptors sitting directly under `w:pPr` into its `w:pBdr`, creating the
/// container at its canonical position when needed. Returns the number of descriptors moved.
fn wrap_border_elements(tree: &mut XmlTree, ppr: NodeId) -> usize {
    let misplaced: Vec<NodeId> = tree
        .child_elements(ppr)
        .into_iter()
        .filter(|c| {
            tree.local_name(*c)
                .is_some_and(|l| PARAGRAPH_BORDER_SIDES.contains(&l) && tree.is(*c, W, l))
        })
        .collect();
    if misplaced.is_empty() {
        return 0;
    }

    let pbdr = match tree.find_child(ppr, W, "pBdr") {
        Some(p) => p,
        None => {
            let pbdr = tree.new_element(W, "pBdr");
            insert_in_order(tree, ppr, pbdr, ElementKind::ParagraphProperties);
            pbdr
        }
    };

    for b in &misplaced {
        tree.append_child(pbdr, *b);
    }
    correct_children(tree, pbdr, ElementKind::ParagraphBorders);
    misplaced.len()
}

/// Parts the package fixer visits, in visiting order.
pub fn fixable_parts(pkg: &DocxPackage) -> Vec<String> {
    let mut names = vec![
        DOCUMENT.to_string(),
        "word/styles.xml".to_string(),
        "word/numbering.xml".to_string(),
        "word/settings.xml".to_string(),
    ];
    names.retain(|n| pkg.has_part(n));
    let mut hf: Vec<String> = pkg
        .part_names()
        .filter(|n| {
            n.strip_prefix("word/").is_some_and(|rest| {
                !rest.contains('/')
                    && rest.ends_with(".xml")
                    && (rest.starts_with("header") || rest.starts_with("footer"))
            })
        })
        .map(str::to_string)
        .collect();
    hf.sort();
    names.extend(hf);
    names
}

/// Run the corrector over every fixable part of `pkg`, rewriting parts that changed.
/// Returns the total number of changes.
pub fn fix_package(pkg: &mut DocxPackage, registry: &Registry) -> anyhow::Result<usize> {
    let corrector = OrderCorrector::new(registry);
    let mut total = 0;
    for name in fixable_parts(pkg) {
        let Some(bytes) = pkg.part(&name) else { continue };
        let mut tree = parse_part(&name, bytes).with_context(|| format!("parse part: {name}"))?;
        let fixes = corrector.correct(&mut tree);
        debug!(part = %name, fixes, "element order");
        if fixes > 0 {
            pkg.set_part(&name, write_tree(&tree));
            total += fixes;
        }
    }
    Ok(total)
}

/// Fix element order in the package at `input`, writing to `output` only when something
/// changed. Returns the number of changes.
pub fn fix_file(input: &Path, output: &Path, registry: &Registry) -> anyhow::Result<usize> {
    let mut pkg = DocxPackage::read(input)?;
    let total = fix_package(&mut pkg, registry)?;
    if total > 0 {
        pkg.write(output)?;
        info!(fixes = total, output = %output.display(), "fixed element order");
    } else if input != output {
        std::fs::copy(input, output)
            .with_context(|| format!("copy {} -> {}", input.display(), output.display()))?;
    }
    Ok(total)
}
