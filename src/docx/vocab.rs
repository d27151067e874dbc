//! Namespaces and the canonical child orders WordprocessingML mandates.

/// A namespace URI together with the prefix Word conventionally binds it to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ns {
    pub prefix: &'static str,
    pub uri: &'static str,
}

pub const W: Ns = Ns {
    prefix: "w",
    uri: "http://schemas.openxmlformats.org/wordprocessingml/2006/main",
};
pub const W14: Ns = Ns {
    prefix: "w14",
    uri: "http://schemas.microsoft.com/office/word/2010/wordml",
};
pub const W15: Ns = Ns {
    prefix: "w15",
    uri: "http://schemas.microsoft.com/office/word/2012/wordml",
};
pub const W16: Ns = Ns {
    prefix: "w16",
    uri: "http://schemas.microsoft.com/office/word/2018/wordml",
};
pub const W16CID: Ns = Ns {
    prefix: "w16cid",
    uri: "http://schemas.microsoft.com/office/word/2016/wordml/cid",
};
pub const W16CEX: Ns = Ns {
    prefix: "w16cex",
    uri: "http://schemas.microsoft.com/office/word/2018/wordml/cex",
};
pub const W16DU: Ns = Ns {
    prefix: "w16du",
    uri: "http://schemas.microsoft.com/office/word/2023/wordml/word16du",
};
pub const W16SE: Ns = Ns {
    prefix: "w16se",
    uri: "http://schemas.microsoft.com/office/word/2015/wordml/symex",
};
pub const R: Ns = Ns {
    prefix: "r",
    uri: "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
};
pub const MC: Ns = Ns {
    prefix: "mc",
    uri: "http://schemas.openxmlformats.org/markup-compatibility/2006",
};
pub const WP: Ns = Ns {
    prefix: "wp",
    uri: "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing",
};
pub const WP14: Ns = Ns {
    prefix: "wp14",
    uri: "http://schemas.microsoft.com/office/word/2010/wordprocessingDrawing",
};
pub const A: Ns = Ns {
    prefix: "a",
    uri: "http://schemas.openxmlformats.org/drawingml/2006/main",
};
pub const PIC: Ns = Ns {
    prefix: "pic",
    uri: "http://schemas.openxmlformats.org/drawingml/2006/picture",
};
pub const M: Ns = Ns {
    prefix: "m",
    uri: "http://schemas.openxmlformats.org/officeDocument/2006/math",
};
pub const V: Ns = Ns {
    prefix: "v",
    uri: "urn:schemas-microsoft-com:vml",
};
pub const O: Ns = Ns {
    prefix: "o",
    uri: "urn:schemas-microsoft-com:office:office",
};
pub const W10: Ns = Ns {
    prefix: "w10",
    uri: "urn:schemas-microsoft-com:office:word",
};
pub const WNE: Ns = Ns {
    prefix: "wne",
    uri: "http://schemas.microsoft.com/office/word/2006/wordml",
};
pub const WPC: Ns = Ns {
    prefix: "wpc",
    uri: "http://schemas.microsoft.com/office/word/2010/wordprocessingCanvas",
};
pub const WPG: Ns = Ns {
    prefix: "wpg",
    uri: "http://schemas.microsoft.com/office/word/2010/wordprocessingGroup",
};
pub const WPS: Ns = Ns {
    prefix: "wps",
    uri: "http://schemas.microsoft.com/office/word/2010/wordprocessingShape",
};
pub const XML: Ns = Ns {
    prefix: "xml",
    uri: "http://www.w3.org/XML/1998/namespace",
};

/// Package-level namespaces (relationships and content types use a default namespace).
pub const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

/// Matchers for the unprefixed package namespaces. Elements in these parts are created with
/// plain names, never through [`crate::docx::tree::XmlTree::new_element`].
pub const PKG_RELS: Ns = Ns {
    prefix: "",
    uri: RELS_NS,
};
pub const PKG_TYPES: Ns = Ns {
    prefix: "",
    uri: CONTENT_TYPES_NS,
};

/// Prefixes that resolve to their conventional URI even when a malformed part forgets to
/// declare them.
pub const WELL_KNOWN: &[Ns] = &[
    W, W14, W15, W16, W16CID, W16CEX, W16DU, W16SE, R, MC, WP, WP14, A, PIC, M, V, O, W10, WNE,
    WPC, WPG, WPS, XML,
];

/// Namespaces declared on freshly created comment-family roots.
pub const COMMENT_PART_NAMESPACES: &[Ns] = &[
    W, R, MC, W14, W15, W16, W16CEX, W16CID, W16DU, W16SE, WP, WP14, WPC, WPG, WPS, O, V, M, W10,
    WNE,
];

/// `mc:Ignorable` value matching [`COMMENT_PART_NAMESPACES`].
pub const MC_IGNORABLE: &str = "w14 w15 w16se w16cid w16 w16cex w16du wp14";

pub fn well_known_uri(prefix: &str) -> Option<&'static str> {
    WELL_KNOWN.iter().find(|ns| ns.prefix == prefix).map(|ns| ns.uri)
}

const RPR_ORDER: &[&str] = &[
    "rStyle", "rFonts", "b", "bCs", "i", "iCs", "caps", "smallCaps", "strike", "dstrike",
    "outline", "shadow", "emboss", "imprint", "noProof", "snapToGrid", "vanish", "webHidden",
    "color", "spacing", "w", "kern", "position", "sz", "szCs", "highlight", "u", "effect", "bdr",
    "shd", "fitText", "vertAlign", "rtl", "cs", "em", "lang", "eastAsianLayout", "specVanish",
    "oMath",
];

const PPR_ORDER: &[&str] = &[
    "pStyle", "keepNext", "keepLines", "pageBreakBefore", "framePr", "widowControl", "numPr",
    "suppressLineNumbers", "pBdr", "shd", "tabs", "suppressAutoHyphens", "kinsoku", "wordWrap",
    "overflowPunct", "topLinePunct", "autoSpaceDE", "autoSpaceDN", "bidi", "adjustRightInd",
    "snapToGrid", "spacing", "ind", "contextualSpacing", "mirrorIndents", "suppressOverlap", "jc",
    "textDirection", "textAlignment", "textboxTightWrap", "outlineLvl", "divId", "cnfStyle",
    "rPr", "sectPr", "pPrChange",
];

const SECTPR_ORDER: &[&str] = &[
    "headerReference", "footerReference", "footnotePr", "endnotePr", "type", "pgSz", "pgMar",
    "paperSrc", "pgBorders", "lnNumType", "pgNumType", "cols", "formProt", "vAlign", "noEndnote",
    "titlePg", "textDirection", "bidi", "rtlGutter", "docGrid", "printerSettings", "sectPrChange",
];

const TCPR_ORDER: &[&str] = &[
    "cnfStyle", "tcW", "gridSpan", "hMerge", "vMerge", "tcBorders", "shd", "noWrap", "tcMar",
    "textDirection", "tcFitText", "vAlign", "hideMark", "headers", "cellIns", "cellDel",
    "cellMerge", "tcPrChange",
];

const TBLPR_ORDER: &[&str] = &[
    "tblStyle", "tblpPr", "tblOverlap", "bidiVisual", "tblStyleRowBandSize",
    "tblStyleColBandSize", "tblW", "jc", "tblCellSpacing", "tblInd", "tblBorders", "shd",
    "tblLayout", "tblCellMar", "tblLook", "tblCaption", "tblDescription", "tblPrChange",
];

const TBL_BORDERS_ORDER: &[&str] = &["top", "left", "bottom", "right", "insideH", "insideV"];

const LVL_ORDER: &[&str] = &[
    "start", "numFmt", "lvlRestart", "pStyle", "isLgl", "suff", "lvlText", "lvlPicBulletId",
    "legacy", "lvlJc", "pPr", "rPr",
];

const SETTINGS_ORDER: &[&str] = &[
    "writeProtection", "view", "zoom", "removePersonalInformation", "removeDateAndTime",
    "doNotDisplayPageBoundaries", "displayBackgroundShape", "printPostScriptOverText",
    "printFractionalCharacterWidth", "printFormsData", "embedTrueTypeFonts", "embedSystemFonts",
    "saveSubsetFonts", "saveFormsData", "mirrorMargins", "alignBordersAndEdges",
    "bordersDoNotSurroundHeader", "bordersDoNotSurroundFooter", "gutterAtTop",
    "hideSpellingErrors", "hideGrammaticalErrors", "activeWritingStyle", "proofState",
    "formsDesign", "attachedTemplate", "linkStyles", "stylePaneFormatFilter",
    "stylePaneSortMethod", "documentType", "mailMerge", "revisionView", "trackRevisions",
    "doNotTrackMoves", "doNotTrackFormatting", "documentProtection", "autoFormatOverride",
    "styleLockTheme", "styleLockQFSet", "defaultTabStop", "autoHyphenation",
    "consecutiveHyphenLimit", "hyphenationZone", "doNotHyphenateCaps", "showEnvelope",
    "summaryLength", "clickAndTypeStyle", "defaultTableStyle", "evenAndOddHeaders",
    "bookFoldRevPrinting", "bookFoldPrinting", "bookFoldPrintingSheets",
    "drawingGridHorizontalSpacing", "drawingGridVerticalSpacing",
    "displayHorizontalDrawingGridEvery", "displayVerticalDrawingGridEvery",
    "doNotUseMarginsForDrawingGridOrigin", "drawingGridHorizontalOrigin",
    "drawingGridVerticalOrigin", "doNotShadeFormData", "noPunctuationKerning",
    "characterSpacingControl", "printTwoOnOne", "strictFirstAndLastChars", "noLineBreaksAfter",
    "noLineBreaksBefore", "savePreviewPicture", "doNotValidateAgainstSchema", "saveInvalidXml",
    "ignoreMixedContent", "alwaysShowPlaceholderText", "doNotDemarcateInvalidXml",
    "saveXmlDataOnly", "useXSLTWhenSaving", "saveThroughXslt", "showXMLTags",
    "alwaysMergeEmptyNamespace", "updateFields", "hdrShapeDefaults", "footnotePr", "endnotePr",
    "compat", "docVars", "rsids", "mathPr", "attachedSchema", "themeFontLang",
    "clrSchemeMapping", "doNotIncludeSubdocsInStats", "doNotAutoCompressPictures",
    "forceUpgrade", "captions", "readModeInkLockDown", "schemaLibrary", "shapeDefaults",
    "doNotEmbedSmartTags", "decimalSymbol", "listSeparator",
];

const PBDR_ORDER: &[&str] = &["top", "left", "bottom", "right", "between", "bar"];

const CELL_MARGIN_ORDER: &[&str] = &["top", "left", "bottom", "right", "start", "end"];

const NUMBERING_ORDER: &[&str] = &["abstractNum", "num"];

const TR_ORDER: &[&str] = &[
    "tblPrEx", "trPr", "tc", "customXml", "sdt", "bookmarkStart", "bookmarkEnd",
];

const STYLE_ORDER: &[&str] = &[
    "name", "aliases", "basedOn", "next", "link", "autoRedefine", "hidden", "uiPriority",
    "semiHidden", "unhideWhenUsed", "qFormat", "locked", "personal", "personalCompose",
    "personalReply", "rsid", "pPr", "rPr", "tblPr", "trPr", "tcPr", "tblStylePr",
];

const TBL_ORDER: &[&str] = &["bookmarkStart", "bookmarkEnd", "tblPr", "tblGrid", "tr"];

/// Children that belong inside `w:pBdr` but are sometimes emitted directly under `w:pPr`.
pub const PARAGRAPH_BORDER_SIDES: &[&str] = PBDR_ORDER;

/// How the children of a regulated element are ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ordering {
    /// Regulated children follow this sequence; everything else trails in original order.
    Sequence(&'static [&'static str]),
    /// Only the terminal section properties are regulated: they must be the last child.
    SectionLast,
}

/// Every WordprocessingML element whose children have a regulated order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    RunProperties,
    ParagraphProperties,
    SectionProperties,
    TableCellProperties,
    TableProperties,
    TableBorders,
    TableCellBorders,
    NumberingLevel,
    Settings,
    ParagraphBorders,
    TableCellMargins,
    TableCellMarginDefaults,
    Numbering,
    TableRow,
    Style,
    Table,
    Body,
}

impl ElementKind {
    pub const ALL: [ElementKind; 17] = [
        ElementKind::RunProperties,
        ElementKind::ParagraphProperties,
        ElementKind::SectionProperties,
        ElementKind::TableCellProperties,
        ElementKind::TableProperties,
        ElementKind::TableBorders,
        ElementKind::TableCellBorders,
        ElementKind::NumberingLevel,
        ElementKind::Settings,
        ElementKind::ParagraphBorders,
        ElementKind::TableCellMargins,
        ElementKind::TableCellMarginDefaults,
        ElementKind::Numbering,
        ElementKind::TableRow,
        ElementKind::Style,
        ElementKind::Table,
        ElementKind::Body,
    ];

    /// Local name of the element in the `w` namespace.
    pub fn local_name(self) -> &'static str {
        match self {
            ElementKind::RunProperties => "rPr",
            ElementKind::ParagraphProperties => "pPr",
            ElementKind::SectionProperties => "sectPr",
            ElementKind::TableCellProperties => "tcPr",
            ElementKind::TableProperties => "tblPr",
            ElementKind::TableBorders => "tblBorders",
            ElementKind::TableCellBorders => "tcBorders",
            ElementKind::NumberingLevel => "lvl",
            ElementKind::Settings => "settings",
            ElementKind::ParagraphBorders => "pBdr",
            ElementKind::TableCellMargins => "tcMar",
            ElementKind::TableCellMarginDefaults => "tblCellMar",
            ElementKind::Numbering => "numbering",
            ElementKind::TableRow => "tr",
            ElementKind::Style => "style",
            ElementKind::Table => "tbl",
            ElementKind::Body => "body",
        }
    }

    pub fn ordering(self) -> Ordering {
        match self {
            ElementKind::RunProperties => Ordering::Sequence(RPR_ORDER),
            ElementKind::ParagraphProperties => Ordering::Sequence(PPR_ORDER),
            ElementKind::SectionProperties => Ordering::Sequence(SECTPR_ORDER),
            ElementKind::TableCellProperties => Ordering::Sequence(TCPR_ORDER),
            ElementKind::TableProperties => Ordering::Sequence(TBLPR_ORDER),
            ElementKind::TableBorders | ElementKind::TableCellBorders => {
                Ordering::Sequence(TBL_BORDERS_ORDER)
            }
            ElementKind::NumberingLevel => Ordering::Sequence(LVL_ORDER),
            ElementKind::Settings => Ordering::Sequence(SETTINGS_ORDER),
            ElementKind::ParagraphBorders => Ordering::Sequence(PBDR_ORDER),
            ElementKind::TableCellMargins | ElementKind::TableCellMarginDefaults => {
                Ordering::Sequence(CELL_MARGIN_ORDER)
            }
            ElementKind::Numbering => Ordering::Sequence(NUMBERING_ORDER),
            ElementKind::TableRow => Ordering::Sequence(TR_ORDER),
            ElementKind::Style => Ordering::Sequence(STYLE_ORDER),
            ElementKind::Table => Ordering::Sequence(TBL_ORDER),
            ElementKind::Body => Ordering::SectionLast,
        }
    }

    /// Position of `local` in this kind's sequence, if it is a regulated child.
    pub fn rank_of(self, local: &str) -> Option<usize> {
        match self.ordering() {
            Ordering::Sequence(seq) => seq.iter().position(|n| *n == local),
            Ordering::SectionLast => (local == "sectPr").then_some(0),
        }
    }
}

/// Immutable table of the element kinds a corrector run regulates.
///
/// Built once and passed by reference; tests may construct narrower registries.
#[derive(Clone, Debug)]
pub struct Registry {
    kinds: Vec<ElementKind>,
    wrap_paragraph_borders: bool,
}

impl Registry {
    pub fn standard() -> Self {
        Self {
            kinds: ElementKind::ALL.to_vec(),
            wrap_paragraph_borders: true,
        }
    }

    pub fn with_kinds(kinds: &[ElementKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            wrap_paragraph_borders: kinds.contains(&ElementKind::ParagraphProperties),
        }
    }

    pub fn kinds(&self) -> &[ElementKind] {
        &self.kinds
    }

    pub fn wraps_paragraph_borders(&self) -> bool {
        self.wrap_paragraph_borders
    }

    /// The regulated kind for a `w`-namespace element with this local name.
    pub fn kind_for(&self, local: &str) -> Option<ElementKind> {
        self.kinds.iter().copied().find(|k| k.local_name() == local)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
