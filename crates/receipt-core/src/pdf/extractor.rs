//! Positioned text extraction using lopdf, with pdf-extract as a flat fallback.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use lopdf::content::Content;
use lopdf::{Document, Object};
use tracing::{debug, trace};

use super::fonts::PageFont;
use super::layout::{reconstruct_lines, LayoutOptions, PositionedTextRun};
use super::Result;
use crate::error::PdfError;
use crate::models::config::PdfConfig;

/// A 2D affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translation(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self` applied first, then `other`.
    fn then(self, other: Matrix) -> Matrix {
        let [a0, a1, a2, a3, a4, a5] = self.0;
        let [b0, b1, b2, b3, b4, b5] = other.0;
        Matrix([
            a0 * b0 + a1 * b2,
            a0 * b1 + a1 * b3,
            a2 * b0 + a3 * b2,
            a2 * b1 + a3 * b3,
            a4 * b0 + a5 * b2 + b4,
            a4 * b1 + a5 * b3 + b5,
        ])
    }

    fn origin(&self) -> (f32, f32) {
        (self.0[4], self.0[5])
    }

    /// Length of a horizontal text-space distance once transformed.
    fn scale_x(&self, distance: f32) -> f32 {
        (distance * self.0[0]).hypot(distance * self.0[1])
    }
}

/// Graphics state entries that affect text placement.
#[derive(Clone, Copy)]
struct GraphicsState<'a> {
    ctm: Matrix,
    font: Option<&'a PageFont<'a>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    /// Horizontal scaling as a fraction.
    h_scale: f32,
    leading: f32,
}

impl Default for GraphicsState<'_> {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
        }
    }
}

/// Walks one content stream and collects the text runs it draws.
struct TextWalker<'a> {
    state: GraphicsState<'a>,
    stack: Vec<GraphicsState<'a>>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    fonts: &'a BTreeMap<Vec<u8>, PageFont<'a>>,
    /// Used before any `Tf` and for font names missing from the resources.
    fallback: PageFont<'a>,
    runs: Vec<PositionedTextRun>,
}

impl<'a> TextWalker<'a> {
    fn new(fonts: &'a BTreeMap<Vec<u8>, PageFont<'a>>, glyph_width_ratio: f32) -> Self {
        Self {
            state: GraphicsState::default(),
            stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            fonts,
            fallback: PageFont::estimated(glyph_width_ratio),
            runs: Vec::new(),
        }
    }

    fn font(&self) -> &PageFont<'a> {
        self.state.font.unwrap_or(&self.fallback)
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        let nums: Vec<f32> = operands.iter().filter_map(number).collect();

        match operator {
            "q" => self.stack.push(self.state),
            "Q" => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            "cm" if nums.len() == 6 => {
                let m = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                self.state.ctm = m.then(self.state.ctm);
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.state.font = self.fonts.get(name);
                    if self.state.font.is_none() {
                        trace!("Unknown font {}", String::from_utf8_lossy(name));
                    }
                }
                if let Some(&size) = nums.last() {
                    self.state.font_size = size;
                }
            }
            "Tc" if !nums.is_empty() => self.state.char_spacing = nums[0],
            "Tw" if !nums.is_empty() => self.state.word_spacing = nums[0],
            "Tz" if !nums.is_empty() => self.state.h_scale = nums[0] / 100.0,
            "TL" if !nums.is_empty() => self.state.leading = nums[0],
            "Td" if nums.len() == 2 => self.move_line(nums[0], nums[1]),
            "TD" if nums.len() == 2 => {
                self.state.leading = -nums[1];
                self.move_line(nums[0], nums[1]);
            }
            "Tm" if nums.len() == 6 => {
                let m = Matrix([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]);
                self.text_matrix = m;
                self.line_matrix = m;
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    self.show(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    self.show(bytes);
                }
            }
            "\"" if operands.len() == 3 => {
                if let (Some(aw), Some(ac)) = (number(&operands[0]), number(&operands[1])) {
                    self.state.word_spacing = aw;
                    self.state.char_spacing = ac;
                }
                self.next_line();
                if let Some(bytes) = string_bytes(&operands[2]) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translation(tx, ty).then(self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.state.leading);
    }

    fn advance(&mut self, tx: f32) {
        self.text_matrix = Matrix::translation(tx, 0.0).then(self.text_matrix);
    }

    /// Text-space advance of a string.
    fn text_width(&self, bytes: &[u8]) -> f32 {
        let state = &self.state;
        let font = self.font();
        font.codes(bytes)
            .into_iter()
            .map(|code| {
                let mut w = font.advance(code) * state.font_size + state.char_spacing;
                if font.is_word_space(code) {
                    w += state.word_spacing;
                }
                w * state.h_scale
            })
            .sum()
    }

    fn show(&mut self, bytes: &[u8]) {
        let advance = self.text_width(bytes);
        let device = self.text_matrix.then(self.state.ctm);
        let (x, y) = device.origin();

        match self.font().decode(bytes) {
            Some(text) => {
                trace!("Text run {:?} at ({:.1}, {:.1})", text, x, y);
                self.runs.push(PositionedTextRun::new(text, x, y, device.scale_x(advance)));
            }
            None => trace!("Dropping undecodable run at ({:.1}, {:.1})", x, y),
        }

        self.advance(advance);
    }

    fn show_array(&mut self, items: &[Object]) {
        // Kerned pieces are merged into a single run
        let mut text = String::new();
        let mut start: Option<Matrix> = None;
        let mut total = 0.0;
        let mut decodable = true;

        for item in items {
            if let Some(bytes) = string_bytes(item) {
                if start.is_none() {
                    start = Some(self.text_matrix.then(self.state.ctm));
                }
                match self.font().decode(bytes) {
                    Some(piece) => text.push_str(&piece),
                    None => decodable = false,
                }
                let advance = self.text_width(bytes);
                total += advance;
                self.advance(advance);
            } else if let Some(adjust) = number(item) {
                let tx = -adjust / 1000.0 * self.state.font_size * self.state.h_scale;
                // Large negative adjustments are word gaps
                if adjust < -200.0 && !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
                total += tx;
                self.advance(tx);
            }
        }

        if let Some(device) = start {
            if decodable && !text.trim().is_empty() {
                let (x, y) = device.origin();
                self.runs
                    .push(PositionedTextRun::new(text.trim_end(), x, y, device.scale_x(total)));
            }
        }
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn string_bytes(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

/// Recovers reading-order text from a PDF's embedded text layer.
pub struct PdfTextExtractor {
    document: Option<Document>,
    raw_data: Vec<u8>,
    glyph_width_ratio: f32,
    layout: LayoutOptions,
}

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self::from_config(&PdfConfig::default())
    }

    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            document: None,
            raw_data: Vec::new(),
            glyph_width_ratio: config.glyph_width_ratio,
            layout: LayoutOptions::from_config(config),
        }
    }

    /// Load a PDF from bytes, decrypting empty-password files.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            // pdf-extract needs the decrypted bytes
            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {}", e)))?;
            self.raw_data = decrypted;
        } else {
            self.raw_data = data.to_vec();
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        self.document = Some(doc);
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.document
            .as_ref()
            .map(|doc| doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    fn document(&self) -> Result<&Document> {
        self.document
            .as_ref()
            .ok_or_else(|| PdfError::Parse("no document loaded".to_string()))
    }

    /// Text runs drawn on a page (1-indexed).
    pub fn page_runs(&self, page: u32) -> Result<Vec<PositionedTextRun>> {
        let doc = self.document()?;
        let page_id = *doc
            .get_pages()
            .get(&page)
            .ok_or_else(|| PdfError::TextExtraction(format!("page {} not found", page)))?;

        let bytes = doc
            .get_page_content(page_id)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))?;
        let content = Content::decode(&bytes).map_err(|e| PdfError::TextExtraction(e.to_string()))?;

        let fonts: BTreeMap<Vec<u8>, PageFont> = match doc.get_page_fonts(page_id) {
            Ok(fonts) => fonts
                .into_iter()
                .map(|(name, font)| (name, PageFont::from_dictionary(doc, font, self.glyph_width_ratio)))
                .collect(),
            Err(e) => {
                debug!("No fonts for page {}: {}", page, e);
                BTreeMap::new()
            }
        };

        let mut walker = TextWalker::new(&fonts, self.glyph_width_ratio);
        for operation in &content.operations {
            walker.apply(&operation.operator, &operation.operands);
        }

        debug!("Page {}: {} text runs", page, walker.runs.len());
        Ok(walker.runs)
    }

    /// Reading-order text of every page, concatenated.
    pub fn extract_text(&self) -> Result<String> {
        let mut text = String::new();
        for page in 1..=self.page_count() {
            let runs = self.page_runs(page)?;
            text.push_str(&reconstruct_lines(&runs, &self.layout));
        }
        Ok(text)
    }

    /// Text in pdf-extract's own order, without position handling.
    pub fn extract_flat_text(&self) -> Result<String> {
        self.document()?;

        // pdf-extract panics on some malformed fonts
        let extracted = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(&self.raw_data)
        }))
        .map_err(|_| PdfError::TextExtraction("pdf-extract panicked".to_string()))?;

        extracted.map_err(|e| PdfError::TextExtraction(e.to_string()))
    }
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::ReceiptParser;
    use crate::test_support::{pdf_with_content, pdf_with_font, text_content};
    use lopdf::{dictionary, Dictionary, Stream};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn extract(content: &str) -> String {
        let mut extractor = PdfTextExtractor::new();
        extractor.load(&pdf_with_content(content)).unwrap();
        extractor.extract_text().unwrap()
    }

    fn extract_with_font(font: Dictionary, content: &str) -> String {
        extract_with(content, |_| font)
    }

    fn extract_with(content: &str, font: impl FnOnce(&mut Document) -> Dictionary) -> String {
        let mut extractor = PdfTextExtractor::new();
        extractor.load(&pdf_with_font(content, font)).unwrap();
        extractor.extract_text().unwrap()
    }

    /// Type1 font whose codes 1.. are named by `glyphs`.
    fn differences_font(glyphs: &[&str]) -> Dictionary {
        let mut differences = vec![Object::Integer(1)];
        differences.extend(glyphs.iter().map(|g| Object::Name(g.as_bytes().to_vec())));

        dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "KQWXYZ+ReceiptSans",
            "FirstChar" => 1,
            "Widths" => vec![Object::Integer(600); glyphs.len()],
            "Encoding" => dictionary! {
                "Type" => "Encoding",
                "Differences" => differences,
            },
        }
    }

    #[test]
    fn test_matrix_composition() {
        let scale = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        let moved = Matrix::translation(10.0, 5.0).then(scale);
        assert_eq!(moved.origin(), (20.0, 10.0));
        assert_eq!(moved.scale_x(3.0), 6.0);
    }


    #[test]
    fn test_receipt_layout() {
        let content = text_content(&[
            (72.0, 700.0, "Corner Cafe"),
            (72.0, 680.0, "Latte"),
            (300.0, 680.0, "$4.50"),
            (72.0, 660.0, "TOTAL:"),
            (300.0, 660.0, "$4.50"),
        ]);

        assert_eq!(extract(&content), "Corner Cafe\nLatte\t$4.50\nTOTAL:\t$4.50\n");
    }

    #[test]
    fn test_relative_positioning_and_leading() {
        let content = "BT /F1 10 Tf 12 TL 50 500 Td (Walmart) Tj T* (01/15/2024) Tj \
                       0 -12 TD (Thanks) Tj ET";

        assert_eq!(extract(content), "Walmart\n01/15/2024\nThanks\n");
    }

    #[test]
    fn test_ctm_and_state_stack() {
        // The scaled run lands at y = 2 * 300; the restored one at y = 100
        let content = "q 2 0 0 2 0 0 cm BT /F1 10 Tf 10 300 Td (Header) Tj ET Q \
                       BT /F1 10 Tf 10 100 Td (Footer) Tj ET";

        assert_eq!(extract(content), "Header\nFooter\n");
    }

    #[test]
    fn test_tj_array_with_kerning() {
        let content = "BT /F1 10 Tf 10 100 Td [(TO) -20 (TAL) -600 ($9.99)] TJ ET";

        assert_eq!(extract(content), "TOTAL $9.99\n");
    }

    #[test]
    fn test_consecutive_shows_join() {
        // Courier advances 6 units per glyph at size 10
        let content = "BT /F1 10 Tf 10 100 Td (Cof) Tj (fee) Tj 40 0 Td ($3) Tj ET";

        assert_eq!(extract(content), "Coffee $3\n");
    }

    #[test]
    fn test_adjacent_runs_keep_amount_whole() {
        let text = extract("BT /F1 10 Tf 72 700 Td (TOTAL: $1234) Tj 72 0 Td (.56) Tj ET");
        assert_eq!(text, "TOTAL: $1234.56\n");

        let parsed = ReceiptParser::default().parse(&text);
        assert_eq!(parsed.amount, Some("1234.56".parse::<Decimal>().unwrap()));
    }

    #[test]
    fn test_proportional_font_widths() {
        // Helvetica "TOTAL" is 32.23 units wide at size 10
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        };
        let content = "BT /F1 10 Tf 72 700 Td (TOTAL) Tj 32.23 0 Td (: $5.00) Tj ET";

        assert_eq!(extract_with_font(font, content), "TOTAL: $5.00\n");
    }

    #[test]
    fn test_differences_encoding() {
        let font = differences_font(&[
            "T", "O", "A", "L", "colon", "space", "dollar", "one", "period", "five", "zero",
        ]);
        let content = "BT /F1 10 Tf 72 700 Td <0102010304050607080A090A0B> Tj ET";

        assert_eq!(extract_with_font(font, content), "TOTAL: $15.50\n");
    }

    #[test]
    fn test_unnamed_subset_glyphs_are_dropped() {
        let font = differences_font(&["g12", "g7", "g30"]);
        let content = "BT /F1 10 Tf 72 700 Td <010203> Tj ET";

        assert_eq!(extract_with_font(font, content), "");
    }

    #[test]
    fn test_composite_font_with_unicode_map() {
        let cmap = [
            "/CIDInit /ProcSet findresource begin",
            "12 dict begin",
            "begincmap",
            "/CIDSystemInfo",
            "<< /Registry (Adobe)",
            "/Ordering (UCS)",
            "/Supplement 0",
            ">> def",
            "/CMapName /Adobe-Identity-UCS def",
            "/CMapType 2 def",
            "1 begincodespacerange",
            "<0000> <FFFF>",
            "endcodespacerange",
            "1 beginbfrange",
            "<0003> <000C> <0030>",
            "endbfrange",
            "2 beginbfchar",
            "<0010> <0024>",
            "<0011> <002E>",
            "endbfchar",
            "endcmap",
            "CMapName currentdict /CMap defineresource pop",
            "end",
            "end",
        ]
        .join("\n");

        let content = "BT /F1 10 Tf 72 700 Td <001000040008001100070003> Tj ET";
        let text = extract_with(content, |doc| {
            let to_unicode = doc.add_object(Stream::new(dictionary! {}, cmap.into_bytes()));
            dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => "KQWXYZ+ReceiptSans",
                "Encoding" => "Identity-H",
                "ToUnicode" => Object::Reference(to_unicode),
                "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "CIDFontType2",
                    "BaseFont" => "KQWXYZ+ReceiptSans",
                    "DW" => 556,
                })],
            }
        });

        assert_eq!(text, "$15.40\n");
    }

    #[test]
    fn test_image_only_page_is_blank() {
        assert_eq!(extract("q 100 0 0 100 0 0 cm Q"), "");
    }

    #[test]
    fn test_flat_text_fallback_reads_text() {
        let mut extractor = PdfTextExtractor::new();
        extractor
            .load(&pdf_with_content(&text_content(&[(72.0, 700.0, "Hello")])))
            .unwrap();

        let flat = extractor.extract_flat_text().unwrap();
        assert!(flat.contains("Hello"));
    }

    #[test]
    fn test_invalid_pdf() {
        let mut extractor = PdfTextExtractor::new();
        let err = extractor.load(b"not a pdf").unwrap_err();

        assert!(matches!(err, PdfError::Parse(_)));
        assert_eq!(extractor.page_count(), 0);
        assert!(extractor.extract_text().unwrap().is_empty());
    }
}
