//! Positioned text fragments from PDF pages
//!
//! Everything downstream works on `(text, x, y)` fragments. `PdfSource` walks a
//! page's content stream with lopdf and records where each shown string lands;
//! `StaticSource` serves prepared fragments for tests and replays.

use crate::ExtractError;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;

/// A single positioned run of text on a page
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// The text content
    pub text: String,
    /// X position on page
    pub x: f32,
    /// Y position on page (PDF coordinates, origin at bottom-left)
    pub y: f32,
}

impl Fragment {
    pub fn new(text: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            x,
            y,
        }
    }
}

/// Anything that can hand out the fragments of a numbered page.
pub trait FragmentSource {
    /// Total number of pages in the document
    fn page_count(&self) -> u32;

    /// Fragments of one page (1-indexed), in content-stream order
    fn page_fragments(&self, page: u32) -> Result<Vec<Fragment>, ExtractError>;
}

/// Fragments read from a PDF document with lopdf
pub struct PdfSource {
    doc: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl PdfSource {
    /// Load a PDF from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ExtractError> {
        let doc = Document::load(path)?;
        Ok(Self::from_document(doc))
    }

    /// Load a PDF from a memory buffer
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, ExtractError> {
        let doc = Document::load_mem(buffer)?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: Document) -> Self {
        let pages = doc.get_pages();
        Self { doc, pages }
    }
}

impl FragmentSource for PdfSource {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_fragments(&self, page: u32) -> Result<Vec<Fragment>, ExtractError> {
        let page_id = *self
            .pages
            .get(&page)
            .ok_or(ExtractError::PageOutOfRange(page))?;
        read_page(&self.doc, page_id)
    }
}

/// In-memory fragments keyed by page number
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pages: BTreeMap<u32, Vec<Fragment>>,
    page_count: u32,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the fragments of one page
    pub fn with_page(mut self, page: u32, fragments: Vec<Fragment>) -> Self {
        self.pages.insert(page, fragments);
        self.page_count = self.page_count.max(page);
        self
    }
}

impl FragmentSource for StaticSource {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_fragments(&self, page: u32) -> Result<Vec<Fragment>, ExtractError> {
        if page == 0 || page > self.page_count {
            return Err(ExtractError::PageOutOfRange(page));
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}

/// Multiply two 2D transformation matrices `[a, b, c, d, e, f]`
fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Graphics and text state needed to place shown strings
struct TextState {
    ctm: [f32; 6],
    ctm_stack: Vec<[f32; 6]>,
    text_matrix: [f32; 6],
    line_matrix: [f32; 6],
    font: String,
    font_size: f32,
    leading: Option<f32>,
    in_text_block: bool,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            font: String::new(),
            font_size: 12.0,
            leading: None,
            in_text_block: false,
        }
    }

    fn translate_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix[4] += tx;
        self.line_matrix[5] += ty;
        self.text_matrix = self.line_matrix;
    }

    /// Move to the next line by the text leading (`TL`, or the last `TD`)
    fn next_line(&mut self) {
        // Without an explicit leading, fall back to the usual 1.2 line height
        let leading = self.leading.unwrap_or(self.font_size * 1.2);
        self.translate_line(0.0, -leading);
    }

    /// Device-space origin of the next glyph
    fn origin(&self) -> (f32, f32) {
        let combined = multiply_matrices(&self.text_matrix, &self.ctm);
        (combined[4], combined[5])
    }
}

/// Walk one page's content stream and collect positioned fragments
fn read_page(doc: &Document, page_id: ObjectId) -> Result<Vec<Fragment>, ExtractError> {
    let fonts = doc.get_page_fonts(page_id).unwrap_or_default();
    let content_data = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_data)?;

    let mut state = TextState::new();
    let mut fragments = Vec::new();

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => {
                if let Some(saved) = state.ctm_stack.pop() {
                    state.ctm = saved;
                }
            }
            "cm" if operands.len() >= 6 => {
                let m = read_matrix(operands);
                state.ctm = multiply_matrices(&m, &state.ctm);
            }
            "BT" => {
                state.in_text_block = true;
                state.text_matrix = IDENTITY;
                state.line_matrix = IDENTITY;
            }
            "ET" => state.in_text_block = false,
            "Tf" if operands.len() >= 2 => {
                if let Ok(name) = operands[0].as_name() {
                    state.font = String::from_utf8_lossy(name).to_string();
                }
                if let Some(size) = get_number(&operands[1]) {
                    state.font_size = size;
                }
            }
            "Td" | "TD" if operands.len() >= 2 => {
                let tx = get_number(&operands[0]).unwrap_or(0.0);
                let ty = get_number(&operands[1]).unwrap_or(0.0);
                if op.operator == "TD" {
                    state.leading = Some(-ty);
                }
                state.translate_line(tx, ty);
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(get_number) {
                    state.leading = Some(leading);
                }
            }
            "Tm" if operands.len() >= 6 => {
                state.text_matrix = read_matrix(operands);
                state.line_matrix = state.text_matrix;
            }
            "T*" => state.next_line(),
            "Tj" if state.in_text_block => {
                if let Some(text) = operands
                    .first()
                    .and_then(|o| decode_operand(o, doc, &fonts, &state.font))
                {
                    push_fragment(&mut fragments, &state, text);
                }
            }
            "TJ" if state.in_text_block => {
                if let Some(Ok(array)) = operands.first().map(|o| o.as_array()) {
                    let text: String = array
                        .iter()
                        .filter_map(|item| decode_operand(item, doc, &fonts, &state.font))
                        .collect();
                    push_fragment(&mut fragments, &state, text);
                }
            }
            "'" | "\"" => {
                state.next_line();
                // `"` carries word and character spacing ahead of the string
                if let Some(text) = operands
                    .last()
                    .and_then(|o| decode_operand(o, doc, &fonts, &state.font))
                {
                    push_fragment(&mut fragments, &state, text);
                }
            }
            _ => {}
        }
    }

    Ok(fragments)
}

fn push_fragment(fragments: &mut Vec<Fragment>, state: &TextState, text: String) {
    if text.trim().is_empty() {
        return;
    }
    let (x, y) = state.origin();
    fragments.push(Fragment { text, x, y });
}

fn read_matrix(operands: &[Object]) -> [f32; 6] {
    let mut m = IDENTITY;
    for (i, operand) in operands.iter().take(6).enumerate() {
        if let Some(v) = get_number(operand) {
            m[i] = v;
        }
    }
    m
}

fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Decode a string operand through the current font's encoding
fn decode_operand(
    obj: &Object,
    doc: &Document,
    fonts: &BTreeMap<Vec<u8>, &Dictionary>,
    current_font: &str,
) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };

    if let Some(font_dict) = fonts.get(current_font.as_bytes()) {
        if let Ok(encoding) = font_dict.get_font_encoding(doc) {
            if let Ok(text) = Document::decode_text(&encoding, bytes) {
                return Some(text);
            }
        }
    }

    // UTF-16BE with BOM, else Latin-1
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&utf16));
    }
    Some(bytes.iter().map(|&b| b as char).collect())
}
