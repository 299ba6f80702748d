//! Streaming walker over `word/document.xml`.
//!
//! Yields top-level paragraphs and tables in reading order. Text inside
//! drawings, text boxes, embedded objects, and nested tables does not belong
//! to the surrounding paragraph or cell.

use quick_xml::Reader;
use quick_xml::events::Event;

use docqa_shared::{DocQaError, Result};

/// Delimiter placed between cells of a serialized table row.
pub const CELL_DELIMITER: &str = " | ";

/// Elements whose text never belongs to the enclosing paragraph.
const SKIPPED_ELEMENTS: &[&[u8]] = &[b"drawing", b"pict", b"object", b"txbxContent"];

/// A top-level body element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyItem {
    /// Trimmed, non-empty paragraph text.
    Paragraph(String),
    /// Rows of trimmed cell text.
    Table(Vec<Vec<String>>),
}

/// Serialize table rows: cells joined by [`CELL_DELIMITER`], rows by newline.
pub fn serialize_table(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| row.join(CELL_DELIMITER))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Walk the document body and collect paragraphs and tables in order.
pub fn walk_body(xml: &str) -> Result<Vec<BodyItem>> {
    let mut reader = Reader::from_str(xml);
    let mut walker = Walker::default();
    let mut items = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => walker.open(e.local_name().as_ref()),
            Ok(Event::Empty(e)) => walker.empty(e.local_name().as_ref()),
            Ok(Event::End(e)) => {
                if let Some(item) = walker.close(e.local_name().as_ref()) {
                    items.push(item);
                }
            }
            Ok(Event::Text(e)) => {
                if walker.capturing() {
                    let text = e.unescape().map_err(|err| {
                        DocQaError::parse(format!("invalid text in document.xml: {err}"))
                    })?;
                    walker.push_text(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DocQaError::parse(format!(
                    "malformed document.xml at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(items)
}

#[derive(Debug, Default)]
struct Walker {
    in_body: bool,
    in_run: bool,
    in_text: bool,
    skip_depth: usize,
    table_depth: usize,
    /// Paragraph being collected and the table depth it started at.
    paragraph: Option<(String, usize)>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Vec<String>,
}

impl Walker {
    fn open(&mut self, name: &[u8]) {
        if name == b"body" {
            self.in_body = true;
            return;
        }
        if !self.in_body {
            return;
        }
        if SKIPPED_ELEMENTS.contains(&name) {
            self.skip_depth += 1;
            return;
        }
        if self.skip_depth > 0 {
            return;
        }

        match name {
            b"tbl" => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.rows.clear();
                }
            }
            b"tr" if self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => self.cell.clear(),
            b"p" if self.table_depth <= 1 => {
                self.paragraph = Some((String::new(), self.table_depth));
            }
            b"r" => self.in_run = true,
            b"t" => self.in_text = true,
            _ => {}
        }
    }

    fn empty(&mut self, name: &[u8]) {
        if !self.in_body || self.skip_depth > 0 {
            return;
        }
        match name {
            b"tab" if self.in_run => self.push_raw('\t'),
            b"br" | b"cr" if self.in_run => self.push_raw('\n'),
            b"tc" if self.table_depth == 1 => self.row.push(String::new()),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) -> Option<BodyItem> {
        if name == b"body" {
            self.in_body = false;
            return None;
        }
        if !self.in_body {
            return None;
        }
        if SKIPPED_ELEMENTS.contains(&name) {
            self.skip_depth = self.skip_depth.saturating_sub(1);
            return None;
        }
        if self.skip_depth > 0 {
            return None;
        }

        match name {
            b"t" => self.in_text = false,
            b"r" => self.in_run = false,
            b"p" => return self.finish_paragraph(),
            b"tc" if self.table_depth == 1 => {
                let text = self.cell.join("\n").trim().to_string();
                self.row.push(text);
                self.cell.clear();
            }
            b"tr" if self.table_depth == 1 => {
                self.rows.push(std::mem::take(&mut self.row));
            }
            b"tbl" => {
                let finished = (self.table_depth == 1)
                    .then(|| BodyItem::Table(std::mem::take(&mut self.rows)));
                self.table_depth = self.table_depth.saturating_sub(1);
                return finished;
            }
            _ => {}
        }
        None
    }

    fn finish_paragraph(&mut self) -> Option<BodyItem> {
        let level = self.paragraph.as_ref().map(|(_, level)| *level)?;
        if level != self.table_depth {
            return None;
        }
        let (text, _) = self.paragraph.take()?;
        match level {
            0 => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| BodyItem::Paragraph(trimmed.to_string()))
            }
            _ => {
                self.cell.push(text);
                None
            }
        }
    }

    fn capturing(&self) -> bool {
        self.in_text && self.in_run && self.skip_depth == 0 && self.paragraph_active()
    }

    fn paragraph_active(&self) -> bool {
        matches!(&self.paragraph, Some((_, level)) if *level == self.table_depth)
    }

    fn push_text(&mut self, text: &str) {
        if let Some((buf, _)) = self.paragraph.as_mut() {
            buf.push_str(text);
        }
    }

    fn push_raw(&mut self, c: char) {
        if self.paragraph_active() {
            if let Some((buf, _)) = self.paragraph.as_mut() {
                buf.push(c);
            }
        }
    }
}
