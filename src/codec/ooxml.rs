//! Minimal Office Open XML writers.
//!
//! Just enough of WordprocessingML and SpreadsheetML for Word and Excel to
//! open the result: one document body of paragraphs, or one worksheet of
//! inline-string and number cells. Both are zip containers.

use crate::error::RoutineError;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One block of a generated Word document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
}

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Number(i64),
    Text(String),
}

/// Escape text for XML element content and drop characters XML 1.0 forbids.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}

fn package(parts: &[(&str, String)]) -> Result<Vec<u8>, RoutineError> {
    let failed = |e: &dyn std::fmt::Display| {
        RoutineError::processing(format!("could not write office document ({e})"))
    };
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in parts {
        zip.start_file(*name, options).map_err(|e| failed(&e))?;
        zip.write_all(body.as_bytes()).map_err(|e| failed(&e))?;
    }
    let cursor = zip.finish().map_err(|e| failed(&e))?;
    Ok(cursor.into_inner())
}

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const ROOT_RELS_DOCX: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const CONTENT_TYPES_DOCX: &str = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

/// Build a `.docx` from headings and paragraphs.
///
/// Line breaks inside a paragraph become `<w:br/>`.
pub fn write_docx(blocks: &[Block]) -> Result<Vec<u8>, RoutineError> {
    let mut body = String::new();
    for block in blocks {
        let (text, run_props) = match block {
            Block::Heading(t) => (t, r#"<w:rPr><w:b/><w:sz w:val="32"/></w:rPr>"#),
            Block::Paragraph(t) => (t, ""),
        };
        body.push_str("<w:p><w:r>");
        body.push_str(run_props);
        for (i, line) in text.lines().enumerate() {
            if i > 0 {
                body.push_str("<w:br/>");
            }
            body.push_str(r#"<w:t xml:space="preserve">"#);
            body.push_str(&escape(line));
            body.push_str("</w:t>");
        }
        body.push_str("</w:r></w:p>");
    }

    let document = format!(
        r#"{XML_DECL}<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
    );
    package(&[
        ("[Content_Types].xml", format!("{XML_DECL}{CONTENT_TYPES_DOCX}")),
        ("_rels/.rels", format!("{XML_DECL}{ROOT_RELS_DOCX}")),
        ("word/document.xml", document),
    ])
}

const ROOT_RELS_XLSX: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const CONTENT_TYPES_XLSX: &str = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

/// Spreadsheet column letters: 0 → A, 25 → Z, 26 → AA.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Excel caps sheet names at 31 characters and forbids `[]:*?/\`.
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

/// Build a single-sheet `.xlsx`.
pub fn write_xlsx(sheet: &str, rows: &[Vec<Cell>]) -> Result<Vec<u8>, RoutineError> {
    let mut data = String::new();
    for (r, row) in rows.iter().enumerate() {
        let row_number = r + 1;
        data.push_str(&format!(r#"<row r="{row_number}">"#));
        for (c, cell) in row.iter().enumerate() {
            let reference = format!("{}{}", column_name(c), row_number);
            match cell {
                Cell::Number(n) => data.push_str(&format!(r#"<c r="{reference}"><v>{n}</v></c>"#)),
                Cell::Text(t) => data.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    escape(t)
                )),
            }
        }
        data.push_str("</row>");
    }

    let worksheet = format!(
        r#"{XML_DECL}<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{data}</sheetData></worksheet>"#
    );
    let workbook = format!(
        r#"{XML_DECL}<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape(&sheet_name(sheet))
    );
    package(&[
        ("[Content_Types].xml", format!("{XML_DECL}{CONTENT_TYPES_XLSX}")),
        ("_rels/.rels", format!("{XML_DECL}{ROOT_RELS_XLSX}")),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", format!("{XML_DECL}{WORKBOOK_RELS}")),
        ("xl/worksheets/sheet1.xml", worksheet),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut s = String::new();
        file.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn docx_contains_escaped_paragraphs() {
        let bytes = write_docx(&[
            Block::Heading("Page 1".into()),
            Block::Paragraph("Fish & <chips>\nsecond line".into()),
        ])
        .unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        let doc = part(&bytes, "word/document.xml");
        assert!(doc.contains("Fish &amp; &lt;chips&gt;"));
        assert!(doc.contains("<w:br/>"));
        assert!(doc.contains("<w:b/>"));
    }

    #[test]
    fn xlsx_rows_and_cells() {
        let bytes = write_xlsx(
            "Extracted: text?",
            &[
                vec![Cell::Text("Page".into()), Cell::Text("Text".into())],
                vec![Cell::Number(1), Cell::Text("hello".into())],
            ],
        )
        .unwrap();
        let sheet = part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains(r#"<c r="A2"><v>1</v></c>"#));
        assert!(sheet.contains("hello"));
        let workbook = part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains(r#"name="Extracted text""#));
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn control_characters_are_dropped() {
        assert_eq!(escape("a\u{0}b\u{7}c\td"), "abc\td");
    }
}
