use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use crate::document::FileType;
use crate::error::{ExtractionError, Result};
use crate::normalization::clean_extracted;

const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Raw output of a format reader, before it is wrapped into a cached document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub page_boundaries: Vec<usize>,
    pub method: &'static str,
}

impl Extracted {
    fn flat(text: String, method: &'static str) -> Self {
        Self {
            text,
            page_boundaries: Vec::new(),
            method,
        }
    }

    /// Joins pages with `separator`, recording the char offset where each page starts.
    fn paged(pages: Vec<String>, separator: &str, method: &'static str) -> Self {
        let step = separator.chars().count();
        let mut text = String::new();
        let mut page_boundaries = Vec::with_capacity(pages.len());
        let mut offset = 0usize;
        for (idx, page) in pages.iter().enumerate() {
            if idx > 0 {
                text.push_str(separator);
                offset += step;
            }
            page_boundaries.push(offset);
            text.push_str(page);
            offset += page.chars().count();
        }
        Self {
            text,
            page_boundaries,
            method,
        }
    }
}

pub fn extract(path: &Path, file_type: FileType) -> Result<Extracted> {
    match file_type {
        FileType::PlainText | FileType::Markdown => {
            Ok(Extracted::flat(read_text_lossy(path)?, "plain_text"))
        }
        FileType::Csv => extract_csv(path),
        FileType::Json => extract_json(path),
        FileType::Pdf => extract_pdf(path),
        FileType::Docx => {
            let bytes = fs::read(path)?;
            let text =
                extract_docx(&bytes).map_err(|reason| ExtractionError::unreadable(path, reason))?;
            Ok(Extracted::flat(text, "docx_xml"))
        }
        FileType::Xlsx => {
            let bytes = fs::read(path)?;
            let sheets =
                extract_xlsx(&bytes).map_err(|reason| ExtractionError::unreadable(path, reason))?;
            Ok(Extracted::paged(sheets, "\n\n", "xlsx_xml"))
        }
    }
}

fn read_text_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_csv(path: &Path) -> Result<Extracted> {
    let raw = read_text_lossy(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());
    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|err| ExtractionError::unreadable(path, err))?
            .iter()
            .map(|field| field.to_string())
            .collect(),
        None => return Ok(Extracted::flat(String::new(), "csv_rows")),
    };
    let mut lines = vec![format!("Headers: {}", headers.join(", "))];
    for (idx, record) in records.enumerate() {
        let record = record.map_err(|err| ExtractionError::unreadable(path, err))?;
        let pairs: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(col, value)| match headers.get(col) {
                Some(header) => format!("{header}: {value}"),
                None => value.to_string(),
            })
            .collect();
        lines.push(format!("Row {}: {}", idx + 1, pairs.join("; ")));
    }
    Ok(Extracted::flat(lines.join("\n"), "csv_rows"))
}

fn extract_json(path: &Path) -> Result<Extracted> {
    let raw = read_text_lossy(path)?;
    let text = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => serde_json::to_string_pretty(&value)?,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "invalid json, keeping raw text");
            raw
        }
    };
    Ok(Extracted::flat(text, "json_pretty"))
}

fn extract_pdf(path: &Path) -> Result<Extracted> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|err| ExtractionError::unreadable(path, err))?;
    let pages: Vec<String> = pages.iter().map(|page| clean_extracted(page)).collect();
    Ok(Extracted::paged(pages, "\n", "pdf_extract"))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|err| format!("{name}: {err}"))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|err| format!("{name}: {err}"))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("{name} exceeds size limit"));
    }
    Ok(out)
}

/// Body paragraphs first, then every table row as `cell | cell`, blocks separated by a blank line.
fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let xml = read_entry(&mut archive, "word/document.xml")?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut table_rows = Vec::new();
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_depth = 0usize;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|err| err.to_string())?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut paragraph);
                    let text = text.trim();
                    if table_depth > 0 {
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        }
                    } else if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                }
                b"tc" => row.push(std::mem::take(&mut cell)),
                b"tr" => {
                    let cells: Vec<String> =
                        row.drain(..).filter(|value| !value.is_empty()).collect();
                    if !cells.is_empty() {
                        table_rows.push(cells.join(" | "));
                    }
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.to_string()),
            _ => {}
        }
        buf.clear();
    }
    paragraphs.extend(table_rows);
    Ok(paragraphs.join("\n\n"))
}

/// One page per worksheet, headed by the sheet name.
fn extract_xlsx(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let shared = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let titles = if archive.by_name("xl/workbook.xml").is_ok() {
        let xml = read_entry(&mut archive, "xl/workbook.xml")?;
        read_sheet_titles(&xml)?
    } else {
        Vec::new()
    };

    let mut sheet_files: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml"))
        .map(|name| name.to_string())
        .collect();
    sheet_files.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut pages = Vec::with_capacity(sheet_files.len());
    for (idx, file) in sheet_files.iter().enumerate() {
        let xml = read_entry(&mut archive, file)?;
        let rows = read_sheet_rows(&xml, &shared)?;
        let title = titles
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        let mut lines = vec![format!("=== Sheet: {title} ===")];
        lines.extend(rows);
        pages.push(lines.join("\n"));
    }
    Ok(pages)
}

fn read_shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().map_err(|err| err.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_titles(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut titles = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"name" {
                        let value = attr.unescape_value().map_err(|err| err.to_string())?;
                        titles.push(value.into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(titles)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Plain,
}

fn read_sheet_rows(xml: &[u8], shared: &[String]) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut kind = CellKind::Plain;
    let mut capture = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Plain;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Plain,
                            };
                        }
                    }
                    value.clear();
                }
                b"v" => capture = true,
                b"t" if kind == CellKind::Inline => capture = true,
                _ => {}
            },
            Ok(Event::Text(te)) if capture => {
                value.push_str(&te.unescape().map_err(|err| err.to_string())?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    let raw = value.trim();
                    let resolved = match kind {
                        CellKind::Shared => raw
                            .parse::<usize>()
                            .ok()
                            .and_then(|idx| shared.get(idx))
                            .cloned()
                            .unwrap_or_default(),
                        _ => raw.to_string(),
                    };
                    if !resolved.is_empty() {
                        row.push(resolved);
                    }
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" | "));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(err.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn csv_rows_are_labelled_with_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("people.csv");
        fs::write(&path, "name,city\nAda,London\nLin,Taipei\n").unwrap();
        let out = extract(&path, FileType::Csv).unwrap();
        assert_eq!(
            out.text,
            "Headers: name, city\nRow 1: name: Ada; city: London\nRow 2: name: Lin; city: Taipei"
        );
        assert!(out.page_boundaries.is_empty());
    }

    #[test]
    fn json_is_pretty_printed_or_kept_raw() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.json");
        fs::write(&good, r#"{"a":1}"#).unwrap();
        assert_eq!(extract(&good, FileType::Json).unwrap().text, "{\n  \"a\": 1\n}");

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert_eq!(extract(&bad, FileType::Json).unwrap().text, "{not json");
    }

    #[test]
    fn docx_keeps_paragraphs_then_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        let body = concat!(
            r#"<w:document xmlns:w="w"><w:body>"#,
            r#"<w:p><w:r><w:t xml:space="preserve">Quarterly </w:t></w:r><w:r><w:t>memo</w:t></w:r></w:p>"#,
            r#"<w:p></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Q1</w:t></w:r></w:p></w:tc>"#,
            r#"<w:tc><w:p><w:r><w:t>10</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><w:r><w:t>Closing</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#
        );
        write_zip(&path, &[("word/document.xml", body)]);
        let out = extract(&path, FileType::Docx).unwrap();
        assert_eq!(out.text, "Quarterly memo\n\nClosing\n\nQ1 | 10");
    }

    #[test]
    fn xlsx_sheets_become_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_zip(
            &path,
            &[
                (
                    "xl/workbook.xml",
                    r#"<workbook><sheets><sheet name="Revenue" sheetId="1"/><sheet name="Costs" sheetId="2"/></sheets></workbook>"#,
                ),
                (
                    "xl/sharedStrings.xml",
                    r#"<sst><si><t>Region</t></si><si><t>North</t></si></sst>"#,
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    r#"<worksheet><sheetData><row><c t="s"><v>0</v></c><c><v>2024</v></c></row><row><c t="s"><v>1</v></c><c><v>15</v></c></row></sheetData></worksheet>"#,
                ),
                (
                    "xl/worksheets/sheet2.xml",
                    r#"<worksheet><sheetData><row><c t="inlineStr"><is><t>Rent</t></is></c></row></sheetData></worksheet>"#,
                ),
            ],
        );
        let out = extract(&path, FileType::Xlsx).unwrap();
        let first = "=== Sheet: Revenue ===\nRegion | 2024\nNorth | 15";
        assert_eq!(out.text, format!("{first}\n\n=== Sheet: Costs ===\nRent"));
        assert_eq!(out.page_boundaries, vec![0, first.chars().count() + 2]);
    }

    #[test]
    fn broken_archives_are_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            extract(&path, FileType::Docx),
            Err(ExtractionError::Unreadable { .. })
        ));
    }
}
