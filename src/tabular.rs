//! Row extraction for tabular documents.
//!
//! CSV files yield a flat column schema plus one JSON object per row.
//! Workbooks yield a per-sheet schema. Markdown tables found in extracted
//! text are also turned into rows, but without a schema: headers derived
//! from scanned documents are too unreliable to promote to metadata.

use std::collections::BTreeMap;

use crate::extract::{self, MIME_CSV, MIME_XLSX};
use crate::models::Schema;

pub struct TabularData {
    pub schema: Schema,
    pub rows: Vec<serde_json::Value>,
}

pub fn is_tabular(media_type: &str) -> bool {
    media_type == MIME_CSV || media_type == MIME_XLSX
}

/// Extract schema and rows from a tabular document. Returns `None` when
/// the bytes cannot be parsed or carry no rows; the document still flows
/// through the normal chunking path.
pub fn extract_tabular(bytes: &[u8], media_type: &str) -> Option<TabularData> {
    match media_type {
        MIME_CSV => {
            let text = String::from_utf8_lossy(bytes);
            let (headers, records) = parse_csv(&text);
            if headers.is_empty() {
                return None;
            }
            let rows = records
                .into_iter()
                .map(|rec| row_object(&headers, &rec))
                .collect();
            Some(TabularData {
                schema: Schema::Columns(headers),
                rows,
            })
        }
        MIME_XLSX => {
            let sheets = extract::parse_xlsx_sheets(bytes).ok()?;
            let mut schema_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut rows = Vec::new();
            for sheet in sheets {
                let mut iter = sheet.rows.into_iter();
                let Some(headers) = iter.next() else {
                    continue;
                };
                for rec in iter {
                    let mut obj = row_object(&headers, &rec);
                    if let Some(map) = obj.as_object_mut() {
                        map.insert(
                            "sheet".to_string(),
                            serde_json::Value::String(sheet.name.clone()),
                        );
                    }
                    rows.push(obj);
                }
                schema_map.insert(sheet.name, headers);
            }
            if schema_map.is_empty() {
                return None;
            }
            Some(TabularData {
                schema: Schema::PerSheet(schema_map),
                rows,
            })
        }
        _ => None,
    }
}

fn row_object(headers: &[String], record: &[String]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (i, header) in headers.iter().enumerate() {
        let value = record.get(i).cloned().unwrap_or_default();
        map.insert(header.clone(), serde_json::Value::String(value));
    }
    serde_json::Value::Object(map)
}

/// Quote-aware CSV parser: handles quoted fields, embedded commas and
/// newlines, and doubled-quote escapes. Returns (headers, records).
pub fn parse_csv(text: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => record.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    record.push(std::mem::take(&mut field));
                    if record.iter().any(|f| !f.is_empty()) {
                        records.push(std::mem::take(&mut record));
                    } else {
                        record.clear();
                    }
                }
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if record.iter().any(|f| !f.is_empty()) {
            records.push(record);
        }
    }

    let mut iter = records.into_iter();
    let headers = iter
        .next()
        .map(|h| h.into_iter().map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    (headers, iter.collect())
}

/// Parse every pipe table in `text` into row objects keyed by the table's
/// header cells. Used for markdown documents and OCR output.
pub fn markdown_table_rows(text: &str) -> Vec<serde_json::Value> {
    let lines: Vec<&str> = text.lines().collect();
    let mut rows = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if i + 1 < lines.len() && is_pipe_row(lines[i]) && is_pipe_separator(lines[i + 1]) {
            let headers = split_pipe_row(lines[i]);
            i += 2;
            while i < lines.len() && is_pipe_row(lines[i]) {
                let cells = split_pipe_row(lines[i]);
                rows.push(row_object(&headers, &cells));
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    rows
}

fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_pipe_separator(line: &str) -> bool {
    let t = line.trim();
    is_pipe_row(t) && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_pipe_row(line: &str) -> Vec<String> {
    let t = line.trim().trim_matches('|');
    t.split('|').map(|c| c.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_basic_schema_and_rows() {
        let data = extract_tabular(b"name,age\nalice,30\nbob,25\n", MIME_CSV).unwrap();
        assert_eq!(
            data.schema,
            Schema::Columns(vec!["name".to_string(), "age".to_string()])
        );
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0]["name"], "alice");
        assert_eq!(data.rows[1]["age"], "25");
    }

    #[test]
    fn csv_quoted_fields_with_commas_and_newlines() {
        let (headers, records) =
            parse_csv("a,b\n\"one, two\",\"line\nbreak\"\n\"he said \"\"hi\"\"\",x\n");
        assert_eq!(headers, vec!["a", "b"]);
        assert_eq!(records[0], vec!["one, two", "line\nbreak"]);
        assert_eq!(records[1], vec!["he said \"hi\"", "x"]);
    }

    #[test]
    fn empty_csv_yields_none() {
        assert!(extract_tabular(b"", MIME_CSV).is_none());
    }

    #[test]
    fn markdown_tables_become_rows_without_schema() {
        let text = "intro\n\n| name | role |\n|------|------|\n| ada | engineer |\n| grace | admiral |\n\noutro";
        let rows = markdown_table_rows(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "ada");
        assert_eq!(rows[1]["role"], "admiral");
    }

    #[test]
    fn non_tabular_media_type_yields_none() {
        assert!(extract_tabular(b"hello", "application/pdf").is_none());
    }
}
