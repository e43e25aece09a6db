//! Per-format parsing: turns raw upload bytes into normalized text plus
//! coarse content-shape flags (`spec.md` §4.3 "Parsing").
use pulldown_cmark::{Event, Parser as CmarkParser, Tag, TagEnd};

use super::types::ParsedDocument;
use crate::model::ContentType;

/// Parse `bytes` according to `file_type` (a lower-cased extension without
/// the leading dot, e.g. `"txt"`, `"csv"`, `"md"`).
pub fn parse(file_type: &str, bytes: &[u8]) -> ParsedDocument {
    match file_type {
        "csv" => parse_csv(bytes),
        "md" | "markdown" => parse_markdown(bytes),
        _ => parse_text(bytes),
    }
}

/// Decode bytes as UTF-8, replacing invalid sequences rather than failing.
fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_text(bytes: &[u8]) -> ParsedDocument {
    let text = decode_lossy(bytes);
    let has_links = text.contains("http://") || text.contains("https://");
    ParsedDocument {
        text,
        content_type: ContentType::Text,
        has_tables: false,
        has_images: false,
        has_links,
    }
}

/// Flatten each CSV row into `col=val; col2=val2` lines, preserving the
/// header row as the first line so column names stay attached to every chunk.
fn parse_csv(bytes: &[u8]) -> ParsedDocument {
    let decoded = decode_lossy(bytes);
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(decoded.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(record) => record.iter().map(|h| h.to_string()).collect(),
        Err(_) => {
            return ParsedDocument {
                text: decoded,
                content_type: ContentType::Structured,
                has_tables: true,
                has_images: false,
                has_links: false,
            };
        }
    };

    let mut lines = Vec::new();
    for result in reader.records() {
        let Ok(record) = result else { continue };
        let row: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(col, val)| format!("{col}={val}"))
            .collect();
        lines.push(row.join("; "));
    }

    ParsedDocument {
        text: lines.join("\n"),
        content_type: ContentType::Structured,
        has_tables: true,
        has_images: false,
        has_links: false,
    }
}

/// Render Markdown to plain text: headers become `## Heading` lines, list
/// items are flattened with a leading bullet, tables are serialized row by
/// row with the header repeated on each row, and inline code/links keep
/// their textual content.
fn parse_markdown(bytes: &[u8]) -> ParsedDocument {
    let source = decode_lossy(bytes);
    let parser = CmarkParser::new(&source);

    let mut out = String::new();
    let mut has_tables = false;
    let mut has_images = false;
    let mut has_links = false;

    let mut heading_depth: Option<u8> = None;
    let mut in_table_head = false;
    let mut table_headers: Vec<String> = Vec::new();
    let mut table_row: Vec<String> = Vec::new();
    let mut cell_buf = String::new();
    let mut list_depth = 0usize;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading_depth = Some(level as u8);
                out.push_str(&"#".repeat(level as usize));
                out.push(' ');
            }
            Event::End(TagEnd::Heading(_)) => {
                heading_depth = None;
                out.push('\n');
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => list_depth = list_depth.saturating_sub(1),
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                out.push_str("- ");
            }
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::Start(Tag::Table(_)) => {
                has_tables = true;
            }
            Event::Start(Tag::TableHead) => in_table_head = true,
            Event::End(TagEnd::TableHead) => {
                in_table_head = false;
                out.push_str(&table_headers.join(" | "));
                out.push('\n');
            }
            Event::Start(Tag::TableCell) => cell_buf.clear(),
            Event::End(TagEnd::TableCell) => {
                if in_table_head {
                    table_headers.push(cell_buf.trim().to_string());
                } else {
                    table_row.push(cell_buf.trim().to_string());
                }
            }
            Event::End(TagEnd::TableRow) => {
                if !table_row.is_empty() {
                    // Repeat the header so each flattened row stays self-describing.
                    let zipped: Vec<String> = table_headers
                        .iter()
                        .zip(table_row.iter())
                        .map(|(h, v)| format!("{h}={v}"))
                        .collect();
                    out.push_str(&zipped.join("; "));
                    out.push('\n');
                    table_row.clear();
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                has_links = true;
                out.push('[');
                let _ = &dest_url;
            }
            Event::End(TagEnd::Link) => out.push(']'),
            Event::Start(Tag::Image { .. }) => {
                has_images = true;
            }
            Event::Text(text) | Event::Code(text) => {
                if in_table_head || !table_headers.is_empty() && table_row.len() < table_headers.len() {
                    cell_buf.push_str(&text);
                } else {
                    out.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Table) => out.push('\n'),
            _ => {}
        }
        let _ = heading_depth;
    }

    let content_type = if has_tables { ContentType::Mixed } else { ContentType::Text };

    ParsedDocument { text: out, content_type, has_tables, has_images, has_links }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text_and_detects_links() {
        let parsed = parse("txt", b"see https://example.com for details");
        assert_eq!(parsed.content_type, ContentType::Text);
        assert!(parsed.has_links);
        assert!(!parsed.has_tables);
    }

    #[test]
    fn parses_csv_with_header_prefixed_rows() {
        let csv = b"name,age\nAda,36\nGrace,85\n";
        let parsed = parse("csv", csv);
        assert_eq!(parsed.content_type, ContentType::Structured);
        assert!(parsed.has_tables);
        assert!(parsed.text.contains("name=Ada"));
        assert!(parsed.text.contains("age=36"));
    }

    #[test]
    fn parses_markdown_headings_and_lists() {
        let md = b"## Title\n\n- one\n- two\n";
        let parsed = parse("md", md);
        assert!(parsed.text.contains("## Title"));
        assert!(parsed.text.contains("- one"));
    }

    #[test]
    fn parses_markdown_tables_with_repeated_header() {
        let md = b"| a | b |\n|---|---|\n| 1 | 2 |\n";
        let parsed = parse("md", md);
        assert!(parsed.has_tables);
        assert!(parsed.text.contains("a=1"));
        assert!(parsed.text.contains("b=2"));
    }
}
