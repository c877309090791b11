//! Rich content blocks and literal before/after modification.
//!
//! Modification works on a flat text view of the blocks: text blocks joined by newlines, each
//! table or error block replaced by a placeholder line. After substitution the text is split back
//! into blocks at placeholder lines. Nothing here keeps state between calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReferenceMarker {
    /// Byte offset into the owning text block.
    pub start: usize,
    pub end: usize,
    /// Free-form description of what the marked span cites, e.g. `CSU-1/2012 art. 3`.
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub references: Vec<ReferenceMarker>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TableCell {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TableRow {
    #[serde(default)]
    pub header: bool,
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Table {
    pub number: u32,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Table(Table),
    /// Extraction failure kept in place of content that could not be parsed.
    Error { message: String },
}

impl ContentBlock {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextBlock { text: text.into(), references: Vec::new() })
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ModificationError {
    #[error("the text to replace is empty")]
    EmptyBefore,
    #[error("the text to replace was not found verbatim")]
    NotFound,
    #[error("table {0} does not match the current content")]
    TableMismatch(u32),
}

#[derive(Debug, Default)]
struct Flattened {
    text: String,
    markers: Vec<ReferenceMarker>,
    tables: BTreeMap<u32, Table>,
    errors: Vec<String>,
}

fn table_placeholder(number: u32) -> String {
    format!("[[table {number}]]")
}

fn error_placeholder(index: usize) -> String {
    format!("[[error {index}]]")
}

fn flatten(blocks: &[ContentBlock], error_base: usize) -> Flattened {
    let mut flat = Flattened::default();
    for block in blocks {
        let (segment, markers) = match block {
            ContentBlock::Text(text) if text.text.is_empty() => continue,
            ContentBlock::Text(text) => (text.text.clone(), text.references.as_slice()),
            ContentBlock::Table(table) => {
                flat.tables.insert(table.number, table.clone());
                (table_placeholder(table.number), &[][..])
            }
            ContentBlock::Error { message } => {
                let index = error_base + flat.errors.len();
                flat.errors.push(message.clone());
                (error_placeholder(index), &[][..])
            }
        };
        if !flat.text.is_empty() {
            flat.text.push('\n');
        }
        let offset = flat.text.len();
        flat.text.push_str(&segment);
        flat.markers.extend(markers.iter().map(|marker| ReferenceMarker {
            start: marker.start + offset,
            end: marker.end + offset,
            target: marker.target.clone(),
        }));
    }
    flat
}

/// Replaces the first verbatim occurrence of `before` with `after` inside `current`.
///
/// Tables named in `before` must equal the current table with the same number. Markers outside
/// the replaced span are kept (shifted); markers overlapping it are dropped.
///
/// # Errors
/// Returns `ModificationError` when `before` is empty, absent, or names a table that differs.
pub fn modify_blocks(
    current: &[ContentBlock],
    before: &[ContentBlock],
    after: &[ContentBlock],
) -> Result<Vec<ContentBlock>, ModificationError> {
    let current = flatten(current, 0);
    let before = flatten(before, 0);
    let after = flatten(after, current.errors.len());

    if before.text.trim().is_empty() {
        return Err(ModificationError::EmptyBefore);
    }
    let start = current.text.find(&before.text).ok_or(ModificationError::NotFound)?;
    for (number, table) in &before.tables {
        if current.tables.get(number).map(|existing| &existing.rows) != Some(&table.rows) {
            return Err(ModificationError::TableMismatch(*number));
        }
    }

    let end = start + before.text.len();
    let new_end = start + after.text.len();
    let mut text = String::with_capacity(current.text.len() + after.text.len());
    text.push_str(&current.text[..start]);
    text.push_str(&after.text);
    text.push_str(&current.text[end..]);

    let mut markers: Vec<ReferenceMarker> = current
        .markers
        .into_iter()
        .filter_map(|marker| {
            if marker.end <= start {
                Some(marker)
            } else if marker.start >= end {
                Some(ReferenceMarker {
                    start: marker.start - end + new_end,
                    end: marker.end - end + new_end,
                    target: marker.target,
                })
            } else {
                None
            }
        })
        .collect();
    markers.extend(after.markers.into_iter().map(|marker| ReferenceMarker {
        start: marker.start + start,
        end: marker.end + start,
        target: marker.target,
    }));
    markers.sort_by_key(|marker| (marker.start, marker.end));

    let mut tables = current.tables;
    tables.extend(after.tables);
    let mut errors = current.errors;
    errors.extend(after.errors);

    Ok(reparse(&text, &markers, &tables, &errors))
}

fn placeholder_block(line: &str, tables: &BTreeMap<u32, Table>, errors: &[String]) -> Option<ContentBlock> {
    let inner = line.trim().strip_prefix("[[")?.strip_suffix("]]")?;
    if let Some(number) = inner.strip_prefix("table ") {
        let number = number.parse::<u32>().ok()?;
        return tables.get(&number).cloned().map(ContentBlock::Table);
    }
    let index = inner.strip_prefix("error ")?.parse::<usize>().ok()?;
    errors.get(index).map(|message| ContentBlock::Error { message: message.clone() })
}

fn reparse(
    text: &str,
    markers: &[ReferenceMarker],
    tables: &BTreeMap<u32, Table>,
    errors: &[String],
) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut segment: Option<(usize, usize)> = None;
    let mut offset = 0;
    for line in text.split('\n') {
        let line_start = offset;
        let line_end = offset + line.len();
        offset = line_end + 1;
        match placeholder_block(line, tables, errors) {
            Some(block) => {
                if let Some((start, end)) = segment.take() {
                    push_text(&mut blocks, text, start, end, markers);
                }
                blocks.push(block);
            }
            None => {
                segment = Some(segment.map_or((line_start, line_end), |(start, _)| (start, line_end)));
            }
        }
    }
    if let Some((start, end)) = segment {
        push_text(&mut blocks, text, start, end, markers);
    }
    blocks
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: &str, start: usize, end: usize, markers: &[ReferenceMarker]) {
    let raw = &text[start..end];
    let leading = raw.len() - raw.trim_start_matches('\n').len();
    let trimmed = raw.trim_matches('\n');
    if trimmed.is_empty() {
        return;
    }
    let start = start + leading;
    let end = start + trimmed.len();
    let references = markers
        .iter()
        .filter(|marker| marker.start >= start && marker.end <= end)
        .map(|marker| ReferenceMarker {
            start: marker.start - start,
            end: marker.end - start,
            target: marker.target.clone(),
        })
        .collect();
    blocks.push(ContentBlock::Text(TextBlock { text: trimmed.to_string(), references }));
}

/// Plain rendering of content: text as-is, table rows as ` | `-separated cells.
#[must_use]
pub fn plain_text(blocks: &[ContentBlock]) -> String {
    let mut lines = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text(text) => lines.push(text.text.clone()),
            ContentBlock::Table(table) => lines.extend(
                table
                    .rows
                    .iter()
                    .map(|row| row.cells.iter().map(|cell| cell.text.as_str()).collect::<Vec<_>>().join(" | ")),
            ),
            ContentBlock::Error { message } => lines.push(format!("[{message}]")),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(number: u32, cells: &[&str]) -> ContentBlock {
        ContentBlock::Table(Table {
            number,
            rows: vec![TableRow {
                header: false,
                cells: cells.iter().map(|text| TableCell { text: (*text).to_string() }).collect(),
            }],
        })
    }

    fn modified(current: &[ContentBlock], before: &str, after: &str) -> Vec<ContentBlock> {
        match modify_blocks(current, &[ContentBlock::text(before)], &[ContentBlock::text(after)]) {
            Ok(blocks) => blocks,
            Err(err) => panic!("modification should apply: {err}"),
        }
    }

    // Test IDs: TCONT-001
    #[test]
    fn literal_substitution_replaces_first_occurrence_only() {
        let blocks = modified(&[ContentBlock::text("Normative X and X")], "X", "Y");
        assert_eq!(blocks, vec![ContentBlock::text("Normative Y and X")]);
    }

    // Test IDs: TCONT-002
    #[test]
    fn missing_or_empty_before_text_fails() {
        let current = [ContentBlock::text("Normative")];
        assert_eq!(
            modify_blocks(&current, &[ContentBlock::text("absent")], &[ContentBlock::text("Y")]),
            Err(ModificationError::NotFound)
        );
        assert_eq!(
            modify_blocks(&current, &[ContentBlock::text("  ")], &[ContentBlock::text("Y")]),
            Err(ModificationError::EmptyBefore)
        );
    }

    // Test IDs: TCONT-003
    #[test]
    fn tables_survive_text_edits_and_can_be_replaced() {
        let current = vec![ContentBlock::text("Fees:"), table(1, &["A", "10"]), ContentBlock::text("Paid yearly.")];
        let blocks = modified(&current, "yearly", "monthly");
        assert_eq!(blocks, vec![ContentBlock::text("Fees:"), table(1, &["A", "10"]), ContentBlock::text("Paid monthly.")]);

        let replaced = modify_blocks(&current, &[table(1, &["A", "10"])], &[table(1, &["A", "20"])]);
        assert_eq!(
            replaced,
            Ok(vec![ContentBlock::text("Fees:"), table(1, &["A", "20"]), ContentBlock::text("Paid yearly.")])
        );

        let stale = modify_blocks(&current, &[table(1, &["A", "99"])], &[table(1, &["A", "20"])]);
        assert_eq!(stale, Err(ModificationError::TableMismatch(1)));
    }

    // Test IDs: TCONT-004
    #[test]
    fn reference_markers_shift_and_overlapping_ones_drop() {
        let current = vec![ContentBlock::Text(TextBlock {
            text: "See art. 3 and art. 9 of CSU-1/2012".to_string(),
            references: vec![
                ReferenceMarker { start: 4, end: 10, target: "art. 3".to_string() },
                ReferenceMarker { start: 15, end: 21, target: "art. 9".to_string() },
                ReferenceMarker { start: 25, end: 35, target: "CSU-1/2012".to_string() },
            ],
        })];
        let blocks = modified(&current, "art. 9", "article nine");
        let ContentBlock::Text(text) = &blocks[0] else {
            panic!("expected a text block, got {blocks:?}");
        };
        assert_eq!(text.text, "See art. 3 and article nine of CSU-1/2012");
        assert_eq!(
            text.references,
            vec![
                ReferenceMarker { start: 4, end: 10, target: "art. 3".to_string() },
                ReferenceMarker { start: 31, end: 41, target: "CSU-1/2012".to_string() },
            ]
        );
        assert_eq!(&text.text[31..41], "CSU-1/2012");
    }

    // Test IDs: TCONT-005
    #[test]
    fn adjacent_text_blocks_merge_and_error_blocks_are_kept() {
        let current = vec![
            ContentBlock::text("First."),
            ContentBlock::text(""),
            ContentBlock::text("Second."),
            ContentBlock::Error { message: "unreadable table".to_string() },
        ];
        let blocks = modified(&current, "Second", "Last");
        assert_eq!(
            blocks,
            vec![ContentBlock::text("First.\nLast."), ContentBlock::Error { message: "unreadable table".to_string() }]
        );
        assert_eq!(plain_text(&blocks), "First.\nLast.\n[unreadable table]");
    }
}
