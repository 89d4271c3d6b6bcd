//! CSV input and output.
//!
//! Brandwatch exports carry a block of metadata lines above the real header,
//! so the header is the first of the leading rows that names a text column.
//! Every original column is written back unchanged; `Sentiment` (and
//! `Probs` when requested) are added or overwritten.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use opinio_core::{AppError, ExternalRefs, Mention, Sentiment};

/// Accepted names for the text column, in order of preference.
pub const TEXT_COLUMNS: [&str; 2] = ["Full Text", "Content"];
pub const SENTIMENT_COLUMN: &str = "Sentiment";
pub const PROBABILITY_COLUMN: &str = "Probs";
pub const QUERY_ID_COLUMN: &str = "Query Id";
pub const RESOURCE_ID_COLUMN: &str = "Resource Id";
pub const DATE_COLUMN: &str = "Date";
pub const COMPANY_COLUMN: &str = "AnalyzedCompany";
pub const TAGS_COLUMN: &str = "BW_Tags";

/// Rows searched for the header line.
const HEADER_SEARCH_ROWS: usize = 20;

/// A CSV file held in memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    text_column: usize,
}

impl Dataset {
    pub fn read_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to read {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut leading = Vec::new();
        let mut header = None;
        for record in reader.records() {
            let record = record?;
            if text_column_of(&record).is_some() {
                header = Some(record);
                break;
            }
            leading.push(record);
            if leading.len() >= HEADER_SEARCH_ROWS {
                break;
            }
        }

        let headers = header.ok_or_else(|| {
            AppError::MissingColumn(format!("'{}' or '{}'", TEXT_COLUMNS[0], TEXT_COLUMNS[1]))
        })?;
        if !leading.is_empty() {
            tracing::info!(skipped = leading.len(), "Skipped metadata rows above the header");
        }

        let text_column = text_column_of(&headers).unwrap_or_default();
        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            headers,
            rows,
            text_column,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Fails with [`AppError::MissingColumn`] when `name` is not a header.
    pub fn require_column(&self, name: &str) -> Result<(), AppError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(AppError::MissingColumn(name.to_string()))
        }
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    fn cell<'a>(&self, row: &'a StringRecord, column: Option<usize>) -> Option<&'a str> {
        column
            .and_then(|c| row.get(c))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Converts every row into a mention.
    ///
    /// An existing `Sentiment` column is parsed, so a classified file can be
    /// uploaded without running the model again.
    pub fn mentions(&self) -> Vec<Mention> {
        let query_id = self.column(QUERY_ID_COLUMN);
        let resource_id = self.column(RESOURCE_ID_COLUMN);
        let date = self.column(DATE_COLUMN);
        let company = self.column(COMPANY_COLUMN);
        let tags = self.column(TAGS_COLUMN);
        let sentiment = self.column(SENTIMENT_COLUMN);
        let probability = self.column(PROBABILITY_COLUMN);

        self.rows
            .iter()
            .map(|row| {
                let refs = match (
                    self.cell(row, query_id).and_then(parse_query_id),
                    self.cell(row, resource_id),
                ) {
                    (Some(query_id), Some(resource_id)) => Some(ExternalRefs {
                        query_id,
                        resource_id: resource_id.to_string(),
                    }),
                    _ => None,
                };

                Mention {
                    text: row.get(self.text_column).map(str::to_string),
                    sentiment: self
                        .cell(row, sentiment)
                        .map(Sentiment::parse_label)
                        .unwrap_or_default(),
                    probability: self.cell(row, probability).and_then(|p| p.parse().ok()),
                    external_refs: refs,
                    date: self.cell(row, date).map(str::to_string),
                    analyzed_company: self.cell(row, company).map(str::to_string),
                    tags: self.cell(row, tags).map(split_tags).unwrap_or_default(),
                    ..Default::default()
                }
            })
            .collect()
    }

    /// Writes the rows that were classified, with their results.
    ///
    /// Rows with empty text were dropped by the pipeline, so they are left
    /// out here too; `mentions` lines up with the remaining rows in order.
    pub fn write_results<W: Write>(
        &self,
        writer: W,
        mentions: &[Mention],
        with_probability: bool,
    ) -> Result<()> {
        let kept: Vec<&StringRecord> = self
            .rows
            .iter()
            .filter(|row| {
                row.get(self.text_column)
                    .is_some_and(|t| !t.trim().is_empty())
            })
            .collect();
        if kept.len() != mentions.len() {
            anyhow::bail!(
                "{} results for {} rows with text",
                mentions.len(),
                kept.len()
            );
        }

        let mut headers = self.headers.clone();
        let sentiment_column = self.column(SENTIMENT_COLUMN).unwrap_or_else(|| {
            headers.push_field(SENTIMENT_COLUMN);
            headers.len() - 1
        });
        let probability_column = with_probability.then(|| {
            self.column(PROBABILITY_COLUMN).unwrap_or_else(|| {
                headers.push_field(PROBABILITY_COLUMN);
                headers.len() - 1
            })
        });

        let mut out = WriterBuilder::new().flexible(true).from_writer(writer);
        out.write_record(&headers)?;
        for (row, mention) in kept.into_iter().zip(mentions) {
            let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
            fields.resize(headers.len(), String::new());
            fields[sentiment_column] = mention.sentiment.to_string();
            if let Some(column) = probability_column {
                fields[column] = mention
                    .probability
                    .map(|p| format!("{:.6}", p))
                    .unwrap_or_default();
            }
            out.write_record(&fields)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_results_path(
        &self,
        path: &Path,
        mentions: &[Mention],
        with_probability: bool,
    ) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        self.write_results(file, mentions, with_probability)
    }
}

fn text_column_of(record: &StringRecord) -> Option<usize> {
    TEXT_COLUMNS
        .iter()
        .find_map(|name| record.iter().position(|field| field.trim() == *name))
}

/// Accepts `1998281989` as well as the `1998281989.0` spreadsheets produce.
fn parse_query_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
