//! Record store and tokenized corpus I/O.
//!
//! The record store is a headed CSV with a rating column (`rating`, or the
//! legacy `rate`) and a `comment` column. Reading goes through polars
//! first; if polars rejects the file (stray quotes, ragged rows), the store
//! is re-read line by line, splitting each row on the leading fields and
//! treating the rest of the line as the comment.

use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, ResultExt};
use crate::text::sanitize_comment;
use crate::types::{LoadReport, Record, Token, TokenizedRecord};

/// Accepted rating column names, in preference order.
pub const RATING_COLUMNS: &[&str] = &["rating", "rate"];
pub const COMMENT_COLUMN: &str = "comment";
pub const TOKENS_COLUMN: &str = "tokens";
pub const ID_COLUMN: &str = "id";

/// Ratings outside this range are malformed rows.
pub const RATING_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// How many skipped line numbers to keep for reporting.
const SKIPPED_LINES_KEPT: usize = 20;

/// Reads and writes `rating,comment` record stores.
pub struct RecordStore;

impl RecordStore {
    /// Read a record store, skipping malformed rows up to the configured
    /// tolerance and applying the `max_records` cap.
    pub fn read(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<LoadReport> {
        let path = path.as_ref();
        info!("Loading records from: {}", path.display());

        let report = match read_string_frame(path) {
            Ok(df) => Self::from_frame(&df, config.max_malformed_rows, config.max_records)?,
            Err(e) => {
                debug!("CSV reader rejected {}: {}", path.display(), e);
                let content = fs::read_to_string(path)
                    .context(format!("reading record store {}", path.display()))?;
                Self::from_lines(&content, config.max_malformed_rows, config.max_records)?
            }
        };

        if report.skipped > 0 {
            warn!(
                "Skipped {} malformed rows (first at lines {:?})",
                report.skipped, report.skipped_lines
            );
        }
        info!("Loaded {} records", report.records.len());
        Ok(report)
    }

    /// Parse records out of an already loaded frame.
    pub fn from_frame(
        df: &DataFrame,
        max_malformed_rows: usize,
        max_records: usize,
    ) -> Result<LoadReport> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let (rating_name, comment_name) = locate_columns(&names)?;

        let ratings = df.column(rating_name)?.cast(&DataType::String)?;
        let comments = df.column(comment_name)?.cast(&DataType::String)?;

        let mut collector = RowCollector::new(max_malformed_rows);
        for (row, (rating, comment)) in ratings.str()?.into_iter().zip(comments.str()?).enumerate()
        {
            // header is line 1
            collector.push(row + 2, rating, comment)?;
        }
        Ok(collector.finish(max_records))
    }

    /// Parse records from raw CSV text without a CSV engine.
    ///
    /// The comment column absorbs any extra commas when it is the last
    /// column, which is how hand-exported stores usually break.
    pub fn from_lines(
        content: &str,
        max_malformed_rows: usize,
        max_records: usize,
    ) -> Result<LoadReport> {
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| PipelineError::Configuration("record store is empty".to_string()))?;
        let names: Vec<String> = header.split(',').map(|s| s.to_string()).collect();
        let (rating_name, comment_name) = locate_columns(&names)?;
        let rating_at = position(&names, rating_name);
        let comment_at = position(&names, comment_name);
        let comment_is_last = comment_at + 1 == names.len();

        let mut collector = RowCollector::new(max_malformed_rows);
        for (i, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let rating = fields.get(rating_at).copied();
            let comment = if comment_is_last && fields.len() > comment_at {
                Some(fields[comment_at..].join(","))
            } else {
                fields.get(comment_at).map(|s| s.to_string())
            };
            collector.push(i + 2, rating, comment.as_deref())?;
        }
        Ok(collector.finish(max_records))
    }

    /// Write records as a `rating,comment` CSV.
    pub fn write(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
        let path = path.as_ref();
        let ratings: Vec<i32> = records.iter().map(|r| r.rating as i32).collect();
        let comments: Vec<&str> = records.iter().map(|r| r.comment.as_str()).collect();

        let mut df = df!(
            RATING_COLUMNS[0] => ratings,
            COMMENT_COLUMN => comments
        )?;
        write_frame(path, &mut df)?;

        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }
}

/// Reads and writes the `id,rating,tokens` cache of tokenized records.
///
/// Ids are the record store row ids, so document tables keyed by record id
/// still line up on a cached run. Tokens are stored as space-separated
/// `text/tag` units, so token texts must not contain whitespace.
pub struct TokenizedCorpus;

impl TokenizedCorpus {
    pub fn write(path: impl AsRef<Path>, records: &[TokenizedRecord]) -> Result<()> {
        let path = path.as_ref();
        let ids: Vec<i64> = records.iter().map(|r| r.id as i64).collect();
        let ratings: Vec<i32> = records.iter().map(|r| r.rating as i32).collect();
        let tokens: Vec<String> = records.iter().map(|r| r.keys().join(" ")).collect();

        let mut df = df!(
            ID_COLUMN => ids,
            RATING_COLUMNS[0] => ratings,
            TOKENS_COLUMN => tokens
        )?;
        write_frame(path, &mut df)?;

        info!("Cached {} tokenized records to {}", records.len(), path.display());
        Ok(())
    }

    /// Read a cache written by [`TokenizedCorpus::write`].
    ///
    /// The cache is a pipeline artifact, so any bad row is fatal.
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<TokenizedRecord>> {
        let path = path.as_ref();
        info!("Loading tokenized records from: {}", path.display());
        let df = read_string_frame(path)
            .context(format!("reading tokenized corpus {}", path.display()))?;
        Self::from_frame(&df).context(format!("parsing tokenized corpus {}", path.display()))
    }

    pub fn from_frame(df: &DataFrame) -> Result<Vec<TokenizedRecord>> {
        let ids = df
            .column(ID_COLUMN)
            .map_err(|_| PipelineError::ColumnNotFound(ID_COLUMN.to_string()))?
            .cast(&DataType::String)?;
        let ratings = df
            .column(RATING_COLUMNS[0])
            .map_err(|_| PipelineError::ColumnNotFound(RATING_COLUMNS[0].to_string()))?
            .cast(&DataType::String)?;
        let tokens = df
            .column(TOKENS_COLUMN)
            .map_err(|_| PipelineError::ColumnNotFound(TOKENS_COLUMN.to_string()))?
            .cast(&DataType::String)?;

        let mut out = Vec::with_capacity(df.height());
        let rows = ids.str()?.into_iter().zip(ratings.str()?).zip(tokens.str()?);
        for (row, ((id, rating), units)) in rows.enumerate() {
            let line = row + 2;
            let id = id
                .map(str::trim)
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| PipelineError::format(line, "missing or invalid record id"))?;
            let rating = parse_rating(line, rating)?;
            let tokens = units
                .unwrap_or_default()
                .split_whitespace()
                .map(|unit| {
                    Token::parse_joined(unit).ok_or_else(|| {
                        PipelineError::format(line, format!("'{}' is not a text/tag unit", unit))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            out.push(TokenizedRecord {
                id,
                rating,
                tokens,
            });
        }
        debug!("Read {} tokenized records", out.len());
        Ok(out)
    }
}

/// Read a headed CSV with every column kept as a string.
fn read_string_frame(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

fn write_frame(path: &Path, df: &mut DataFrame) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context(format!("creating {}", parent.display()))?;
    }
    let mut file = File::create(path).context(format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .with_quote_char(b'"')
        .finish(df)
        .context(format!("writing {}", path.display()))
}

/// Resolve the rating and comment column names from a header.
fn locate_columns(names: &[String]) -> Result<(&str, &str)> {
    let find = |wanted: &str| {
        names
            .iter()
            .find(|name| name.trim().eq_ignore_ascii_case(wanted))
            .map(|name| name.as_str())
    };

    let rating = RATING_COLUMNS
        .iter()
        .find_map(|wanted| find(wanted))
        .ok_or_else(|| {
            PipelineError::Configuration(format!(
                "record store has no rating column (expected one of {:?}, found {:?})",
                RATING_COLUMNS, names
            ))
        })?;
    let comment = find(COMMENT_COLUMN).ok_or_else(|| {
        PipelineError::Configuration(format!(
            "record store has no '{}' column (found {:?})",
            COMMENT_COLUMN, names
        ))
    })?;
    Ok((rating, comment))
}

fn position(names: &[String], name: &str) -> usize {
    names.iter().position(|n| n == name).unwrap_or_default()
}

/// Parse a 1-10 rating. Integral floats such as `7.0` are accepted.
fn parse_rating(line: usize, raw: Option<&str>) -> Result<u8> {
    let raw = raw
        .map(|s| s.trim().trim_matches('"'))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::format(line, "missing rating"))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| PipelineError::format(line, format!("'{}' is not a rating", raw)))?;
    if value.fract() != 0.0 || !(1.0..=10.0).contains(&value) {
        return Err(PipelineError::format(
            line,
            format!("rating {} is outside {:?}", raw, RATING_RANGE),
        ));
    }
    Ok(value as u8)
}

/// Applies the malformed-row policy while rows stream in.
struct RowCollector {
    report: LoadReport,
    tolerance: usize,
}

impl RowCollector {
    fn new(tolerance: usize) -> Self {
        Self {
            report: LoadReport::default(),
            tolerance,
        }
    }

    fn push(&mut self, line: usize, rating: Option<&str>, comment: Option<&str>) -> Result<()> {
        match parse_row(line, rating, comment) {
            Ok((rating, comment)) => {
                let id = line - 2;
                self.report.records.push(Record::new(id, rating, comment));
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                debug!("Skipping row: {}", e);
                self.report.skipped += 1;
                if self.report.skipped_lines.len() < SKIPPED_LINES_KEPT {
                    self.report.skipped_lines.push(line);
                }
                if self.report.skipped > self.tolerance {
                    return Err(PipelineError::TooManyMalformedRows {
                        skipped: self.report.skipped,
                        tolerance: self.tolerance,
                    });
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn finish(mut self, max_records: usize) -> LoadReport {
        if max_records > 0 && self.report.records.len() > max_records {
            debug!(
                "Capping {} records at {}",
                self.report.records.len(),
                max_records
            );
            self.report.records.truncate(max_records);
        }
        self.report
    }
}

fn parse_row(line: usize, rating: Option<&str>, comment: Option<&str>) -> Result<(u8, String)> {
    let rating = parse_rating(line, rating)?;
    let comment = comment.map(sanitize_comment).unwrap_or_default();
    if comment.is_empty() {
        return Err(PipelineError::format(line, "missing comment"));
    }
    Ok((rating, comment))
}
