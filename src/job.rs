use tracing::{info, debug, warn, error};
use crate::{
    analytics::{QuerySpec, ReportPage, ReportQuery, ReportSource},
    cfg::{Cfg, DateRange},
    csv_sink::{output_path, PropertyOutput},
    error::ExtractError,
    transform::{round_to_nearest, sanitize_row},
};

const PROGRESS_STEP: usize = 10_000;

/// Result of fetching one page. Sampled pages are never written.
#[derive(Debug)]
pub enum PageOutcome {
    Accepted(ReportPage),
    Sampled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyOutcome {
    Completed { rows: usize },
    Sampled { rows: usize, range: DateRange, offset: usize },
    Failed { rows: usize, error: String },
    Skipped,
}

impl PropertyOutcome {
    pub fn rows(&self) -> usize {
        match self {
            PropertyOutcome::Completed { rows }
            | PropertyOutcome::Sampled { rows, .. }
            | PropertyOutcome::Failed { rows, .. } => *rows,
            PropertyOutcome::Skipped => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyReport {
    pub name: String,
    pub outcome: PropertyOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub properties: Vec<PropertyReport>,
}

impl RunSummary {
    pub fn rows_written(&self) -> usize {
        self.properties.iter().map(|p| p.outcome.rows()).sum()
    }

    /// Properties that stopped early on an error or on sampled data.
    pub fn failures(&self) -> usize {
        self.properties
            .iter()
            .filter(|p| matches!(p.outcome, PropertyOutcome::Failed { .. } | PropertyOutcome::Sampled { .. }))
            .count()
    }
}

enum Extraction {
    Complete,
    Sampled { range: DateRange, offset: usize },
}

/// Extracts every configured property in name order.
///
/// Errors scoped to one property are logged and recorded in the summary; only
/// a run-fatal error (credentials that need re-authorization) is returned.
pub async fn run_job<S: ReportSource>(source: &S, cfg: &Cfg) -> Result<RunSummary, ExtractError> {
    info!(properties = cfg.properties.len(), date_ranges = cfg.date_ranges.len(),
          page_size = cfg.page_size, "Starting extraction");

    let mut summary = RunSummary::default();

    for (name, property_id) in &cfg.properties {
        let outcome = if property_id.is_empty() {
            info!(property = %name, "Could not find a valid profile for this user.");
            PropertyOutcome::Skipped
        } else {
            extract_property(source, cfg, name, property_id).await?
        };

        info!(property = %name, outcome = ?outcome, "Profile done. Next profile...");
        summary.properties.push(PropertyReport { name: name.clone(), outcome });
    }

    info!(rows = summary.rows_written(), failures = summary.failures(), "All profiles done.");
    Ok(summary)
}

async fn extract_property<S: ReportSource>(
    source: &S,
    cfg: &Cfg,
    name: &str,
    property_id: &str,
) -> Result<PropertyOutcome, ExtractError> {
    let path = output_path(&cfg.output.dir, &cfg.output.filename_template, name);
    let mut output = match PropertyOutput::create(&path, cfg.output.delimiter_byte(), cfg.output.ensure) {
        Ok(output) => output,
        Err(e) => {
            error!(property = %name, path = %path.display(), "Could not open output file: {}", e);
            return Ok(PropertyOutcome::Failed { rows: 0, error: e.to_string() });
        }
    };

    let result = extract_ranges(source, cfg, property_id, &mut output).await;
    let rows = output.rows_written();
    let closed = output.finish();

    let outcome = match (result, closed) {
        (Err(e), _) if e.aborts_run() => {
            error!(property = %name, "{}", e);
            return Err(e);
        }
        (Err(e), _) | (Ok(_), Err(e)) => {
            error!(property = %name, rows, "{}", e);
            PropertyOutcome::Failed { rows, error: e.to_string() }
        }
        (Ok(Extraction::Sampled { range, offset }), Ok(_)) => {
            error!(property = %name, range = %range, offset, "Error: Query contains sampled data!");
            PropertyOutcome::Sampled { rows, range, offset }
        }
        (Ok(Extraction::Complete), Ok(_)) => PropertyOutcome::Completed { rows },
    };
    Ok(outcome)
}

async fn extract_ranges<S: ReportSource>(
    source: &S,
    cfg: &Cfg,
    property_id: &str,
    output: &mut PropertyOutput,
) -> Result<Extraction, ExtractError> {
    for &range in &cfg.date_ranges {
        info!("Now pulling data from {} to {}.", range.start, range.end);

        // The offset 0 page doubles as the probe for the total row count.
        let probe = match fetch_page(source, &cfg.query, property_id, range, 0, cfg.page_size).await? {
            PageOutcome::Accepted(page) => page,
            PageOutcome::Sampled => return Ok(Extraction::Sampled { range, offset: 0 }),
        };
        let total = probe.total_results;
        write_page(output, probe, 0)?;

        for offset in (cfg.page_size..total).step_by(cfg.page_size) {
            match fetch_page(source, &cfg.query, property_id, range, offset, cfg.page_size).await? {
                PageOutcome::Accepted(page) => write_page(output, page, offset)?,
                PageOutcome::Sampled => return Ok(Extraction::Sampled { range, offset }),
            }
        }
    }
    Ok(Extraction::Complete)
}

pub async fn fetch_page<S: ReportSource>(
    source: &S,
    spec: &QuerySpec,
    property_id: &str,
    range: DateRange,
    offset: usize,
    page_size: usize,
) -> Result<PageOutcome, ExtractError> {
    let query = ReportQuery::build(spec, property_id, range, offset, page_size)?;
    let page = source.execute(&query).await?;

    if page.contains_sampled_data {
        warn!(property_id, range = %range, offset, "Page contains sampled data, discarding it");
        return Ok(PageOutcome::Sampled);
    }
    debug!(offset, rows = page.rows.len(), total = page.total_results, "Fetched page");
    Ok(PageOutcome::Accepted(page))
}

fn write_page(output: &mut PropertyOutput, page: ReportPage, offset: usize) -> Result<(), ExtractError> {
    if !output.header_written() {
        if let Some(profile_name) = &page.profile_name {
            info!("Profile Name: {}", profile_name);
        }
        match page.column_headers {
            Some(headers) if !headers.is_empty() => output.write_header(&sanitize_row(headers))?,
            _ if !page.rows.is_empty() => return Err(ExtractError::MissingHeaders { offset }),
            _ => {}
        }
    }

    if page.rows.is_empty() {
        info!("No Rows Found");
    } else {
        let rows: Vec<Vec<String>> = page.rows.into_iter().map(sanitize_row).collect();
        output.write_rows(&rows)?;
    }

    info!("{} of about {} rows.", offset, round_to_nearest(page.total_results, PROGRESS_STEP));
    Ok(())
}
