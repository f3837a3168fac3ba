//! Fresh import - adapters and normalizer feeding an artifact writer

use std::path::Path;

use tracing::{debug, warn};

use super::artifact::ArtifactWriter;
use super::error::ResolveError;
use super::types::TableDescriptor;
use crate::core::normalize::Normalizer;
use crate::core::options::ImportOptions;
use crate::core::source::SourceDescriptor;
use crate::formats::adapter_for;

/// Everything a fresh import produced besides the artifact itself
#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub tables: Vec<TableDescriptor>,
    pub warnings: Vec<String>,
}

/// Import every source into the artifact at `path`, one table each
///
/// The artifact is left closed. Any failure leaves it half-written; the
/// caller discards it.
pub fn import_sources(
    path: &Path,
    sources: &[SourceDescriptor],
    options: &ImportOptions,
) -> Result<ImportOutcome, ResolveError> {
    let mut writer = ArtifactWriter::create(path)?;
    let mut outcome = ImportOutcome::default();

    for source in sources {
        let table = import_source(&mut writer, source, options, &mut outcome.warnings)?;
        outcome.tables.push(table);
    }

    writer.finish()?;
    Ok(outcome)
}

fn import_source(
    writer: &mut ArtifactWriter,
    source: &SourceDescriptor,
    options: &ImportOptions,
    warnings: &mut Vec<String>,
) -> Result<TableDescriptor, ResolveError> {
    let format_error = |e| ResolveError::Format {
        origin: source.origin.clone(),
        source: e,
    };

    let adapter = adapter_for(source.format, options).map_err(format_error)?;
    let normalizer = Normalizer::new(adapter.infers_types(), options.row_limit);

    debug!(source = %source.origin, format = %source.format, table = %source.table, "discovering schema");
    let discovery = normalizer
        .discover(adapter.open(source.open()?).map_err(format_error)?)
        .map_err(format_error)?;

    for warning in &discovery.warnings {
        warn!(source = %source.origin, "{}", warning);
        warnings.push(format!("{}: {}", source.origin, warning));
    }

    let stream = adapter.open(source.open()?).map_err(format_error)?;
    let rows = normalizer
        .rows(&discovery.schema, stream)
        .map(|row| row.map_err(format_error));
    let row_count = writer.write_table(&source.table, discovery.schema.columns(), rows)?;

    let changed = source.is_stable() && !source.is_unchanged().unwrap_or(false);
    if changed || row_count != discovery.records {
        return Err(ResolveError::SourceChanged(source.origin.clone()));
    }

    Ok(TableDescriptor {
        name: source.table.clone(),
        source: source
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| source.origin.clone()),
        columns: discovery.schema.columns().to_vec(),
        row_count,
    })
}
