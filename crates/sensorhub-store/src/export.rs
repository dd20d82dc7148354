//! CSV rendering of aggregate records.

use std::io;

use crate::error::Result;
use crate::models::AggregateRecord;
use crate::queries::AggregateQuery;
use crate::store::Store;

/// Write aggregate records as CSV, header row first.
///
/// Nothing is written for an empty slice.
///
/// Columns follow [`AggregateRecord`] field order; instants are RFC 3339
/// and absent values are empty cells.
pub fn write_aggregates_csv<W: io::Write>(writer: W, records: &[AggregateRecord]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for record in records {
        out.serialize(record)?;
    }
    out.flush()?;
    Ok(())
}

impl Store {
    /// Render the aggregates matching `query` as a CSV document.
    pub fn export_aggregates_csv(&self, query: &AggregateQuery) -> Result<String> {
        let records = self.query_aggregates(query)?;
        let mut buf = Vec::new();
        write_aggregates_csv(&mut buf, &records)?;
        // csv only emits UTF-8 from string and number fields
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
