use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::aggregate::{RegionSummary, StatisticalBand};
use crate::error::{Error, Result};
use crate::output::ContactSearchResult;

/// Writes report files into `output_dir`, or to stdout when there is none.
#[derive(Debug, Clone, Default)]
pub struct Report {
    output_dir: Option<PathBuf>,
}

impl Report {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    pub fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            let path = dir.join(filename);
            fs::write(&path, data).map_err(|e| Error::io(&path, e))
        } else {
            io::stdout()
                .write_all(data)
                .map_err(|e| Error::io("<stdout>", e))
        }
    }

    pub fn write_csv(&self, filename: &str, headers: &[&str], rows: &[Vec<String>]) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            let path = dir.join(filename);
            let file = fs::File::create(&path).map_err(|e| Error::io(&path, e))?;
            write_rows(csv::Writer::from_writer(file), headers, rows)
        } else {
            write_rows(csv::Writer::from_writer(io::stdout()), headers, rows)
        }
    }

    pub fn write_summary(&self, filename: &str, summary: &RegionSummary) -> Result<()> {
        let mut rows = Vec::new();
        for (metric, band) in &summary.bands {
            rows.extend(band_rows(metric.name(), band));
        }
        self.write_csv(filename, &["date", "metric", "mean", "lower", "upper"], &rows)
    }

    pub fn write_contact_search(&self, filename: &str, search: &ContactSearchResult) -> Result<()> {
        let rows: Vec<Vec<String>> = search
            .iter()
            .map(|(day, p, stdev)| vec![day.to_string(), p.to_string(), stdev.to_string()])
            .collect();
        self.write_csv(filename, &["date", "contact_probability", "stdev"], &rows)
    }
}

fn write_rows<W: Write>(
    mut wtr: csv::Writer<W>,
    headers: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush().map_err(|e| Error::io("<csv>", e))
}

fn band_rows(metric: &str, band: &StatisticalBand) -> Vec<Vec<String>> {
    band.iter()
        .map(|(date, p)| {
            vec![
                date.to_string(),
                metric.to_string(),
                p.mean.to_string(),
                p.lower.to_string(),
                p.upper.to_string(),
            ]
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ObservationRow {
    date: NaiveDate,
    new_infections: f64,
}

/// Reads `date,new_infections` rows into a calibration target.
pub fn read_observations<R: Read>(reader: R) -> Result<BTreeMap<NaiveDate, f64>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut observed = BTreeMap::new();
    for row in rdr.deserialize() {
        let row: ObservationRow = row?;
        observed.insert(row.date, row.new_infections);
    }
    Ok(observed)
}
