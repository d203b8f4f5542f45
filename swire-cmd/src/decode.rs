use std::io::{stdout, BufWriter, Write};

use anyhow::{Context, Result};
use swire::{Annotation, Collector, Row};

use crate::Format;

pub fn decode(zult: &Collector, rows: &[Row], format: &Format) -> Result<()> {
    let annotations: Vec<&Annotation> = zult
        .annotations
        .iter()
        .filter(|a| rows.is_empty() || rows.contains(&a.row))
        .collect();

    let mut out = BufWriter::new(stdout().lock());
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, &annotations).context("serializing to json")?;
            writeln!(out).context("writing to stdout")?;
        }
        Format::Text => {
            for ann in annotations {
                writeln!(out, "{ann}").context("writing to stdout")?;
            }
        }
    }
    out.flush().context("writing to stdout")
}
