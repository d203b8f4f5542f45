use std::{
    collections::BTreeMap,
    io::{stdout, Write},
    path::Path,
};

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use serde::Serialize;
use swire::{Class, Collector, Direction, Outcome, Transaction};

use crate::Format;

#[derive(Default, Debug, Clone, Serialize)]
struct Summary {
    total_transactions: usize,
    ok: usize,
    reads: usize,
    writes: usize,
    bytes_read: usize,
    bytes_written: usize,
    /// Error annotations by message, including those outside any transaction.
    errors: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
struct TransactionInfo {
    start: u64,
    end: u64,
    /// Start time in seconds from the start of the capture
    time: f64,
    direction: String,
    slave_id: Option<u8>,
    address: Option<String>,
    data: String,
    outcome: String,
}

impl TransactionInfo {
    fn new(txn: &Transaction, samplerate: u64, address_digits: usize) -> Self {
        TransactionInfo {
            start: txn.start,
            end: txn.end,
            time: txn.start as f64 / samplerate as f64,
            direction: match txn.direction {
                Some(Direction::Read) => "R",
                Some(Direction::Write) => "W",
                None => "-",
            }
            .to_string(),
            slave_id: txn.slave_id(),
            address: txn
                .address_value()
                .map(|v| format!("0x{v:0address_digits$X}")),
            data: txn
                .data_values()
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<String>>()
                .join(" "),
            outcome: match txn.outcome {
                Outcome::Ok => "OK".to_string(),
                Outcome::Error(err) => err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    samplerate: u64,
    summary: Summary,
    transactions: Vec<TransactionInfo>,
}

fn summarize(fpath: &Path, samplerate: u64, zult: &Collector) -> Info {
    let mut summary = Summary::default();
    let mut transactions = Vec::default();

    for txn in &zult.transactions {
        summary.total_transactions += 1;
        if txn.is_ok() {
            summary.ok += 1;
        }
        match txn.direction {
            Some(Direction::Read) => {
                summary.reads += 1;
                summary.bytes_read += txn.data.len();
            }
            Some(Direction::Write) => {
                summary.writes += 1;
                summary.bytes_written += txn.data.len();
            }
            None => {}
        }
        transactions.push(TransactionInfo::new(txn, samplerate, txn.address.len() * 2));
    }

    for ann in zult.class(Class::Error) {
        *summary.errors.entry(ann.text().to_string()).or_default() += 1;
    }

    Info {
        filename: fpath.to_string_lossy().to_string(),
        samplerate,
        summary,
        transactions,
    }
}

pub fn info(fpath: &Path, samplerate: u64, zult: &Collector, format: &Format) -> Result<()> {
    let info = summarize(fpath, samplerate, zult);

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => "-".to_string(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or(0).max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================================
Sample rate:  {{ samplerate }}
Transactions: {{ summary.total_transactions }} ({{ summary.ok }} ok)
Reads:        {{ summary.reads }} ({{ summary.bytes_read }} bytes)
Writes:       {{ summary.writes }} ({{ summary.bytes_written }} bytes)
Errors:       {{ #each summary.errors }}{{ @key }}: {{ this }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
-----------------------------------------------------------------------------------------------
       Start   Time(s)  R/W   ID     Address  Outcome                   Data
-----------------------------------------------------------------------------------------------
{{ #each transactions }}{{ lpad 12 start }}  {{ lpad 8 time }}  {{ lpad 3 direction }}  {{ lpad 4 slave_id }}  {{ lpad 10 address }}  {{ outcome }}  {{ data }}
{{/each }}
";
