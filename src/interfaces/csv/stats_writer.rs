use crate::application::ledger::{PaymentStatistics, StatRow};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct StatRecord<'a> {
    dimension: &'a str,
    key: &'a str,
    count: u64,
    total: Decimal,
}

/// Writes payment statistics as CSV: `dimension,key,count,total`.
pub struct StatsWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StatsWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_statistics(&mut self, stats: &PaymentStatistics) -> Result<()> {
        // The header is written even when there are no rows.
        self.writer
            .write_record(["dimension", "key", "count", "total"])?;
        self.write_rows("method", &stats.by_method)?;
        self.write_rows("status", &stats.by_status)?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_rows(&mut self, dimension: &str, rows: &[StatRow]) -> Result<()> {
        for row in rows {
            self.writer.serialize(StatRecord {
                dimension,
                key: &row.key,
                count: row.count,
                total: row.total.normalize(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let stats = PaymentStatistics {
            by_method: vec![StatRow {
                key: "CLICK".to_string(),
                count: 2,
                total: dec!(290000.00),
            }],
            by_status: vec![StatRow {
                key: "PAID".to_string(),
                count: 2,
                total: dec!(290000.00),
            }],
        };

        let mut out = Vec::new();
        StatsWriter::new(&mut out).write_statistics(&stats).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "dimension,key,count,total\nmethod,CLICK,2,290000\nstatus,PAID,2,290000\n"
        );
    }

    #[test]
    fn test_empty_statistics_still_have_header() {
        let stats = PaymentStatistics {
            by_method: vec![],
            by_status: vec![],
        };
        let mut out = Vec::new();
        StatsWriter::new(&mut out).write_statistics(&stats).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "dimension,key,count,total\n");
    }
}
