/** ------------------------------------------------------------
 * Persistence (saving analysis results to parquet and JSON files)
 * ------------------------------------------------------------- */
use crate::analyzer::PacketAnalyzerResult;
use crate::burst::{Burst, BurstAnalysisInfo};
use crate::errors::RrcError;
use crate::packet::Packet;
use crate::rrc_state::RrcStateRange;
use crate::state_machine::RrcAggregate;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

use polars::prelude::*;
use polars::{frame::DataFrame, series::Series};

fn write_parquet(mut df: DataFrame, file_path: &Path) -> Result<(), RrcError> {
    let file = File::create(file_path)?;
    ParquetWriter::new(file).finish(&mut df)?;
    debug!(rows = df.height(), path = %file_path.display(), "wrote parquet");
    Ok(())
}

/**
 * One row per state range: begin, end, state code and name
 */
pub fn ranges_to_dataframe(ranges: &[RrcStateRange]) -> Result<DataFrame, PolarsError> {
    // polars has no u8 column type
    let codes: Vec<u32> = ranges.iter().map(|r| r.state.code() as u32).collect();
    let names: Vec<&str> = ranges.iter().map(|r| r.state.name()).collect();
    DataFrame::new(vec![
        Series::new("begin_time", ranges.iter().map(|r| r.begin_time).collect::<Vec<f64>>()),
        Series::new("end_time", ranges.iter().map(|r| r.end_time).collect::<Vec<f64>>()),
        Series::new("state_code", codes),
        Series::new("state", names),
    ])
}

pub fn bursts_to_dataframe(bursts: &[Burst], packets: &[Packet]) -> Result<DataFrame, PolarsError> {
    DataFrame::new(vec![
        Series::new("begin_time", bursts.iter().map(|b| b.begin_time).collect::<Vec<f64>>()),
        Series::new("end_time", bursts.iter().map(|b| b.end_time).collect::<Vec<f64>>()),
        Series::new("category", bursts.iter().map(|b| b.category.name()).collect::<Vec<&str>>()),
        Series::new("energy", bursts.iter().map(|b| b.energy).collect::<Vec<f64>>()),
        Series::new("active_time", bursts.iter().map(|b| b.active_time).collect::<Vec<f64>>()),
        Series::new(
            "payload",
            bursts.iter().map(|b| b.payload_bytes(packets)).collect::<Vec<u64>>(),
        ),
        Series::new(
            "throughput_kbps",
            bursts.iter().map(|b| b.throughput_kbps(packets)).collect::<Vec<f64>>(),
        ),
        Series::new(
            "packet_count",
            bursts.iter().map(|b| b.packets.len() as u64).collect::<Vec<u64>>(),
        ),
        Series::new("long", bursts.iter().map(|b| b.long).collect::<Vec<bool>>()),
    ])
}

pub fn categories_to_dataframe(infos: &[BurstAnalysisInfo]) -> Result<DataFrame, PolarsError> {
    DataFrame::new(vec![
        Series::new("category", infos.iter().map(|i| i.category.name()).collect::<Vec<&str>>()),
        Series::new("payload", infos.iter().map(|i| i.payload).collect::<Vec<u64>>()),
        Series::new("payload_pct", infos.iter().map(|i| i.payload_pct).collect::<Vec<f64>>()),
        Series::new("energy", infos.iter().map(|i| i.energy).collect::<Vec<f64>>()),
        Series::new("energy_pct", infos.iter().map(|i| i.energy_pct).collect::<Vec<f64>>()),
        Series::new("active_time", infos.iter().map(|i| i.active_time).collect::<Vec<f64>>()),
        Series::new("active_time_pct", infos.iter().map(|i| i.active_time_pct).collect::<Vec<f64>>()),
        Series::new("jpkb", infos.iter().map(|i| i.jpkb).collect::<Vec<Option<f64>>>()),
    ])
}

/**
 * Write the whole result as pretty printed JSON
 */
pub fn to_json(result: &PacketAnalyzerResult, file_path: &Path) -> Result<(), RrcError> {
    let writer = BufWriter::new(File::create(file_path)?);
    serde_json::to_writer_pretty(writer, result)?;
    Ok(())
}

impl PacketAnalyzerResult {
    /**
     * Write `ranges.parquet`, `bursts.parquet` and `categories.parquet`
     * into `dir`, returning the written paths.
     */
    pub fn to_parquet(&self, dir: &Path) -> Result<Vec<PathBuf>, RrcError> {
        std::fs::create_dir_all(dir)?;
        let bursts = &self.burst_collection;
        let outputs = [
            ("ranges.parquet", ranges_to_dataframe(self.state_machine.ranges())?),
            ("bursts.parquet", bursts_to_dataframe(&bursts.bursts, &self.packets)?),
            ("categories.parquet", categories_to_dataframe(&bursts.category_info)?),
        ];

        let mut written = Vec::with_capacity(outputs.len());
        for (name, df) in outputs {
            let path = dir.join(name);
            write_parquet(df, &path)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{analyze_trace, AnalysisFilter, TraceData};
    use crate::packet::Direction;
    use crate::rrc_state::RrcState;

    fn result() -> PacketAnalyzerResult {
        let trace = TraceData {
            packets: vec![
                Packet::new(1.0, Direction::Uplink, 100, 60).with_app_name("news"),
                Packet::new(1.3, Direction::Downlink, 900, 860).with_app_name("news"),
                Packet::new(6.0, Direction::Uplink, 60, 20),
            ],
            trace_duration: 12.0,
            ..Default::default()
        };
        analyze_trace(&trace, None, &AnalysisFilter::default())
    }

    #[test]
    fn ranges_frame_has_one_row_per_range() {
        let ranges = vec![
            RrcStateRange::new(0.0, 1.0, RrcState::LteIdle),
            RrcStateRange::new(1.0, 1.26, RrcState::LtePromotion),
        ];
        let df = ranges_to_dataframe(&ranges).unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.column("state").unwrap().str().unwrap().get(1), Some("LTE_PROMOTION"));
    }

    #[test]
    fn writes_and_reads_back_parquet() {
        let result = result();
        let dir = tempfile::tempdir().unwrap();
        let written = result.to_parquet(dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let ranges = ParquetReader::new(File::open(&written[0]).unwrap()).finish().unwrap();
        assert_eq!(ranges.height(), result.state_machine.ranges().len());

        let bursts = ParquetReader::new(File::open(&written[1]).unwrap()).finish().unwrap();
        assert_eq!(bursts.height(), result.burst_collection.bursts.len());
        assert_eq!(bursts.width(), 9);
    }

    #[test]
    fn json_round_trip() {
        let result = result();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        to_json(&result, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: PacketAnalyzerResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.burst_collection.bursts.len(), result.burst_collection.bursts.len());
        assert_eq!(back.profile, result.profile);
    }
}
