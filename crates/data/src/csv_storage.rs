use crate::error::DataError;
use crate::models::OhlcvBar;
use csv::{ReaderBuilder, Writer};
use std::fs::File;
use std::path::Path;

pub struct CsvStorage;

impl CsvStorage {
    /// Reads OHLCV bars from a cache file.
    ///
    /// Format: timestamp,open,high,low,close,volume (timestamp in epoch ms)
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or a row is malformed
    pub fn read_ohlcv(path: &Path) -> Result<Vec<OhlcvBar>, DataError> {
        let file = File::open(path).map_err(|e| DataError::io(path, e))?;
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

        reader
            .deserialize::<OhlcvBar>()
            .map(|row| row.map_err(|e| DataError::csv(path, e)))
            .collect()
    }

    /// Writes OHLCV bars to a cache file, sorted by timestamp.
    ///
    /// # Errors
    /// Returns error if file cannot be created or writing fails
    pub fn write_ohlcv(path: &Path, bars: &[OhlcvBar]) -> Result<(), DataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| DataError::io(path, e))?;
        let mut writer = Writer::from_writer(file);

        let mut sorted = bars.to_vec();
        sorted.sort_by_key(|b| b.timestamp_ms);

        for bar in &sorted {
            writer.serialize(bar).map_err(|e| DataError::csv(path, e))?;
        }

        writer.flush().map_err(|e| DataError::io(path, e))?;
        Ok(())
    }
}
