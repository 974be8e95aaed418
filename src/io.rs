//! Recording documents: sensor geometry, continuous data and events as JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::epochs::{Event, Raw};
use crate::error::{DipoleError, Result};
use crate::sensors::SensorArray;
use crate::{ChannelInfo, CoordTrans, DMat};

/// Everything needed to fit a session
#[derive(Debug, Clone)]
pub struct Recording {
    pub channels: Vec<ChannelInfo>,
    pub dev_head_t: CoordTrans,
    pub bads: Vec<String>,
    pub raw: Raw,
    pub events: Vec<Event>,
}

/// On-disk layout; `data` is channel-major
#[derive(Serialize, Deserialize)]
struct RecordingFile {
    sfreq: f64,
    #[serde(default)]
    first_samp: usize,
    #[serde(default = "default_dev_head_t")]
    dev_head_t: CoordTrans,
    channels: Vec<ChannelInfo>,
    #[serde(default)]
    bads: Vec<String>,
    data: Vec<Vec<f64>>,
    #[serde(default)]
    events: Vec<Event>,
}

fn default_dev_head_t() -> CoordTrans {
    CoordTrans::identity(FIFFV_COORD_DEVICE, FIFFV_COORD_HEAD)
}

impl Recording {
    /// Good MEG channels in head coordinates
    pub fn sensor_array(&self) -> Result<SensorArray> {
        SensorArray::from_channels(&self.channels, &self.dev_head_t, &self.bads)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let file: RecordingFile = serde_json::from_reader(reader)?;
        Self::from_file(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let data = self
            .raw
            .data()
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        let file = RecordingFile {
            sfreq: self.raw.sfreq(),
            first_samp: self.raw.first_samp(),
            dev_head_t: self.dev_head_t.clone(),
            channels: self.channels.clone(),
            bads: self.bads.clone(),
            data,
            events: self.events.clone(),
        };
        serde_json::to_writer(writer, &file)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let recording = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            "Loaded {}: {} channels, {} samples, {} events",
            path.display(),
            recording.channels.len(),
            recording.raw.n_times(),
            recording.events.len()
        );
        Ok(recording)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        info!("Wrote recording to {}", path.as_ref().display());
        Ok(())
    }

    fn from_file(file: RecordingFile) -> Result<Self> {
        if file.data.len() != file.channels.len() {
            return Err(DipoleError::DimensionMismatch(format!(
                "{} data rows for {} channels",
                file.data.len(),
                file.channels.len()
            )));
        }
        let n_times = file.data.first().map_or(0, |r| r.len());
        if let Some((i, row)) = file.data.iter().enumerate().find(|(_, r)| r.len() != n_times) {
            return Err(DipoleError::DimensionMismatch(format!(
                "Channel {} has {} samples, expected {n_times}",
                file.channels[i].ch_name,
                row.len()
            )));
        }
        if let Some(bad) = file.bads.iter().find(|b| !file.channels.iter().any(|c| &c.ch_name == *b)) {
            return Err(DipoleError::InvalidInput(format!(
                "Bad channel {bad} is not in the channel list"
            )));
        }
        file.dev_head_t.validate()?;

        let data = DMat::from_fn(file.channels.len(), n_times, |r, c| file.data[r][c]);
        Ok(Recording {
            raw: Raw::new(data, file.sfreq, file.first_samp)?,
            channels: file.channels,
            dev_head_t: file.dev_head_t,
            bads: file.bads,
            events: file.events,
        })
    }
}
