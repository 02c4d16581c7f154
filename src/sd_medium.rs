//! SD card storage medium
//!
//! FAT volume on an SPI SD card through the raw `embedded-sdmmc` API. Stream
//! names are `DIR/FILE.EXT` or `FILE.EXT`, both 8.3.

use crate::storage::{OpenMode, StorageMedium};
use crate::NodeError;
use embassy_time::Instant;
use embedded_sdmmc::{
    BlockDevice, Error, Mode, RawDirectory, RawFile, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use esp_println::println;

/// Directories kept open besides the root
const MAX_OPEN_DIRS: usize = 2;

/// FAT timestamps from uptime, the board has no RTC.
/// Base date 2025-01-01, days wrap inside 28 so every date is valid.
pub struct UptimeTimeSource;

impl TimeSource for UptimeTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        let uptime_secs = Instant::now().as_secs();
        let days = uptime_secs / 86_400;
        let rem = uptime_secs % 86_400;

        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: ((days / 28) % 12) as u8,
            zero_indexed_day: (days % 28) as u8,
            hours: (rem / 3600) as u8,
            minutes: ((rem % 3600) / 60) as u8,
            seconds: (rem % 60) as u8,
        }
    }
}

/// SD card volume holding the log streams
pub struct SdMedium<D, T>
where
    D: BlockDevice,
    T: TimeSource,
{
    volume_mgr: VolumeManager<D, T>,
    root: RawDirectory,
    dirs: heapless::Vec<(heapless::String<8>, RawDirectory), MAX_OPEN_DIRS>,
}

impl<D, T> SdMedium<D, T>
where
    D: BlockDevice,
    T: TimeSource,
    <D as BlockDevice>::Error: core::fmt::Debug,
{
    /// Mount the first partition and open its root directory
    pub fn mount(volume_mgr: VolumeManager<D, T>) -> Result<Self, NodeError> {
        let volume = volume_mgr.open_raw_volume(VolumeIdx(0)).map_err(|e| {
            println!("[SD] Failed to open volume: {:?}", e);
            NodeError::MediumUnavailable
        })?;
        let root = volume_mgr.open_root_dir(volume).map_err(|e| {
            println!("[SD] Failed to open root dir: {:?}", e);
            NodeError::MediumUnavailable
        })?;

        Ok(Self {
            volume_mgr,
            root,
            dirs: heapless::Vec::new(),
        })
    }

    /// Resolve `DIR/FILE` into an open directory and the file name
    fn locate<'n>(&mut self, name: &'n str) -> Result<(RawDirectory, &'n str), NodeError> {
        let Some((dir_name, file_name)) = name.split_once('/') else {
            return Ok((self.root, name));
        };

        if let Some((_, dir)) = self.dirs.iter().find(|(open, _)| open.as_str() == dir_name) {
            return Ok((*dir, file_name));
        }

        let dir = self
            .volume_mgr
            .open_dir(self.root, dir_name)
            .map_err(|_| NodeError::StreamOpenFailure)?;
        let mut key = heapless::String::new();
        if key.push_str(dir_name).is_err() || self.dirs.push((key, dir)).is_err() {
            self.volume_mgr.close_dir(dir).ok();
            return Err(NodeError::StreamOpenFailure);
        }
        Ok((dir, file_name))
    }
}

fn storage_error<E: core::fmt::Debug>(error: Error<E>, fallback: NodeError) -> NodeError {
    match error {
        Error::DiskFull => NodeError::OutOfSpace,
        Error::DeviceError(_) => NodeError::MediumUnavailable,
        _ => fallback,
    }
}

impl<D, T> StorageMedium for SdMedium<D, T>
where
    D: BlockDevice,
    T: TimeSource,
    <D as BlockDevice>::Error: core::fmt::Debug,
{
    type Handle = RawFile;

    fn create_dir(&mut self, name: &str) -> Result<(), NodeError> {
        match self.volume_mgr.make_dir_in_dir(self.root, name) {
            Ok(()) | Err(Error::DirAlreadyExists) => Ok(()),
            Err(e) => Err(storage_error(e, NodeError::StreamOpenFailure)),
        }
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<RawFile, NodeError> {
        let (dir, file_name) = self.locate(name)?;
        let mode = match mode {
            OpenMode::Append => Mode::ReadWriteCreateOrAppend,
            OpenMode::Read => Mode::ReadOnly,
            OpenMode::Write => Mode::ReadWriteCreateOrTruncate,
            OpenMode::Truncate => Mode::ReadWriteTruncate,
        };
        self.volume_mgr
            .open_file_in_dir(dir, file_name, mode)
            .map_err(|e| storage_error(e, NodeError::StreamOpenFailure))
    }

    fn exists(&mut self, name: &str) -> bool {
        match self.locate(name) {
            Ok((dir, file_name)) => self.volume_mgr.find_directory_entry(dir, file_name).is_ok(),
            Err(_) => false,
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        match self.locate(name) {
            Ok((dir, file_name)) => self.volume_mgr.delete_file_in_dir(dir, file_name).is_ok(),
            Err(_) => false,
        }
    }

    fn read(&mut self, handle: RawFile, buf: &mut [u8]) -> Result<usize, NodeError> {
        if self.volume_mgr.file_eof(handle).unwrap_or(true) {
            return Ok(0);
        }
        self.volume_mgr
            .read(handle, buf)
            .map_err(|e| storage_error(e, NodeError::StreamOpenFailure))
    }

    fn write(&mut self, handle: RawFile, data: &[u8]) -> Result<(), NodeError> {
        self.volume_mgr
            .write(handle, data)
            .map_err(|e| storage_error(e, NodeError::StreamWriteFailure))
    }

    fn size(&mut self, handle: RawFile) -> Result<u32, NodeError> {
        self.volume_mgr
            .file_length(handle)
            .map_err(|e| storage_error(e, NodeError::StreamOpenFailure))
    }

    fn close(&mut self, handle: RawFile) -> Result<(), NodeError> {
        self.volume_mgr
            .close_file(handle)
            .map_err(|e| storage_error(e, NodeError::StreamWriteFailure))
    }
}
