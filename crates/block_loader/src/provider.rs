//! src/provider.rs
//!
//! Interface to the per-record decode stage.
//!
//! A [`Provider`] turns one encoded record into the fixed-size slots of one
//! or more named output streams (image pixels, labels, ...). Outputs live in
//! an [`OutputBuffers`] allocated once per batch slot and reused.

use anyhow::{anyhow, ensure, Result};

use crate::record::EncodedRecord;

/// Decodes records into fixed-size output slots.
pub trait Provider: Send + 'static {
    /// Name and per-record byte size of every output stream.
    fn output_streams(&self) -> Vec<(String, usize)>;

    /// Decodes `record` into slot `index` of every output stream.
    fn provide(
        &mut self,
        index: usize,
        record: &EncodedRecord,
        outputs: &mut OutputBuffers,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
struct OutputStream {
    name: String,
    stride: usize,
    data: Vec<u8>,
}

/// A set of named byte buffers, each holding `capacity` slots of a fixed
/// stride.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBuffers {
    streams: Vec<OutputStream>,
    capacity: usize,
}

impl OutputBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: Vec::new(),
            capacity,
        }
    }

    /// Allocates buffers for every stream a provider declares.
    pub fn for_provider(provider: &dyn Provider, capacity: usize) -> Result<Self> {
        let mut buffers = Self::new(capacity);
        for (name, stride) in provider.output_streams() {
            buffers.add_stream(name, stride)?;
        }
        Ok(buffers)
    }

    pub fn add_stream(&mut self, name: impl Into<String>, stride: usize) -> Result<()> {
        let name = name.into();
        ensure!(
            self.streams.iter().all(|s| s.name != name),
            "output stream '{}' already exists",
            name
        );
        self.streams.push(OutputStream {
            data: vec![0; stride * self.capacity],
            name,
            stride,
        });
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.name.as_str())
    }

    /// All slots of stream `name`, back to back.
    pub fn stream(&self, name: &str) -> Option<&[u8]> {
        self.find(name).map(|s| s.data.as_slice())
    }

    pub fn slot(&self, name: &str, index: usize) -> Result<&[u8]> {
        let capacity = self.capacity;
        let stream = self
            .find(name)
            .ok_or_else(|| anyhow!("unknown output stream '{}'", name))?;
        ensure!(index < capacity, "slot {} out of range ({} slots)", index, capacity);
        Ok(&stream.data[index * stream.stride..(index + 1) * stream.stride])
    }

    pub fn slot_mut(&mut self, name: &str, index: usize) -> Result<&mut [u8]> {
        let capacity = self.capacity;
        let stream = self
            .streams
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("unknown output stream '{}'", name))?;
        ensure!(index < capacity, "slot {} out of range ({} slots)", index, capacity);
        let stride = stream.stride;
        Ok(&mut stream.data[index * stride..(index + 1) * stride])
    }

    fn find(&self, name: &str) -> Option<&OutputStream> {
        self.streams.iter().find(|s| s.name == name)
    }
}
