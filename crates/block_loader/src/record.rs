//! src/record.rs
//!
//! Encoded (not yet decoded) records, the unit exchanged between block
//! sources, the block cache and the batch stages.
//!
//! An `EncodedRecord` is one manifest line after its elements have been
//! read from disk / base64-decoded / parsed. Each slot holds either the raw
//! bytes or the error that occurred while producing them; the error is only
//! raised when somebody asks for that element.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ElementError;

/// One element slot of an encoded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Data(Vec<u8>),
    Failed(ElementError),
}

impl Element {
    pub fn is_failed(&self) -> bool {
        matches!(self, Element::Failed(_))
    }
}

/// One record: an ordered list of element slots, one per manifest column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedRecord {
    elements: Vec<Element>,
}

impl EncodedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
        }
    }

    pub fn push_data(&mut self, data: Vec<u8>) {
        self.elements.push(Element::Data(data));
    }

    pub fn push_error(&mut self, error: ElementError) {
        self.elements.push(Element::Failed(error));
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Returns the bytes of element `index`.
    ///
    /// # Errors
    ///
    /// Returns the deferred decode error if producing this element failed,
    /// or an error if `index` is out of range.
    pub fn element(&self, index: usize) -> Result<&[u8]> {
        match self.elements.get(index) {
            Some(Element::Data(data)) => Ok(data),
            Some(Element::Failed(error)) => {
                Err(anyhow::Error::new(error.clone()).context(format!("element {}", index)))
            }
            None => Err(anyhow!(
                "element index {} out of range for record with {} elements",
                index,
                self.elements.len()
            )),
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A block's worth of encoded records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedRecordList {
    records: Vec<EncodedRecord>,
}

impl EncodedRecordList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every record but keeps the allocation for the next fill.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn push_record(&mut self, record: EncodedRecord) {
        self.records.push(record);
    }

    pub fn record(&self, index: usize) -> Option<&EncodedRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    /// Moves the records out, leaving this list empty.
    pub fn take_records(&mut self) -> Vec<EncodedRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn into_records(self) -> Vec<EncodedRecord> {
        self.records
    }

    /// Serializes the list with bincode's standard configuration.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .context("Failed to encode record list")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (list, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .context("Failed to decode record list")?;
        anyhow::ensure!(
            read == bytes.len(),
            "record list payload has {} trailing bytes",
            bytes.len() - read
        );
        Ok(list)
    }
}

impl From<Vec<EncodedRecord>> for EncodedRecordList {
    fn from(records: Vec<EncodedRecord>) -> Self {
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: &[&str]) -> EncodedRecord {
        let mut record = EncodedRecord::new();
        for value in values {
            record.push_data(value.as_bytes().to_vec());
        }
        record
    }

    #[test]
    fn test_element_access() -> Result<()> {
        let mut rec = record(&["a", "bc"]);
        rec.push_error(ElementError::new("unable to open file"));

        assert_eq!(rec.len(), 3);
        assert_eq!(rec.element(0)?, b"a");
        assert_eq!(rec.element(1)?, b"bc");

        let err = rec.element(2).unwrap_err();
        assert!(format!("{:#}", err).contains("unable to open file"));
        assert!(err.downcast_ref::<ElementError>().is_some());

        assert!(rec.element(3).is_err());
        Ok(())
    }

    #[test]
    fn test_failed_element_survives_serialization() -> Result<()> {
        let mut rec = record(&["x"]);
        rec.push_error(ElementError::new("bad base64"));
        let list = EncodedRecordList::from(vec![rec, record(&["y", "z"])]);

        let restored = EncodedRecordList::from_bytes(&list.to_bytes()?)?;
        assert_eq!(restored, list);
        assert!(restored.records()[0].elements()[1].is_failed());
        Ok(())
    }

    #[test]
    fn test_truncated_payload_is_rejected() -> Result<()> {
        let list = EncodedRecordList::from(vec![record(&["hello", "world"])]);
        let bytes = list.to_bytes()?;
        assert!(EncodedRecordList::from_bytes(&bytes[..bytes.len() - 3]).is_err());
        Ok(())
    }

    #[test]
    fn test_take_records_keeps_list_usable() {
        let mut list = EncodedRecordList::from(vec![record(&["a"]), record(&["b"])]);
        let taken = list.take_records();
        assert_eq!(taken.len(), 2);
        assert!(list.is_empty());
        list.push_record(record(&["c"]));
        assert_eq!(list.len(), 1);
    }
}
