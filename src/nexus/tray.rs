//! Opaque payload units passed through a nexus

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Sequence number stamped on a tray within one nexus direction.
///
/// Wraps around; only needs to be unique within the live window of a queue.
pub type TrayId = u32;

/// Shared, immutable-once-sent tray
pub type Xtray = Arc<Tray>;

/// A block of opaque data moving between threads as one unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tray {
    payload: Vec<u8>,
}

impl Tray {
    /// Wrap raw bytes
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize a value into a tray
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            payload: bincode::serialize(value)?,
        })
    }

    /// Deserialize the tray contents
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Freeze into a shareable tray
    pub fn into_shared(self) -> Xtray {
        Arc::new(self)
    }
}

impl From<Vec<u8>> for Tray {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&str> for Tray {
    fn from(payload: &str) -> Self {
        Self::new(payload.as_bytes())
    }
}

/// A tray as seen by a reader, with the sequence it was stamped with
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: TrayId,
    pub tray: Xtray,
}
