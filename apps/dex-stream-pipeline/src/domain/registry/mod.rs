//! Stream Registry
//!
//! Pre-computed stream keys for one marketplace/blockchain pair. The
//! registry is built once during startup and handed to every job that needs
//! to address a stream, so no component derives names on its own.

use std::sync::Arc;

use super::stream_key::{
    Blockchain, DataType, Dimension, Marketplace, StreamKey, StreamKeyBuilder, StreamKeyError,
    StreamName,
};

/// Shared registry handle.
pub type SharedRegistry = Arc<StreamRegistry>;

/// Every `(data type, stream)` key for a marketplace/blockchain pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRegistry {
    marketplace: Marketplace,
    blockchain: Blockchain,
    keys: [[StreamKey; StreamName::COUNT]; DataType::COUNT],
}

impl StreamRegistry {
    /// Build the registry for a marketplace/blockchain pair.
    #[must_use]
    pub fn new(marketplace: Marketplace, blockchain: Blockchain) -> Self {
        let keys = std::array::from_fn(|d| {
            std::array::from_fn(|s| {
                StreamKey::new(DataType::ALL[d], marketplace, blockchain, StreamName::ALL[s])
            })
        });

        Self {
            marketplace,
            blockchain,
            keys,
        }
    }

    /// Build the registry from a builder template carrying the marketplace
    /// and blockchain.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::MissingDimension`] if the template lacks
    /// either dimension.
    pub fn from_template(template: StreamKeyBuilder) -> Result<Self, StreamKeyError> {
        let marketplace = template
            .marketplace_value()
            .ok_or(StreamKeyError::MissingDimension(Dimension::Marketplace))?;
        let blockchain = template
            .blockchain_value()
            .ok_or(StreamKeyError::MissingDimension(Dimension::Blockchain))?;
        Ok(Self::new(marketplace, blockchain))
    }

    /// Marketplace shared by every key.
    #[must_use]
    pub const fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    /// Blockchain shared by every key.
    #[must_use]
    pub const fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    /// Key for a data type and stream.
    #[must_use]
    pub const fn get(&self, data_type: DataType, stream: StreamName) -> StreamKey {
        self.keys[data_type.index()][stream.index()]
    }

    /// Raw stream key.
    #[must_use]
    pub const fn raw(&self, stream: StreamName) -> StreamKey {
        self.get(DataType::Raw, stream)
    }

    /// Adapted stream key.
    #[must_use]
    pub const fn adapted(&self, stream: StreamName) -> StreamKey {
        self.get(DataType::Adapted, stream)
    }

    /// Whether the key belongs to this registry.
    #[must_use]
    pub fn contains(&self, key: &StreamKey) -> bool {
        key.marketplace() == self.marketplace && key.blockchain() == self.blockchain
    }

    /// All keys, raw first, in stream declaration order.
    pub fn iter(&self) -> impl Iterator<Item = StreamKey> + '_ {
        self.keys.iter().flat_map(|row| row.iter().copied())
    }

    /// Serialized names of all keys.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|key| key.to_string()).collect()
    }
}
