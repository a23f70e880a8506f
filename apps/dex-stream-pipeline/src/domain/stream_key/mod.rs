//! Stream Key Types
//!
//! Every broker stream is identified by a four-part dimension tuple:
//! data type, marketplace, blockchain and stream name. Each dimension is a
//! closed enumeration, and the canonical stream name joins their lowercase
//! wire values with hyphens:
//!
//! ```text
//! {data_type}-{marketplace}-{blockchain}-{stream}
//! raw-hyperliquid-cosmos-prices
//! ```
//!
//! Out-of-process tooling inspects the broker by these names, so the format
//! is fixed.
//!
//! # Example
//!
//! ```rust
//! use dex_stream_pipeline::domain::stream_key::{
//!     Blockchain, DataType, Marketplace, StreamKeyBuilder, StreamName,
//! };
//!
//! let key = StreamKeyBuilder::new()
//!     .marketplace(Marketplace::Hyperliquid)
//!     .blockchain(Blockchain::Cosmos)
//!     .data_type(DataType::Raw)
//!     .stream(StreamName::Prices)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(key.to_string(), "raw-hyperliquid-cosmos-prices");
//! ```

use std::fmt;
use std::str::FromStr;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building or parsing stream keys.
///
/// These signal programming or configuration mistakes in the caller and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamKeyError {
    /// A dimension was not set before the name was requested.
    #[error("missing {0} dimension; all four dimensions are required to name a stream")]
    MissingDimension(Dimension),

    /// The dimension field name is not one of the four known dimensions.
    #[error("unknown stream dimension: {0:?}")]
    UnknownDimension(String),

    /// The value is not a member of the dimension's enumeration.
    #[error("invalid value {value:?} for {dimension} dimension")]
    InvalidDimensionValue {
        /// Dimension being set.
        dimension: Dimension,
        /// Rejected value.
        value: String,
    },

    /// A serialized stream name does not have four hyphen-separated parts.
    #[error("malformed stream name: {0:?}")]
    MalformedName(String),
}

// =============================================================================
// Dimensions
// =============================================================================

/// The four dimensions of a stream key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Raw or adapted data.
    DataType,
    /// Venue the data comes from.
    Marketplace,
    /// Chain the venue settles on.
    Blockchain,
    /// Logical stream (trades, pnl, prices).
    Stream,
}

impl Dimension {
    /// Field name used by [`StreamKeyBuilder::set_named`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataType => "data_type",
            Self::Marketplace => "marketplace",
            Self::Blockchain => "blockchain",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = StreamKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data_type" => Ok(Self::DataType),
            "marketplace" => Ok(Self::Marketplace),
            "blockchain" => Ok(Self::Blockchain),
            "stream" => Ok(Self::Stream),
            other => Err(StreamKeyError::UnknownDimension(other.to_string())),
        }
    }
}

/// Declares a closed dimension enumeration with its lowercase wire values.
macro_rules! dimension_enum {
    (
        $(#[$meta:meta])*
        $name:ident => $dimension:expr,
        { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every value, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Number of values.
            pub const COUNT: usize = Self::ALL.len();

            /// Lowercase wire value used in stream names.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            /// Position of this value in [`Self::ALL`].
            #[must_use]
            pub const fn index(self) -> usize {
                self as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StreamKeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(StreamKeyError::InvalidDimensionValue {
                        dimension: $dimension,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

dimension_enum! {
    /// Whether a stream carries venue data as ingested or after adaptation.
    DataType => Dimension::DataType,
    {
        /// Unmodified venue payloads.
        Raw => "raw",
        /// Output of a transformer applied to a raw stream.
        Adapted => "adapted",
    }
}

dimension_enum! {
    /// Venue the data is fetched from.
    Marketplace => Dimension::Marketplace,
    {
        /// Hyperliquid perpetuals DEX.
        Hyperliquid => "hyperliquid",
        /// Vertex Protocol.
        Vertex => "vertex",
    }
}

dimension_enum! {
    /// Chain the venue settles on.
    Blockchain => Dimension::Blockchain,
    {
        /// Solana.
        Solana => "solana",
        /// Ethereum.
        Ethereum => "ethereum",
        /// Cosmos.
        Cosmos => "cosmos",
        /// Hyperliquid L1.
        Hyperliquid => "hyperliquid",
    }
}

dimension_enum! {
    /// Logical market data stream.
    StreamName => Dimension::Stream,
    {
        /// Executed trades.
        Trades => "trades",
        /// Profit and loss.
        Pnl => "pnl",
        /// Mid/oracle prices.
        Prices => "prices",
    }
}

// =============================================================================
// Stream Key
// =============================================================================

/// Fully specified stream identifier.
///
/// Keys are small `Copy` values; equality coincides with equality of the
/// serialized names because every wire value is distinct and hyphen-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    data_type: DataType,
    marketplace: Marketplace,
    blockchain: Blockchain,
    stream: StreamName,
}

impl StreamKey {
    /// Create a key from all four dimensions.
    #[must_use]
    pub const fn new(
        data_type: DataType,
        marketplace: Marketplace,
        blockchain: Blockchain,
        stream: StreamName,
    ) -> Self {
        Self {
            data_type,
            marketplace,
            blockchain,
            stream,
        }
    }

    /// Data type dimension.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Marketplace dimension.
    #[must_use]
    pub const fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    /// Blockchain dimension.
    #[must_use]
    pub const fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    /// Stream dimension.
    #[must_use]
    pub const fn stream(&self) -> StreamName {
        self.stream
    }

    /// Same key with a different data type, e.g. the adapted counterpart of
    /// a raw stream.
    #[must_use]
    pub const fn with_data_type(self, data_type: DataType) -> Self {
        Self { data_type, ..self }
    }

    /// Canonical serialized name.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.data_type, self.marketplace, self.blockchain, self.stream
        )
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let [data_type, marketplace, blockchain, stream] = parts.as_slice() else {
            return Err(StreamKeyError::MalformedName(s.to_string()));
        };

        Ok(Self::new(
            data_type.parse()?,
            marketplace.parse()?,
            blockchain.parse()?,
            stream.parse()?,
        ))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// A single dimension value, used by [`StreamKeyBuilder::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionValue {
    /// Data type value.
    DataType(DataType),
    /// Marketplace value.
    Marketplace(Marketplace),
    /// Blockchain value.
    Blockchain(Blockchain),
    /// Stream value.
    Stream(StreamName),
}

impl From<DataType> for DimensionValue {
    fn from(value: DataType) -> Self {
        Self::DataType(value)
    }
}

impl From<Marketplace> for DimensionValue {
    fn from(value: Marketplace) -> Self {
        Self::Marketplace(value)
    }
}

impl From<Blockchain> for DimensionValue {
    fn from(value: Blockchain) -> Self {
        Self::Blockchain(value)
    }
}

impl From<StreamName> for DimensionValue {
    fn from(value: StreamName) -> Self {
        Self::Stream(value)
    }
}

/// Fluent builder accumulating stream key dimensions.
///
/// The builder is `Copy`, so a partially filled builder works as a template:
/// set the shared dimensions once and derive one key per remaining
/// combination.
///
/// # Example
///
/// ```rust
/// use dex_stream_pipeline::domain::stream_key::{
///     Blockchain, DataType, Marketplace, StreamKeyBuilder, StreamName,
/// };
///
/// let template = StreamKeyBuilder::new()
///     .set(Marketplace::Vertex)
///     .set(Blockchain::Ethereum);
///
/// let raw = template.set(DataType::Raw).set(StreamName::Trades).name().unwrap();
/// assert_eq!(raw, "raw-vertex-ethereum-trades");
///
/// // Incomplete templates never produce a partial name.
/// assert!(template.name().is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamKeyBuilder {
    data_type: Option<DataType>,
    marketplace: Option<Marketplace>,
    blockchain: Option<Blockchain>,
    stream: Option<StreamName>,
}

impl StreamKeyBuilder {
    /// Create an empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data_type: None,
            marketplace: None,
            blockchain: None,
            stream: None,
        }
    }

    /// Set the data type.
    #[must_use]
    pub const fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Set the marketplace.
    #[must_use]
    pub const fn marketplace(mut self, marketplace: Marketplace) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    /// Set the blockchain.
    #[must_use]
    pub const fn blockchain(mut self, blockchain: Blockchain) -> Self {
        self.blockchain = Some(blockchain);
        self
    }

    /// Set the stream.
    #[must_use]
    pub const fn stream(mut self, stream: StreamName) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Set any dimension from its typed value.
    #[must_use]
    pub fn set(self, value: impl Into<DimensionValue>) -> Self {
        match value.into() {
            DimensionValue::DataType(v) => self.data_type(v),
            DimensionValue::Marketplace(v) => self.marketplace(v),
            DimensionValue::Blockchain(v) => self.blockchain(v),
            DimensionValue::Stream(v) => self.stream(v),
        }
    }

    /// Set a dimension by field name and wire value, e.g. from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::UnknownDimension`] for an unrecognized field
    /// name and [`StreamKeyError::InvalidDimensionValue`] for a value outside
    /// the dimension's enumeration.
    pub fn set_named(self, field: &str, value: &str) -> Result<Self, StreamKeyError> {
        let builder = match field.parse::<Dimension>()? {
            Dimension::DataType => self.data_type(value.parse()?),
            Dimension::Marketplace => self.marketplace(value.parse()?),
            Dimension::Blockchain => self.blockchain(value.parse()?),
            Dimension::Stream => self.stream(value.parse()?),
        };
        Ok(builder)
    }

    /// Marketplace, if set.
    #[must_use]
    pub const fn marketplace_value(&self) -> Option<Marketplace> {
        self.marketplace
    }

    /// Blockchain, if set.
    #[must_use]
    pub const fn blockchain_value(&self) -> Option<Blockchain> {
        self.blockchain
    }

    /// Build the key.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::MissingDimension`] naming the first unset
    /// dimension.
    pub fn build(&self) -> Result<StreamKey, StreamKeyError> {
        let Some(data_type) = self.data_type else {
            return Err(StreamKeyError::MissingDimension(Dimension::DataType));
        };
        let Some(marketplace) = self.marketplace else {
            return Err(StreamKeyError::MissingDimension(Dimension::Marketplace));
        };
        let Some(blockchain) = self.blockchain else {
            return Err(StreamKeyError::MissingDimension(Dimension::Blockchain));
        };
        let Some(stream) = self.stream else {
            return Err(StreamKeyError::MissingDimension(Dimension::Stream));
        };

        Ok(StreamKey::new(data_type, marketplace, blockchain, stream))
    }

    /// Serialized stream name.
    ///
    /// # Errors
    ///
    /// Returns [`StreamKeyError::MissingDimension`] if any dimension is unset.
    pub fn name(&self) -> Result<String, StreamKeyError> {
        self.build().map(|key| key.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn complete() -> StreamKeyBuilder {
        StreamKeyBuilder::new()
            .data_type(DataType::Raw)
            .marketplace(Marketplace::Hyperliquid)
            .blockchain(Blockchain::Cosmos)
            .stream(StreamName::Prices)
    }

    #[test]
    fn name_joins_dimensions_with_hyphens() {
        assert_eq!(complete().name().unwrap(), "raw-hyperliquid-cosmos-prices");
    }

    #[test_case(DataType::Raw, "raw")]
    #[test_case(DataType::Adapted, "adapted")]
    fn data_type_wire_values(value: DataType, wire: &str) {
        assert_eq!(value.as_str(), wire);
        assert_eq!(wire.parse::<DataType>().unwrap(), value);
    }

    #[test_case(Blockchain::Solana, "solana")]
    #[test_case(Blockchain::Ethereum, "ethereum")]
    #[test_case(Blockchain::Cosmos, "cosmos")]
    #[test_case(Blockchain::Hyperliquid, "hyperliquid")]
    fn blockchain_wire_values(value: Blockchain, wire: &str) {
        assert_eq!(value.to_string(), wire);
        assert_eq!(wire.parse::<Blockchain>().unwrap(), value);
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!("PRICES".parse::<StreamName>().unwrap(), StreamName::Prices);
        assert_eq!(" Vertex ".parse::<Marketplace>().unwrap(), Marketplace::Vertex);
    }

    #[test_case(StreamKeyBuilder::new(), Dimension::DataType)]
    #[test_case(complete().data_type_cleared(), Dimension::DataType)]
    #[test_case(complete().marketplace_cleared(), Dimension::Marketplace)]
    #[test_case(complete().blockchain_cleared(), Dimension::Blockchain)]
    #[test_case(complete().stream_cleared(), Dimension::Stream)]
    fn missing_dimension_is_reported(builder: StreamKeyBuilder, missing: Dimension) {
        assert_eq!(
            builder.name(),
            Err(StreamKeyError::MissingDimension(missing))
        );
    }

    #[test]
    fn set_named_accepts_known_fields() {
        let builder = StreamKeyBuilder::new()
            .set_named("data_type", "adapted")
            .and_then(|b| b.set_named("marketplace", "vertex"))
            .and_then(|b| b.set_named("blockchain", "solana"))
            .and_then(|b| b.set_named("stream", "trades"))
            .unwrap();

        assert_eq!(builder.name().unwrap(), "adapted-vertex-solana-trades");
    }

    #[test]
    fn set_named_rejects_unknown_field() {
        let err = StreamKeyBuilder::new()
            .set_named("exchange", "vertex")
            .unwrap_err();
        assert_eq!(err, StreamKeyError::UnknownDimension("exchange".to_string()));
    }

    #[test]
    fn set_named_rejects_unknown_value() {
        let err = StreamKeyBuilder::new()
            .set_named("blockchain", "bitcoin")
            .unwrap_err();
        assert_eq!(
            err,
            StreamKeyError::InvalidDimensionValue {
                dimension: Dimension::Blockchain,
                value: "bitcoin".to_string(),
            }
        );
    }

    #[test]
    fn template_derives_independent_keys() {
        let template = StreamKeyBuilder::new()
            .marketplace(Marketplace::Hyperliquid)
            .blockchain(Blockchain::Hyperliquid);

        let raw = template.data_type(DataType::Raw).stream(StreamName::Pnl);
        let adapted = raw.data_type(DataType::Adapted);

        assert_eq!(raw.name().unwrap(), "raw-hyperliquid-hyperliquid-pnl");
        assert_eq!(adapted.name().unwrap(), "adapted-hyperliquid-hyperliquid-pnl");
        assert!(template.build().is_err());
    }

    #[test]
    fn stream_key_round_trips_through_its_name() {
        let key = complete().build().unwrap();
        assert_eq!(key.name().parse::<StreamKey>().unwrap(), key);
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(matches!(
            "raw-hyperliquid-prices".parse::<StreamKey>(),
            Err(StreamKeyError::MalformedName(_))
        ));
        assert!(matches!(
            "raw-hyperliquid-cosmos-prices-extra".parse::<StreamKey>(),
            Err(StreamKeyError::MalformedName(_))
        ));
    }

    #[test]
    fn with_data_type_keeps_other_dimensions() {
        let raw = complete().build().unwrap();
        let adapted = raw.with_data_type(DataType::Adapted);
        assert_eq!(adapted.to_string(), "adapted-hyperliquid-cosmos-prices");
        assert_eq!(adapted.stream(), raw.stream());
    }

    impl StreamKeyBuilder {
        fn data_type_cleared(mut self) -> Self {
            self.data_type = None;
            self
        }

        fn marketplace_cleared(mut self) -> Self {
            self.marketplace = None;
            self
        }

        fn blockchain_cleared(mut self) -> Self {
            self.blockchain = None;
            self
        }

        fn stream_cleared(mut self) -> Self {
            self.stream = None;
            self
        }
    }

    fn dimension_values() -> impl Strategy<Value = [DimensionValue; 4]> {
        (
            prop::sample::select(DataType::ALL),
            prop::sample::select(Marketplace::ALL),
            prop::sample::select(Blockchain::ALL),
            prop::sample::select(StreamName::ALL),
        )
            .prop_map(|(d, m, b, s)| [d.into(), m.into(), b.into(), s.into()])
    }

    proptest! {
        #[test]
        fn set_order_does_not_change_the_name(
            values in dimension_values(),
            order in Just(vec![0_usize, 1, 2, 3]).prop_shuffle(),
        ) {
            let in_order = values
                .iter()
                .fold(StreamKeyBuilder::new(), |b, v| b.set(*v));
            let shuffled = order
                .iter()
                .fold(StreamKeyBuilder::new(), |b, i| b.set(values[*i]));

            prop_assert_eq!(in_order.name().unwrap(), shuffled.name().unwrap());
        }

        #[test]
        fn partial_builders_never_yield_a_name(
            values in dimension_values(),
            keep in prop::collection::vec(any::<bool>(), 4),
        ) {
            prop_assume!(keep.iter().any(|k| !k));
            let builder = values
                .iter()
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .fold(StreamKeyBuilder::new(), |b, (v, _)| b.set(*v));

            prop_assert!(matches!(
                builder.name(),
                Err(StreamKeyError::MissingDimension(_))
            ));
        }
    }
}
