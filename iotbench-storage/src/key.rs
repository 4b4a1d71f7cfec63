//! Record keys and worker identities.
//!
//! A record is addressed by the worker that produced it, the sensor channel it belongs to and a
//! logical timestamp. The serialized form is `client:sensor:timestamp`, which is what storage
//! adapters receive on the wire and what [`RecordKey::from_str`] parses back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the components of a serialized [`RecordKey`].
pub const KEY_SEPARATOR: char = ':';

/// Errors raised when parsing keys or client identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key does not consist of exactly three `:` separated components.
    #[error("malformed record key `{0}`: expected `client:sensor:timestamp`")]
    Malformed(String),

    /// The timestamp component is not an unsigned integer.
    #[error("invalid timestamp in record key `{0}`")]
    Timestamp(String),

    /// The client identifier does not encode a node and an instance number.
    #[error("invalid client id `{0}`: expected a three letter prefix, a node digit and an instance number")]
    Client(String),
}

/// Identity of the worker issuing requests.
///
/// Client names follow the driver's naming scheme: a three letter prefix, a single node digit and
/// the instance number on that node. `cli13` is instance 3 on node 1, `cli111` is instance 11 on
/// node 1.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId {
    name: String,
    node: u32,
    instance: u32,
}

impl ClientId {
    /// Builds a client id with the default `cli` prefix.
    pub fn new(node: u32, instance: u32) -> Result<Self, KeyError> {
        format!("cli{node}{instance}").parse()
    }

    /// The full client name as it appears in record keys.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The 1-based node number this client runs on.
    pub fn node(&self) -> u32 {
        self.node
    }

    /// The instance number of this client on its node.
    pub fn instance(&self) -> u32 {
        self.instance
    }
}

impl FromStr for ClientId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::Client(s.to_owned());

        if !s.is_ascii() || s.len() < 5 || s.contains(KEY_SEPARATOR) {
            return Err(invalid());
        }

        let node = s[3..4].parse().map_err(|_| invalid())?;
        let instance = s[4..].parse().map_err(|_| invalid())?;

        Ok(Self {
            name: s.to_owned(),
            node,
            instance,
        })
    }
}

impl TryFrom<String> for ClientId {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClientId> for String {
    fn from(value: ClientId) -> Self {
        value.name
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The key of a single time-series record.
///
/// Keys are immutable once built. Two records of different sensors may share a timestamp, which
/// is why the sensor is part of the key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RecordKey {
    client: String,
    sensor: String,
    timestamp: u64,
    padding: usize,
}

impl RecordKey {
    /// Creates a key without zero padding.
    pub fn new(client: impl Into<String>, sensor: impl Into<String>, timestamp: u64) -> Self {
        Self {
            client: client.into(),
            sensor: sensor.into(),
            timestamp,
            padding: 1,
        }
    }

    /// Left-pads the serialized timestamp with zeros up to `width` digits.
    ///
    /// Padding only has a visible effect when `width` exceeds the number of digits.
    pub fn with_padding(mut self, width: usize) -> Self {
        self.padding = width.max(1);
        self
    }

    /// Name of the client that produced this record.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Name of the sensor channel.
    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    /// The logical timestamp of the record.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The `client:sensor` pair identifying one time series.
    pub fn device_id(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.client, self.sensor)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{:0>width$}",
            self.client,
            self.sensor,
            self.timestamp,
            width = self.padding
        )
    }
}

impl FromStr for RecordKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(KEY_SEPARATOR);
        let (Some(client), Some(sensor), Some(timestamp), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::Malformed(s.to_owned()));
        };

        if client.is_empty() || sensor.is_empty() {
            return Err(KeyError::Malformed(s.to_owned()));
        }

        let parsed = timestamp
            .parse()
            .map_err(|_| KeyError::Timestamp(s.to_owned()))?;

        Ok(Self {
            client: client.to_owned(),
            sensor: sensor.to_owned(),
            timestamp: parsed,
            padding: timestamp.len(),
        })
    }
}
