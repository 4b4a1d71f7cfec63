//! Record keys and values of the IoT workload.

use bytes::Bytes;
use iotbench_storage::{ClientId, FieldMap, FieldSet, RecordKey};
use rand::rngs::SmallRng;

use crate::config::InsertOrder;
use crate::generator::{NumberGenerator, UniformGenerator};
use crate::payload::{self, fnv1a};

const LOCATIONS: [&str; 13] = [
    "cent_9", "side_8", "side_7", "ang_30", "ang_45", "ang_60", "ang_90", "bef_1195", "aft_1120",
    "mid_1125", "cor_4", "cor_1", "cor_5",
];

const MEASUREMENTS: [&str; 12] = [
    "Humidity",
    "Power",
    "Pressure",
    "Flow",
    "Level",
    "Temperature",
    "vibration",
    "tilt",
    "level",
    "level_vibrating",
    "level_rotating",
    "level_admittance",
];

/// Locations that additionally carry a pneumatic level sensor.
const PNEUMATIC_LOCATIONS: usize = 4;

/// Builds the catalog of sensor channels.
///
/// Every location reports every measurement, and the first four locations also report a
/// `Pneumatic_level`. The catalog is ordered by measurement, then location.
pub fn sensor_catalog() -> Vec<String> {
    let mut sensors: Vec<_> = MEASUREMENTS
        .iter()
        .flat_map(|measurement| {
            LOCATIONS
                .iter()
                .map(move |location| format!("{location}_{measurement}"))
        })
        .collect();

    sensors.extend(
        LOCATIONS[..PNEUMATIC_LOCATIONS]
            .iter()
            .map(|location| format!("{location}_Pneumatic_level")),
    );

    sensors
}

/// How payloads are produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PayloadMode {
    /// Replayable payloads derived from the given seed.
    Deterministic {
        /// The payload seed of the run.
        seed: u64,
    },
    /// Random filler.
    Random,
}

/// Builds the keys and values of one worker.
#[derive(Debug)]
pub struct RecordSynthesizer {
    client: ClientId,
    sensors: Vec<String>,
    field_names: Vec<String>,
    insert_order: InsertOrder,
    timestamp_origin: u64,
    read_lag: u64,
    zero_padding: usize,
    payload: PayloadMode,
    write_sensor: UniformGenerator,
    read_sensor: UniformGenerator,
    field_chooser: UniformGenerator,
    field_length: Box<dyn NumberGenerator>,
    rng: SmallRng,
}

/// Parameters of a [`RecordSynthesizer`] that are not generators.
#[derive(Clone, Debug)]
pub struct KeyLayout {
    /// The client written into every key.
    pub client: ClientId,
    /// Number of fields per record.
    pub field_count: usize,
    /// Mapping from record numbers to timestamps.
    pub insert_order: InsertOrder,
    /// Timestamp of record number zero.
    pub timestamp_origin: u64,
    /// How far read keys trail the chosen record.
    pub read_lag: u64,
    /// Minimum number of digits of serialized timestamps.
    pub zero_padding: usize,
}

impl RecordSynthesizer {
    /// Creates a synthesizer.
    ///
    /// `rng` drives the choice of sensors and fields as well as random filler.
    pub fn new(
        layout: KeyLayout,
        payload: PayloadMode,
        field_length: Box<dyn NumberGenerator>,
        mut rng: impl FnMut() -> SmallRng,
    ) -> Self {
        let sensors = sensor_catalog();
        let last_sensor = sensors.len() as u64 - 1;
        let field_count = layout.field_count.max(1);

        Self {
            client: layout.client,
            field_names: (0..field_count).map(|i| format!("field{i}")).collect(),
            insert_order: layout.insert_order,
            timestamp_origin: layout.timestamp_origin,
            read_lag: layout.read_lag,
            zero_padding: layout.zero_padding,
            payload,
            write_sensor: UniformGenerator::new(0, last_sensor, rng()),
            read_sensor: UniformGenerator::new(0, last_sensor, rng()),
            field_chooser: UniformGenerator::new(0, field_count as u64 - 1, rng()),
            field_length,
            rng: rng(),
            sensors,
        }
    }

    /// The names of all fields of a record.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// The logical timestamp of a record number.
    pub fn timestamp_for(&self, record: u64) -> u64 {
        match self.insert_order {
            InsertOrder::Ordered => self.timestamp_origin.saturating_add(record),
            InsertOrder::Hashed => fnv1a([&record.to_le_bytes()[..]]),
        }
    }

    fn key(&self, sensor: usize, timestamp: u64) -> RecordKey {
        RecordKey::new(self.client.name(), &self.sensors[sensor], timestamp)
            .with_padding(self.zero_padding)
    }

    /// Builds the key of a new or updated record with a uniformly chosen sensor.
    pub fn write_key(&mut self, record: u64) -> RecordKey {
        let sensor = self.write_sensor.next_value() as usize;
        self.key(sensor, self.timestamp_for(record))
    }

    /// Builds a key for reading around a chosen record.
    ///
    /// The timestamp trails the record by the configured read lag, clamped to zero, so that
    /// reads target data that is likely durable.
    pub fn read_key(&mut self, record: u64) -> RecordKey {
        let sensor = self.read_sensor.next_value() as usize;
        let timestamp = self.timestamp_for(record).saturating_sub(self.read_lag);
        self.key(sensor, timestamp)
    }

    /// Chooses a field uniformly.
    pub fn random_field(&mut self) -> &str {
        let index = self.field_chooser.next_value() as usize;
        &self.field_names[index]
    }

    /// A single random field, for reads that do not request all fields.
    pub fn projection(&mut self) -> FieldSet {
        FieldSet::from([self.random_field().to_owned()])
    }

    fn payload(&mut self, key: &RecordKey, field: &str) -> Bytes {
        let len = self.field_length.next_value() as usize;
        match self.payload {
            PayloadMode::Deterministic { seed } => {
                payload::deterministic_payload(seed, key, field, len)
            }
            PayloadMode::Random => payload::random_payload(&mut self.rng, len),
        }
    }

    /// Builds values for all fields of the record.
    pub fn values(&mut self, key: &RecordKey) -> FieldMap {
        let names = self.field_names.clone();
        names
            .into_iter()
            .map(|field| {
                let data = self.payload(key, &field);
                (field, data)
            })
            .collect()
    }

    /// Builds a value for one random field of the record.
    pub fn single_value(&mut self, key: &RecordKey) -> FieldMap {
        let field = self.random_field().to_owned();
        let data = self.payload(key, &field);
        FieldMap::from([(field, data)])
    }
}
