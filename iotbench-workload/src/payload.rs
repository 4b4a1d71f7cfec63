//! Record payloads.
//!
//! A deterministic payload starts with the sensor name and repeats a self-describing tuple
//! until the requested length is reached:
//!
//! ```text
//! cent_9_Flow:cent_9_Flow_value:0.4137:timestamp:1700000000042:2876127301...
//! ```
//!
//! The embedded value is drawn from an RNG seeded with the workload seed, the key and the field
//! name, and the embedded timestamp is the logical timestamp of the key. Recomputing a payload
//! with the same inputs therefore yields the same bytes, which is what the verifier relies on.

use std::fmt::Write;

use bytes::Bytes;
use iotbench_storage::{KEY_SEPARATOR, RecordKey};
use rand::distr::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// 64-bit FNV-1a over a sequence of byte slices.
pub(crate) fn fnv1a<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for part in parts {
        for byte in part {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

fn payload_seed(seed: u64, key: &RecordKey, field: &str) -> u64 {
    let key = key.to_string();
    fnv1a([&seed.to_le_bytes()[..], key.as_bytes(), &[0u8], field.as_bytes()])
}

/// Builds the deterministic payload of `field` in the record at `key`.
pub fn deterministic_payload(seed: u64, key: &RecordKey, field: &str, len: usize) -> Bytes {
    let sensor = key.sensor();
    let mut rng = SmallRng::seed_from_u64(payload_seed(seed, key, field));
    let value: f64 = rng.random();

    let mut buffer = String::with_capacity(len + 64);
    buffer.push_str(sensor);

    while buffer.len() < len {
        let _ = write!(
            buffer,
            "{KEY_SEPARATOR}{sensor}_value{KEY_SEPARATOR}{value:.4}{KEY_SEPARATOR}timestamp{KEY_SEPARATOR}{}{KEY_SEPARATOR}",
            key.timestamp(),
        );
        let hash = fnv1a([buffer.as_bytes()]) as u32;
        let _ = write!(buffer, "{hash}");
    }

    let mut bytes = buffer.into_bytes();
    bytes.truncate(len);
    Bytes::from(bytes)
}

/// Builds `len` bytes of random alphanumeric filler.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Bytes {
    rng.sample_iter(Alphanumeric).take(len).collect::<Vec<u8>>().into()
}

/// Extracts the measured value from a deterministic payload.
///
/// Returns `None` if the payload is too short or not in the deterministic format.
pub fn embedded_value(payload: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?;
    text.split(KEY_SEPARATOR).nth(2)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::stream_rng;

    fn key() -> RecordKey {
        RecordKey::new("cli11", "cent_9_Flow", 1_700_000_000_042)
    }

    #[test]
    fn payload_has_exact_length() {
        for len in [0, 5, 64, 1000] {
            assert_eq!(deterministic_payload(1, &key(), "field0", len).len(), len);
        }
    }

    #[test]
    fn payload_is_self_describing() {
        let payload = deterministic_payload(1, &key(), "field0", 200);
        let text = std::str::from_utf8(&payload).unwrap();

        assert!(text.starts_with("cent_9_Flow:cent_9_Flow_value:"));
        assert!(text.contains(":timestamp:1700000000042:"));

        let value = embedded_value(&payload).unwrap();
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn payload_is_reproducible() {
        let first = deterministic_payload(1, &key(), "field0", 128);
        assert_eq!(first, deterministic_payload(1, &key(), "field0", 128));

        assert_ne!(first, deterministic_payload(2, &key(), "field0", 128));
        assert_ne!(first, deterministic_payload(1, &key(), "field1", 128));
    }

    #[test]
    fn short_payloads_have_no_value() {
        let payload = deterministic_payload(1, &key(), "field0", 8);
        assert_eq!(embedded_value(&payload), None);
    }

    #[test]
    fn random_payload_is_alphanumeric() {
        let payload = random_payload(&mut stream_rng(3, 0), 100);
        assert_eq!(payload.len(), 100);
        assert!(payload.iter().all(u8::is_ascii_alphanumeric));
    }
}
