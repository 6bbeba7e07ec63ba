//! Client-side id generation: UUIDv7, ULID-style high/low, snowflake.
//!
//! Engine-delegated kinds (`DBSerial`, `TBSerial`) live in the write
//! pipeline, which calls `Connection::next_value`; this module covers the
//! generators that mint ids without touching the store.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{IdError, StorageError};

/// Produce a UUIDv7 in canonical hyphenated text form.
pub fn uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Encode a 64-bit value as 13 Crockford-base32 characters (fixed width,
/// lexicographically ordered).
fn crockford13(mut v: u64) -> String {
    let mut out = [b'0'; 13];
    for slot in out.iter_mut().rev() {
        *slot = CROCKFORD[(v & 0x1f) as usize];
        v >>= 5;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// ULID-style textual id: high 48 bits wall-clock millis, low 16 bits a
/// process-local sequence. Monotonic within a process.
#[derive(Debug, Default)]
pub struct HighLowGenerator {
    state: Mutex<HighLowState>,
}

#[derive(Debug, Default)]
struct HighLowState {
    last_millis: u64,
    sequence: u16,
}

impl HighLowGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let mut state = self.state.lock();
        let now = unix_millis();
        if now == state.last_millis {
            state.sequence = state.sequence.wrapping_add(1);
        } else if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else {
            // clock went backwards; keep counting on the old millisecond
            state.sequence = state.sequence.wrapping_add(1);
        }
        crockford13((state.last_millis << 16) | u64::from(state.sequence))
    }
}

const SNOWFLAKE_EPOCH: u64 = 1_288_834_974_657;
const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 5;
const DATACENTER_ID_BITS: u32 = 5;
const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;
const MAX_DATACENTER_ID: u64 = (1 << DATACENTER_ID_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const WORKER_ID_SHIFT: u32 = SEQUENCE_BITS;
const DATACENTER_ID_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS + DATACENTER_ID_BITS;

/// 64-bit snowflake generator:
/// `[epoch-adjusted millis : 41 | datacenter : 5 | worker : 5 | sequence : 12]`.
///
/// Access is serialized; a clock regress is refused rather than risking a
/// duplicate; when the 12-bit sequence saturates within one millisecond
/// the generator spin-waits to the next.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    worker_id: u64,
    datacenter_id: u64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_millis: u64,
    sequence: u64,
}

impl SnowflakeGenerator {
    /// Worker and datacenter ids must fit in 5 bits each.
    pub fn new(worker_id: u64, datacenter_id: u64) -> Result<Self, StorageError> {
        if worker_id > MAX_WORKER_ID {
            return Err(StorageError::Config(format!(
                "snowflake worker id {} out of range 0..={}",
                worker_id, MAX_WORKER_ID
            )));
        }
        if datacenter_id > MAX_DATACENTER_ID {
            return Err(StorageError::Config(format!(
                "snowflake datacenter id {} out of range 0..={}",
                datacenter_id, MAX_DATACENTER_ID
            )));
        }
        Ok(SnowflakeGenerator {
            worker_id,
            datacenter_id,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    pub fn next(&self) -> Result<i64, IdError> {
        let mut state = self.state.lock();

        let mut now = unix_millis();
        if now < state.last_millis {
            return Err(IdError::ClockRegress(state.last_millis - now));
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // sequence saturated; spin to the next millisecond
                while now <= state.last_millis {
                    now = unix_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        let id = ((now - SNOWFLAKE_EPOCH) << TIMESTAMP_SHIFT)
            | (self.datacenter_id << DATACENTER_ID_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence;
        Ok(id as i64)
    }
}
