//! Key layout of the interval store.
//!
//! ```text
//! i | entity | ts(tsStart)   -> encoded Interval        (primary)
//! x | id                     -> primary key             (id index)
//! a | entity                 -> primary key             (open interval index)
//! ```
//!
//! `entity` is each of group, user and device as a big-endian `u16` length
//! followed by the bytes. The encoding is prefix-free, so scanning one
//! entity's prefix never yields another entity's records. `ts` is the
//! timestamp with its sign bit flipped, big-endian, so byte order equals
//! numeric order.

use crate::core::EntityKey;
use crate::error::{IntervalError, Result};

pub const PRIMARY_TAG: u8 = b'i';
pub const ID_INDEX_TAG: u8 = b'x';
pub const ACTIVE_INDEX_TAG: u8 = b'a';

const TS_LEN: usize = 8;

/// Order-preserving encoding of a signed timestamp.
pub fn encode_ts(ts: i64) -> [u8; TS_LEN] {
    ((ts as u64) ^ (1 << 63)).to_be_bytes()
}

pub fn decode_ts(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; TS_LEN] = bytes
        .try_into()
        .map_err(|_| IntervalError::CorruptRecord(format!("timestamp of {} bytes", bytes.len())))?;
    Ok((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

fn push_component(buf: &mut Vec<u8>, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(IntervalError::InvalidHeartbeat(format!("{name} is empty")));
    }
    let len = u16::try_from(value.len()).map_err(|_| {
        IntervalError::InvalidHeartbeat(format!("{name} exceeds {} bytes", u16::MAX))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Validate an entity key and encode it.
pub fn encode_entity(entity: &EntityKey) -> Result<Vec<u8>> {
    let mut buf =
        Vec::with_capacity(6 + entity.group.len() + entity.user.len() + entity.device.len());
    push_component(&mut buf, "group", &entity.group)?;
    push_component(&mut buf, "user", &entity.user)?;
    push_component(&mut buf, "device", &entity.device)?;
    Ok(buf)
}

fn take_component<'a>(bytes: &mut &'a [u8]) -> Result<String> {
    if bytes.len() < 2 {
        return Err(IntervalError::CorruptRecord("truncated entity key".to_string()));
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(IntervalError::CorruptRecord("truncated entity key".to_string()));
    }
    let value = std::str::from_utf8(&rest[..len])
        .map_err(|e| IntervalError::CorruptRecord(format!("entity key is not UTF-8: {e}")))?;
    *bytes = &rest[len..];
    Ok(value.to_string())
}

fn decode_entity(bytes: &mut &[u8]) -> Result<EntityKey> {
    let group = take_component(bytes)?;
    let user = take_component(bytes)?;
    let device = take_component(bytes)?;
    Ok(EntityKey {
        group,
        user,
        device,
    })
}

/// Prefix covering every primary record.
pub fn primary_root() -> Vec<u8> {
    vec![PRIMARY_TAG]
}

/// Prefix covering every primary record of one entity.
pub fn entity_prefix(entity: &EntityKey) -> Result<Vec<u8>> {
    let mut key = primary_root();
    key.extend(encode_entity(entity)?);
    Ok(key)
}

pub fn primary_key(entity: &EntityKey, ts_start: i64) -> Result<Vec<u8>> {
    let mut key = entity_prefix(entity)?;
    key.extend_from_slice(&encode_ts(ts_start));
    Ok(key)
}

/// Split a primary key back into its entity and start timestamp.
pub fn decode_primary_key(key: &[u8]) -> Result<(EntityKey, i64)> {
    match key.split_first() {
        Some((&PRIMARY_TAG, mut rest)) => {
            let entity = decode_entity(&mut rest)?;
            let ts = decode_ts(rest)?;
            Ok((entity, ts))
        }
        _ => Err(IntervalError::CorruptRecord(
            "not a primary interval key".to_string(),
        )),
    }
}

/// Inclusive upper bound for a reverse seek over an entity prefix.
pub fn entity_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut bound = prefix.to_vec();
    bound.extend_from_slice(&[0xFF; TS_LEN + 1]);
    bound
}

pub fn id_index_root() -> Vec<u8> {
    vec![ID_INDEX_TAG]
}

pub fn id_index_key(id: &str) -> Vec<u8> {
    let mut key = id_index_root();
    key.extend_from_slice(id.as_bytes());
    key
}

pub fn active_index_root() -> Vec<u8> {
    vec![ACTIVE_INDEX_TAG]
}

pub fn active_index_key(entity: &EntityKey) -> Result<Vec<u8>> {
    let mut key = active_index_root();
    key.extend(encode_entity(entity)?);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_encoding_preserves_order() {
        let samples = [i64::MIN, -1_000, -1, 0, 1, 45, 200, i64::MAX];
        for pair in samples.windows(2) {
            assert!(encode_ts(pair[0]) < encode_ts(pair[1]), "{pair:?}");
        }
        for ts in samples {
            assert_eq!(decode_ts(&encode_ts(ts)).unwrap(), ts);
        }
    }

    #[test]
    fn test_primary_key_decodes() {
        let entity = EntityKey::new("g1", "u1", "d1");
        let key = primary_key(&entity, -7).unwrap();
        let (decoded, ts) = decode_primary_key(&key).unwrap();
        assert_eq!(decoded, entity);
        assert_eq!(ts, -7);
    }

    #[test]
    fn test_entity_prefixes_do_not_collide() {
        // "ab"/"c" and "a"/"bc" must not share a prefix relation.
        let a = entity_prefix(&EntityKey::new("ab", "c", "d")).unwrap();
        let b = entity_prefix(&EntityKey::new("a", "bc", "d")).unwrap();
        assert!(!a.starts_with(&b) && !b.starts_with(&a));

        let short = entity_prefix(&EntityKey::new("g", "u", "d")).unwrap();
        let longer = primary_key(&EntityKey::new("g", "u", "dd"), 0).unwrap();
        assert!(!longer.starts_with(&short));
    }

    #[test]
    fn test_upper_bound_covers_entity_keys() {
        let entity = EntityKey::new("g", "u", "d");
        let prefix = entity_prefix(&entity).unwrap();
        let bound = entity_upper_bound(&prefix);
        assert!(primary_key(&entity, i64::MAX).unwrap() < bound);
    }

    #[test]
    fn test_empty_component_rejected() {
        let err = encode_entity(&EntityKey::new("g", "", "d")).unwrap_err();
        assert!(matches!(err, IntervalError::InvalidHeartbeat(_)));
    }

    #[test]
    fn test_oversized_component_rejected() {
        let huge = "x".repeat(u16::MAX as usize + 1);
        let err = encode_entity(&EntityKey::new(huge, "u", "d")).unwrap_err();
        assert!(matches!(err, IntervalError::InvalidHeartbeat(_)));
    }

    #[test]
    fn test_truncated_primary_key_is_corrupt() {
        let key = primary_key(&EntityKey::new("g", "u", "d"), 3).unwrap();
        let err = decode_primary_key(&key[..key.len() - 2]).unwrap_err();
        assert!(matches!(err, IntervalError::CorruptRecord(_)));
    }
}
