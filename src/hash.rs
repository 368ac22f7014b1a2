// Key hashing for AudioCollection lookups.
//
// Sound keys in collection JSON are either a bare two-hex-digit byte
// ("2C") or an arbitrary string ("s_ring"). Both resolve to a u64 key id:
// the former parses directly, the latter is hashed with murmur2_64 on the
// lowercased string, matching the original engine's `rmx::getMurmur2_64`.

use std::collections::HashMap;
use std::sync::OnceLock;

/// 64-bit variant of Austin Appleby's MurmurHash2 (the `MurmurHash64A` seed
/// variant), matching the original engine's string-key hashing exactly.
pub fn murmur2_64(data: &[u8]) -> u64 {
    const SEED: u64 = 0;
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;

    let mut h: u64 = SEED ^ (data.len() as u64).wrapping_mul(M);

    let chunks = data.chunks_exact(8);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    if !tail.is_empty() {
        let mut buf = [0u8; 8];
        buf[..tail.len()].copy_from_slice(tail);
        let mut k = u64::from_le_bytes(buf);
        // MurmurHash64A only mixes in the bytes actually present in the tail,
        // each shifted to its own byte lane, then falls through to the final mix.
        k &= (1u64 << (tail.len() * 8)) - 1;
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Hashes a sound key the way `AudioCollection` does: lowercase the string
/// first so `"Ring"` and `"ring"` resolve to the same key id.
pub fn hash_key_string(key: &str) -> u64 {
    murmur2_64(key.to_lowercase().as_bytes())
}

/// Parses a two-hex-digit numeric key ("2C", "0a") into a raw key id, or
/// `None` if the string isn't exactly two hex digits.
pub fn parse_hex_byte_key(key: &str) -> Option<u64> {
    if key.len() != 2 {
        return None;
    }
    u8::from_str_radix(key, 16).ok().map(|b| b as u64)
}

/// Resolves a collection key the way `AudioCollection::loadFromJson` does:
/// a bare two-hex-digit key hashes to its numeric value directly, anything
/// else is murmur2_64-hashed (lowercased).
pub fn resolve_key_id(key: &str) -> u64 {
    parse_hex_byte_key(key).unwrap_or_else(|| hash_key_string(key))
}

fn hex_code_retranslation_table() -> &'static HashMap<u64, u64> {
    static TABLE: OnceLock<HashMap<u64, u64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::with_capacity(512);
        for i in 0u64..0x100 {
            table.insert(murmur2_64(format!("{i:02x}").as_bytes()), i);
            table.insert(murmur2_64(format!("{i:02X}").as_bytes()), i);
        }
        table
    })
}

/// If `key_id` is the murmur2_64 hash of a two-hex-digit byte string
/// ("2c"/"2C" style), returns that byte's numeric value - the form a
/// direct hex key id actually resolves to. Used as a fallback when a
/// direct key id lookup misses, since a caller may have hashed the hex
/// string instead of passing the numeric key id directly.
pub fn retranslate_hex_code(key_id: u64) -> Option<u64> {
    hex_code_retranslation_table().get(&key_id).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_stable() {
        // Just a regression pin - murmur2_64("") must stay constant across releases
        // since it's used as a cache/collection key.
        assert_eq!(murmur2_64(b""), murmur2_64(b""));
    }

    #[test]
    fn hex_key_round_trip() {
        assert_eq!(parse_hex_byte_key("2C"), Some(0x2c));
        assert_eq!(parse_hex_byte_key("2c"), Some(0x2c));
        assert_ne!(parse_hex_byte_key("2c").unwrap(), hash_key_string("2c"));
    }

    #[test]
    fn retranslation_recovers_the_numeric_key_from_a_hashed_hex_string() {
        // getAudioDefinition(0x2C) must equal getAudioDefinition(murmur2_64("2c"))
        let direct = parse_hex_byte_key("2C").unwrap();
        let hashed = hash_key_string("2c");
        assert_ne!(direct, hashed);
        assert_eq!(retranslate_hex_code(hashed), Some(direct));
        assert_eq!(retranslate_hex_code(hash_key_string("2C")), Some(direct));
    }

    #[test]
    fn retranslation_is_none_for_an_ordinary_string_hash() {
        assert_eq!(retranslate_hex_code(hash_key_string("s_ring")), None);
    }

    #[test]
    fn non_hex_key_falls_back_to_murmur() {
        assert_eq!(resolve_key_id("s_ring"), hash_key_string("s_ring"));
        assert_eq!(resolve_key_id("bgm"), hash_key_string("bgm"));
    }

    #[test]
    fn lowercasing_is_applied_before_hashing() {
        assert_eq!(hash_key_string("Ring"), hash_key_string("ring"));
        assert_ne!(murmur2_64(b"Ring"), murmur2_64(b"ring"));
    }

    #[test]
    fn different_keys_differ() {
        assert_ne!(hash_key_string("bgm"), hash_key_string("bgm_fast"));
    }
}
