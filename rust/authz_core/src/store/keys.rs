//! Byte keys for the persisted store.
//!
//! Record keys are `[role_len][role][resource_len][resource][tag][action]`,
//! lengths as 4-byte big-endian. Keys of one (role, resource) pair share a
//! prefix, and the wildcard tag sorts before every concrete action.

use crate::types::Scope;

/// Scope tag bytes. Wildcard sorts before every concrete action.
const TAG_WILDCARD: u8 = 0;
const TAG_ACTION: u8 = 1;

fn push_component(key: &mut Vec<u8>, part: &str) {
    key.extend_from_slice(&(part.len() as u32).to_be_bytes());
    key.extend_from_slice(part.as_bytes());
}

fn push_scope(key: &mut Vec<u8>, scope: Scope<'_>) {
    match scope {
        Scope::All => key.push(TAG_WILDCARD),
        Scope::Action(action) => {
            key.push(TAG_ACTION);
            key.extend_from_slice(action.as_bytes());
        }
    }
}

/// Prefix shared by every record of one (role, resource) pair:
/// [role_len: 4 bytes BE][role][resource_len: 4 bytes BE][resource]
pub fn encode_pair_prefix(role: &str, resource: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + role.len() + resource.len());
    push_component(&mut key, role);
    push_component(&mut key, resource);
    key
}

/// Record key: pair prefix followed by [tag: 1 byte][action bytes].
/// Length prefixes keep identifiers containing arbitrary bytes unambiguous.
pub fn encode_record_key(role: &str, resource: &str, scope: Scope<'_>) -> Vec<u8> {
    let mut key = encode_pair_prefix(role, resource);
    push_scope(&mut key, scope);
    key
}

/// Allow-grant counter key: [resource_len][resource][tag][action bytes].
pub fn encode_grant_key(resource: &str, scope: Scope<'_>) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + resource.len());
    push_component(&mut key, resource);
    push_scope(&mut key, scope);
    key
}

fn take_component<'a>(key: &mut &'a [u8]) -> Option<&'a str> {
    let bytes: &'a [u8] = *key;
    if bytes.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(bytes[0..4].try_into().ok()?) as usize;
    let rest = &bytes[4..];
    if rest.len() < len {
        return None;
    }
    let part = std::str::from_utf8(&rest[..len]).ok()?;
    *key = &rest[len..];
    Some(part)
}

/// Decoded record key components.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordKey<'a> {
    pub role: &'a str,
    pub resource: &'a str,
    pub scope: Scope<'a>,
}

pub fn decode_record_key(key: &[u8]) -> Option<RecordKey<'_>> {
    let mut cursor = key;
    let role = take_component(&mut cursor)?;
    let resource = take_component(&mut cursor)?;
    let (&tag, action) = cursor.split_first()?;
    let scope = match tag {
        TAG_WILDCARD if action.is_empty() => Scope::All,
        TAG_ACTION => Scope::Action(std::str::from_utf8(action).ok()?),
        _ => return None,
    };
    Some(RecordKey {
        role,
        resource,
        scope,
    })
}

/// Successor of a byte prefix for range scans.
///
/// Returns `None` if the prefix is all 0xFF bytes (no upper bound exists).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last == 0xFF {
            upper.pop();
        } else {
            *last += 1;
            return Some(upper);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_decodes_components() {
        let key = encode_record_key("editor", "report", Scope::Action("read"));
        let decoded = decode_record_key(&key).unwrap();
        assert_eq!(
            decoded,
            RecordKey {
                role: "editor",
                resource: "report",
                scope: Scope::Action("read"),
            }
        );

        let key = encode_record_key("editor", "report", Scope::All);
        assert_eq!(decode_record_key(&key).unwrap().scope, Scope::All);
    }

    #[test]
    fn test_pair_prefix_is_unambiguous() {
        // Without length prefixes these two pairs would share a byte prefix.
        let a = encode_pair_prefix("ab", "c");
        let b = encode_pair_prefix("a", "bc");
        assert_ne!(a, b);

        let key = encode_record_key("a", "bc", Scope::All);
        assert!(key.starts_with(&b));
        assert!(!key.starts_with(&a));
    }

    #[test]
    fn test_wildcard_sorts_first() {
        let wildcard = encode_record_key("r", "res", Scope::All);
        let empty_action = encode_record_key("r", "res", Scope::Action(""));
        let action = encode_record_key("r", "res", Scope::Action("a"));
        assert!(wildcard < empty_action);
        assert!(empty_action < action);
    }

    #[test]
    fn test_grant_key_distinguishes_wildcard() {
        assert_ne!(
            encode_grant_key("res", Scope::All),
            encode_grant_key("res", Scope::Action(""))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_record_key(&[0u8; 3]).is_none());
        assert!(decode_record_key(&[0, 0, 0, 9, b'a']).is_none());

        let mut key = encode_pair_prefix("r", "res");
        key.push(7);
        assert!(decode_record_key(&key).is_none());

        let mut key = encode_pair_prefix("r", "res");
        key.extend_from_slice(&[TAG_WILDCARD, b'x']);
        assert!(decode_record_key(&key).is_none());
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(b"ab\xff"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff\xff"), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }
}
