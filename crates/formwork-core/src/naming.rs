//! Logical identifier derivation
//!
//! A resource's logical id is derived from its path inside the unit: the
//! sanitized path components concatenated, followed by a short hash of the
//! unsanitized path. The hash keeps ids unique even when sanitization maps two
//! different paths onto the same human-readable prefix (`my-bucket` vs
//! `my_bucket`).
//!
//! ```
//! use formwork_core::naming::logical_id;
//! let id = logical_id(&["UserPool", "Resource"]).unwrap();
//! assert!(id.starts_with("UserPool"));
//! assert_eq!(id.len(), "UserPool".len() + 8);
//! ```

use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Component dropped from both the human part and the hash
pub const HIDDEN_ID: &str = "Default";

/// Component dropped from the human part only
pub const HIDDEN_FROM_HUMAN_ID: &str = "Resource";

const HASH_LEN: usize = 8;
const MAX_ID_LEN: usize = 255;
const MAX_HUMAN_LEN: usize = MAX_ID_LEN - HASH_LEN;

/// Derive the logical id for a node from its path components below the unit
pub fn logical_id(components: &[&str]) -> Result<String, CoreError> {
    let components: Vec<&str> = components
        .iter()
        .copied()
        .filter(|c| *c != HIDDEN_ID)
        .collect();

    if components.is_empty() {
        return Err(CoreError::InvalidName {
            name: HIDDEN_ID.to_string(),
            reason: "a logical id needs at least one visible path component".to_string(),
        });
    }

    let hash = path_hash(&components);
    let human: String = remove_consecutive_duplicates(&components)
        .into_iter()
        .filter(|c| *c != HIDDEN_FROM_HUMAN_ID)
        .map(remove_non_alphanumeric)
        .collect::<String>()
        .chars()
        .take(MAX_HUMAN_LEN)
        .collect();

    Ok(format!("{}{}", human, hash))
}

/// Output key a producing unit uses to publish a value for other units
pub fn export_output_key(logical_id: &str, attribute: Option<&str>) -> String {
    let (kind, attr) = match attribute {
        Some(attr) => ("FnGetAtt", remove_non_alphanumeric(attr)),
        None => ("Ref", String::new()),
    };
    let hash = path_hash(&[logical_id, attribute.unwrap_or("")]);
    format!("ExportsOutput{}{}{}{}", kind, logical_id, attr, hash)
}

/// Globally unique export name for an output key of `unit`
pub fn export_name(unit: &str, output_key: &str) -> String {
    format!("{}:{}", unit, output_key)
}

/// Uppercase hex prefix of the SHA-256 of the `/`-joined components
pub fn path_hash(components: &[&str]) -> String {
    let digest = Sha256::digest(components.join("/").as_bytes());
    let hex = format!("{:x}", digest);
    hex[..HASH_LEN].to_uppercase()
}

/// Strip everything but ASCII letters and digits
pub fn remove_non_alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn remove_consecutive_duplicates<'a>(components: &[&'a str]) -> Vec<&'a str> {
    let mut result: Vec<&str> = Vec::with_capacity(components.len());
    for component in components {
        if result.last() != Some(component) {
            result.push(*component);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_component_hidden_from_human_part() {
        let id = logical_id(&["UserPool", "Resource"]).unwrap();
        assert_eq!(&id[..8], "UserPool");
        assert_eq!(id.len(), 16);

        // ...but still part of the hash
        let bare = logical_id(&["UserPool"]).unwrap();
        assert_ne!(id, bare);
    }

    #[test]
    fn test_default_component_is_dropped_entirely() {
        assert_eq!(
            logical_id(&["Service", "Default"]).unwrap(),
            logical_id(&["Service"]).unwrap()
        );
        assert!(logical_id(&["Default"]).is_err());
    }

    #[test]
    fn test_sanitization_clash_is_disambiguated() {
        let a = logical_id(&["websvc-sg"]).unwrap();
        let b = logical_id(&["websvc_sg"]).unwrap();
        assert!(a.starts_with("websvcsg"));
        assert!(b.starts_with("websvcsg"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let id = logical_id(&["Vpc", "Vpc", "Subnet"]).unwrap();
        assert!(id.starts_with("VpcSubnet"));
    }

    #[test]
    fn test_long_paths_are_truncated() {
        let long = "a".repeat(400);
        let id = logical_id(&[long.as_str(), "x"]).unwrap();
        assert_eq!(id.len(), MAX_ID_LEN);
    }

    #[test]
    fn test_hash_is_uppercase_hex() {
        let hash = path_hash(&["a", "b"]);
        assert_eq!(hash.len(), 8);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_export_names() {
        let key = export_output_key("TestRole6C9272DF", Some("Arn"));
        assert!(key.starts_with("ExportsOutputFnGetAttTestRole6C9272DFArn"));
        let ref_key = export_output_key("TestRole6C9272DF", None);
        assert!(ref_key.starts_with("ExportsOutputRefTestRole6C9272DF"));
        assert_ne!(key, ref_key);
        assert_eq!(export_name("role-stack", &ref_key), format!("role-stack:{}", ref_key));
    }
}
