use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};
use uuid::Uuid;

/// `{prefix}-{epoch millis}-{9 random lowercase alphanumerics}`
pub fn generate_id(prefix: &str) -> String {
    let suffix = Alphanumeric
        .sample_string(&mut rand::thread_rng(), 9)
        .to_ascii_lowercase();
    format!("{prefix}-{}-{suffix}", Utc::now().timestamp_millis())
}

pub fn block_id() -> String {
    generate_id("block")
}

pub fn item_id() -> String {
    generate_id("item")
}

/// Client-side id for a note created while the remote store is unreachable.
pub fn provisional_note_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_in_a_burst() {
        let ids: HashSet<String> = (0..1000).map(|_| block_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_id_shape() {
        let id = item_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "item");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }
}
