// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic process names in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique identifier
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Process name like `worker-3f2a9c1e`, unique per registration
pub fn process_name(prefix: &str, ids: &dyn IdProvider) -> String {
    let id = ids.generate_id();
    let short: String = id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{}-{}", prefix, short)
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ids: `id-1`, `id-2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl IdProvider for SequentialIds {
        fn generate_id(&self) -> String {
            format!("id{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_name_uses_short_id() {
        let name = process_name("worker", &UuidProvider);
        assert!(name.starts_with("worker-"));
        assert_eq!(name.len(), "worker-".len() + 8);

        let ids = mocks::SequentialIds::default();
        assert_eq!(process_name("dispatcher", &ids), "dispatcher-id1");
        assert_eq!(process_name("dispatcher", &ids), "dispatcher-id2");
    }
}
