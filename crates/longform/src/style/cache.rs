use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use super::StyleProfile;

/// Per-user style profiles with a fixed time-to-live.
///
/// Owned by the service layer; jobs receive an `Arc` and never mutate it.
#[derive(Clone)]
pub struct StyleProfileCache {
    inner: Cache<String, Arc<StyleProfile>>,
}

impl StyleProfileCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<StyleProfile>> {
        self.inner.get(user_id)
    }

    pub fn insert(&self, user_id: &str, profile: StyleProfile) -> Arc<StyleProfile> {
        let profile = Arc::new(profile);
        self.inner.insert(user_id.to_string(), Arc::clone(&profile));
        profile
    }

    pub fn invalidate(&self, user_id: &str) {
        self.inner.invalidate(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(tone: &str) -> StyleProfile {
        StyleProfile {
            tone: tone.into(),
            vocabulary: vec![],
            sentence_structure: String::new(),
            punctuation: String::new(),
            perspective: String::new(),
            characteristics: vec![],
            style_guide: String::new(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = StyleProfileCache::new(Duration::from_secs(60));
        assert!(cache.get("u").is_none());
        cache.insert("u", profile("calm"));
        assert_eq!(cache.get("u").unwrap().tone, "calm");
        cache.invalidate("u");
        assert!(cache.get("u").is_none());
    }

    #[test]
    fn test_entries_expire() {
        let cache = StyleProfileCache::new(Duration::from_millis(20));
        cache.insert("u", profile("calm"));
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("u").is_none());
    }
}
