use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;

/// View and like bookkeeping. The engine never blocks playback on these calls
/// and ignores their failures.
pub trait EngagementSink: Send + Sync {
    fn record_view(&self, record_id: &str) -> Result<()>;

    fn set_liked(&self, user_id: &str, record_id: &str, liked: bool) -> Result<()>;

    fn is_liked(&self, user_id: &str, record_id: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
struct EngagementState {
    views: HashMap<String, u64>,
    likes: HashSet<(String, String)>,
}

/// Process-local engagement store.
#[derive(Debug, Default)]
pub struct InMemoryEngagement {
    state: Mutex<EngagementState>,
}

impl InMemoryEngagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view_count(&self, record_id: &str) -> u64 {
        self.lock().views.get(record_id).copied().unwrap_or(0)
    }

    pub fn like_count(&self, record_id: &str) -> usize {
        self.lock()
            .likes
            .iter()
            .filter(|(_, liked)| liked == record_id)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, EngagementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngagementSink for InMemoryEngagement {
    fn record_view(&self, record_id: &str) -> Result<()> {
        *self.lock().views.entry(record_id.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    fn set_liked(&self, user_id: &str, record_id: &str, liked: bool) -> Result<()> {
        let key = (user_id.to_owned(), record_id.to_owned());
        let mut state = self.lock();
        if liked {
            state.likes.insert(key);
        } else {
            state.likes.remove(&key);
        }
        Ok(())
    }

    fn is_liked(&self, user_id: &str, record_id: &str) -> Result<bool> {
        let key = (user_id.to_owned(), record_id.to_owned());
        Ok(self.lock().likes.contains(&key))
    }
}

/// Compact counter label: `950`, `1.2K`, `2.1M`.
pub fn format_view_count(count: u64) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{EngagementSink, InMemoryEngagement, format_view_count};

    #[test]
    fn counters_render_with_one_decimal() {
        assert_eq!(format_view_count(950), "950");
        assert_eq!(format_view_count(1_200), "1.2K");
        assert_eq!(format_view_count(2_100_000), "2.1M");
        assert_eq!(format_view_count(1_000_000), "1.0M");
    }

    #[test]
    fn likes_are_tracked_per_user() {
        let sink = InMemoryEngagement::new();
        sink.set_liked("ana", "feed_1", true).expect("like");
        sink.set_liked("bo", "feed_1", true).expect("like");
        sink.set_liked("bo", "feed_1", false).expect("unlike");

        assert!(sink.is_liked("ana", "feed_1").expect("query"));
        assert!(!sink.is_liked("bo", "feed_1").expect("query"));
        assert_eq!(sink.like_count("feed_1"), 1);
    }

    #[test]
    fn views_accumulate() {
        let sink = InMemoryEngagement::new();
        sink.record_view("feed_2").expect("view");
        sink.record_view("feed_2").expect("view");
        assert_eq!(sink.view_count("feed_2"), 2);
    }
}
