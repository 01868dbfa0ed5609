//! In-memory repository (no persistence)
//!
//! Backs stage tests that don't want a database on disk. Everything
//! lives behind one mutex; fidelity to the SQL stores matters more
//! than speed here.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::{RepoError, RepoResult};
use super::Repository;
use crate::model::{Chat, CheckResult, Site};

#[derive(Default)]
struct Inner {
    sites: Vec<Site>,
    next_site_id: i64,
    results: Vec<CheckResult>,
    /// chat id → is_subscribed
    chats: HashMap<i64, bool>,
    /// (chat id, site id)
    bindings: HashSet<(i64, i64)>,
}

#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn site_id_by_url(&self, url: &str) -> Option<i64> {
        self.sites.iter().find(|s| s.url == url).map(|s| s.id)
    }

    fn insert_site(&mut self, url: &str) -> i64 {
        if let Some(id) = self.site_id_by_url(url) {
            return id;
        }
        self.next_site_id += 1;
        self.sites.push(Site {
            id: self.next_site_id,
            url: url.to_string(),
        });
        self.next_site_id
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn add_site(&self, url: &str) -> RepoResult<()> {
        self.lock().insert_site(url);
        Ok(())
    }

    async fn add_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()> {
        let mut inner = self.lock();
        let site_id = inner.insert_site(url);
        inner.bindings.insert((chat_id, site_id));
        Ok(())
    }

    async fn delete_site_by_id(&self, id: i64) -> RepoResult<()> {
        let mut inner = self.lock();
        inner.sites.retain(|s| s.id != id);
        inner.bindings.retain(|&(_, site_id)| site_id != id);
        inner.results.retain(|r| r.site.id != id);
        Ok(())
    }

    async fn delete_site_from_chat(&self, chat_id: i64, url: &str) -> RepoResult<()> {
        let mut inner = self.lock();
        if let Some(site_id) = inner.site_id_by_url(url) {
            inner.bindings.remove(&(chat_id, site_id));
        }
        Ok(())
    }

    async fn site_by_id(&self, id: i64) -> RepoResult<Site> {
        self.lock()
            .sites
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn all_sites(&self) -> RepoResult<Vec<Site>> {
        Ok(self.lock().sites.clone())
    }

    async fn monitored_sites(&self) -> RepoResult<Vec<Site>> {
        let inner = self.lock();
        Ok(inner
            .sites
            .iter()
            .filter(|s| inner.bindings.iter().any(|&(_, site_id)| site_id == s.id))
            .cloned()
            .collect())
    }

    async fn sites_by_chat_id(&self, chat_id: i64) -> RepoResult<Vec<Site>> {
        let inner = self.lock();
        Ok(inner
            .sites
            .iter()
            .filter(|s| inner.bindings.contains(&(chat_id, s.id)))
            .cloned()
            .collect())
    }

    async fn add_result(&self, result: &CheckResult) -> RepoResult<()> {
        self.lock().results.push(result.clone());
        Ok(())
    }

    async fn last_results_for_site(&self, site: &Site, n: u32) -> RepoResult<Vec<CheckResult>> {
        let inner = self.lock();
        let mut results: Vec<CheckResult> = inner
            .results
            .iter()
            .filter(|r| r.site.id == site.id)
            .cloned()
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.time));
        results.truncate(n as usize);
        Ok(results)
    }

    async fn second_to_last_successful_for_site(
        &self,
        site: &Site,
    ) -> RepoResult<Option<CheckResult>> {
        let inner = self.lock();
        let mut successes: Vec<&CheckResult> = inner
            .results
            .iter()
            .filter(|r| r.site.id == site.id && r.is_successful())
            .collect();
        successes.sort_by_key(|r| std::cmp::Reverse(r.time));
        Ok(successes.get(1).map(|r| (*r).clone()))
    }

    async fn upsert_chat(&self, chat: &Chat) -> RepoResult<()> {
        self.lock().chats.insert(chat.id, chat.is_subscribed);
        Ok(())
    }

    async fn set_chat_subscribed(&self, chat_id: i64, subscribed: bool) -> RepoResult<()> {
        let mut inner = self.lock();
        if let Some(entry) = inner.chats.get_mut(&chat_id) {
            *entry = subscribed;
        }
        Ok(())
    }

    async fn chats_subscribed_to_url(&self, url: &str) -> RepoResult<Vec<Chat>> {
        let inner = self.lock();
        let Some(site_id) = inner.site_id_by_url(url) else {
            return Ok(Vec::new());
        };
        let mut chats: Vec<Chat> = inner
            .chats
            .iter()
            .filter(|&(&chat_id, &subscribed)| {
                subscribed && inner.bindings.contains(&(chat_id, site_id))
            })
            .map(|(&id, &is_subscribed)| Chat { id, is_subscribed })
            .collect();
        chats.sort_by_key(|c| c.id);
        Ok(chats)
    }
}
