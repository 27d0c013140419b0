// src/core/store/memory.rs

//! In-process [`StateStore`] used by the test suite. Semantics mirror the
//! remote store closely enough for the cache, registry, limiter, and
//! invalidator to be exercised without a running Redis: lazy TTL expiry,
//! atomic-per-key INCR, and a cursor-based SCAN over a sorted snapshot.

use crate::core::ProxyError;
use crate::core::store::StateStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// The maximum recursion depth for glob pattern matching.
const MAX_GLOB_RECURSION_DEPTH: u32 = 128;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        // The read guard must be dropped before the expired entry is removed.
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ping(&self) -> Result<(), ProxyError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError> {
        Ok(self.live_value(key))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), ProxyError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, ProxyError> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, ProxyError> {
        Ok(self.live_value(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, ProxyError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let count = entry
            .value
            .parse::<i64>()
            .map_err(|_| ProxyError::Store("value is not an integer".to_string()))?
            + 1;
        entry.value = count.to_string();
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProxyError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), ProxyError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, ProxyError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ProxyError> {
        // Snapshot + sort so the cursor stays meaningful across calls.
        let mut all: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        all.sort();

        let start = cursor as usize;
        if start >= all.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(all.len());
        let batch: Vec<String> = all[start..end]
            .iter()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();
        let next = if end >= all.len() { 0 } else { end as u64 };
        Ok((next, batch))
    }
}

/// Matches a string against a Redis-style glob pattern.
/// Supports `*`, `?`, `[...]`, `[^...]`, and `\`.
pub fn glob_match(pattern: &[u8], string: &[u8]) -> bool {
    glob_match_recursive(pattern, string, 0)
}

fn glob_match_recursive(mut pattern: &[u8], mut string: &[u8], depth: u32) -> bool {
    if depth > MAX_GLOB_RECURSION_DEPTH {
        return false;
    }

    loop {
        match pattern.first() {
            // Empty pattern matches only an empty string.
            None => return string.is_empty(),
            // `*` matches any sequence of characters.
            Some(b'*') => {
                pattern = &pattern[1..];
                if pattern.is_empty() {
                    return true;
                }
                for i in 0..=string.len() {
                    if glob_match_recursive(pattern, &string[i..], depth + 1) {
                        return true;
                    }
                }
                return false;
            }
            // `?` matches any single character.
            Some(b'?') => {
                if string.is_empty() {
                    return false;
                }
                pattern = &pattern[1..];
                string = &string[1..];
            }
            // `[...]` matches any character in the set.
            Some(b'[') => {
                if string.is_empty() {
                    return false;
                }
                pattern = &pattern[1..];
                let (negated, p_rest) = if pattern.first() == Some(&b'^') {
                    (true, &pattern[1..])
                } else {
                    (false, pattern)
                };
                pattern = p_rest;
                let mut matched = false;
                let s_char = string[0];
                loop {
                    if pattern.is_empty() {
                        return false; // Unmatched bracket
                    }
                    if pattern.first() == Some(&b']') {
                        pattern = &pattern[1..];
                        break;
                    }
                    let p_start = pattern[0];
                    pattern = &pattern[1..];
                    if pattern.first() == Some(&b'-')
                        && !pattern[1..].is_empty()
                        && pattern[1] != b']'
                    {
                        let p_end = pattern[1];
                        pattern = &pattern[2..];
                        if s_char >= p_start && s_char <= p_end {
                            matched = true;
                        }
                    } else if s_char == p_start {
                        matched = true;
                    }
                }
                if negated {
                    matched = !matched;
                }
                if !matched {
                    return false;
                }
                string = &string[1..];
            }
            // `\` escapes the next character.
            Some(b'\\') => {
                pattern = &pattern[1..];
                if pattern.is_empty() || pattern.first() != string.first() {
                    return false;
                }
                pattern = &pattern[1..];
                string = &string[1..];
            }
            // A literal character must match exactly.
            Some(&p_char) => {
                if string.is_empty() || p_char != string[0] {
                    return false;
                }
                pattern = &pattern[1..];
                string = &string[1..];
            }
        }
    }
}
