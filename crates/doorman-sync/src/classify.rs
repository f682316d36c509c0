//! Derives the ok/bad channel partition from stored state.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use doorman_store::{Store, StoreError};
use doorman_types::ChannelPair;

/// Stateless view computation: which channels' latest poster belongs to a
/// recognized email domain. Nothing here is persisted; the partition is a
/// pure function of stored state and configuration, recomputed per cycle.
pub struct Classifier {
    store: Arc<Store>,
    pattern: Regex,
    domains: Vec<String>,
    message_limit: u32,
}

impl Classifier {
    pub fn new(store: Arc<Store>, pattern: Regex, domains: Vec<String>, message_limit: u32) -> Self {
        Self {
            store,
            pattern,
            domains,
            message_limit,
        }
    }

    /// Compute the current classified view. Channels without messages never
    /// appear; every other matching channel lands in exactly one bucket.
    /// Output is deterministic: stable bucket order, stable sort.
    pub fn channel_pair(&self) -> Result<ChannelPair, StoreError> {
        let channels = self
            .store
            .channels_matching(&self.pattern, self.message_limit)?;

        let author_ids: Vec<String> = channels
            .iter()
            .map(|channel| channel.latest().user_id.clone())
            .collect();
        let users = self.store.users_by_id(&author_ids)?;
        let emails: HashMap<&str, &str> = users
            .iter()
            .map(|user| (user.id.as_str(), user.email.as_str()))
            .collect();

        let mut pair = ChannelPair::default();
        for channel in channels {
            let email = emails
                .get(channel.latest().user_id.as_str())
                .copied()
                .unwrap_or("");
            if in_domains(email, &self.domains) {
                pair.ok.push(channel);
            } else {
                pair.bad.push(channel);
            }
        }

        pair.ok.sort_by_key(|channel| channel.latest().created_at);
        pair.bad.sort_by_key(|channel| channel.latest().created_at);
        Ok(pair)
    }
}

fn in_domains(email: &str, domains: &[String]) -> bool {
    domains
        .iter()
        .any(|domain| email.ends_with(&format!("@{domain}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_match_is_a_suffix_match_after_the_at_sign() {
        let domains = vec!["corp.com".to_string()];
        assert!(in_domains("alice@corp.com", &domains));
        assert!(!in_domains("bob@other.com", &domains));
        // The @ must immediately precede the domain
        assert!(!in_domains("mallory@evilcorp.com", &domains));
        assert!(!in_domains("", &domains));
        assert!(!in_domains("corp.com", &domains));
    }

    #[test]
    fn domain_match_is_case_sensitive() {
        let domains = vec!["corp.com".to_string()];
        assert!(!in_domains("alice@CORP.COM", &domains));
    }
}
