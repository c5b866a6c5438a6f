//! Deduplicated greetings for recognized identities.

use crate::{event::Identity, voice::VoiceAnnouncer};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub const DEFAULT_TEMPLATE: &str = "Congrats {name}";

/// Maps identities to greeting text, with a templated default.
#[derive(Debug, Clone)]
pub struct GreetingBook {
    greetings: HashMap<String, String>,
    template: String,
}

impl Default for GreetingBook {
    fn default() -> Self {
        Self::new(HashMap::new(), DEFAULT_TEMPLATE)
    }
}

impl GreetingBook {
    /// `template` may contain `{name}`, which is replaced by the identity.
    pub fn new(greetings: HashMap<String, String>, template: impl Into<String>) -> Self {
        Self {
            greetings,
            template: template.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.greetings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.greetings.is_empty()
    }

    /// The message for `identity`, or `None` when nothing should be said.
    ///
    /// The sentinel `"Unknown"` is always silent.
    pub fn message_for(&self, identity: &Identity) -> Option<String> {
        if identity.is_unknown() {
            return None;
        }
        let message = match self.greetings.get(identity.as_str()) {
            Some(greeting) => greeting.clone(),
            None => self.template.replace("{name}", identity.as_str()),
        };
        if message.trim().is_empty() {
            None
        } else {
            Some(message)
        }
    }
}

/// Remembers who has been greeted in the current Session.
///
/// The spoken set is only mutated here; it is cleared through [`reset`]
/// and otherwise lives as long as the Session that owns the deduplicator.
///
/// [`reset`]: AnnouncementDeduplicator::reset
#[derive(Debug, Default)]
pub struct AnnouncementDeduplicator {
    book: GreetingBook,
    spoken: HashSet<Identity>,
}

impl AnnouncementDeduplicator {
    pub fn new(book: GreetingBook) -> Self {
        Self {
            book,
            spoken: HashSet::new(),
        }
    }

    pub fn has_spoken(&self, identity: &Identity) -> bool {
        self.spoken.contains(identity)
    }

    pub fn spoken_count(&self) -> usize {
        self.spoken.len()
    }

    /// Greets every identity not yet greeted, in input order.
    ///
    /// Each new identity is handed to `voice` exactly once, then recorded as
    /// spoken. An identity repeated within `identities` is greeted on its
    /// first occurrence only. Returns the identities that were new.
    pub async fn announce(
        &mut self,
        identities: &[Identity],
        voice: &VoiceAnnouncer,
    ) -> Vec<Identity> {
        let mut announced = Vec::new();
        for identity in identities {
            if self.spoken.contains(identity) {
                continue;
            }
            match self.book.message_for(identity) {
                Some(message) => {
                    info!(%identity, "Announcing");
                    voice.say(&message).await;
                }
                None => debug!(%identity, "No greeting for identity"),
            }
            self.spoken.insert(identity.clone());
            announced.push(identity.clone());
        }
        announced
    }

    /// Forgets everyone greeted so far.
    pub fn reset(&mut self) {
        info!(count = self.spoken.len(), "Spoken names reset");
        self.spoken.clear();
    }
}
