//! Data sources behind the local tools, with in-memory implementations.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    pub phone_number: String,
}

pub trait ContactBook: Send + Sync {
    fn contacts(&self) -> Vec<Contact>;
    fn add(&self, name: &str, phone_number: &str) -> bool;
    fn remove_by_name(&self, name: &str) -> bool;
    fn remove_by_number(&self, phone_number: &str) -> bool;
}

pub trait Dialer: Send + Sync {
    fn dial(&self, phone_number: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotification {
    pub id: i64,
    pub title: String,
    pub text: String,
    pub sub_text: Option<String>,
    pub package_name: String,
    pub app_name: String,
    pub posted_at: DateTime<Local>,
}

pub trait NotificationFeed: Send + Sync {
    /// Notifications filtered by app name and/or content substring.
    fn search(&self, app_name: Option<&str>, content: Option<&str>) -> Vec<UserNotification>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryItem {
    pub id: i64,
    pub content: String,
    pub tags: Option<String>,
}

pub trait MemoryStore: Send + Sync {
    fn insert(&self, content: &str, tags: Option<&str>) -> i64;
    fn all(&self) -> Vec<MemoryItem>;
    /// Items whose content or tags contain `keyword`.
    fn search(&self, keyword: &str) -> Vec<MemoryItem>;
    fn update(&self, id: i64, content: Option<&str>, tags: Option<&str>) -> bool;
    fn delete(&self, id: i64) -> bool;
}

#[derive(Default)]
pub struct InMemoryContacts {
    entries: Mutex<Vec<Contact>>,
}

impl InMemoryContacts {
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        Self {
            entries: Mutex::new(contacts),
        }
    }
}

impl ContactBook for InMemoryContacts {
    fn contacts(&self) -> Vec<Contact> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add(&self, name: &str, phone_number: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Contact {
                name: name.to_string(),
                phone_number: phone_number.to_string(),
            });
        true
    }

    fn remove_by_name(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|contact| contact.name != name);
        entries.len() != before
    }

    fn remove_by_number(&self, phone_number: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|contact| contact.phone_number != phone_number);
        entries.len() != before
    }
}

/// Records dialed numbers instead of placing calls.
#[derive(Default)]
pub struct RecordingDialer {
    dialed: Mutex<Vec<String>>,
}

impl RecordingDialer {
    pub fn dialed(&self) -> Vec<String> {
        self.dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Dialer for RecordingDialer {
    fn dial(&self, phone_number: &str) -> Result<(), String> {
        if phone_number.trim().is_empty() {
            return Err("empty phone number".to_string());
        }
        self.dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(phone_number.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotifications {
    entries: Mutex<Vec<UserNotification>>,
}

impl InMemoryNotifications {
    pub fn push(&self, mut notification: UserNotification) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        notification.id = entries.len() as i64 + 1;
        entries.push(notification);
    }
}

impl NotificationFeed for InMemoryNotifications {
    fn search(&self, app_name: Option<&str>, content: Option<&str>) -> Vec<UserNotification> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| app_name.map_or(true, |app| entry.app_name.contains(app)))
            .filter(|entry| {
                content.map_or(true, |needle| {
                    entry.title.contains(needle) || entry.text.contains(needle)
                })
            })
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    items: Vec<MemoryItem>,
}

impl MemoryStore for InMemoryMemoryStore {
    fn insert(&self, content: &str, tags: Option<&str>) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state.items.push(MemoryItem {
            id,
            content: content.to_string(),
            tags: tags.map(str::to_string),
        });
        id
    }

    fn all(&self) -> Vec<MemoryItem> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clone()
    }

    fn search(&self, keyword: &str) -> Vec<MemoryItem> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .iter()
            .filter(|item| {
                item.content.contains(keyword)
                    || item.tags.as_deref().is_some_and(|tags| tags.contains(keyword))
            })
            .cloned()
            .collect()
    }

    fn update(&self, id: i64, content: Option<&str>, tags: Option<&str>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if let Some(content) = content {
            item.content = content.to_string();
        }
        if let Some(tags) = tags {
            item.tags = Some(tags.to_string());
        }
        true
    }

    fn delete(&self, id: i64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        state.items.len() != before
    }
}

/// The stores handed to the local tools.
#[derive(Clone)]
pub struct LocalServices {
    pub contacts: Arc<dyn ContactBook>,
    pub dialer: Arc<dyn Dialer>,
    pub notifications: Arc<dyn NotificationFeed>,
    pub memory: Arc<dyn MemoryStore>,
}

impl LocalServices {
    pub fn in_memory() -> Self {
        Self {
            contacts: Arc::new(InMemoryContacts::default()),
            dialer: Arc::new(RecordingDialer::default()),
            notifications: Arc::new(InMemoryNotifications::default()),
            memory: Arc::new(InMemoryMemoryStore::default()),
        }
    }
}

impl Default for LocalServices {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_search_matches_content_and_tags() {
        let store = InMemoryMemoryStore::default();
        let first = store.insert("Likes green tea", Some("drinks"));
        store.insert("Birthday in May", None);

        assert_eq!(store.search("tea").len(), 1);
        assert_eq!(store.search("drinks")[0].id, first);
        assert!(store.update(first, None, Some("food")));
        assert!(store.search("drinks").is_empty());
        assert!(store.delete(first));
        assert!(!store.delete(first));
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn contacts_remove_by_name_or_number() {
        let book = InMemoryContacts::with_contacts(vec![
            Contact {
                name: "Fry".to_string(),
                phone_number: "8210-111-2222".to_string(),
            },
            Contact {
                name: "Leela".to_string(),
                phone_number: "8210-333-4444".to_string(),
            },
        ]);

        assert!(book.remove_by_number("8210-333-4444"));
        assert!(!book.remove_by_name("Leela"));
        assert!(book.remove_by_name("Fry"));
        assert!(book.contacts().is_empty());
    }
}
