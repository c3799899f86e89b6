use log::debug;
use std::collections::VecDeque;
use std::time::Duration;

use super::contact::Contact;
use super::node_id::{ID_BITS, NodeId};

pub const K: usize = 20;

/// A bucket that has not heard from its oldest contact for this long may
/// replace it with a newcomer.
const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Up to K contacts, least recently seen at the front.
#[derive(Clone, Default)]
struct KBucket {
    contacts: VecDeque<Contact>,
}

impl KBucket {
    fn upsert(&mut self, mut contact: Contact) -> bool {
        if let Some(pos) = self
            .contacts
            .iter()
            .position(|c| c.node_id == contact.node_id)
        {
            // Known node; it may have moved, so keep the newest address.
            self.contacts.remove(pos);
            contact.touch();
            self.contacts.push_back(contact);
            return true;
        }

        if self.contacts.len() < K {
            self.contacts.push_back(contact);
            return true;
        }

        if self
            .contacts
            .front()
            .is_some_and(|oldest| oldest.is_stale(STALE_AFTER))
        {
            self.contacts.pop_front();
            self.contacts.push_back(contact);
            return true;
        }

        false
    }

    fn remove(&mut self, node_id: &NodeId) -> bool {
        match self.contacts.iter().position(|c| &c.node_id == node_id) {
            Some(pos) => {
                self.contacts.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: vec![KBucket::default(); ID_BITS],
        }
    }

    /// Add or refresh a contact. Returns false for our own id or when the
    /// bucket is full of live contacts.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        match self.local_id.bucket_index(&contact.node_id) {
            Some(idx) => {
                let added = self.buckets[idx].upsert(contact);
                if !added {
                    debug!("Bucket {} full, dropping new contact", idx);
                }
                added
            }
            None => false,
        }
    }

    pub fn remove_contact(&mut self, node_id: &NodeId) -> bool {
        match self.local_id.bucket_index(node_id) {
            Some(idx) => self.buckets[idx].remove(node_id),
            None => false,
        }
    }

    pub fn find_closest_contacts(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all_contacts = self.all_contacts();
        all_contacts.sort_by_key(|c| c.node_id.distance(target));
        all_contacts.truncate(count);
        all_contacts
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.contacts.iter().cloned())
            .collect()
    }
}
