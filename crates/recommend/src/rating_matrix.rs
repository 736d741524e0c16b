//! Thread-safe sparse user-item rating store
//!
//! Users and items are assigned dense indices in first-seen order. Indices
//! stay stable until the whole matrix is rebuilt with `replace`; trained
//! models carry their own copy of the index maps.

use crate::types::{ItemId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct MatrixInner {
    /// user -> item -> rating
    ratings: HashMap<UserId, HashMap<ItemId, f64>>,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    users: Vec<UserId>,
    items: Vec<ItemId>,
    num_ratings: usize,
}

impl MatrixInner {
    fn upsert(&mut self, user_id: UserId, item_id: ItemId, rating: f64) {
        if !self.user_index.contains_key(&user_id) {
            self.user_index.insert(user_id, self.users.len());
            self.users.push(user_id);
        }
        if !self.item_index.contains_key(&item_id) {
            self.item_index.insert(item_id, self.items.len());
            self.items.push(item_id);
        }

        let previous = self
            .ratings
            .entry(user_id)
            .or_default()
            .insert(item_id, rating);
        if previous.is_none() {
            self.num_ratings += 1;
        }
    }
}

/// Point-in-time copy of the matrix used to train a model
#[derive(Debug, Clone, Default)]
pub struct MatrixSnapshot {
    /// index -> user id
    pub users: Vec<UserId>,
    /// index -> item id
    pub items: Vec<ItemId>,
    /// (user_index, item_index, rating), sorted by index pair
    pub ratings: Vec<(usize, usize, f64)>,
}

/// Sparse rating matrix guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct RatingMatrix {
    inner: RwLock<MatrixInner>,
}

impl RatingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a rating, registering unseen users and items
    pub fn set(&self, user_id: UserId, item_id: ItemId, rating: f64) {
        self.inner.write().upsert(user_id, item_id, rating);
    }

    /// Swap the whole matrix for one built from `ratings`
    ///
    /// Later entries for the same pair overwrite earlier ones. The new matrix
    /// is built before the write lock is taken.
    pub fn replace<I>(&self, ratings: I)
    where
        I: IntoIterator<Item = (UserId, ItemId, f64)>,
    {
        let mut fresh = MatrixInner::default();
        for (user_id, item_id, rating) in ratings {
            fresh.upsert(user_id, item_id, rating);
        }
        *self.inner.write() = fresh;
    }

    /// Rating for the pair, or 0.0 when the user never rated the item
    pub fn get(&self, user_id: UserId, item_id: ItemId) -> f64 {
        self.inner
            .read()
            .ratings
            .get(&user_id)
            .and_then(|items| items.get(&item_id))
            .copied()
            .unwrap_or(0.0)
    }

    /// Independent copy of every rating the user has given
    pub fn get_user_ratings(&self, user_id: UserId) -> HashMap<ItemId, f64> {
        self.inner
            .read()
            .ratings
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_index(&self, user_id: UserId) -> Option<usize> {
        self.inner.read().user_index.get(&user_id).copied()
    }

    pub fn item_index(&self, item_id: ItemId) -> Option<usize> {
        self.inner.read().item_index.get(&item_id).copied()
    }

    pub fn num_users(&self) -> usize {
        self.inner.read().users.len()
    }

    pub fn num_items(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn num_ratings(&self) -> usize {
        self.inner.read().num_ratings
    }

    /// Copy the current universe and every known rating
    pub fn snapshot(&self) -> MatrixSnapshot {
        let inner = self.inner.read();

        let mut ratings = Vec::with_capacity(inner.num_ratings);
        for (user_id, items) in &inner.ratings {
            let u = inner.user_index[user_id];
            for (item_id, rating) in items {
                ratings.push((u, inner.item_index[item_id], *rating));
            }
        }
        ratings.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        MatrixSnapshot {
            users: inner.users.clone(),
            items: inner.items.clone(),
            ratings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let matrix = RatingMatrix::new();
        matrix.set(1, 10, 5.0);
        matrix.set(1, 11, 1.0);
        matrix.set(2, 10, 4.5);

        assert_eq!(matrix.get(1, 10), 5.0);
        assert_eq!(matrix.get(1, 11), 1.0);
        assert_eq!(matrix.get(2, 10), 4.5);
        assert_eq!(matrix.get(2, 11), 0.0);
        assert_eq!(matrix.get(99, 10), 0.0);

        assert_eq!(matrix.num_users(), 2);
        assert_eq!(matrix.num_items(), 2);
        assert_eq!(matrix.num_ratings(), 3);
        assert!(matrix.user_index(1).is_some());
        assert!(matrix.item_index(11).is_some());
    }

    #[test]
    fn test_set_is_idempotent_upsert() {
        let matrix = RatingMatrix::new();
        matrix.set(1, 10, 2.0);
        matrix.set(1, 10, 3.0);

        assert_eq!(matrix.get(1, 10), 3.0);
        assert_eq!(matrix.num_ratings(), 1);
        assert_eq!(matrix.num_users(), 1);
        assert_eq!(matrix.num_items(), 1);
    }

    #[test]
    fn test_user_ratings_are_a_copy() {
        let matrix = RatingMatrix::new();
        matrix.set(1, 10, 2.0);

        let mut copy = matrix.get_user_ratings(1);
        copy.insert(11, 4.0);

        assert_eq!(matrix.get_user_ratings(1).len(), 1);
        assert!(matrix.get_user_ratings(7).is_empty());
    }

    #[test]
    fn test_snapshot_indices_are_consistent() {
        let matrix = RatingMatrix::new();
        matrix.set(7, 100, 1.0);
        matrix.set(3, 200, 2.0);
        matrix.set(7, 200, 3.0);

        let snapshot = matrix.snapshot();
        assert_eq!(snapshot.users, vec![7, 3]);
        assert_eq!(snapshot.items, vec![100, 200]);
        assert_eq!(snapshot.ratings.len(), 3);

        for (u, i, rating) in snapshot.ratings {
            assert_eq!(matrix.get(snapshot.users[u], snapshot.items[i]), rating);
        }
    }

    #[test]
    fn test_replace_drops_previous_ratings() {
        let matrix = RatingMatrix::new();
        matrix.set(1, 10, 5.0);
        matrix.set(2, 11, 3.0);

        matrix.replace(vec![(3, 12, 1.0), (3, 12, 2.0), (1, 13, 4.0)]);

        assert_eq!(matrix.get(1, 10), 0.0);
        assert_eq!(matrix.get(3, 12), 2.0);
        assert_eq!(matrix.get(1, 13), 4.0);
        assert_eq!(matrix.num_users(), 2);
        assert_eq!(matrix.num_items(), 2);
        assert_eq!(matrix.num_ratings(), 2);
        assert!(matrix.user_index(2).is_none());
    }

    #[test]
    fn test_concurrent_writers() {
        use std::sync::Arc;

        let matrix = Arc::new(RatingMatrix::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let matrix = Arc::clone(&matrix);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        matrix.set(t, i, (i % 5) as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(matrix.num_users(), 8);
        assert_eq!(matrix.num_items(), 50);
        assert_eq!(matrix.num_ratings(), 400);
    }
}
