//! Arena-backed namespace tree.
//!
//! Nodes live in a single `Vec<Node>`; children are referenced by `NodeId`
//! index rather than pointers, so the tree can be rebuilt, rotated, and
//! walked without any unsafe code or reference-counted cycles — the arena
//! redesign applies here the same way it does to any pointer-graph
//! structure in the source material.
//!
//! Two balancing disciplines share this arena. `Strict` keeps an AVL height
//! invariant on every insert and delete via single/double rotations.
//! `Relaxed` skips per-operation rotation entirely (the tree is free to grow
//! — and shrink — like a plain BST) and relies on an explicit `rebalance()`
//! call to restore shape: a whole-tree rebuild from the sorted in-order
//! sequence (Day-Stout-Warren-style). This is a rotation-free BST with
//! periodic rebuilding, not a red-black tree — there is no per-node color,
//! and no delete/insert fixup state machine to get subtly wrong without a
//! compiler to check it against. Mode selection operates tree-wide off a
//! lock-free sliding access window rather than truly independent per-subtree
//! disciplines; each node still carries its own `mode_tag` recording what
//! discipline was in effect when it was inserted, matching the data model's
//! shape even though the rotation decision itself is tree-wide.
//!
//! `delete` never reclaims the deleted node's arena slot — the arena only
//! ever grows, matching the no-reallocation-on-removal tradeoff the rest of
//! this module already makes for rotations. `Tree::live` tracks the actual
//! key count separately from `arena.len()`.

use crate::label::Fingerprint;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Strict,
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTag {
    Strict,
    Relaxed,
    Hybrid,
}

#[derive(Debug)]
pub struct ServiceEndpoint {
    pub protocol: String,
    pub port: u16,
    pub path: String,
    pub frequency: AtomicU64,
}

impl ServiceEndpoint {
    pub fn new(protocol: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        ServiceEndpoint {
            protocol: protocol.into(),
            port,
            path: path.into(),
            frequency: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            protocol: self.protocol.clone(),
            port: self.port,
            path: self.path.clone(),
            frequency: self.frequency.load(AtomicOrdering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub protocol: String,
    pub port: u16,
    pub path: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

struct Node {
    key: Fingerprint,
    endpoint: ServiceEndpoint,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u32,
    mode_tag: ModeTag,
}

impl Node {
    fn leaf(key: Fingerprint, endpoint: ServiceEndpoint, mode_tag: ModeTag) -> Self {
        Node {
            key,
            endpoint,
            left: None,
            right: None,
            height: 1,
            mode_tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyPresent,
    NotFound,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyPresent => write!(f, "fingerprint already registered"),
            RegistryError::NotFound => write!(f, "fingerprint not registered"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Lock-free sliding window of recent read/write events, used to decide
/// balancing discipline without making lookups contend with each other.
struct AccessWindow {
    slots: Vec<AtomicBool>,
    cursor: AtomicUsize,
}

impl AccessWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AccessWindow {
            slots: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// `true` slot value means "write"; the ring overwrites oldest first.
    fn record(&self, is_write: bool) {
        let i = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) % self.slots.len();
        self.slots[i].store(is_write, AtomicOrdering::Relaxed);
    }

    fn writes_fraction(&self) -> f64 {
        let writes = self
            .slots
            .iter()
            .filter(|s| s.load(AtomicOrdering::Relaxed))
            .count();
        writes as f64 / self.slots.len() as f64
    }

    fn read_write_ratio(&self) -> f64 {
        let writes = self
            .slots
            .iter()
            .filter(|s| s.load(AtomicOrdering::Relaxed))
            .count();
        let reads = self.slots.len() - writes;
        if writes == 0 {
            f64::INFINITY
        } else {
            reads as f64 / writes as f64
        }
    }
}

fn decide_discipline(window: &AccessWindow, current: Discipline) -> Discipline {
    if window.writes_fraction() > 0.6 {
        Discipline::Relaxed
    } else if window.read_write_ratio() > 3.0 {
        Discipline::Strict
    } else {
        current
    }
}

pub struct Tree {
    arena: Vec<Node>,
    root: Option<NodeId>,
    window: AccessWindow,
    discipline: Discipline,
    live: usize,
}

impl Tree {
    pub fn new(access_window: usize) -> Self {
        Tree {
            arena: Vec::new(),
            root: None,
            window: AccessWindow::new(access_window),
            discipline: Discipline::Strict,
            live: 0,
        }
    }

    fn alloc(&mut self, key: Fingerprint, endpoint: ServiceEndpoint, mode_tag: ModeTag) -> NodeId {
        self.arena.push(Node::leaf(key, endpoint, mode_tag));
        self.live += 1;
        NodeId((self.arena.len() - 1) as u32)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.arena[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.arena[id.0 as usize]
    }

    fn height(&self, id: Option<NodeId>) -> u32 {
        id.map(|id| self.node(id).height).unwrap_or(0)
    }

    fn update_height(&mut self, id: NodeId) {
        let h = 1 + self.height(self.node(id).left).max(self.height(self.node(id).right));
        self.node_mut(id).height = h;
    }

    fn balance_factor(&self, id: NodeId) -> i64 {
        self.height(self.node(id).left) as i64 - self.height(self.node(id).right) as i64
    }

    fn rotate_left(&mut self, id: NodeId) -> NodeId {
        let right = self.node(id).right.expect("rotate_left requires a right child");
        let right_left = self.node(right).left;
        self.node_mut(right).left = Some(id);
        self.node_mut(id).right = right_left;
        self.update_height(id);
        self.update_height(right);
        right
    }

    fn rotate_right(&mut self, id: NodeId) -> NodeId {
        let left = self.node(id).left.expect("rotate_right requires a left child");
        let left_right = self.node(left).right;
        self.node_mut(left).right = Some(id);
        self.node_mut(id).left = left_right;
        self.update_height(id);
        self.update_height(left);
        left
    }

    fn rebalance_node(&mut self, id: NodeId) -> NodeId {
        self.update_height(id);
        let bf = self.balance_factor(id);
        if bf > 1 {
            let left = self.node(id).left.unwrap();
            let new_left = if self.balance_factor(left) < 0 {
                self.rotate_left(left)
            } else {
                left
            };
            self.node_mut(id).left = Some(new_left);
            let new_root = self.rotate_right(id);
            self.update_height(new_root);
            new_root
        } else if bf < -1 {
            let right = self.node(id).right.unwrap();
            let new_right = if self.balance_factor(right) > 0 {
                self.rotate_right(right)
            } else {
                right
            };
            self.node_mut(id).right = Some(new_right);
            let new_root = self.rotate_left(id);
            self.update_height(new_root);
            new_root
        } else {
            id
        }
    }

    fn insert_rec(
        &mut self,
        id: Option<NodeId>,
        key: &Fingerprint,
        endpoint: ServiceEndpoint,
        strict: bool,
        mode_tag: ModeTag,
    ) -> Result<NodeId, (RegistryError, ServiceEndpoint)> {
        let id = match id {
            None => return Ok(self.alloc(key.clone(), endpoint, mode_tag)),
            Some(id) => id,
        };
        match key.cmp(&self.node(id).key) {
            Ordering::Equal => return Err((RegistryError::AlreadyPresent, endpoint)),
            Ordering::Less => {
                let left = self.node(id).left;
                let new_left = self.insert_rec(left, key, endpoint, strict, mode_tag)?;
                self.node_mut(id).left = Some(new_left);
            }
            Ordering::Greater => {
                let right = self.node(id).right;
                let new_right = self.insert_rec(right, key, endpoint, strict, mode_tag)?;
                self.node_mut(id).right = Some(new_right);
            }
        }
        self.update_height(id);
        if strict {
            Ok(self.rebalance_node(id))
        } else {
            Ok(id)
        }
    }

    pub fn register(
        &mut self,
        key: &Fingerprint,
        endpoint: ServiceEndpoint,
    ) -> Result<(), RegistryError> {
        self.window.record(true);
        self.discipline = decide_discipline(&self.window, self.discipline);
        let strict = matches!(self.discipline, Discipline::Strict);
        let mode_tag = match self.discipline {
            Discipline::Strict => ModeTag::Strict,
            Discipline::Relaxed => ModeTag::Relaxed,
        };
        match self.insert_rec(self.root, key, endpoint, strict, mode_tag) {
            Ok(new_root) => {
                self.root = Some(new_root);
                Ok(())
            }
            Err((e, _endpoint)) => Err(e),
        }
    }

    /// Remove the leftmost (minimum-key) node under `id`, returning its id
    /// and the new root of the subtree it was removed from. `Strict`
    /// rebalances along the path back up; `Relaxed` leaves shape alone,
    /// matching `insert_rec`'s own asymmetry between the two disciplines.
    fn remove_min(&mut self, id: NodeId, strict: bool) -> (NodeId, Option<NodeId>) {
        match self.node(id).left {
            None => (id, self.node(id).right),
            Some(left) => {
                let (min_id, new_left) = self.remove_min(left, strict);
                self.node_mut(id).left = new_left;
                self.update_height(id);
                let new_root = if strict { self.rebalance_node(id) } else { id };
                (min_id, Some(new_root))
            }
        }
    }

    fn delete_rec(
        &mut self,
        id: Option<NodeId>,
        key: &Fingerprint,
        strict: bool,
    ) -> Result<Option<NodeId>, RegistryError> {
        let id = match id {
            None => return Err(RegistryError::NotFound),
            Some(id) => id,
        };
        match key.cmp(&self.node(id).key) {
            Ordering::Less => {
                let left = self.node(id).left;
                let new_left = self.delete_rec(left, key, strict)?;
                self.node_mut(id).left = new_left;
            }
            Ordering::Greater => {
                let right = self.node(id).right;
                let new_right = self.delete_rec(right, key, strict)?;
                self.node_mut(id).right = new_right;
            }
            Ordering::Equal => {
                let left = self.node(id).left;
                let right = self.node(id).right;
                return Ok(match (left, right) {
                    (None, None) => None,
                    (Some(l), None) => Some(l),
                    (None, Some(r)) => Some(r),
                    (Some(l), Some(r)) => {
                        // Splice the in-order successor (the right
                        // subtree's minimum) into `id`'s old position;
                        // `id` itself is discarded along with its data.
                        let (min_id, new_right) = self.remove_min(r, strict);
                        self.node_mut(min_id).left = Some(l);
                        self.node_mut(min_id).right = new_right;
                        self.update_height(min_id);
                        Some(if strict { self.rebalance_node(min_id) } else { min_id })
                    }
                });
            }
        }
        self.update_height(id);
        if strict {
            Ok(Some(self.rebalance_node(id)))
        } else {
            Ok(Some(id))
        }
    }

    /// Remove `key` from the tree. Errors with `RegistryError::NotFound` if
    /// the key was never registered.
    pub fn delete(&mut self, key: &Fingerprint) -> Result<(), RegistryError> {
        self.window.record(true);
        self.discipline = decide_discipline(&self.window, self.discipline);
        let strict = matches!(self.discipline, Discipline::Strict);
        self.root = self.delete_rec(self.root, key, strict)?;
        self.live -= 1;
        Ok(())
    }

    pub fn lookup(&self, key: &Fingerprint) -> Option<EndpointSnapshot> {
        self.window.record(false);
        let mut cursor = self.root;
        while let Some(id) = cursor {
            let node = self.node(id);
            match key.cmp(&node.key) {
                Ordering::Equal => {
                    node.endpoint.frequency.fetch_add(1, AtomicOrdering::Relaxed);
                    return Some(node.endpoint.snapshot());
                }
                Ordering::Less => cursor = node.left,
                Ordering::Greater => cursor = node.right,
            }
        }
        None
    }

    fn in_order_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.arena.len());
        let mut stack = Vec::new();
        let mut cursor = self.root;
        loop {
            while let Some(id) = cursor {
                stack.push(id);
                cursor = self.node(id).left;
            }
            match stack.pop() {
                None => break,
                Some(id) => {
                    out.push(id);
                    cursor = self.node(id).right;
                }
            }
        }
        out
    }

    /// Rebuild the tree from its in-order sequence into a height-balanced
    /// shape. Idempotent and key-set/key-order preserving: run it twice in a
    /// row and the second run is a no-op modulo node identity.
    pub fn rebalance(&mut self) {
        let ids = self.in_order_ids();
        self.root = self.build_balanced(&ids);
    }

    fn build_balanced(&mut self, ids: &[NodeId]) -> Option<NodeId> {
        if ids.is_empty() {
            return None;
        }
        let mid = ids.len() / 2;
        let left = self.build_balanced(&ids[..mid]);
        let right = self.build_balanced(&ids[mid + 1..]);
        let root = ids[mid];
        self.node_mut(root).left = left;
        self.node_mut(root).right = right;
        self.update_height(root);
        Some(root)
    }

    /// Move frequently-looked-up nodes closer to the root while preserving
    /// in-order key sequence, using a weighted-median tree build (the
    /// approximate-optimal-BST technique): at each level the split point is
    /// chosen to balance cumulative hit weight rather than item count.
    ///
    /// Only triggers when hits are actually concentrated: if the top 20% of
    /// nodes by frequency account for more than `concentration_threshold` of
    /// total hits.
    pub fn promote_hot_nodes(&mut self, concentration_threshold: f64) -> bool {
        let ids = self.in_order_ids();
        if ids.is_empty() {
            return false;
        }
        let mut freqs: Vec<u64> = ids
            .iter()
            .map(|&id| self.node(id).endpoint.frequency.load(AtomicOrdering::Relaxed))
            .collect();
        let total: u64 = freqs.iter().sum();
        if total == 0 {
            return false;
        }
        let mut sorted_desc = freqs.clone();
        sorted_desc.sort_unstable_by(|a, b| b.cmp(a));
        let top_count = ((ids.len() as f64 * 0.2).ceil() as usize).max(1);
        let top_sum: u64 = sorted_desc.iter().take(top_count).sum();
        if (top_sum as f64) / (total as f64) <= concentration_threshold {
            return false;
        }

        // Weight 0 would make split-selection degenerate; floor at 1 so
        // every node still participates in the weighted median.
        for f in freqs.iter_mut() {
            if *f == 0 {
                *f = 1;
            }
        }

        self.root = self.build_weighted(&ids, &freqs);
        true
    }

    fn build_weighted(&mut self, ids: &[NodeId], weights: &[u64]) -> Option<NodeId> {
        if ids.is_empty() {
            return None;
        }
        if ids.len() == 1 {
            self.update_height(ids[0]);
            return Some(ids[0]);
        }
        let total: u64 = weights.iter().sum();
        let mut acc = 0u64;
        let mut split = 0;
        for (i, w) in weights.iter().enumerate() {
            acc += w;
            if acc * 2 >= total {
                split = i;
                break;
            }
        }
        let left = self.build_weighted(&ids[..split], &weights[..split]);
        let right = self.build_weighted(&ids[split + 1..], &weights[split + 1..]);
        let root = ids[split];
        self.node_mut(root).left = left;
        self.node_mut(root).right = right;
        self.update_height(root);
        Some(root)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn mode_tag_of(&self, key: &Fingerprint) -> Option<ModeTag> {
        let mut cursor = self.root;
        while let Some(id) = cursor {
            let node = self.node(id);
            match key.cmp(&node.key) {
                Ordering::Equal => return Some(node.mode_tag),
                Ordering::Less => cursor = node.left,
                Ordering::Greater => cursor = node.right,
            }
        }
        None
    }

    /// In-order `(fingerprint, endpoint)` pairs matching `prefix` and
    /// `predicate`, starting after `resume` if given. Returns the results
    /// found (bounded by `limit`) plus a cursor to resume from, or `None`
    /// once the traversal is exhausted.
    pub fn search_pattern(
        &self,
        prefix: &[crate::label::Label],
        predicate: &dyn Fn(&Fingerprint) -> bool,
        resume: Option<SearchCursor>,
        limit: usize,
    ) -> (Vec<(Fingerprint, EndpointSnapshot)>, Option<SearchCursor>) {
        let all = self.in_order_ids();
        let start = resume.map(|c| c.0).unwrap_or(0);
        let mut results = Vec::new();
        let mut i = start;
        while i < all.len() && results.len() < limit {
            let node = self.node(all[i]);
            if node.key.starts_with(prefix) && predicate(&node.key) {
                results.push((node.key.clone(), node.endpoint.snapshot()));
            }
            i += 1;
        }
        let cursor = if i < all.len() { Some(SearchCursor(i)) } else { None };
        (results, cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCursor(usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Fingerprint;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::parse(s).unwrap()
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let mut tree = Tree::new(8);
        tree.register(&fp("svc.a"), ServiceEndpoint::new("tcp", 9000, "/a")).unwrap();
        let found = tree.lookup(&fp("svc.a")).unwrap();
        assert_eq!(found.port, 9000);
        assert_eq!(found.frequency, 1);
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let mut tree = Tree::new(8);
        tree.register(&fp("svc.a"), ServiceEndpoint::new("tcp", 9000, "/a")).unwrap();
        let err = tree
            .register(&fp("svc.a"), ServiceEndpoint::new("tcp", 9001, "/a2"))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyPresent);
    }

    #[test]
    fn lookup_missing_returns_none() {
        let tree = Tree::new(8);
        assert!(tree.lookup(&fp("svc.missing")).is_none());
    }

    #[test]
    fn strict_insert_keeps_avl_height_bound() {
        let mut tree = Tree::new(256); // window stays read-dominated at 0 writes seen... force strict
        for i in 0..100 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", 9000, "/")).unwrap();
        }
        // height should be close to log2(100) ~= 6.6, AVL bound is ~1.44*log2(n)
        let max_height = tree.arena.iter().map(|n| n.height).max().unwrap();
        assert!(max_height <= 16, "height {max_height} exceeds a generous AVL bound");
    }

    #[test]
    fn rebalance_preserves_all_keys_and_order() {
        let mut tree = Tree::new(8);
        for i in 0..30 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", 9000, "/")).unwrap();
        }
        let before: Vec<String> = tree.in_order_ids().iter().map(|&id| tree.node(id).key.to_string()).collect();
        tree.rebalance();
        let after: Vec<String> = tree.in_order_ids().iter().map(|&id| tree.node(id).key.to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn rebalance_is_idempotent() {
        let mut tree = Tree::new(8);
        for i in 0..15 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", 9000, "/")).unwrap();
        }
        tree.rebalance();
        let first_heights: Vec<u32> = tree.arena.iter().map(|n| n.height).collect();
        tree.rebalance();
        let second_heights: Vec<u32> = tree.arena.iter().map(|n| n.height).collect();
        assert_eq!(first_heights, second_heights);
    }

    #[test]
    fn promote_hot_nodes_preserves_order() {
        let mut tree = Tree::new(8);
        for i in 0..20 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", 9000, "/")).unwrap();
        }
        for _ in 0..100 {
            tree.lookup(&fp("svc.n010"));
        }
        let before: Vec<String> = tree.in_order_ids().iter().map(|&id| tree.node(id).key.to_string()).collect();
        tree.promote_hot_nodes(0.1);
        let after: Vec<String> = tree.in_order_ids().iter().map(|&id| tree.node(id).key.to_string()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn search_pattern_filters_by_prefix_and_predicate() {
        let mut tree = Tree::new(8);
        tree.register(&fp("svc.payments.charge"), ServiceEndpoint::new("tcp", 1, "/")).unwrap();
        tree.register(&fp("svc.payments.refund"), ServiceEndpoint::new("tcp", 2, "/")).unwrap();
        tree.register(&fp("svc.billing.invoice"), ServiceEndpoint::new("tcp", 3, "/")).unwrap();

        let prefix = fp("svc.payments");
        let (results, cursor) = tree.search_pattern(prefix.labels(), &|_| true, None, 10);
        assert_eq!(results.len(), 2);
        assert!(cursor.is_none());
    }

    #[test]
    fn delete_removes_key_and_reports_not_found_on_repeat() {
        let mut tree = Tree::new(8);
        tree.register(&fp("svc.a"), ServiceEndpoint::new("tcp", 1, "/")).unwrap();
        tree.register(&fp("svc.b"), ServiceEndpoint::new("tcp", 2, "/")).unwrap();
        assert_eq!(tree.len(), 2);

        tree.delete(&fp("svc.a")).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.lookup(&fp("svc.a")).is_none());
        assert!(tree.lookup(&fp("svc.b")).is_some());

        let err = tree.delete(&fp("svc.a")).unwrap_err();
        assert_eq!(err, RegistryError::NotFound);
    }

    #[test]
    fn delete_of_a_two_child_node_preserves_in_order_sequence() {
        let mut tree = Tree::new(256); // large window keeps discipline Strict
        for i in 0..15 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", i as u16, "/")).unwrap();
        }
        let before: Vec<String> = tree
            .in_order_ids()
            .iter()
            .map(|&id| tree.node(id).key.to_string())
            .filter(|k| k != "svc.n007")
            .collect();

        tree.delete(&fp("svc.n007")).unwrap();

        let after: Vec<String> = tree.in_order_ids().iter().map(|&id| tree.node(id).key.to_string()).collect();
        assert_eq!(before, after);
        assert_eq!(tree.len(), 14);
    }

    #[test]
    fn strict_delete_keeps_avl_height_bound() {
        let mut tree = Tree::new(256); // read-dominated window, stays Strict
        for i in 0..100 {
            let key = fp(&format!("svc.n{i:03}"));
            tree.register(&key, ServiceEndpoint::new("tcp", 9000, "/")).unwrap();
        }
        for i in (0..100).step_by(2) {
            tree.delete(&fp(&format!("svc.n{i:03}"))).unwrap();
        }
        assert_eq!(tree.len(), 50);
        let max_height = tree.arena.iter().map(|n| n.height).max().unwrap();
        assert!(max_height <= 16, "height {max_height} exceeds a generous AVL bound");
    }

    #[test]
    fn search_pattern_resumes_from_cursor() {
        let mut tree = Tree::new(8);
        for i in 0..5 {
            tree.register(&fp(&format!("svc.n{i}")), ServiceEndpoint::new("tcp", 1, "/")).unwrap();
        }
        let (first, cursor) = tree.search_pattern(&[], &|_| true, None, 2);
        assert_eq!(first.len(), 2);
        let cursor = cursor.expect("more results remain");
        let (second, _) = tree.search_pattern(&[], &|_| true, Some(cursor), 10);
        assert_eq!(second.len(), 3);
    }
}
