//! Namespace resolver: service endpoints keyed by dotted label sequences,
//! stored in a hybrid strict/relaxed balancing tree.

mod label;
mod tree;

pub use label::{Fingerprint, Label, LabelError, MAX_FINGERPRINT_LEN, MAX_LABEL_LEN};
pub use tree::{Discipline, EndpointSnapshot, ModeTag, RegistryError, SearchCursor, ServiceEndpoint};

use parking_lot::RwLock;
use tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    pub access_window: usize,
    pub hot_node_concentration_threshold: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            access_window: 128,
            hot_node_concentration_threshold: 0.5,
        }
    }
}

/// Concurrency: readers (`lookup`, `search_pattern`) take only the
/// `RwLock`'s read guard; `register` and `rebalance` take the write guard,
/// so rotations never run concurrently with a reader walking the tree.
/// Grounded on the single-lock-guards-shared-mutable-state discipline used
/// by the teacher's session type for its channel table.
pub struct Registry {
    tree: RwLock<Tree>,
    config: ResolverConfig,
}

impl Registry {
    pub fn new(config: ResolverConfig) -> Self {
        Registry {
            tree: RwLock::new(Tree::new(config.access_window)),
            config,
        }
    }

    pub fn register(
        &self,
        fingerprint: &Fingerprint,
        endpoint: ServiceEndpoint,
    ) -> Result<(), RegistryError> {
        let result = self.tree.write().register(fingerprint, endpoint);
        if result.is_ok() {
            tracing::debug!(%fingerprint, "registered service endpoint");
        }
        result
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<EndpointSnapshot> {
        self.tree.read().lookup(fingerprint)
    }

    pub fn delete(&self, fingerprint: &Fingerprint) -> Result<(), RegistryError> {
        let result = self.tree.write().delete(fingerprint);
        if result.is_ok() {
            tracing::debug!(%fingerprint, "deleted service endpoint");
        }
        result
    }

    pub fn mode_tag_of(&self, fingerprint: &Fingerprint) -> Option<ModeTag> {
        self.tree.read().mode_tag_of(fingerprint)
    }

    pub fn search_pattern(
        &self,
        prefix: &[Label],
        predicate: impl Fn(&Fingerprint) -> bool,
        resume: Option<SearchCursor>,
        limit: usize,
    ) -> (Vec<(Fingerprint, EndpointSnapshot)>, Option<SearchCursor>) {
        self.tree.read().search_pattern(prefix, &predicate, resume, limit)
    }

    /// Idempotent whole-tree rebalance; does not alter the stored key set.
    pub fn rebalance(&self) {
        self.tree.write().rebalance();
    }

    /// Explicit (not backgrounded) hot-node promotion pass. Returns `true`
    /// if reorganization actually ran (hit concentration exceeded the
    /// configured threshold).
    pub fn promote_hot_nodes(&self) -> bool {
        self.tree
            .write()
            .promote_hot_nodes(self.config.hot_node_concentration_threshold)
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}
