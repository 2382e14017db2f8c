use crate::source::Source;
use crate::state::SourceRuntime;
use dashmap::DashMap;

/// Where the orchestrator looks up sources and reports runtime changes
///
/// The registry owns source configuration. The crawl manager only reads it
/// and publishes runtime snapshots back after each terminal transition.
pub trait SourceRegistry: Send + Sync {
    fn source(&self, id: &str) -> Option<Source>;

    /// All registered sources, in registration order where the backend keeps one
    fn sources(&self) -> Vec<Source>;

    /// Receives the runtime state of a source after it changed
    fn publish(&self, id: &str, runtime: &SourceRuntime);
}

/// In-memory registry built from the configuration file
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    sources: DashMap<String, Source>,
    order: parking_lot::RwLock<Vec<String>>,
    runtimes: DashMap<String, SourceRuntime>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        let registry = Self::new();
        for source in sources {
            registry.insert(source);
        }
        registry
    }

    /// Adds or replaces a source
    pub fn insert(&self, source: Source) {
        let id = source.id.clone();
        if self.sources.insert(id.clone(), source).is_none() {
            self.order.write().push(id);
        }
    }

    /// Last runtime state published for a source
    pub fn runtime(&self, id: &str) -> Option<SourceRuntime> {
        self.runtimes.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceRegistry for MemoryRegistry {
    fn source(&self, id: &str) -> Option<Source> {
        self.sources.get(id).map(|s| s.value().clone())
    }

    fn sources(&self) -> Vec<Source> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.source(id))
            .collect()
    }

    fn publish(&self, id: &str, runtime: &SourceRuntime) {
        self.runtimes.insert(id.to_string(), runtime.clone());
    }
}
