use crate::assembler::TraceAssembler;
use crate::ingestion::Ingestor;
use crate::query::QueryEngine;
use crate::store::RowStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub queries: QueryEngine,
    pub assembler: TraceAssembler,
}

impl AppState {
    /// Every engine shares the same store handle.
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        let queries = QueryEngine::new(Arc::clone(&store));
        Self {
            ingestor: Ingestor::new(store),
            assembler: TraceAssembler::new(queries.clone()),
            queries,
        }
    }
}
