//! Full-text store collaborator (spec §4.4, §4.6, §6).
//!
//! `TantivyFullTextStore` generalizes the teacher's `SearchEngine`
//! (`search_engine.rs`): same `Index`/`IndexWriter`/`IndexReader` shape and
//! the same `unsafe impl Send + Sync` wrapper around the writer mutex, but
//! the schema grows from the teacher's single `body TEXT` field to the full
//! document spec §3 describes, and the single-field query parser grows into
//! the multi-field, per-field-boosted query spec §4.6 requires.

use async_trait::async_trait;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::snippet::SnippetGenerator;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// A document ready to be written to the full-text store (spec §3 "Indexed
/// document").
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    /// Preprocessed (stemmed, stopword-filtered) body text.
    pub content: String,
    pub domain: String,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
    pub word_count: u64,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub score: f32,
    /// Query-term-highlighted excerpt (spec §4.6, §6), empty when no field
    /// yielded a fragment worth showing.
    pub snippet: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total: usize,
}

/// Per-field boost weights for the multi-field query (spec §4.6).
pub struct FieldBoosts {
    pub title: f32,
    pub description: f32,
    pub content: f32,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self {
            title: 3.0,
            description: 2.0,
            content: 1.0,
        }
    }
}

#[async_trait]
pub trait FullTextStore: Send + Sync {
    async fn upsert_document(&self, doc: IndexedDocument) -> Result<(), StoreError>;
    async fn bulk_upsert(&self, docs: Vec<IndexedDocument>) -> Result<(), StoreError>;
    async fn multi_match(
        &self,
        query: &str,
        boosts: &FieldBoosts,
        from: usize,
        size: usize,
    ) -> Result<SearchResults, StoreError>;
}

struct TantivyFields {
    id: tantivy::schema::Field,
    url: tantivy::schema::Field,
    title: tantivy::schema::Field,
    description: tantivy::schema::Field,
    content: tantivy::schema::Field,
    domain: tantivy::schema::Field,
    word_count: tantivy::schema::Field,
}

/// Embedded full-text adapter (spec §6 — the one collaborator this crate
/// runs in-process rather than against a separate service).
pub struct TantivyFullTextStore {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: TantivyFields,
}

// SAFETY: mirrors the teacher's `SearchEngine` (`search_engine.rs`):
// `IndexWriter` is `!Sync` internally but every access is serialized through
// the `Mutex`, and `Index`/`IndexReader` are themselves `Send + Sync`.
unsafe impl Send for TantivyFullTextStore {}
unsafe impl Sync for TantivyFullTextStore {}

impl TantivyFullTextStore {
    fn build_schema() -> (Schema, TantivyFields) {
        let mut builder = Schema::builder();
        let id = builder.add_text_field("id", STRING | STORED);
        let url = builder.add_text_field("url", STRING | STORED);
        let title = builder.add_text_field("title", TEXT | STORED);
        let description = builder.add_text_field("description", TEXT | STORED);
        // STORED so `SnippetGenerator` has the original text to highlight
        // against, not just its index, when building search result excerpts.
        let content = builder.add_text_field("content", TEXT | STORED);
        let domain = builder.add_text_field("domain", STRING | STORED | FAST);
        let word_count = builder.add_u64_field("word_count", INDEXED | STORED | FAST);
        let schema = builder.build();
        (
            schema,
            TantivyFields {
                id,
                url,
                title,
                description,
                content,
                domain,
                word_count,
            },
        )
    }

    /// Opens (or creates) an index at `path` on disk — the production mode,
    /// durable across process restarts.
    pub fn open_or_create(path: &std::path::Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let (schema, fields) = Self::build_schema();
        let dir = MmapDirectory::open(path)?;
        let index = Index::open_or_create(dir, schema)?;
        Self::from_index(index, fields)
    }

    /// Builds a throwaway in-RAM index — used by the test suite so the full
    /// pipeline runs with no filesystem/service dependency (spec §8).
    pub fn in_memory() -> Result<Self, StoreError> {
        let (schema, fields) = Self::build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: TantivyFields) -> Result<Self, StoreError> {
        let writer = index.writer(50_000_000)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
            fields,
        })
    }

    fn to_tantivy_doc(&self, document: &IndexedDocument) -> TantivyDocument {
        doc!(
            self.fields.id => document.id.clone(),
            self.fields.url => document.url.clone(),
            self.fields.title => document.title.clone(),
            self.fields.description => document.description.clone(),
            self.fields.content => document.content.clone(),
            self.fields.domain => document.domain.clone(),
            self.fields.word_count => document.word_count,
        )
    }
}

#[async_trait]
impl FullTextStore for TantivyFullTextStore {
    async fn upsert_document(&self, document: IndexedDocument) -> Result<(), StoreError> {
        self.bulk_upsert(vec![document]).await
    }

    async fn bulk_upsert(&self, docs: Vec<IndexedDocument>) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        for document in &docs {
            let id_term = tantivy::Term::from_field_text(self.fields.id, &document.id);
            writer.delete_term(id_term);
            writer.add_document(self.to_tantivy_doc(document))?;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    async fn multi_match(
        &self,
        query: &str,
        boosts: &FieldBoosts,
        from: usize,
        size: usize,
    ) -> Result<SearchResults, StoreError> {
        let searcher = self.reader.searcher();
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.title, self.fields.description, self.fields.content],
        );
        parser.set_field_boost(self.fields.title, boosts.title);
        parser.set_field_boost(self.fields.description, boosts.description);
        parser.set_field_boost(self.fields.content, boosts.content);

        let parsed = parser.parse_query(query)?;
        let (total, top_docs) = searcher.search(&parsed, &(Count, TopDocs::with_limit(from + size)))?;

        // Built once per call and reused across hits: a generator scans the
        // query against one field, so highlighting falls back content ->
        // description -> title, the same priority order as the boosts.
        let content_snippets = SnippetGenerator::create(&searcher, &*parsed, self.fields.content).ok();
        let description_snippets = SnippetGenerator::create(&searcher, &*parsed, self.fields.description).ok();
        let title_snippets = SnippetGenerator::create(&searcher, &*parsed, self.fields.title).ok();

        let mut hits = Vec::new();
        for (score, address) in top_docs.into_iter().skip(from) {
            let retrieved: TantivyDocument = searcher.doc(address)?;
            let snippet = [&content_snippets, &description_snippets, &title_snippets]
                .into_iter()
                .flatten()
                .map(|g| g.snippet_from_doc(&retrieved).to_html())
                .find(|s| !s.is_empty())
                .unwrap_or_default();
            hits.push(SearchHit {
                id: field_text(&retrieved, &self.fields.id),
                url: field_text(&retrieved, &self.fields.url),
                title: field_text(&retrieved, &self.fields.title),
                description: field_text(&retrieved, &self.fields.description),
                score,
                snippet,
            });
        }

        Ok(SearchResults { total, hits })
    }
}

fn field_text(document: &TantivyDocument, field: &tantivy::schema::Field) -> String {
    document
        .get_first(*field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
