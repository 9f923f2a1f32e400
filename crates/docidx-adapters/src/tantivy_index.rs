//! Tantivy-backed `KeywordIndex` (§A.9).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use docidx_domain::SearchDocument;
use docidx_ports::{KeywordHit, KeywordIndex, KeywordQuery, KeywordResults, SearchIndexError};
use tantivy::collector::{FacetCollector, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Facet, FacetOptions, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, STORED,
    STRING,
};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, Term};

const ANALYZER_NAME: &str = "docidx_en_stem";

pub struct TantivyFields {
    pub object_id: tantivy::schema::Field,
    pub doc_id: tantivy::schema::Field,
    pub title: tantivy::schema::Field,
    pub summary: tantivy::schema::Field,
    pub content: tantivy::schema::Field,
    pub doc_type: tantivy::schema::Field,
    pub product: tantivy::schema::Field,
    pub status: tantivy::schema::Field,
    pub owners: tantivy::schema::Field,
    pub doc_type_facet: tantivy::schema::Field,
    pub product_facet: tantivy::schema::Field,
    pub status_facet: tantivy::schema::Field,
    pub owners_facet: tantivy::schema::Field,
    pub stored_json: tantivy::schema::Field,
}

fn build_schema() -> (Schema, TantivyFields) {
    let mut builder = Schema::builder();

    let stemmed_text = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(ANALYZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );

    let object_id = builder.add_text_field("object_id", STRING | STORED);
    let doc_id = builder.add_text_field("doc_id", STRING | STORED);
    let title = builder.add_text_field("title", stemmed_text.clone() | STORED);
    let summary = builder.add_text_field("summary", stemmed_text.clone());
    let content = builder.add_text_field("content", stemmed_text);
    let doc_type = builder.add_text_field("doc_type", STRING | STORED | FAST);
    let product = builder.add_text_field("product", STRING | STORED | FAST);
    let status = builder.add_text_field("status", STRING | STORED | FAST);
    let owners = builder.add_text_field("owners", STRING | STORED);
    let doc_type_facet = builder.add_facet_field("doc_type_facet", FacetOptions::default());
    let product_facet = builder.add_facet_field("product_facet", FacetOptions::default());
    let status_facet = builder.add_facet_field("status_facet", FacetOptions::default());
    let owners_facet = builder.add_facet_field("owners_facet", FacetOptions::default());
    let stored_json = builder.add_text_field("stored_json", STORED);

    let schema = builder.build();
    let fields = TantivyFields {
        object_id,
        doc_id,
        title,
        summary,
        content,
        doc_type,
        product,
        status,
        owners,
        doc_type_facet,
        product_facet,
        status_facet,
        owners_facet,
        stored_json,
    };
    (schema, fields)
}

fn english_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build()
}

pub struct TantivyKeywordIndex {
    index: Index,
    fields: TantivyFields,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
}

impl TantivyKeywordIndex {
    pub fn create_in_dir(path: &Path) -> Result<Self, SearchIndexError> {
        std::fs::create_dir_all(path).map_err(|e| SearchIndexError::IndexError {
            message: format!("failed to create index directory: {e}"),
        })?;
        let (schema, fields) = build_schema();
        let dir = tantivy::directory::MmapDirectory::open(path).map_err(|e| {
            SearchIndexError::IndexError {
                message: format!("failed to open mmap directory: {e}"),
            }
        })?;
        let index = Index::open_or_create(dir, schema).map_err(|e| SearchIndexError::IndexError {
            message: format!("failed to open/create index: {e}"),
        })?;
        index
            .tokenizers()
            .register(ANALYZER_NAME, english_analyzer());
        Self::from_index(index, fields)
    }

    pub fn create_in_ram() -> Result<Self, SearchIndexError> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        index
            .tokenizers()
            .register(ANALYZER_NAME, english_analyzer());
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: TantivyFields) -> Result<Self, SearchIndexError> {
        let writer = index
            .writer(50_000_000)
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("failed to create index writer: {e}"),
            })?;
        let reader = index
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("failed to build index reader: {e}"),
            })?;
        Ok(Self {
            index,
            fields,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
        })
    }

    fn refresh_reader(&self) -> Result<(), SearchIndexError> {
        self.reader
            .read()
            .unwrap()
            .reload()
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("failed to reload reader: {e}"),
            })
    }
}

impl KeywordIndex for TantivyKeywordIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchIndexError> {
        let f = &self.fields;
        let stored = serde_json::to_string(document).map_err(|e| SearchIndexError::IndexError {
            message: format!("failed to serialize search document: {e}"),
        })?;

        let mut writer = self.writer.write().unwrap();
        writer.delete_term(Term::from_field_text(f.object_id, &document.object_id));

        let mut tantivy_doc = doc!(
            f.object_id => document.object_id.clone(),
            f.doc_id => document.doc_id.clone(),
            f.title => document.title.clone(),
            f.content => document.content.clone(),
            f.doc_type => document.doc_type.clone(),
            f.status => document.status.clone(),
            f.stored_json => stored,
            f.doc_type_facet => Facet::from(&format!("/{}", document.doc_type)),
            f.status_facet => Facet::from(&format!("/{}", document.status)),
        );
        if let Some(summary) = &document.summary {
            tantivy_doc.add_text(f.summary, summary);
        }
        if let Some(product) = &document.product {
            tantivy_doc.add_text(f.product, product);
            tantivy_doc.add_facet(f.product_facet, Facet::from(&format!("/{product}")));
        }
        for owner in &document.owners {
            tantivy_doc.add_text(f.owners, owner);
            tantivy_doc.add_facet(f.owners_facet, Facet::from(&format!("/{owner}")));
        }

        writer
            .add_document(tantivy_doc)
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("failed to add document: {e}"),
            })?;
        writer
            .commit()
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("commit failed: {e}"),
            })?;
        drop(writer);
        self.refresh_reader()
    }

    async fn delete(&self, object_id: &str) -> Result<(), SearchIndexError> {
        let mut writer = self.writer.write().unwrap();
        writer.delete_term(Term::from_field_text(self.fields.object_id, object_id));
        writer
            .commit()
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("commit failed: {e}"),
            })?;
        drop(writer);
        self.refresh_reader()
    }

    async fn search(&self, query: &KeywordQuery) -> Result<KeywordResults, SearchIndexError> {
        let f = &self.fields;
        let searcher = self.reader.read().unwrap().searcher();

        let parser = QueryParser::for_index(&self.index, vec![f.title, f.summary, f.content]);
        let text_query: Box<dyn Query> = if query.text.trim().is_empty() {
            Box::new(tantivy::query::AllQuery)
        } else {
            parser
                .parse_query(&query.text)
                .map_err(|e| SearchIndexError::QueryParseError {
                    message: e.to_string(),
                })?
        };

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
        if let Some(doc_type) = &query.doc_type {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.doc_type, doc_type),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if let Some(product) = &query.product {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.product, product),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if let Some(status) = &query.status {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.status, status),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        if !query.owners.is_empty() {
            let owner_clauses: Vec<(Occur, Box<dyn Query>)> = query
                .owners
                .iter()
                .map(|owner| {
                    let q: Box<dyn Query> = Box::new(TermQuery::new(
                        Term::from_field_text(f.owners, owner),
                        IndexRecordOption::Basic,
                    ));
                    (Occur::Should, q)
                })
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(owner_clauses))));
        }
        let combined = BooleanQuery::new(clauses);

        let page = query.page.max(1);
        let per_page = query.per_page.max(1);
        let limit = (page as usize) * (per_page as usize);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(limit))
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("search failed: {e}"),
            })?;

        let start = ((page - 1) * per_page) as usize;
        let mut hits = Vec::new();
        for (score, doc_address) in top_docs.into_iter().skip(start) {
            let retrieved: tantivy::TantivyDocument =
                searcher
                    .doc(doc_address)
                    .map_err(|e| SearchIndexError::IndexError {
                        message: format!("doc fetch failed: {e}"),
                    })?;
            let object_id = retrieved
                .get_first(f.object_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let stored_json = retrieved
                .get_first(f.stored_json)
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let document: SearchDocument =
                serde_json::from_str(stored_json).map_err(|e| SearchIndexError::IndexError {
                    message: format!("stored document corrupt: {e}"),
                })?;
            hits.push(KeywordHit {
                object_id,
                score,
                document,
            });
        }

        let total_hits = searcher
            .search(&combined, &tantivy::collector::Count)
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("count failed: {e}"),
            })? as u64;

        let facets = collect_facets(&searcher, &combined, f)?;

        Ok(KeywordResults {
            hits,
            total_hits,
            facets,
        })
    }

    async fn get_by_doc_id(&self, document_id: &str) -> Result<Option<SearchDocument>, SearchIndexError> {
        let f = &self.fields;
        let searcher = self.reader.read().unwrap().searcher();
        let query = TermQuery::new(
            Term::from_field_text(f.doc_id, document_id),
            IndexRecordOption::Basic,
        );
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("doc_id lookup failed: {e}"),
            })?;
        let Some((_score, doc_address)) = top_docs.into_iter().next() else {
            return Ok(None);
        };
        let retrieved: tantivy::TantivyDocument =
            searcher.doc(doc_address).map_err(|e| SearchIndexError::IndexError {
                message: format!("doc fetch failed: {e}"),
            })?;
        let stored_json = retrieved
            .get_first(f.stored_json)
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let document: SearchDocument =
            serde_json::from_str(stored_json).map_err(|e| SearchIndexError::IndexError {
                message: format!("stored document corrupt: {e}"),
            })?;
        Ok(Some(document))
    }
}

fn collect_facets(
    searcher: &tantivy::Searcher,
    query: &dyn Query,
    f: &TantivyFields,
) -> Result<
    BTreeMap<String, BTreeMap<String, u64>>,
    SearchIndexError,
> {
    let mut facets = BTreeMap::new();
    for (name, field) in [
        ("doc_types", f.doc_type_facet),
        ("products", f.product_facet),
        ("statuses", f.status_facet),
        ("owners", f.owners_facet),
    ] {
        let mut collector = FacetCollector::for_field(name, field);
        collector.add_facet("/");
        let counts = searcher
            .search(query, &collector)
            .map_err(|e| SearchIndexError::IndexError {
                message: format!("facet collection failed: {e}"),
            })?;
        let mut map = BTreeMap::new();
        for (facet, count) in counts.get("/") {
            map.insert(facet.to_string().trim_start_matches('/').to_string(), count);
        }
        facets.insert(name.to_string(), map);
    }
    Ok(facets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc(object_id: &str, title: &str) -> SearchDocument {
        SearchDocument {
            object_id: object_id.to_string(),
            doc_id: object_id.to_string(),
            title: title.to_string(),
            doc_type: "RFC".to_string(),
            status: "active".to_string(),
            content: format!("{title} body text about storage migration"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_then_search_finds_document() {
        let index = TantivyKeywordIndex::create_in_ram().unwrap();
        index
            .upsert(&sample_doc("doc:1", "Storage Migration Plan"))
            .await
            .unwrap();

        let results = index
            .search(&KeywordQuery {
                text: "migration".to_string(),
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].object_id, "doc:1");
    }

    #[tokio::test]
    async fn delete_removes_document_from_results() {
        let index = TantivyKeywordIndex::create_in_ram().unwrap();
        index
            .upsert(&sample_doc("doc:1", "Storage Migration Plan"))
            .await
            .unwrap();
        index.delete("doc:1").await.unwrap();

        let results = index
            .search(&KeywordQuery {
                text: "migration".to_string(),
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(results.hits.is_empty());
    }

    #[tokio::test]
    async fn get_by_doc_id_hydrates_full_document() {
        let index = TantivyKeywordIndex::create_in_ram().unwrap();
        let mut document = sample_doc("doc:1", "Storage Migration Plan");
        document.doc_id = "DOC-123".to_string();
        index.upsert(&document).await.unwrap();

        let found = index.get_by_doc_id("DOC-123").await.unwrap();
        assert_eq!(found.unwrap().object_id, "doc:1");
        assert!(index.get_by_doc_id("missing").await.unwrap().is_none());
    }
}
