use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        TextAnalyzer,
        TokenStream,
        WhitespaceTokenizer,
    },
};

use crate::{corpus::Chunk, error::Result};

/// Field names used in the schema.
pub mod fields {
    pub const POSITION: &str = "position";
    pub const BODY: &str = "body";
}

/// Whitespace split followed by lowercasing.
const TOKENIZER: &str = "whitespace_lower";

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// A BM25 hit for a chunk position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub position: usize,
    pub score: f32,
}

#[derive(Clone, Copy)]
struct SchemaFields {
    position: Field,
    body: Field,
}

struct BuiltIndex {
    reader: IndexReader,
    fields: SchemaFields,
    num_docs: usize,
}

/// BM25 keyword index over the whole corpus.
///
/// The index is rebuilt from scratch on every corpus change; there is no
/// incremental update. Before the first rebuild with a non-empty corpus it
/// is uninitialized and every query returns nothing.
#[derive(Default)]
pub struct LexicalIndex {
    built: Option<BuiltIndex>,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let position = builder.add_u64_field(fields::POSITION, STORED | FAST);

    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);

    (builder.build(), SchemaFields { position, body })
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(LowerCaser)
        .build()
}

/// Split text into the terms the index stores: whitespace-separated and
/// lowercased.
///
/// # Examples
///
/// ```
/// use docchat::lexical_index::tokenize;
///
/// assert_eq!(tokenize("Rust  is FAST"), vec!["rust", "is", "fast"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the index holds any chunks.
    pub fn is_initialized(&self) -> bool {
        self.built.is_some()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.num_docs)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the index from the full corpus.
    ///
    /// A fresh in-memory index is built and swapped in only once it is
    /// committed, so a failure leaves the previous index in place.
    pub fn rebuild(&mut self, corpus: &[Chunk]) -> Result<()> {
        if corpus.is_empty() {
            self.built = None;
            return Ok(());
        }

        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(TOKENIZER, analyzer());

        let mut writer: IndexWriter = index.writer(WRITER_MEMORY_BUDGET)?;
        for chunk in corpus {
            writer.add_document(doc!(
                fields.position => chunk.position as u64,
                fields.body => chunk.text.as_str(),
            ))?;
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        self.built = Some(BuiltIndex {
            reader,
            fields,
            num_docs: corpus.len(),
        });
        tracing::debug!(chunks = corpus.len(), "rebuilt lexical index");
        Ok(())
    }

    /// BM25 score for every chunk position; non-matching chunks score 0.
    ///
    /// Tokens go through the same analyzer as the indexed text, so
    /// `"Apple"` and `"apple"` score alike.
    pub fn score<S: AsRef<str>>(
        &self,
        query_tokens: &[S],
    ) -> Result<Vec<f32>> {
        let tokens: Vec<String> = query_tokens
            .iter()
            .flat_map(|t| tokenize(t.as_ref()))
            .collect();
        let mut scores = vec![0.0; self.len()];
        for hit in self.matching(&tokens)? {
            if let Some(slot) = scores.get_mut(hit.position) {
                *slot = hit.score;
            }
        }
        Ok(scores)
    }

    /// The `k` best-scoring chunks with a score above zero.
    ///
    /// Ordered by descending score; equal scores keep the lower position
    /// first.
    pub fn top_k(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.matching(&tokenize(query))?;
        hits.retain(|h| h.score > 0.0);
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Every chunk sharing at least one term with the query, unordered.
    fn matching(&self, query_tokens: &[String]) -> Result<Vec<LexicalHit>> {
        let Some(built) = &self.built else {
            return Ok(Vec::new());
        };
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let f = built.fields;
        let clauses: Vec<(Occur, Box<dyn Query>)> = query_tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(f.body, token);
                let query: Box<dyn Query> = Box::new(TermQuery::new(
                    term,
                    IndexRecordOption::WithFreqs,
                ));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = built.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(built.num_docs.max(1)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            hits.push(LexicalHit {
                position: extract_u64(&doc, f.position) as usize,
                score,
            });
        }
        Ok(hits)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("initialized", &self.is_initialized())
            .field("len", &self.len())
            .finish()
    }
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
