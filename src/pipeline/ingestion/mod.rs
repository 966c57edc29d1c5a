// Pipeline ingestion: source adapters turning raw heterogeneous JSON into
// source-tagged intermediate records. No cross-source reconciliation happens
// here; that is the normalizer's job.

pub mod baanknet;
pub mod property_details;

use serde::{Deserialize, Serialize};

use crate::domain::Source;

pub use baanknet::{BaanknetAdapter, BaanknetItem, BaanknetRespData};
pub use property_details::{PropertyDetailsAdapter, PropertyDetailsData, PropertyDetailsFile};

/// Source-tagged intermediate representation. One variant per supported
/// source; the set is closed so the normalizer can dispatch exhaustively.
#[derive(Debug, Clone)]
pub enum IntermediateRecord {
    Baanknet {
        item: BaanknetItem,
        /// Original element, retained verbatim as the record's raw payload.
        raw: serde_json::Value,
        offset: usize,
    },
    PropertyDetails {
        data: PropertyDetailsData,
        raw: serde_json::Value,
        offset: usize,
    },
}

impl IntermediateRecord {
    pub fn source(&self) -> Source {
        match self {
            IntermediateRecord::Baanknet { .. } => Source::Baanknet,
            IntermediateRecord::PropertyDetails { .. } => Source::PropertyDetails,
        }
    }

    pub fn raw(&self) -> &serde_json::Value {
        match self {
            IntermediateRecord::Baanknet { raw, .. } => raw,
            IntermediateRecord::PropertyDetails { raw, .. } => raw,
        }
    }
}

/// A record the adapter could not use, kept for the batch summary.
/// Skips never abort the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub source: Source,
    pub offset: usize,
    pub reason: String,
}

/// Adapter output: usable records plus counted skips.
#[derive(Debug, Default)]
pub struct AdapterBatch {
    pub records: Vec<IntermediateRecord>,
    pub skipped: Vec<SkippedRecord>,
}

impl AdapterBatch {
    fn skip(&mut self, source: Source, offset: usize, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(%source, offset, %reason, "adapter skipped record");
        crate::observability::ingest::record_skipped(source);
        self.skipped.push(SkippedRecord {
            source,
            offset,
            reason,
        });
    }
}

/// Contract for one source's parser. Malformed top-level payloads are an
/// error; per-record problems are skips inside the returned batch.
pub trait SourceAdapter {
    fn source(&self) -> Source;

    fn parse(&self, bytes: &[u8]) -> anyhow::Result<AdapterBatch>;
}
