mod llm;
mod local;

use async_trait::async_trait;
use tabviz_core::{GenericRecord, Result, Schema, SourceFile};

pub use llm::LlmOracle;
pub use local::LocalOracle;

/// The external extraction service. Implementations return a JSON array of
/// objects decoded into records, or `ExtractionFormat` when the reply does
/// not have that shape.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    fn name(&self) -> &str;

    /// Extraction guided by the canonical schema.
    async fn extract_canonical(
        &self,
        file: &SourceFile,
        schema: &Schema,
    ) -> Result<Vec<GenericRecord>>;

    /// Free-form extraction with whatever columns the document has.
    async fn extract_generic(&self, file: &SourceFile) -> Result<Vec<GenericRecord>>;
}

#[async_trait]
impl<T: ExtractionOracle + ?Sized> ExtractionOracle for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn extract_canonical(
        &self,
        file: &SourceFile,
        schema: &Schema,
    ) -> Result<Vec<GenericRecord>> {
        (**self).extract_canonical(file, schema).await
    }

    async fn extract_generic(&self, file: &SourceFile) -> Result<Vec<GenericRecord>> {
        (**self).extract_generic(file).await
    }
}
