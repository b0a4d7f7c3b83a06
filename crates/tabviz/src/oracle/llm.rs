use async_trait::async_trait;
use tabviz_core::{parse_oracle_payload, GenericRecord, PipelineError, Result, Schema, SourceFile};
use tabviz_llm::{Attachment, LlmClient, LlmRequest};

use super::ExtractionOracle;

const SYSTEM_PROMPT: &str = "You turn documents into tabular data. \
Reply with JSON only, no commentary and no Markdown.";

const GENERIC_PROMPT: &str = "Extract every data row from the attached document.
Tables may be split across pages or sheets; rows that continue on a later page
belong to the same record, in order. Use the column headers as keys, clean
obvious OCR typos, remove line breaks inside values, and write numbers as JSON
numbers and yes/no answers as booleans.
Return a JSON array with one object per row.";

/// Oracle backed by a hosted model; the file travels inline with the prompt.
pub struct LlmOracle {
    client: LlmClient,
    name: String,
}

impl LlmOracle {
    pub fn new(client: LlmClient) -> Self {
        let name = format!("{}:{}", client.provider().as_str(), client.model());
        Self { client, name }
    }

    async fn ask(&self, file: &SourceFile, request: LlmRequest) -> Result<Vec<GenericRecord>> {
        tracing::info!(oracle = %self.name, file = %file.name, "requesting extraction");
        let response = self
            .client
            .chat(&request)
            .await
            .map_err(|err| PipelineError::Oracle(format!("{err:#}")))?;
        tracing::debug!(
            oracle = %self.name,
            tokens = response.total_tokens(),
            "extraction response received"
        );
        parse_oracle_payload(&response.content)
    }
}

fn attachment(file: &SourceFile) -> Attachment {
    Attachment::new(file.name.clone(), file.mime_type(), file.bytes.clone())
}

pub(crate) fn canonical_prompt(schema: &Schema) -> String {
    let mut prompt = String::from(GENERIC_PROMPT);
    prompt.push_str("\n\nEach object must carry exactly these fields:\n");
    for field in schema.fields() {
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            field.name,
            field.kind.json_type(),
            field.description
        ));
    }
    prompt.push_str(
        "Booleans: Yes/1 is true, No/2 is false. Leave a field empty when the document has no value for it.\n",
    );
    prompt.push_str("JSON schema:\n");
    prompt.push_str(&schema.json_schema().to_string());
    prompt
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract_canonical(
        &self,
        file: &SourceFile,
        schema: &Schema,
    ) -> Result<Vec<GenericRecord>> {
        let request = LlmRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: canonical_prompt(schema),
            attachment: Some(attachment(file)),
            json_output: true,
            response_schema: Some(schema.json_schema()),
        };
        self.ask(file, request).await
    }

    async fn extract_generic(&self, file: &SourceFile) -> Result<Vec<GenericRecord>> {
        let request = LlmRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: GENERIC_PROMPT.to_string(),
            attachment: Some(attachment(file)),
            json_output: true,
            response_schema: None,
        };
        self.ask(file, request).await
    }
}
