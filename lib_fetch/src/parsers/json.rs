//! JSON passthrough: the archived file already is the payload.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ParseError, ParseOutcome, Parser};
use crate::loggers::Logger;
use crate::retrieve::RemoteFileRecord;

/// # JSON Parser
///
/// Code is `JSON.<archived file stem>`. No sidecar is written.
pub struct JsonParser {
    logger: Arc<Logger>,
}

impl JsonParser {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Parser for JsonParser {
    async fn parse(
        &self,
        _file: &RemoteFileRecord,
        save_path: &Path,
        contents: &[u8],
    ) -> Result<ParseOutcome, ParseError> {
        self.logger.debug("Passing through the JSON from downloaded file");
        let text = std::str::from_utf8(contents)?;
        self.logger.silly(text);

        let stem = save_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ParseOutcome {
            code: format!("JSON.{}", stem),
            json: serde_json::from_str(text)?,
        })
    }
}
