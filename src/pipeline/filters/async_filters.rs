use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::data_model::Document;
use crate::error::Result;
use crate::pipeline::async_filter::AsyncFilter;

/// Upper-cases the text after an optional simulated I/O delay.
#[derive(Clone, Debug, Default)]
pub struct AsyncUppercase {
    delay: Option<Duration>,
}

impl AsyncUppercase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        AsyncUppercase { delay: Some(delay) }
    }
}

#[async_trait]
impl AsyncFilter for AsyncUppercase {
    fn name(&self) -> &'static str {
        "AsyncUppercase"
    }

    async fn apply(&self, document: &mut Document) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        document.text = document.text.to_uppercase();
        Ok(())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "delay_ms".to_string(),
            Value::from(self.delay.map(|d| d.as_millis() as u64)),
        );
        params
    }
}
