#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    /// Target chunk size in tokens, per the configured tokenizer.
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,
    /// Embedding retries per chunk before the whole ingestion run fails.
    pub embedding_retry_attempts: usize,
    pub embedding_retry_base_delay_ms: u64,
    pub embedding_retry_max_delay_ms: u64,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            chunk_target_tokens: 512,
            chunk_overlap_tokens: 128,
            embedding_retry_attempts: 3,
            embedding_retry_base_delay_ms: 500,
            embedding_retry_max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    /// Name passed to `tokenizers::Tokenizer::from_pretrained`, deployment-selected.
    pub tokenizer_name: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            tokenizer_name: "bert-base-cased".to_string(),
        }
    }
}
