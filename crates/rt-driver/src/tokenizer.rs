/// Encode/decode contract the driver consumes; vocabulary parsing and
/// byte-pair merge tables are out of scope for this crate.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> String;
}
