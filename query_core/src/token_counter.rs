use dashmap::DashMap;

/// Deterministic token counting against a named encoding; used by every packing
/// decision in `ContextPacker`. Implementations must be thread-safe and cheap.
pub trait TokenCounter: Send + Sync {
    fn count(&self, s: &str) -> usize;
    fn encoding_name(&self) -> &str;
}

/// Approximate cl100k_base counter: real BPE tokenization needs a vocabulary file
/// this crate doesn't ship, so the byte-length heuristic below (roughly 4 bytes
/// per token for English prose, the commonly cited cl100k_base ratio) stands in.
/// Memoizes repeated section headers, which are re-counted on every packing call.
pub struct Cl100kTokenCounter {
    encoding_name: String,
    cache: DashMap<String, usize>,
}

impl Cl100kTokenCounter {
    pub fn new() -> Self {
        Self {
            encoding_name: "cl100k_base".to_string(),
            cache: DashMap::new(),
        }
    }

    pub fn named(encoding_name: impl Into<String>) -> Self {
        Self {
            encoding_name: encoding_name.into(),
            cache: DashMap::new(),
        }
    }
}

impl Default for Cl100kTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for Cl100kTokenCounter {
    fn count(&self, s: &str) -> usize {
        if let Some(cached) = self.cache.get(s) {
            return *cached;
        }
        // cl100k_base averages ~4 chars/token on English text; never undercount
        // (rounding up keeps the packer's "never exceed budget" guarantee conservative).
        let count = s.chars().count().div_ceil(4).max(if s.is_empty() { 0 } else { 1 });
        if s.len() <= 128 {
            self.cache.insert(s.to_string(), count);
        }
        count
    }

    fn encoding_name(&self) -> &str {
        &self.encoding_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_deterministic() {
        let counter = Cl100kTokenCounter::new();
        let a = counter.count("hello world");
        let b = counter.count("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_string_counts_zero() {
        let counter = Cl100kTokenCounter::new();
        assert_eq!(counter.count(""), 0);
    }
}
