//! Static model catalog served by `models.list`.

use lucia_core::messages::ModelInfo;
use std::sync::OnceLock;

static CATALOG: OnceLock<Vec<ModelInfo>> = OnceLock::new();

fn entry(
    id: &str,
    name: &str,
    provider: &str,
    context_length: u32,
    input_price: f64,
    output_price: f64,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        name: name.to_string(),
        provider: provider.to_string(),
        context_length,
        input_price,
        output_price,
    }
}

/// All models, in display order. Built on first use.
pub fn models() -> &'static [ModelInfo] {
    CATALOG.get_or_init(|| {
        vec![
            entry(
                "deepseek/deepseek-chat-v3-0324",
                "DeepSeek Chat V3",
                "deepseek",
                65_536,
                0.50,
                1.50,
            ),
            entry(
                "meta-llama/llama-4-maverick",
                "Llama 4 Maverick",
                "meta-llama",
                131_072,
                0.20,
                0.30,
            ),
            entry("qwen/qwq-32b", "QWQ 32B", "qwen", 131_072, 0.20, 0.60),
        ]
    })
}

/// The model selected when the process starts.
pub fn default_model_id() -> &'static str {
    &models()[0].id
}

pub fn contains(id: &str) -> bool {
    models().iter().any(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_first_entry() {
        assert_eq!(default_model_id(), "deepseek/deepseek-chat-v3-0324");
        assert!(contains(default_model_id()));
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<&str> = models().iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), models().len());
        assert!(!contains("openai/gpt-x"));
    }
}
