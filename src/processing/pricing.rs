//! Per-model cost estimation.

use std::collections::HashMap;

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenPrice {
    /// Price per million prompt tokens.
    pub input_per_million: f64,
    /// Price per million completion tokens.
    pub output_per_million: f64,
}

/// Price table keyed by model name, with a fallback for unlisted models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelPricing {
    fallback: TokenPrice,
    models: HashMap<String, TokenPrice>,
}

impl ModelPricing {
    /// Table charging every model the same price.
    pub fn uniform(price: TokenPrice) -> Self {
        Self {
            fallback: price,
            models: HashMap::new(),
        }
    }

    /// Add or replace the price for one model.
    pub fn with_model(mut self, model: impl Into<String>, price: TokenPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    /// Price applied to `model`.
    pub fn price_for(&self, model: &str) -> TokenPrice {
        self.models.get(model).copied().unwrap_or(self.fallback)
    }

    /// Estimated spend for one attempt's usage on `model`.
    pub fn cost_usd(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.price_for(model);
        (input_tokens as f64 * price.input_per_million
            + output_tokens as f64 * price.output_per_million)
            / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_models_override_the_fallback() {
        let pricing = ModelPricing::uniform(TokenPrice {
            input_per_million: 1.0,
            output_per_million: 2.0,
        })
        .with_model(
            "large",
            TokenPrice {
                input_per_million: 10.0,
                output_per_million: 20.0,
            },
        );

        assert!((pricing.cost_usd("small", 1_000_000, 500_000) - 2.0).abs() < 1e-9);
        assert!((pricing.cost_usd("large", 1_000, 1_000) - 0.03).abs() < 1e-9);
        assert_eq!(ModelPricing::default().cost_usd("any", 10, 10), 0.0);
    }
}
