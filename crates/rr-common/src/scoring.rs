use thiserror::Error;

use crate::order::{OrderRecord, PaymentMethod, ProductCategory, ShippingMethod};

pub const HEURISTIC_MODEL_VERSION: &str = "heuristic-2024.1";

/// Output of the scoring engine for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub return_probability: f64,
    pub confidence: f64,
    pub model_version: String,
}

impl Score {
    /// Build a score, rejecting values outside [0, 1].
    pub fn new(
        return_probability: f64,
        confidence: f64,
        model_version: impl Into<String>,
    ) -> Result<Self, ScoreError> {
        if !(0.0..=1.0).contains(&return_probability) {
            return Err(ScoreError::ProbabilityOutOfRange(return_probability));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ScoreError::ConfidenceOutOfRange(confidence));
        }

        Ok(Self {
            return_probability,
            confidence,
            model_version: model_version.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("scoring engine rejected the order: {0}")]
    Rejected(String),
    #[error("return probability {0} outside [0, 1]")]
    ProbabilityOutOfRange(f64),
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Black-box scoring seam. The trained model lives behind this trait;
/// the pipeline only relies on the output contract.
pub trait Scorer: Send + Sync {
    fn score(&self, order: &OrderRecord) -> Result<Score, ScoreError>;
}

/// Deterministic reference scorer: a logistic blend of order features.
/// Stands in for the trained model and keeps exports reproducible.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    fn category_logit(category: ProductCategory) -> f64 {
        match category {
            ProductCategory::Clothing => 0.5,
            ProductCategory::Beauty => 0.2,
            ProductCategory::Electronics => 0.1,
            ProductCategory::Sports => 0.0,
            ProductCategory::Toys => 0.0,
            ProductCategory::HomeAndGarden => -0.2,
            ProductCategory::Health => -0.3,
            ProductCategory::Automotive => -0.4,
            ProductCategory::Books => -0.8,
        }
    }

    fn logit(order: &OrderRecord) -> f64 {
        let mut logit = Self::category_logit(order.category);

        // Pricier orders come back more often; the effect flattens out.
        logit += (order.price.max(0.01).ln() - 4.0) * 0.15;
        logit += (f64::from(order.quantity.saturating_sub(1)) * 0.05).min(0.5);
        logit += order.discount_percent * 0.01;
        logit += (35.0 - f64::from(order.age)) * 0.005;

        logit += match order.shipping_method {
            ShippingMethod::Standard => 0.0,
            ShippingMethod::Express => -0.05,
            ShippingMethod::NextDay => -0.1,
        };

        logit += match order.payment_method {
            PaymentMethod::GiftCard => 0.2,
            PaymentMethod::Cash => 0.1,
            _ => 0.0,
        };

        logit
    }
}

impl Scorer for HeuristicScorer {
    fn score(&self, order: &OrderRecord) -> Result<Score, ScoreError> {
        if order.price <= 0.0 {
            return Err(ScoreError::Rejected("price must be positive".into()));
        }

        let logit = Self::logit(order);
        let probability = (1.0 / (1.0 + (-logit).exp())).clamp(0.01, 0.99);
        let confidence = probability.max(1.0 - probability);

        Score::new(probability, confidence, HEURISTIC_MODEL_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Gender;

    fn order(category: ProductCategory, price: f64) -> OrderRecord {
        OrderRecord {
            order_id: None,
            category,
            price,
            quantity: 1,
            age: 35,
            gender: Gender::Female,
            location: "California".into(),
            payment_method: PaymentMethod::CreditCard,
            shipping_method: ShippingMethod::Standard,
            discount_percent: 0.0,
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = HeuristicScorer;
        let sample = order(ProductCategory::Electronics, 199.99);

        let first = scorer.score(&sample).unwrap();
        let second = scorer.score(&sample).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.model_version, HEURISTIC_MODEL_VERSION);
    }

    #[test]
    fn probability_and_confidence_stay_in_range() {
        let scorer = HeuristicScorer;

        for price in [0.5, 10.0, 100.0, 5_000.0] {
            for category in [
                ProductCategory::Clothing,
                ProductCategory::Books,
                ProductCategory::Automotive,
            ] {
                let score = scorer.score(&order(category, price)).unwrap();
                assert!((0.0..=1.0).contains(&score.return_probability));
                assert!((0.5..=1.0).contains(&score.confidence));
            }
        }
    }

    #[test]
    fn clothing_scores_riskier_than_books() {
        let scorer = HeuristicScorer;

        let clothing = scorer.score(&order(ProductCategory::Clothing, 80.0)).unwrap();
        let books = scorer.score(&order(ProductCategory::Books, 80.0)).unwrap();

        assert!(clothing.return_probability > books.return_probability);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        assert!(matches!(
            Score::new(1.2, 0.8, "v1"),
            Err(ScoreError::ProbabilityOutOfRange(_))
        ));
        assert!(matches!(
            Score::new(0.5, -0.1, "v1"),
            Err(ScoreError::ConfidenceOutOfRange(_))
        ));
    }
}
