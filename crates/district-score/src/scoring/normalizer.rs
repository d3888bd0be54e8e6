use std::sync::Arc;

use crate::config::{NumericDirection, SignalKind, TopicCatalog};

use super::domain::{QualitativeLevel, SignalSet, SignalValue};

const NEUTRAL: f64 = 0.5;

/// Maps extracted signals to a single comparable score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoreNormalizer {
    catalog: Arc<TopicCatalog>,
}

impl ScoreNormalizer {
    pub fn new(catalog: Arc<TopicCatalog>) -> Self {
        Self { catalog }
    }

    /// Mean of every per-field value, rounded to two decimals.
    ///
    /// Schema fields missing from `signals` count as neutral, as do fields whose value has no
    /// mapping. An empty signal set is exactly `0.5`.
    pub fn normalize(&self, topic: &str, signals: &SignalSet) -> f64 {
        if signals.is_empty() {
            return NEUTRAL;
        }

        let profile = self.catalog.topic(topic);
        let mut values = Vec::with_capacity(profile.fields.len() + signals.len());

        for field in &profile.fields {
            let value = signals
                .get(field.name)
                .map(|value| field_value(Some(&field.kind), value))
                .unwrap_or(NEUTRAL);
            values.push(value);
        }

        for (name, value) in signals {
            if profile.field(name).is_none() {
                values.push(field_value(None, value));
            }
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        round_two(mean.clamp(0.0, 1.0))
    }
}

fn field_value(kind: Option<&SignalKind>, value: &SignalValue) -> f64 {
    match (value, kind) {
        (SignalValue::Label(label), _) => QualitativeLevel::parse(label)
            .map(QualitativeLevel::value)
            .unwrap_or(NEUTRAL),
        (
            SignalValue::Numeric(raw),
            Some(SignalKind::Numeric { max, direction, .. }),
        ) if raw.is_finite() && *max > 0.0 => {
            let ratio = raw.clamp(0.0, *max) / max;
            match direction {
                NumericDirection::LowerIsBetter => 1.0 - ratio,
                NumericDirection::HigherIsBetter => ratio,
            }
        }
        (SignalValue::Numeric(_), _) => NEUTRAL,
    }
}

fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
