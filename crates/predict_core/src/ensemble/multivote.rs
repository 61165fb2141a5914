//! Vote collections and combination methods

use crate::config::PredictOptions;
use crate::errors::{PredictError, Result};
use crate::prediction::{CategoryPrediction, Distribution, Prediction, PredictionValue};
use crate::stats::{weighted_mean, ws_confidence};
use crate::tree::TreePrediction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How the votes of an ensemble are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "String")]
pub enum CombinationMethod {
    /// Majority vote (mean for regressions)
    #[default]
    Plurality,
    /// Votes weighted by their confidence
    Confidence,
    /// Votes spread over their normalized distributions
    Probability,
    /// A designated category wins if enough votes predict it
    Threshold,
}

impl CombinationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CombinationMethod::Plurality => "plurality",
            CombinationMethod::Confidence => "confidence",
            CombinationMethod::Probability => "probability",
            CombinationMethod::Threshold => "threshold",
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0 => Ok(CombinationMethod::Plurality),
            1 => Ok(CombinationMethod::Confidence),
            2 => Ok(CombinationMethod::Probability),
            3 => Ok(CombinationMethod::Threshold),
            other => Err(PredictError::invalid_option(format!(
                "unknown combination method code {other}"
            ))),
        }
    }
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombinationMethod {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if let Ok(code) = s.parse::<u64>() {
            return Self::from_code(code);
        }
        match s.as_str() {
            "plurality" => Ok(CombinationMethod::Plurality),
            "confidence" => Ok(CombinationMethod::Confidence),
            "probability" => Ok(CombinationMethod::Probability),
            "threshold" => Ok(CombinationMethod::Threshold),
            other => Err(PredictError::invalid_option(format!(
                "unknown combination method {other:?}"
            ))),
        }
    }
}

impl TryFrom<Value> for CombinationMethod {
    type Error = PredictError;

    fn try_from(value: Value) -> Result<Self> {
        match &value {
            Value::String(s) => s.parse(),
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| PredictError::invalid_option(format!("invalid method code {n}")))
                .and_then(Self::from_code),
            other => Err(PredictError::invalid_option(format!(
                "invalid combination method {other}"
            ))),
        }
    }
}

impl From<CombinationMethod> for String {
    fn from(method: CombinationMethod) -> Self {
        method.as_str().to_string()
    }
}

/// One model's raw prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub prediction: PredictionValue,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub count: u64,
    pub distribution: Distribution,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Position of the producing model
    pub order: usize,
    /// Weight of the producing model
    pub weight: f64,
}

impl Vote {
    pub fn new(prediction: PredictionValue) -> Self {
        Self {
            prediction,
            confidence: 0.0,
            probability: None,
            count: 0,
            distribution: Distribution::new(),
            path: Vec::new(),
            median: None,
            min: None,
            max: None,
            order: 0,
            weight: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn from_tree(prediction: TreePrediction, order: usize, weight: f64) -> Self {
        Self {
            prediction: prediction.prediction,
            confidence: prediction.confidence,
            probability: prediction.probability,
            count: prediction.count,
            distribution: prediction.distribution,
            path: prediction.path,
            median: prediction.median,
            min: prediction.min,
            max: prediction.max,
            order,
            weight,
        }
    }

    /// Distribution of this vote, or its prediction alone when it has none
    fn effective_distribution(&self) -> Distribution {
        if self.distribution.is_empty() {
            Distribution::from_entries(vec![(self.prediction.clone(), self.count.max(1))])
        } else {
            self.distribution.clone()
        }
    }
}

/// Category weights accumulated in first-seen order
#[derive(Default)]
struct Tally {
    entries: Vec<(PredictionValue, f64)>,
}

impl Tally {
    /// Accumulate `weight` for `value`; non-finite weights are ignored
    fn add(&mut self, value: &PredictionValue, weight: f64) {
        if !weight.is_finite() {
            return;
        }
        match self.entries.iter_mut().find(|(v, _)| v == value) {
            Some((_, w)) => *w += weight,
            None => self.entries.push((value.clone(), weight)),
        }
    }

    /// Heaviest category; equal weights resolve to the first seen
    fn winner(&self) -> Option<(&PredictionValue, f64)> {
        let mut best: Option<(&PredictionValue, f64)> = None;
        for (value, weight) in &self.entries {
            if best.map_or(true, |(_, w)| *weight > w) {
                best = Some((value, *weight));
            }
        }
        best
    }

    fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }
}

/// An ordered collection of votes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiVote {
    votes: Vec<Vote>,
}

impl MultiVote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from votes, numbering their order by position
    pub fn from_votes(votes: Vec<Vote>) -> Self {
        let mut multivote = Self::new();
        for vote in votes {
            multivote.push(vote);
        }
        multivote
    }

    pub fn push(&mut self, mut vote: Vote) {
        vote.order = self.votes.len();
        self.votes.push(vote);
    }

    /// Append `other`'s votes after the existing ones
    pub fn extend(&mut self, other: MultiVote) {
        for vote in other.votes {
            self.push(vote);
        }
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Whether the votes are numeric; mixed votes are malformed
    pub fn is_regression(&self) -> Result<bool> {
        let numeric = self.votes.iter().filter(|v| v.prediction.is_numeric()).count();
        match numeric {
            0 => Ok(false),
            n if n == self.votes.len() => Ok(true),
            _ => Err(PredictError::malformed(
                "votes mix numeric and categorical predictions",
            )),
        }
    }

    /// Distribution of all votes merged, in first-seen order
    pub fn merged_distribution(&self) -> Distribution {
        let mut merged = Distribution::new();
        for vote in &self.votes {
            merged.merge(&vote.distribution);
        }
        merged
    }

    pub fn total_count(&self) -> u64 {
        self.votes.iter().map(|v| v.count).sum()
    }

    /// Combine the votes into a single prediction
    pub fn combine(&self, method: CombinationMethod, options: &PredictOptions) -> Result<Prediction> {
        if self.votes.is_empty() {
            return Err(PredictError::malformed("no votes to combine"));
        }
        debug!(method = %method, votes = self.votes.len(), "combining votes");

        if self.is_regression()? {
            self.combine_numeric(method, options)
        } else if method == CombinationMethod::Threshold {
            self.combine_threshold(options)
        } else {
            self.combine_categorical(method, options)
        }
    }

    fn combine_numeric(&self, method: CombinationMethod, options: &PredictOptions) -> Result<Prediction> {
        if method == CombinationMethod::Threshold {
            return Err(PredictError::invalid_option(
                "threshold combination requires a categorical ensemble",
            ));
        }

        let values = |weight: fn(&Vote) -> f64| {
            weighted_mean(
                self.votes
                    .iter()
                    .filter_map(|v| v.prediction.as_f64().map(|p| (p, weight(v)))),
            )
        };
        let plain = || values(|_| 1.0).unwrap_or(0.0);
        let prediction = match method {
            CombinationMethod::Confidence => values(|v| v.confidence * v.weight),
            _ => values(|v| v.weight),
        }
        .unwrap_or_else(plain);

        let mut result = Prediction::new(PredictionValue::Number(prediction));
        if options.add_confidence {
            result.confidence = weighted_mean(self.votes.iter().map(|v| (v.confidence, v.weight)))
                .or_else(|| weighted_mean(self.votes.iter().map(|v| (v.confidence, 1.0))));
        }
        let merged = self.merged_distribution().sorted_by_value();
        if options.add_median {
            result.median = merged.median().or_else(|| {
                weighted_mean(
                    self.votes
                        .iter()
                        .filter_map(|v| v.median.map(|m| (m, v.weight))),
                )
            });
        }
        if options.add_min {
            result.min = self
                .votes
                .iter()
                .filter_map(|v| v.min.or_else(|| v.prediction.as_f64()))
                .reduce(f64::min);
        }
        if options.add_max {
            result.max = self
                .votes
                .iter()
                .filter_map(|v| v.max.or_else(|| v.prediction.as_f64()))
                .reduce(f64::max);
        }
        if options.add_distribution {
            result.distribution = Some(merged);
        }
        if options.add_count {
            result.count = Some(self.total_count());
        }
        Ok(result)
    }

    fn combine_categorical(
        &self,
        method: CombinationMethod,
        options: &PredictOptions,
    ) -> Result<Prediction> {
        let mut tally = Tally::default();
        for vote in &self.votes {
            match method {
                CombinationMethod::Confidence => {
                    tally.add(&vote.prediction, vote.confidence * vote.weight)
                }
                CombinationMethod::Probability => {
                    let distribution = vote.effective_distribution();
                    let total = distribution.total() as f64;
                    if total == 0.0 {
                        debug!(order = vote.order, "vote has an empty distribution, skipped");
                        continue;
                    }
                    for (category, count) in distribution.entries() {
                        tally.add(category, *count as f64 / total * vote.weight);
                    }
                }
                _ => tally.add(&vote.prediction, vote.weight),
            }
        }
        if tally.entries.is_empty() {
            for vote in &self.votes {
                tally.add(&vote.prediction, vote.weight);
            }
        }

        let (winner, winner_weight) = tally
            .winner()
            .map(|(value, weight)| (value.clone(), weight))
            .ok_or_else(|| PredictError::malformed("no votes to combine"))?;

        let mut result = Prediction::new(winner.clone());
        let merged = self.merged_distribution();
        if options.add_confidence {
            result.confidence = Some(if method == CombinationMethod::Probability {
                ws_confidence(merged.count_of(&winner) as f64, merged.total() as f64)
            } else {
                self.agreeing_confidence(&winner)
            });
            let total = tally.total();
            result.probability = Some(if total > 0.0 {
                (winner_weight / total).clamp(0.0, 1.0)
            } else {
                0.0
            });
        }
        if options.add_distribution {
            result.distribution = Some(merged.sorted_by_count());
        }
        if options.add_count {
            result.count = Some(self.total_count());
        }
        Ok(result)
    }

    fn combine_threshold(&self, options: &PredictOptions) -> Result<Prediction> {
        let threshold = options
            .threshold
            .ok_or_else(|| PredictError::invalid_option("threshold method requires a threshold"))?
            as usize;
        if threshold < 1 || threshold > self.votes.len() {
            return Err(PredictError::invalid_option(format!(
                "threshold {threshold} outside 1..={}",
                self.votes.len()
            )));
        }
        let category = options
            .category
            .as_deref()
            .ok_or_else(|| PredictError::invalid_option("threshold method requires a category"))?;

        let (agreeing, remaining): (Vec<&Vote>, Vec<&Vote>) = self
            .votes
            .iter()
            .partition(|vote| vote.prediction.as_category() == Some(category));

        if agreeing.len() < threshold {
            debug!(
                category,
                votes = agreeing.len(),
                threshold,
                "category below threshold, falling back to plurality"
            );
            let rest = MultiVote {
                votes: remaining.into_iter().cloned().collect(),
            };
            return rest.combine_categorical(CombinationMethod::Plurality, options);
        }

        let winner = PredictionValue::Category(category.to_string());
        let mut result = Prediction::new(winner.clone());
        if options.add_confidence {
            result.confidence = Some(self.agreeing_confidence(&winner));
            let total: f64 = self.votes.iter().map(|v| v.weight).sum();
            let agreeing_weight: f64 = agreeing.iter().map(|v| v.weight).sum();
            result.probability = Some(if total > 0.0 {
                agreeing_weight / total
            } else {
                0.0
            });
        }
        if options.add_distribution {
            result.distribution = Some(self.merged_distribution().sorted_by_count());
        }
        if options.add_count {
            result.count = Some(self.total_count());
        }
        Ok(result)
    }

    /// Weighted mean confidence of the votes predicting `winner`
    fn agreeing_confidence(&self, winner: &PredictionValue) -> f64 {
        let agreeing = self.votes.iter().filter(|v| &v.prediction == winner);
        weighted_mean(agreeing.clone().map(|v| (v.confidence, v.weight)))
            .or_else(|| weighted_mean(agreeing.map(|v| (v.confidence, 1.0))))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }

    /// Top categories of the merged distribution, for multiple-output mode
    pub fn category_predictions(&self, limit: Option<usize>) -> Result<Vec<CategoryPrediction>> {
        if self.is_regression()? {
            return Err(PredictError::invalid_option(
                "multiple output requires a categorical objective",
            ));
        }
        let mut merged = Distribution::new();
        for vote in &self.votes {
            merged.merge(&vote.effective_distribution());
        }
        Ok(category_predictions(&merged, limit))
    }
}

/// Sorted, truncated per-category predictions of a distribution
pub(crate) fn category_predictions(
    distribution: &Distribution,
    limit: Option<usize>,
) -> Vec<CategoryPrediction> {
    let total = distribution.total() as f64;
    let sorted = distribution.sorted_by_count();
    let take = limit.unwrap_or(sorted.len());
    sorted
        .entries()
        .iter()
        .take(take)
        .map(|(value, count)| CategoryPrediction {
            prediction: value.clone(),
            confidence: ws_confidence(*count as f64, total),
            probability: if total > 0.0 { *count as f64 / total } else { 0.0 },
            count: *count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_votes(labels: &[&str]) -> MultiVote {
        MultiVote::from_votes(
            labels
                .iter()
                .map(|label| Vote::new((*label).into()).with_confidence(0.8).with_count(10))
                .collect(),
        )
    }

    #[test]
    fn test_plurality_tie_resolves_to_first_seen() {
        let votes = category_votes(&["A", "B", "B", "A"]);
        let result = votes
            .combine(CombinationMethod::Plurality, &PredictOptions::default())
            .unwrap();
        assert_eq!(result.prediction, PredictionValue::from("A"));
        assert!(result.confidence.is_none());
    }

    #[test]
    fn test_confidence_weighting() {
        let votes = MultiVote::from_votes(vec![
            Vote::new("A".into()).with_confidence(0.2),
            Vote::new("A".into()).with_confidence(0.2),
            Vote::new("B".into()).with_confidence(0.9),
        ]);
        let options = PredictOptions {
            add_confidence: true,
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Confidence, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));
        assert_eq!(result.confidence, Some(0.9));
        let plurality = votes.combine(CombinationMethod::Plurality, &options).unwrap();
        assert_eq!(plurality.prediction, PredictionValue::from("A"));
        assert!((plurality.probability.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_probability_uses_distributions() {
        let votes = MultiVote::from_votes(vec![
            Vote::new("A".into()).with_count(10).with_distribution(Distribution::from_entries(
                vec![("A".into(), 6), ("B".into(), 4)],
            )),
            Vote::new("B".into()).with_count(10).with_distribution(Distribution::from_entries(
                vec![("B".into(), 9), ("A".into(), 1)],
            )),
        ]);
        let options = PredictOptions {
            add_confidence: true,
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Probability, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));
        // Merged distribution is B 13 of 20; category weights are A 0.7, B 1.3
        assert!((result.confidence.unwrap() - 0.432_850_510_219_464_75).abs() < 1e-12);
        assert!((result.probability.unwrap() - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_probability_skips_zero_count_votes() {
        let votes = MultiVote::from_votes(vec![
            Vote::new("A".into())
                .with_distribution(Distribution::from_entries(vec![("A".into(), 0)])),
            Vote::new("B".into())
                .with_count(10)
                .with_distribution(Distribution::from_entries(vec![("B".into(), 10)])),
            Vote::new("B".into())
                .with_count(10)
                .with_distribution(Distribution::from_entries(vec![("B".into(), 10)])),
        ]);
        let options = PredictOptions {
            add_confidence: true,
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Probability, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));
        assert_eq!(result.probability, Some(1.0));
        assert!((result.confidence.unwrap() - 0.838_869_874_505_066_7).abs() < 1e-12);

        let empty = MultiVote::from_votes(vec![
            Vote::new("A".into())
                .with_distribution(Distribution::from_entries(vec![("A".into(), 0)])),
            Vote::new("B".into())
                .with_distribution(Distribution::from_entries(vec![("B".into(), 0)])),
            Vote::new("B".into())
                .with_distribution(Distribution::from_entries(vec![("B".into(), 0)])),
        ]);
        let result = empty.combine(CombinationMethod::Probability, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));
        assert!((result.probability.unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_weights_do_not_win() {
        let mut tally = Tally::default();
        tally.add(&"A".into(), f64::NAN);
        tally.add(&"B".into(), 1.0);
        tally.add(&"C".into(), f64::INFINITY);
        let (winner, weight) = tally.winner().unwrap();
        assert_eq!(winner, &PredictionValue::from("B"));
        assert_eq!(weight, 1.0);
    }

    #[test]
    fn test_threshold() {
        let votes = category_votes(&["A", "B", "B", "C", "B"]);
        let options = PredictOptions {
            threshold: Some(1),
            category: Some("A".into()),
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Threshold, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("A"));
        assert!(result.confidence.is_none());

        let options = PredictOptions {
            threshold: Some(2),
            category: Some("A".into()),
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Threshold, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));

        let options = PredictOptions {
            threshold: Some(6),
            category: Some("A".into()),
            ..Default::default()
        };
        assert!(matches!(
            votes.combine(CombinationMethod::Threshold, &options),
            Err(PredictError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_threshold_reports_agreeing_votes() {
        let votes = MultiVote::from_votes(vec![
            Vote::new("A".into()).with_confidence(0.9),
            Vote::new("B".into()).with_confidence(0.7),
            Vote::new("A".into()).with_confidence(0.6),
        ]);
        let options = PredictOptions {
            threshold: Some(2),
            category: Some("A".into()),
            add_confidence: true,
            ..Default::default()
        };
        let result = votes.combine(CombinationMethod::Threshold, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("A"));
        assert!((result.confidence.unwrap() - 0.75).abs() < 1e-12);
        assert!((result.probability.unwrap() - 2.0 / 3.0).abs() < 1e-12);

        let options = PredictOptions {
            threshold: Some(3),
            ..options
        };
        let result = votes.combine(CombinationMethod::Threshold, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::from("B"));
        assert_eq!(result.confidence, Some(0.7));
        assert_eq!(result.probability, Some(1.0));
    }

    #[test]
    fn test_regression_combination() {
        let votes = MultiVote::from_votes(vec![
            Vote::new(2.0.into()).with_confidence(1.0),
            Vote::new(4.0.into()).with_confidence(3.0),
        ]);
        let options = PredictOptions {
            add_min: true,
            add_max: true,
            ..Default::default()
        };
        let plurality = votes.combine(CombinationMethod::Plurality, &options).unwrap();
        assert_eq!(plurality.prediction, PredictionValue::Number(3.0));
        assert_eq!(plurality.min, Some(2.0));
        assert_eq!(plurality.max, Some(4.0));

        let confidence = votes.combine(CombinationMethod::Confidence, &options).unwrap();
        assert_eq!(confidence.prediction, PredictionValue::Number(3.5));

        let zero = MultiVote::from_votes(vec![Vote::new(2.0.into()), Vote::new(6.0.into())]);
        let result = zero.combine(CombinationMethod::Confidence, &options).unwrap();
        assert_eq!(result.prediction, PredictionValue::Number(4.0));

        let threshold = PredictOptions {
            threshold: Some(1),
            category: Some("A".into()),
            ..Default::default()
        };
        assert!(matches!(
            votes.combine(CombinationMethod::Threshold, &threshold),
            Err(PredictError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_empty_and_mixed_votes_are_malformed() {
        assert!(matches!(
            MultiVote::new().combine(CombinationMethod::Plurality, &PredictOptions::default()),
            Err(PredictError::MalformedModel(_))
        ));
        let mixed = MultiVote::from_votes(vec![Vote::new("A".into()), Vote::new(1.0.into())]);
        assert!(matches!(
            mixed.combine(CombinationMethod::Plurality, &PredictOptions::default()),
            Err(PredictError::MalformedModel(_))
        ));
    }

    #[test]
    fn test_extend_renumbers_order() {
        let mut first = category_votes(&["A", "B"]);
        first.extend(category_votes(&["C"]));
        let orders: Vec<usize> = first.votes().iter().map(|v| v.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_category_predictions_truncate() {
        let distribution = Distribution::from_entries(vec![
            ("a".into(), 2),
            ("b".into(), 5),
            ("c".into(), 3),
        ]);
        let top = category_predictions(&distribution, Some(2));
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].prediction, PredictionValue::from("b"));
        assert_eq!(top[0].probability, 0.5);
        assert!(top[0].confidence > top[1].confidence);
    }
}
