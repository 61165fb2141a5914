//! End-to-end predictions on a small iris decision tree

use localpred_core::{
    input_from_json, predict, FieldValue, InputRecord, LocalOutcome, MissingStrategy, Multiple,
    PredictError, PredictOptions, Prediction, PredictionValue, Resource, ResourceKind,
};
use serde_json::{json, Value};

fn iris_model() -> Value {
    json!({
        "object": {
            "resource": "model/5143a51a37203f2cf7000956",
            "name": "iris",
            "objective_fields": ["000004"],
            "model": {
                "fields": {
                    "000002": {"name": "petal length", "optype": "numeric"},
                    "000003": {"name": "petal width", "optype": "numeric"},
                    "000004": {"name": "species", "optype": "categorical",
                               "summary": {"categories": [["setosa", 50], ["versicolor", 50]]}}
                },
                "root": {
                    "id": 0, "predicate": true, "output": "setosa",
                    "confidence": 0.4, "count": 100,
                    "objective_summary": {"categories": [["setosa", 50], ["versicolor", 50]]},
                    "children": [
                        {"id": 1,
                         "predicate": {"field": "000003", "operator": "<", "value": 1.0},
                         "output": "setosa", "confidence": 0.96, "count": 50,
                         "objective_summary": {"categories": [["setosa", 50]]}},
                        {"id": 2,
                         "predicate": {"field": "000003", "operator": ">=", "value": 1.0},
                         "output": "versicolor", "confidence": 0.92, "count": 50,
                         "objective_summary": {"categories": [["versicolor", 50]]}}
                    ]
                }
            }
        }
    })
}

fn by_name() -> PredictOptions {
    PredictOptions {
        by_name: true,
        ..Default::default()
    }
}

fn prediction(outcome: LocalOutcome) -> Prediction {
    match outcome {
        LocalOutcome::Prediction(p) => p,
        other => panic!("expected a prediction, got {other:?}"),
    }
}

#[test]
fn test_iris_split() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    assert_eq!(resource.kind(), ResourceKind::Model);

    let input = input_from_json(&json!({"petal width": 0.5})).unwrap();
    let result = prediction(predict(&resource, &input, &by_name()).unwrap());
    assert_eq!(result.prediction, PredictionValue::from("setosa"));
    assert_eq!(result.confidence, Some(0.96));
    assert_eq!(result.count, Some(50));
    assert_eq!(result.path, Some(vec!["petal width < 1".to_string()]));

    let input = input_from_json(&json!({"petal width": 1.7})).unwrap();
    let result = prediction(predict(&resource, &input, &by_name()).unwrap());
    assert_eq!(result.prediction, PredictionValue::from("versicolor"));
    assert_eq!(result.confidence, Some(0.92));
}

#[test]
fn test_missing_value_returns_root_prediction() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    let input = input_from_json(&json!({"petal length": 4.2})).unwrap();
    let result = prediction(predict(&resource, &input, &by_name()).unwrap());
    assert_eq!(result.prediction, PredictionValue::from("setosa"));
    assert_eq!(result.count, Some(100));
    assert_eq!(result.next.as_deref(), Some("petal width"));
}

#[test]
fn test_proportional_count_equals_parent() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    let options = PredictOptions {
        by_name: true,
        strategy: Some(MissingStrategy::Proportional),
        ..Default::default()
    };
    let result = prediction(predict(&resource, &InputRecord::new(), &options).unwrap());
    assert_eq!(result.count, Some(100));
    let confidence = result.confidence.unwrap();
    assert!((confidence - 0.94).abs() < 1e-9);
    assert_eq!(result.probability, Some(0.5));
}

#[test]
fn test_missing_tokens_and_unknown_keys_are_dropped() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    let input = InputRecord::from([
        ("petal width".to_string(), FieldValue::from("N/A")),
        ("colour".to_string(), FieldValue::from("purple")),
    ]);
    let result = prediction(predict(&resource, &input, &by_name()).unwrap());
    assert_eq!(result.count, Some(100));

    let strict = PredictOptions {
        by_name: true,
        strict: true,
        ..Default::default()
    };
    assert!(matches!(
        predict(&resource, &input, &strict),
        Err(PredictError::UnknownField(key)) if key == "colour"
    ));
}

#[test]
fn test_multiple_output_serializes() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    let options = PredictOptions {
        multiple: Multiple::Top(1),
        ..Default::default()
    };
    let outcome = predict(&resource, &InputRecord::new(), &options).unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    let predictions = json["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0]["prediction"], json!("setosa"));
    assert_eq!(predictions[0]["count"], json!(50));
}

#[test]
fn test_prediction_is_deterministic() {
    let resource = Resource::from_json(&iris_model()).unwrap();
    let input = input_from_json(&json!({"000003": 0.2})).unwrap();
    let first = predict(&resource, &input, &PredictOptions::default()).unwrap();
    for _ in 0..10 {
        assert_eq!(predict(&resource, &input, &PredictOptions::default()).unwrap(), first);
    }
}
