//! Per-model parameter cleaning
//!
//! Generation parameters arrive as an opaque JSON object. Before submission
//! they are filtered against the capabilities of the configured model: fast
//! inference models accept a small whitelist with clamped step counts, while
//! full-feature models take every non-null parameter as-is.

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Maximum step count accepted by fast inference models
const FAST_MAX_STEPS: i64 = 4;

/// Parameters fast inference models do not understand
const FAST_UNSUPPORTED: [&str; 6] = [
    "width",
    "height",
    "guidance_scale",
    "negative_prompt",
    "scheduler",
    "num_outputs",
];

/// Capability class of a model, derived from its identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    FastInference,
    FullFeature,
    Default,
}

impl ModelClass {
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.contains("flux-schnell") {
            ModelClass::FastInference
        } else if lower.contains("sdxl") {
            ModelClass::FullFeature
        } else {
            ModelClass::Default
        }
    }
}

/// Clean parameters for the given model
///
/// Idempotent: cleaning an already-cleaned map yields the same map.
pub fn clean_parameters(parameters: &Value, model: &str) -> Map<String, Value> {
    let Some(params) = parameters.as_object() else {
        return Map::new();
    };

    match ModelClass::for_model(model) {
        ModelClass::FastInference => clean_fast_inference(params, model),
        ModelClass::FullFeature | ModelClass::Default => params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    }
}

fn clean_fast_inference(params: &Map<String, Value>, model: &str) -> Map<String, Value> {
    let mut cleaned = Map::new();

    if let Some(value) = params.get("num_inference_steps") {
        if let Some(steps) = value.as_i64() {
            if steps > FAST_MAX_STEPS {
                warn!(
                    model,
                    requested = steps,
                    "Model requires num_inference_steps <= 4, clamping"
                );
                cleaned.insert("num_inference_steps".into(), Value::from(FAST_MAX_STEPS));
            } else if steps >= 1 {
                cleaned.insert("num_inference_steps".into(), Value::from(steps));
            }
        }
    }

    if let Some(value) = params.get("seed") {
        if !value.is_null() {
            match coerce_int(value) {
                Some(seed) => {
                    cleaned.insert("seed".into(), Value::from(seed));
                }
                None => warn!(model, seed = %value, "Invalid seed value, skipping"),
            }
        }
    }

    if let Some(value) = params.get("aspect_ratio") {
        if let Some(ratio) = coerce_string(value) {
            cleaned.insert("aspect_ratio".into(), Value::from(ratio));
        }
    }

    if let Some(value) = params.get("output_quality") {
        if let Some(quality) = coerce_int(value) {
            if quality > 0 {
                cleaned.insert("output_quality".into(), Value::from(quality));
            }
        }
    }

    for key in FAST_UNSUPPORTED {
        if params.contains_key(key) {
            debug!(model, parameter = key, "Skipping unsupported parameter");
        }
    }

    cleaned
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null => None,
        Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FAST: &str = "black-forest-labs/flux-schnell";
    const FULL: &str = "stability-ai/sdxl:39ed52f2";

    #[test]
    fn test_model_class_detection() {
        assert_eq!(ModelClass::for_model(FAST), ModelClass::FastInference);
        assert_eq!(ModelClass::for_model(FULL), ModelClass::FullFeature);
        assert_eq!(ModelClass::for_model("acme/painter"), ModelClass::Default);
    }

    #[test]
    fn test_fast_clamps_steps() {
        for requested in [5, 8, 100] {
            let cleaned = clean_parameters(&json!({"num_inference_steps": requested}), FAST);
            assert_eq!(cleaned["num_inference_steps"], json!(4));
        }
        let cleaned = clean_parameters(&json!({"num_inference_steps": 2}), FAST);
        assert_eq!(cleaned["num_inference_steps"], json!(2));
    }

    #[test]
    fn test_fast_drops_invalid_steps() {
        let cleaned = clean_parameters(&json!({"num_inference_steps": 0}), FAST);
        assert!(!cleaned.contains_key("num_inference_steps"));

        let cleaned = clean_parameters(&json!({"num_inference_steps": null}), FAST);
        assert!(!cleaned.contains_key("num_inference_steps"));
    }

    #[test]
    fn test_fast_whitelist() {
        let cleaned = clean_parameters(
            &json!({
                "width": 512,
                "height": 512,
                "guidance_scale": 7.5,
                "negative_prompt": "blurry",
                "scheduler": "ddim",
                "num_outputs": 2,
                "seed": "42",
                "aspect_ratio": "16:9",
                "output_quality": 90
            }),
            FAST,
        );

        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned["seed"], json!(42));
        assert_eq!(cleaned["aspect_ratio"], json!("16:9"));
        assert_eq!(cleaned["output_quality"], json!(90));
    }

    #[test]
    fn test_full_feature_passthrough_drops_nulls() {
        let cleaned = clean_parameters(
            &json!({"width": 512, "height": 512, "negative_prompt": null}),
            FULL,
        );
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned["width"], json!(512));
        assert!(!cleaned.contains_key("negative_prompt"));
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        for model in [FAST, FULL, "acme/painter"] {
            let params = json!({
                "num_inference_steps": 9,
                "seed": "7",
                "aspect_ratio": "1:1",
                "output_quality": 80,
                "width": 256,
                "nullable": null
            });
            let once = clean_parameters(&params, model);
            let twice = clean_parameters(&Value::Object(once.clone()), model);
            assert_eq!(once, twice, "cleaning not idempotent for {model}");
        }
    }
}
