use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::fingerprint::sniff_mime;

/// AI 视觉模型协作方
///
/// 本库不实现模型本身，驱动程序 (driver) 负责提供具体的客户端。
#[async_trait]
pub trait AiClassifier: Send + Sync {
    /// 模型版本号，写入案件/证据的可追溯戳
    fn model_version(&self) -> &str;

    /// 返回模型的原始文本输出 (期望其中包含一个 JSON 对象)
    async fn classify(&self, instruction: &str, image: &[u8], mime_type: &str) -> anyhow::Result<String>;
}

/// 规范化后的 AI 信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSignal {
    pub suspected_species: String,
    pub illegal_product: String,
    pub confidence: f64,
    pub summary: String,
    pub code_words: Vec<String>,
    pub reasons: Vec<String>,
    pub state_guess: String,
}

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

impl Default for AiSignal {
    fn default() -> Self {
        Self {
            suspected_species: String::new(),
            illegal_product: String::new(),
            confidence: DEFAULT_CONFIDENCE,
            summary: String::new(),
            code_words: Vec::new(),
            reasons: Vec::new(),
            state_guess: String::new(),
        }
    }
}

/// 调用 AI 并规范化结果
///
/// 调用失败或者返回里没有可解析的 JSON 对象，都归为 `Error::AiClassification`。
pub async fn classify(classifier: &dyn AiClassifier, instruction: &str, image: &[u8]) -> Result<AiSignal> {
    let mime_type = sniff_mime(image);
    tracing::debug!(mime_type, bytes = image.len(), model = classifier.model_version(), "Calling AI classifier");

    let raw = classifier
        .classify(instruction, image, mime_type)
        .await
        .map_err(|e| Error::AiClassification(format!("classifier call failed: {e:#}")))?;

    normalize(&raw)
}

/// 从自由文本中截取 `{ ... }`：第一个 `{` 到最后一个 `}`
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 把模型的原始输出投影成 `AiSignal`
///
/// 单个字段缺失或类型不对时静默取默认值；只有整段 JSON 都解析不了才报错。
pub fn normalize(raw: &str) -> Result<AiSignal> {
    let json = extract_json_object(raw)
        .ok_or_else(|| Error::AiClassification("no JSON object in classifier response".to_string()))?;

    let object = match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(object)) => object,
        Ok(_) => return Err(Error::AiClassification("classifier response is not a JSON object".to_string())),
        Err(e) => return Err(Error::AiClassification(format!("unparsable classifier response: {e}"))),
    };

    Ok(AiSignal {
        suspected_species: string_field(&object, "suspectedSpecies"),
        illegal_product: string_field(&object, "illegalProduct"),
        confidence: confidence_field(&object),
        summary: string_field(&object, "summary"),
        code_words: string_list_field(&object, "codeWords"),
        reasons: string_list_field(&object, "reasons"),
        state_guess: string_field(&object, "stateGuess"),
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn confidence_field(object: &Map<String, Value>) -> f64 {
    let value = match object.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}

fn string_list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_surrounding_prose() {
        let raw = r#"Sure! Here is the analysis:
```json
{"suspectedSpecies": "Pangolin", "illegalProduct": "scales", "confidence": 0.91,
 "summary": "Scales sold by weight.", "codeWords": ["pineapple scales"],
 "reasons": ["price per kg"], "stateGuess": "Johor"}
```
Let me know if you need more."#;
        let signal = normalize(raw).unwrap();
        assert_eq!(signal.suspected_species, "Pangolin");
        assert_eq!(signal.illegal_product, "scales");
        assert_eq!(signal.confidence, 0.91);
        assert_eq!(signal.code_words, vec!["pineapple scales"]);
        assert_eq!(signal.state_guess, "Johor");
    }

    #[test]
    fn wrong_types_fall_back_to_defaults() {
        let raw = r#"{"suspectedSpecies": 7, "confidence": "high", "codeWords": "black honey",
                     "reasons": ["ok", 3, null], "summary": null}"#;
        let signal = normalize(raw).unwrap();
        assert_eq!(signal.suspected_species, "");
        assert_eq!(signal.confidence, DEFAULT_CONFIDENCE);
        assert!(signal.code_words.is_empty());
        assert_eq!(signal.reasons, vec!["ok"]);
        assert_eq!(signal.summary, "");
    }

    #[test]
    fn empty_object_is_all_defaults() {
        assert_eq!(normalize("{}").unwrap(), AiSignal::default());
    }

    #[test]
    fn confidence_is_clamped_and_numeric_strings_accepted() {
        assert_eq!(normalize(r#"{"confidence": 1.7}"#).unwrap().confidence, 1.0);
        assert_eq!(normalize(r#"{"confidence": -2}"#).unwrap().confidence, 0.0);
        assert_eq!(normalize(r#"{"confidence": " 0.8 "}"#).unwrap().confidence, 0.8);
    }

    #[test]
    fn unparsable_payload_is_classification_error() {
        for raw in ["", "no json here", "} backwards {", "{not: valid}", "[1, 2]"] {
            let err = normalize(raw).unwrap_err();
            assert!(matches!(err, Error::AiClassification(_)), "{raw:?} -> {err:?}");
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl AiClassifier for Canned {
        fn model_version(&self) -> &str {
            "canned"
        }

        async fn classify(&self, _instruction: &str, _image: &[u8], mime_type: &str) -> anyhow::Result<String> {
            assert_eq!(mime_type, "image/png");
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl AiClassifier for Broken {
        fn model_version(&self) -> &str {
            "broken"
        }

        async fn classify(&self, _instruction: &str, _image: &[u8], _mime_type: &str) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[tokio::test]
    async fn classify_through_collaborator() {
        let signal = classify(&Canned(r#"{"confidence": 0.3}"#), "instr", b"bytes").await.unwrap();
        assert_eq!(signal.confidence, 0.3);

        let err = classify(&Broken, "instr", b"bytes").await.unwrap_err();
        assert!(matches!(err, Error::AiClassification(msg) if msg.contains("quota exceeded")));
    }
}
