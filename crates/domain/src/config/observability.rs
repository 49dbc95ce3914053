use serde::{Deserialize, Serialize};

/// How `sy-hello serve` reports what the router is doing.
///
/// ```toml
/// [observability]
/// log_format = "compact"
///
/// [observability.otlp]
/// endpoint = "http://collector:4317"
/// sample_ratio = 0.25
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// Span export; absent means logs only.
    #[serde(default)]
    pub otlp: Option<OtlpExport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
    /// Human-readable single lines.
    Compact,
}

/// OTLP/gRPC span export for call and connection spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpExport {
    pub endpoint: String,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces kept.
    #[serde(default = "d_sample_ratio")]
    pub sample_ratio: f64,
}

impl OtlpExport {
    /// `sample_ratio` clamped into `[0, 1]`.
    pub fn effective_ratio(&self) -> f64 {
        if self.sample_ratio.is_nan() {
            return 0.0;
        }
        self.sample_ratio.clamp(0.0, 1.0)
    }
}

fn d_service_name() -> String {
    "switchyard".into()
}

fn d_sample_ratio() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_only_by_default() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.otlp.is_none());
    }

    #[test]
    fn otlp_table_fills_in_service_and_ratio() {
        let cfg: ObservabilityConfig = toml::from_str(
            r#"
            log_format = "compact"
            [otlp]
            endpoint = "http://collector:4317"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_format, LogFormat::Compact);
        let otlp = cfg.otlp.unwrap();
        assert_eq!(otlp.endpoint, "http://collector:4317");
        assert_eq!(otlp.service_name, "switchyard");
        assert_eq!(otlp.effective_ratio(), 1.0);
    }

    #[test]
    fn ratio_is_clamped() {
        let otlp = |sample_ratio| OtlpExport {
            endpoint: "http://collector:4317".into(),
            service_name: d_service_name(),
            sample_ratio,
        };
        assert_eq!(otlp(2.5).effective_ratio(), 1.0);
        assert_eq!(otlp(-1.0).effective_ratio(), 0.0);
        assert_eq!(otlp(f64::NAN).effective_ratio(), 0.0);
        assert_eq!(otlp(0.25).effective_ratio(), 0.25);
    }
}
