//! OTLP export of request spans
//!
//! Spans carry the `room_id`/`conference_id` fields recorded by the
//! services, so a trace backend can follow one room's meeting creation
//! across actions and playout.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::config::OtelConfig;

/// Namespace shared by every Clowdr service in exported resources
pub const SERVICE_NAMESPACE: &str = "clowdr";

#[derive(Debug, thiserror::Error)]
pub enum OtelError {
    #[error("Could not build OTLP exporter for {endpoint}: {message}")]
    Exporter { endpoint: String, message: String },
}

fn sampler(ratio: f64) -> Sampler {
    match ratio {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r <= 0.0 => Sampler::AlwaysOff,
        r => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(r))),
    }
}

fn resource(config: &OtelConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.namespace", SERVICE_NAMESPACE),
    ];
    attributes.extend(
        config
            .resource_attributes
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
    );
    Resource::new(attributes)
}

/// Build the tracing layer and install its provider globally
pub fn init_otel_layer<S>(config: &OtelConfig) -> Result<OpenTelemetryLayer<S, Tracer>, OtelError>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| OtelError::Exporter {
            endpoint: config.endpoint.clone(),
            message: e.to_string(),
        })?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(sampler(config.sample_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource(config))
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans
pub fn shutdown_otel() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler() {
        assert!(matches!(sampler(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler(-0.5), Sampler::AlwaysOff));
        assert!(matches!(sampler(0.25), Sampler::ParentBased(_)));
    }

    #[test]
    fn test_resource_carries_service_identity() {
        let config = OtelConfig::new("clowdr-actions", "http://localhost:4317")
            .with_attribute("deployment.environment", "staging");
        let resource = resource(&config);
        assert_eq!(
            resource
                .get(opentelemetry::Key::new("service.name"))
                .map(|v| v.to_string()),
            Some("clowdr-actions".to_string())
        );
        assert_eq!(
            resource
                .get(opentelemetry::Key::new("service.namespace"))
                .map(|v| v.to_string()),
            Some("clowdr".to_string())
        );
        assert_eq!(
            resource
                .get(opentelemetry::Key::new("deployment.environment"))
                .map(|v| v.to_string()),
            Some("staging".to_string())
        );
    }
}
