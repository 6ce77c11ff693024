// Loads the fixture through the public API and checks what the samplers will see.

use std::path::Path;
use std::time::Duration;

use amqp_sampler::config::{load_config, SamplerKind};
use amqp_sampler::env::apply_overrides;
use amqp_sampler::rabbitmq::Endpoint;

const FIXTURE: &str = "tests/fixtures/sampler.json";

#[test]
fn fixture_resolves_connection_and_topology() {
    let config = load_config(Some(Path::new(FIXTURE))).expect("fixture should load");

    assert!(config.validate(SamplerKind::Consume).is_ok());
    assert_eq!(config.label(SamplerKind::Consume), "orders consumer");

    let settings = config.connection_settings();
    assert_eq!(
        settings.endpoints,
        vec![
            Endpoint { host: "rabbit-a".into(), port: 5672 },
            Endpoint { host: "rabbit-b".into(), port: 5673 },
        ]
    );
    assert_eq!(settings.virtual_host, "/perf");
    assert_eq!(settings.timeout, Duration::from_millis(2500));
    assert!(settings.tls.is_none());

    let topology = config.topology();
    let queue = topology.queue.expect("queue configured");
    assert_eq!(queue.arguments, vec![("x-message-ttl", 60000), ("x-max-priority", 5)]);
    let exchange = topology.exchange.expect("exchange configured");
    assert_eq!(exchange.kind, "topic");
    assert!(!exchange.auto_delete);
    assert_eq!(topology.routing_key, "orders.#");

    let setup = config.channel_setup(SamplerKind::Consume);
    assert_eq!(setup.prefetch_count, Some(20));
    assert!(setup.use_tx);
    assert_eq!(config.channel_setup(SamplerKind::Publish).prefetch_count, None);
}

#[test]
fn fixture_publish_properties() {
    let config = load_config(Some(Path::new(FIXTURE))).expect("fixture should load");

    assert_eq!(config.publish_exchange(), "bench");
    assert_eq!(config.message_routing_key(), "orders.new");

    let properties = config.publish_properties();
    assert_eq!(properties.content_type, "application/json");
    assert_eq!(properties.delivery_mode, 2);
    assert_eq!(properties.priority, 0);
    assert_eq!(properties.correlation_id.as_deref(), Some("run-1"));
    assert_eq!(properties.reply_to, None);
    assert_eq!(properties.headers.get("tenant").map(String::as_str), Some("acme"));
}

#[test]
fn environment_overrides_win_over_file() {
    let mut config = load_config(Some(Path::new(FIXTURE))).expect("fixture should load");

    apply_overrides(&mut config, |key| match key {
        "AMQP_HOST" => Some("localhost".to_string()),
        "AMQP_USE_SSL" => Some("true".to_string()),
        _ => None,
    })
    .expect("overrides should apply");

    let settings = config.connection_settings();
    assert_eq!(settings.endpoints.len(), 1);
    assert_eq!(settings.endpoints[0].to_string(), "localhost:5672");
    assert!(settings.tls.is_some());
}

#[test]
fn bad_port_override_names_the_variable() {
    let mut config = load_config(Some(Path::new(FIXTURE))).expect("fixture should load");

    let err = apply_overrides(&mut config, |key| {
        (key == "AMQP_PORT").then(|| "not-a-port".to_string())
    })
    .unwrap_err();

    assert!(err.to_string().contains("AMQP_PORT"));
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_config(Some(Path::new("tests/fixtures/does-not-exist.json"))).is_err());
}
