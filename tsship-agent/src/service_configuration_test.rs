#[cfg(test)]
mod tests {
    use crate::service_configuration::{LoadConfiguration, ServiceConfiguration};
    use std::time::Duration;
    use tsship_client::ResponseMode;

    fn load(yaml: &str) -> LoadConfiguration {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    /// Test: bundled sample config
    ///
    /// Purpose
    /// - The `config/tsship.yml` shipped with the agent must parse and resolve.
    ///
    /// Expected
    /// - host, tick interval, exporter address and shipper overrides come through as written
    #[test]
    fn sample_config_resolves() {
        let yaml = include_str!("../../config/tsship.yml");
        let config: ServiceConfiguration = load(yaml).try_into().expect("resolves");

        assert_eq!(config.host, "agent-01");
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(
            config.prom_exporter.map(|a| a.to_string()).as_deref(),
            Some("0.0.0.0:9041")
        );
        assert_eq!(config.shipper.endpoint, "http://127.0.0.1:4242");
        assert_eq!(config.shipper.response_mode, ResponseMode::Summary);
        assert!(config.shipper.persistence_enabled);
    }

    /// Test: empty document
    ///
    /// Purpose
    /// - Every section is optional.
    ///
    /// Expected
    /// - defaults everywhere; no exporter; 10s tick
    #[test]
    fn empty_config_uses_defaults() {
        let config: ServiceConfiguration = load("{}").try_into().expect("resolves");
        assert!(config.prom_exporter.is_none());
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.shipper.batch_size, 200);
        assert!(!config.host.is_empty());
    }

    /// Test: partial shipper section
    ///
    /// Flow
    /// - Set only `batch_size` and `response_mode: detailed`.
    ///
    /// Expected
    /// - those two fields change; the rest keep their defaults
    #[test]
    fn partial_shipper_section_merges_with_defaults() {
        let config: ServiceConfiguration = load(
            "shipper:\n  batch_size: 25\n  response_mode: detailed\n",
        )
        .try_into()
        .expect("resolves");
        assert_eq!(config.shipper.batch_size, 25);
        assert_eq!(config.shipper.response_mode, ResponseMode::Detailed);
        assert_eq!(config.shipper.put_path, "/api/put");
        assert!(config.shipper.compression);
    }

    /// Test: invalid values
    ///
    /// Expected
    /// - zero tick interval, a non-http endpoint, a zero batch size and an unparseable
    ///   exporter address are each refused
    #[test]
    fn invalid_values_are_refused() {
        let bad = [
            "agent:\n  tick_interval_ms: 0\n",
            "shipper:\n  endpoint: \"ftp://tsdb:4242\"\n",
            "shipper:\n  batch_size: 0\n",
            "agent:\n  prometheus:\n    host: \"not an ip\"\n    port: 9041\n",
        ];
        for yaml in bad {
            let result: anyhow::Result<ServiceConfiguration> = load(yaml).try_into();
            assert!(result.is_err(), "accepted: {}", yaml);
        }
    }
}
