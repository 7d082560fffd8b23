#[cfg(test)]
mod tests {
    use crate::datapoint::{Datapoint, MetricValue};
    use crate::errors::IdentityError;
    use crate::identity::MetricIdentity;
    use std::sync::Arc;

    /// Test: normalization of name and tags
    ///
    /// Purpose
    /// - Names and tags are trimmed, empty tag sides dropped, repeated keys keep the last value
    ///
    /// Expected
    /// - Only the surviving, trimmed pairs are kept in key order
    #[test]
    fn test_identity_normalizes_input() {
        let id = MetricIdentity::new(
            "  jvm.heap.used ",
            vec![
                (" host ", " h1 "),
                ("", "orphan"),
                ("pool", "  "),
                ("host", "h2"),
            ],
        )
        .unwrap();

        assert_eq!(id.name(), "jvm.heap.used");
        assert_eq!(id.tags().len(), 1);
        assert_eq!(id.tags().get("host").map(String::as_str), Some("h2"));
    }

    #[test]
    fn test_identity_rejects_empty_name() {
        let err = MetricIdentity::new("   ", Vec::<(&str, &str)>::new()).unwrap_err();
        assert_eq!(err, IdentityError::EmptyName);
    }

    /// Test: tag insertion order does not affect equality or the content hash
    #[test]
    fn test_identity_hash_ignores_tag_order() {
        let a = MetricIdentity::new("cpu.load", vec![("host", "h1"), ("dc", "eu")]).unwrap();
        let b = MetricIdentity::new("cpu.load", vec![("dc", "eu"), ("host", "h1")]).unwrap();
        let c = MetricIdentity::new("cpu.load", vec![("dc", "us"), ("host", "h1")]).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a, c);
        assert_ne!(a.content_hash(), c.content_hash());
    }

    /// Test: name/tag boundaries are part of the hash input
    ///
    /// Expected
    /// - Moving characters between name, key and value yields different hashes
    #[test]
    fn test_identity_hash_separates_fields() {
        let a = MetricIdentity::new("ab", vec![("c", "d")]).unwrap();
        let b = MetricIdentity::new("a", vec![("bc", "d")]).unwrap();
        let c = MetricIdentity::new("a", vec![("b", "cd")]).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
        assert_ne!(b.content_hash(), c.content_hash());
    }

    /// Test: datapoint rendering reuses the pre-rendered fragments
    ///
    /// Expected
    /// - The rendered object parses as JSON with the exact metric, timestamp, value and tags
    #[test]
    fn test_render_datapoint_json() {
        let id = Arc::new(MetricIdentity::new("cpu.load", vec![("host", "h1")]).unwrap());
        let dp = Datapoint::new(id.clone(), 1000, 0.42).unwrap();

        let mut out = Vec::new();
        dp.render(&mut out);

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "metric": "cpu.load",
                "timestamp": 1000,
                "value": 0.42,
                "tags": {"host": "h1"}
            })
        );
        assert_eq!(id.tag_fragments().len(), 1);
        assert_eq!(&*id.tag_fragments()[0], br#""host":"h1""#);
    }

    /// Test: names and tags needing JSON escapes still render valid JSON
    #[test]
    fn test_render_escapes_strings() {
        let id = MetricIdentity::new("weird\"name", vec![("path", "C:\\tmp"), ("note", "é\n")])
            .unwrap();
        let mut out = Vec::new();
        id.render_datapoint(5, MetricValue::Integer(-3), &mut out);

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["metric"], "weird\"name");
        assert_eq!(parsed["value"], -3);
        assert_eq!(parsed["tags"]["path"], "C:\\tmp");
        assert_eq!(parsed["tags"]["note"], "é");
    }

    #[test]
    fn test_render_without_tags() {
        let id = MetricIdentity::new("uptime", Vec::<(String, String)>::new()).unwrap();
        let mut out = Vec::new();
        id.render_datapoint(7, MetricValue::Integer(12), &mut out);
        assert_eq!(
            out,
            br#"{"metric":"uptime","timestamp":7,"value":12,"tags":{}}"#.to_vec()
        );
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let id = Arc::new(MetricIdentity::new("x", vec![("a", "b")]).unwrap());
        assert!(matches!(
            Datapoint::new(id.clone(), 1, f64::NAN),
            Err(IdentityError::NonFiniteValue(_))
        ));
        assert!(Datapoint::new(id.clone(), 1, f64::INFINITY).is_err());
        assert!(Datapoint::new(id, 1, 3u64).is_ok());
    }
}
