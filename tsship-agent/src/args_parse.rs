use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) endpoint: Option<String>,
    pub(crate) storage_dir: Option<String>,
    pub(crate) prom_exporter: Option<String>,
}

impl Args {
    fn show_usage() {
        println!("tsship agent usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --endpoint           Ingestion endpoint base URL (overrides shipper.endpoint)");
        println!("  --storage-dir        Offline storage directory (overrides shipper.persistence.dir)");
        println!("  --prom-exporter      Prometheus exporter http address");
    }

    pub(crate) fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    pub(crate) fn parse_from<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        if args.is_empty() {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        let mut config_file = None;
        let mut endpoint = None;
        let mut storage_dir = None;
        let mut prom_exporter = None;

        let mut args_iter = args.iter();
        while let Some(arg) = args_iter.next() {
            match arg.as_str() {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--endpoint" => {
                    endpoint = args_iter.next().map(|s| s.to_string());
                }
                "--storage-dir" => {
                    storage_dir = args_iter.next().map(|s| s.to_string());
                }
                "--prom-exporter" => {
                    prom_exporter = args_iter.next().map(|s| s.to_string());
                }
                "--help" | "-h" => {
                    Self::show_usage();
                    return Err(anyhow::anyhow!("Help requested"));
                }
                _ => return Err(anyhow::anyhow!("Unknown argument: {}", arg)),
            }
        }

        Ok(Args {
            config_file: config_file
                .ok_or_else(|| anyhow::anyhow!("Missing required --config-file"))?,
            endpoint,
            storage_dir,
            prom_exporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Args;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_overrides() {
        let parsed = Args::parse_from(args(&[
            "--config-file",
            "config/tsship.yml",
            "--endpoint",
            "http://tsdb:4242",
            "--storage-dir",
            "/var/lib/tsship",
            "--prom-exporter",
            "0.0.0.0:9041",
        ]))
        .unwrap();
        assert_eq!(parsed.config_file, "config/tsship.yml");
        assert_eq!(parsed.endpoint.as_deref(), Some("http://tsdb:4242"));
        assert_eq!(parsed.storage_dir.as_deref(), Some("/var/lib/tsship"));
        assert_eq!(parsed.prom_exporter.as_deref(), Some("0.0.0.0:9041"));
    }

    #[test]
    fn rejects_missing_config_and_unknown_flags() {
        assert!(Args::parse_from(args(&[])).is_err());
        assert!(Args::parse_from(args(&["--endpoint", "http://x"])).is_err());
        assert!(Args::parse_from(args(&["--config-file", "a.yml", "--bogus"])).is_err());
    }
}
