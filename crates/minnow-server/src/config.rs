use anyhow::Context;
use clap::Parser;
use minnow_storage::config::DEFAULT_MIN_PART_SIZE;
use minnow_storage::erasure::{DEFAULT_BLOCK_SIZE, DEFAULT_DATA_SHARDS, DEFAULT_PARITY_SHARDS};
use minnow_storage::{ErasureConfig, MultipartConfig, ObjectLayerConfig};

#[derive(Debug, Parser)]
#[command(name = "minnow", about = "S3-compatible object storage server on erasure-coded disks")]
pub struct Cli {
    #[arg(long, env = "MINNOW_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "MINNOW_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Comma-separated disk endpoints: local directories or
    /// `http(s)://node:port/path` for disks exported by another node.
    #[arg(long, env = "MINNOW_DISKS", value_delimiter = ',', required = true)]
    pub disks: Vec<String>,

    #[arg(long, env = "MINNOW_DATA_SHARDS", default_value_t = DEFAULT_DATA_SHARDS)]
    pub data_shards: usize,

    #[arg(long, env = "MINNOW_PARITY_SHARDS", default_value_t = DEFAULT_PARITY_SHARDS)]
    pub parity_shards: usize,

    #[arg(long, env = "MINNOW_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    #[arg(long, env = "MINNOW_MIN_PART_SIZE", default_value_t = DEFAULT_MIN_PART_SIZE)]
    pub min_part_size: u64,

    /// Upper bound for one object layer operation in milliseconds. 0 disables it.
    #[arg(long, env = "MINNOW_OPERATION_TIMEOUT_MS", default_value_t = 0)]
    pub operation_timeout_ms: u64,

    /// Serve the local disks to other nodes over the storage RPC.
    #[arg(long, env = "MINNOW_EXPORT_DISKS")]
    pub export_disks: bool,

    #[arg(long, env = "MINNOW_LOG_JSON")]
    pub log_json: bool,
}

pub fn is_remote_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("http://") || endpoint.starts_with("https://")
}

impl Cli {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Disk endpoints in set order. Local paths are made absolute since
    /// other nodes address exported disks by their path.
    pub fn disk_endpoints(&self) -> anyhow::Result<Vec<String>> {
        let endpoints = self
            .disks
            .iter()
            .map(|endpoint| endpoint.trim())
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| {
                if is_remote_endpoint(endpoint) {
                    return Ok(endpoint.to_string());
                }
                let path = std::path::absolute(endpoint)
                    .with_context(|| format!("invalid disk path {endpoint}"))?;
                Ok(path.to_string_lossy().into_owned())
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(!endpoints.is_empty(), "--disks must name at least one disk");
        Ok(endpoints)
    }

    pub fn object_layer_config(&self) -> anyhow::Result<ObjectLayerConfig> {
        let erasure = ErasureConfig::new(self.data_shards, self.parity_shards, self.block_size)
            .context("invalid erasure configuration")?;
        Ok(ObjectLayerConfig {
            erasure,
            multipart: MultipartConfig {
                min_part_size: self.min_part_size,
            },
            operation_timeout_ms: (self.operation_timeout_ms > 0).then_some(self.operation_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disks_split_on_commas() {
        let cli = Cli::try_parse_from([
            "minnow",
            "--disks",
            "/data/d1, /data/d2,http://10.0.0.2:9000/data/d1",
            "--data-shards",
            "2",
            "--parity-shards",
            "1",
        ])
        .unwrap();
        assert_eq!(
            cli.disk_endpoints().unwrap(),
            vec!["/data/d1", "/data/d2", "http://10.0.0.2:9000/data/d1"]
        );
        let config = cli.object_layer_config().unwrap();
        assert_eq!(config.erasure.data_shards, 2);
        assert_eq!(config.erasure.parity_shards, 1);
        assert_eq!(config.operation_timeout_ms, None);
    }

    #[test]
    fn relative_disks_become_absolute() {
        let cli = Cli::try_parse_from(["minnow", "--disks", "data/d1"]).unwrap();
        let endpoints = cli.disk_endpoints().unwrap();
        assert!(std::path::Path::new(&endpoints[0]).is_absolute());
        assert!(endpoints[0].ends_with("data/d1"));
    }

    #[test]
    fn invalid_erasure_layout_is_rejected() {
        let cli = Cli::try_parse_from(["minnow", "--disks", "/d1", "--data-shards", "0"]).unwrap();
        assert!(cli.object_layer_config().is_err());
    }
}
