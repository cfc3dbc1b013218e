//! Command line and environment configuration of the server.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::artifacts::RecommenderPaths;
use crate::refresh::{RefreshConfig, DEFAULT_NOTEBOOK, DEFAULT_OUTPUT};

/// Directory, under the models directory, holding the recommender artifacts.
pub const RECOMMENDER_SUBDIR: &str = "recommendation-system";

/// eventrec - serve pre-trained classifiers and event recommendations over HTTP
#[derive(Parser, Debug, Clone)]
#[command(name = "eventrec", version, about, long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "EVENTREC_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Root of the model artifact tree
    #[arg(long, env = "EVENTREC_MODELS_DIR", default_value = "ml-models")]
    pub models_dir: PathBuf,

    /// Recommender artifact directory [default: <models-dir>/recommendation-system]
    #[arg(long, env = "EVENTREC_RECOMMENDER_DIR")]
    pub recommender_dir: Option<PathBuf>,

    /// papermill executable
    #[arg(long, env = "EVENTREC_PAPERMILL", default_value = "papermill")]
    pub papermill: PathBuf,

    /// jupyter executable, used to discover kernels
    #[arg(long, env = "EVENTREC_JUPYTER", default_value = "jupyter")]
    pub jupyter: PathBuf,

    /// Kernel to run the refresh notebook with [default: discovered]
    #[arg(long, env = "EVENTREC_KERNEL")]
    pub kernel: Option<String>,

    /// Refresh notebook, relative to the recommender directory
    #[arg(long, default_value = DEFAULT_NOTEBOOK)]
    pub refresh_notebook: PathBuf,

    /// Executed notebook output, relative to the recommender directory
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    pub refresh_output: PathBuf,

    /// Seconds between refresh runs
    #[arg(
        long,
        env = "EVENTREC_REFRESH_INTERVAL_SECS",
        default_value = "86400",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_interval_secs: u64,

    /// Seconds before a refresh run is killed
    #[arg(
        long,
        env = "EVENTREC_REFRESH_TIMEOUT_SECS",
        default_value = "3600",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub refresh_timeout_secs: u64,

    /// Disable the scheduled refresh
    #[arg(long, env = "EVENTREC_NO_REFRESH")]
    pub no_refresh: bool,
}

impl Config {
    /// The recommender directory, defaulting to
    /// `<models-dir>/recommendation-system`.
    pub fn recommender_dir(&self) -> PathBuf {
        self.recommender_dir
            .clone()
            .unwrap_or_else(|| self.models_dir.join(RECOMMENDER_SUBDIR))
    }

    /// Recommender artifact locations.
    pub fn recommender_paths(&self) -> RecommenderPaths {
        RecommenderPaths::new(self.recommender_dir())
    }

    /// `None` when the refresh is disabled.
    pub fn refresh_config(&self) -> Option<RefreshConfig> {
        if self.no_refresh {
            return None;
        }

        let dir = self.recommender_dir();

        Some(
            RefreshConfig::new(&dir)
                .with_notebook(
                    dir.join(&self.refresh_notebook),
                    dir.join(&self.refresh_output),
                )
                .with_kernel(self.kernel.clone())
                .with_interval(Duration::from_secs(self.refresh_interval_secs))
                .with_timeout(Duration::from_secs(self.refresh_timeout_secs)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["eventrec"]).unwrap();

        assert_eq!(config.listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(
            config.recommender_dir(),
            PathBuf::from("ml-models/recommendation-system")
        );

        let refresh = config.refresh_config().unwrap();
        assert_eq!(
            refresh.notebook,
            PathBuf::from("ml-models/recommendation-system/scheduler.ipynb")
        );
        assert_eq!(refresh.interval, Duration::from_secs(86400));
        assert_eq!(refresh.timeout, Duration::from_secs(3600));
        assert_eq!(refresh.kernel, None);
    }

    #[test]
    fn overrides() {
        let config = Config::try_parse_from([
            "eventrec",
            "--listen",
            "127.0.0.1:9000",
            "--models-dir",
            "/srv/models",
            "--recommender-dir",
            "/srv/rec",
            "--kernel",
            "ir",
            "--refresh-notebook",
            "/opt/train.ipynb",
            "--refresh-interval-secs",
            "60",
        ])
        .unwrap();

        assert_eq!(config.recommender_paths().dir, PathBuf::from("/srv/rec"));

        let refresh = config.refresh_config().unwrap();
        assert_eq!(refresh.notebook, PathBuf::from("/opt/train.ipynb"));
        assert_eq!(refresh.output, PathBuf::from("/srv/rec/scheduler_out.ipynb"));
        assert_eq!(refresh.working_dir, PathBuf::from("/srv/rec"));
        assert_eq!(refresh.kernel.as_deref(), Some("ir"));
        assert_eq!(refresh.interval, Duration::from_secs(60));
    }

    #[test]
    fn refresh_can_be_disabled() {
        let config = Config::try_parse_from(["eventrec", "--no-refresh"]).unwrap();

        assert!(config.refresh_config().is_none());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Config::try_parse_from(["eventrec", "--refresh-interval-secs", "0"]).is_err());
    }
}
