//! Command-line and environment configuration

use clap::Parser;
use flvgrab_core::CoreConfig;
use flvgrab_types::DEFAULT_EXPLORE_BASE_URL;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// flvgrab - FLV capture and live relay server
#[derive(Parser, Debug, Clone)]
#[command(name = "flvgrab")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3180)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Directory that receives captures (defaults to the working directory)
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// SQLite database file (defaults to tasks.sqlite3 in the working directory)
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// ffmpeg binary used for RTMP relays
    #[arg(long = "ffmpeg", env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Serve a browser UI from this directory
    #[arg(long, env = "PUBLIC_DIR")]
    pub public_dir: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Directory API base used until one is saved through /config
    #[arg(long, env = "EXPLORE_BASE_URL", default_value = DEFAULT_EXPLORE_BASE_URL)]
    pub explore_base_url: String,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Resolve defaults relative to `cwd`
    pub fn core_config(&self, cwd: PathBuf) -> CoreConfig {
        CoreConfig {
            base_dir: self.data_dir.clone().unwrap_or_else(|| cwd.clone()),
            db_path: self
                .db_path
                .clone()
                .unwrap_or_else(|| cwd.join("tasks.sqlite3")),
            ffmpeg_path: self.ffmpeg_path.clone(),
            default_explore_base_url: self.explore_base_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["flvgrab"]).unwrap();
        assert_eq!(cli.listen_addr().port(), cli.port);

        let config = cli.core_config(PathBuf::from("/srv"));
        if cli.data_dir.is_none() {
            assert_eq!(config.base_dir, PathBuf::from("/srv"));
        }
        if cli.db_path.is_none() {
            assert_eq!(config.db_path, PathBuf::from("/srv/tasks.sqlite3"));
        }
    }

    #[test]
    fn test_flags_override() {
        let cli = Cli::try_parse_from([
            "flvgrab",
            "--port",
            "8080",
            "--data-dir",
            "/data",
            "--ffmpeg",
            "/opt/ffmpeg",
        ])
        .unwrap();
        assert_eq!(cli.port, 8080);

        let config = cli.core_config(PathBuf::from("/srv"));
        assert_eq!(config.base_dir, PathBuf::from("/data"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
    }
}
