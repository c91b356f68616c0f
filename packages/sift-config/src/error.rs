pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read config file {path:?}: {source}")]
	ReadConfig { path: std::path::PathBuf, source: std::io::Error },
	#[error("Config file {path:?} is not valid TOML: {source}")]
	ParseConfig { path: std::path::PathBuf, source: toml::de::Error },
	#[error("Invalid config: {message}")]
	Validation { message: String },
}
