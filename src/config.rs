// file: src/config.rs
// description: application configuration management with toml support
// reference: https://docs.rs/config

use crate::error::{PipelineError, Result};
use crate::ingest::InputSource;
use crate::models::{SourceKind, Stage};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub input: InputConfig,
    pub download: DownloadConfig,
    pub extraction: ExtractionConfig,
    pub processing: ProcessingConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    pub csv_file: Option<PathBuf>,
    pub link_column: String,
    #[serde(default)]
    pub local_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    pub max_file_size_mb: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_backoff_ms: u64,
    pub stream_chunk_bytes: usize,
    /// Bearer tokens keyed by source kind (`box`, `sharepoint`, ...).
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub pdf_ocr: bool,
    pub ocr_language: String,
    pub ocr_timeout_secs: u64,
    pub render_dpi: u32,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    /// Upper bound for the CPU-bound extraction pool. `0` means one slot per core.
    #[serde(default)]
    pub cpu_workers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    pub heuristics: Vec<String>,
    pub primary: ProviderConfig,
    pub vision: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub host: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub parallel_workers: usize,
    pub skip_download: bool,
    pub skip_ocr: bool,
    pub skip_ai: bool,
    pub force_reprocess: bool,
    pub reprocess_from: Option<Stage>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();

        let defaults = config::Config::try_from(&Self::default_config())
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder
                .add_source(config::File::from(Path::new("config/default.toml")).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GRAVEKEEPER")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            input: InputConfig {
                csv_file: None,
                link_column: "link".to_string(),
                local_files: vec![],
            },
            download: DownloadConfig {
                max_file_size_mb: 100,
                timeout_secs: 30,
                max_retries: 3,
                base_delay_ms: 1000,
                max_backoff_ms: 30_000,
                stream_chunk_bytes: 8192,
                auth: BTreeMap::new(),
            },
            extraction: ExtractionConfig {
                pdf_ocr: true,
                ocr_language: "eng".to_string(),
                ocr_timeout_secs: 30,
                render_dpi: 150,
                tesseract_bin: "tesseract".to_string(),
                pdftoppm_bin: "pdftoppm".to_string(),
                cpu_workers: 0,
            },
            processing: ProcessingConfig { chunk_size: 1000 },
            detection: DetectionConfig {
                heuristics: vec![
                    "email".to_string(),
                    "phone".to_string(),
                    "ssn".to_string(),
                    "payment_card".to_string(),
                ],
                primary: ProviderConfig {
                    provider: "ollama".to_string(),
                    model: "llama3.1".to_string(),
                    host: "http://localhost:11434".to_string(),
                    timeout_secs: 120,
                    max_retries: 1,
                },
                vision: Some(ProviderConfig {
                    provider: "ollama".to_string(),
                    model: "qwen2.5vl".to_string(),
                    host: "http://localhost:11434".to_string(),
                    timeout_secs: 120,
                    max_retries: 1,
                }),
            },
            pipeline: PipelineConfig {
                output_dir: PathBuf::from("data/results"),
                parallel_workers: 4,
                skip_download: false,
                skip_ocr: false,
                skip_ai: false,
                force_reprocess: false,
                reprocess_from: None,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.parallel_workers == 0 {
            return Err(PipelineError::Config(
                "parallel_workers must be greater than 0".to_string(),
            ));
        }

        if self.processing.chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.download.max_file_size_mb == 0 {
            return Err(PipelineError::Config(
                "max_file_size_mb must be greater than 0".to_string(),
            ));
        }

        if self.input.link_column.trim().is_empty() {
            return Err(PipelineError::Config(
                "link_column must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The stage whose persisted output is discarded before the run, if any.
    pub fn invalidation_stage(&self) -> Option<Stage> {
        if self.pipeline.force_reprocess {
            Some(Stage::Downloaded)
        } else {
            self.pipeline.reprocess_from
        }
    }

    pub fn auth_token(&self, kind: SourceKind) -> Option<String> {
        self.download.auth.get(kind.as_str()).cloned()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.download.max_file_size_mb * 1_048_576
    }

    /// A CSV table and a local file list are mutually exclusive.
    pub fn input_source(&self) -> Result<InputSource> {
        match (&self.input.csv_file, self.input.local_files.is_empty()) {
            (Some(_), false) => Err(PipelineError::Config(
                "csv_file and local_files are mutually exclusive".to_string(),
            )),
            (Some(path), true) => Ok(InputSource::Csv {
                path: path.clone(),
                link_column: self.input.link_column.clone(),
            }),
            (None, false) => Ok(InputSource::LocalFiles(self.input.local_files.clone())),
            (None, true) => Err(PipelineError::Config(
                "no input given: set csv_file or local_files".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.chunk_size, 1000);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.detection.primary.model, "llama3.1");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default_config();
        config.pipeline.parallel_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_force_reprocess_invalidates_everything() {
        let mut config = Config::default_config();
        assert_eq!(config.invalidation_stage(), None);

        config.pipeline.reprocess_from = Some(Stage::Chunked);
        assert_eq!(config.invalidation_stage(), Some(Stage::Chunked));

        config.pipeline.force_reprocess = true;
        assert_eq!(config.invalidation_stage(), Some(Stage::Downloaded));
    }

    #[test]
    fn test_input_source_selection() {
        let mut config = Config::default_config();
        assert!(config.input_source().is_err());

        config.input.local_files = vec![PathBuf::from("docs")];
        assert!(matches!(config.input_source(), Ok(InputSource::LocalFiles(_))));

        config.input.csv_file = Some(PathBuf::from("links.csv"));
        assert!(config.input_source().is_err());

        config.input.local_files.clear();
        assert!(matches!(config.input_source(), Ok(InputSource::Csv { .. })));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[processing]\nchunk_size = 250\n\n[pipeline]\nparallel_workers = 2\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.processing.chunk_size, 250);
        assert_eq!(config.pipeline.parallel_workers, 2);
        assert_eq!(config.input.link_column, "link");
    }
}
