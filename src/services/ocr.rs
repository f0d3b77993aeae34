//! OCR engine adapter.
//!
//! [`OcrAdapter`] owns the engine lifecycle for one recognition: resolve language data,
//! initialize (bundled data first, engine default second), apply the CJK tuning profile,
//! recognize under a timeout, tear down, and delete the source image on success.
//!
//! Engine location, language data, and timeout come from [`OcrSettings`], resolved from the
//! config snapshot of each session so that saved or reloaded settings apply to the next
//! capture.
//!
//! The engine itself sits behind [`OcrEngineFactory`] / [`OcrEngine`]. The production
//! implementation drives the `tesseract` command-line program.

use crate::models::Config;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors that can occur during recognition
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Engine initialization failed: {message}")]
    EngineInit { message: String },

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

/// Engine parameters applied before recognition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuningProfile {
    /// `name=value` engine variables
    pub variables: Vec<(&'static str, &'static str)>,
    /// Page segmentation mode override
    pub page_seg_mode: Option<u8>,
}

impl TuningProfile {
    /// Settings for CJK text: keep inter-word spacing, relax dictionary penalties,
    /// heavy noise reduction, and treat the image as one uniform block of text.
    pub fn cjk() -> Self {
        Self {
            variables: vec![
                ("preserve_interword_spaces", "1"),
                ("language_model_penalty_non_freq_dict_word", "0.8"),
                ("language_model_penalty_non_dict_word", "0.8"),
                ("textord_heavy_nr", "1"),
            ],
            page_seg_mode: Some(6),
        }
    }

    /// The CJK profile if any code in the spec is CJK, otherwise engine defaults.
    pub fn for_language_spec(language_spec: &str) -> Self {
        if language_codes(language_spec).any(is_cjk_language) {
            Self::cjk()
        } else {
            Self::default()
        }
    }

    pub fn is_default(&self) -> bool {
        self.variables.is_empty() && self.page_seg_mode.is_none()
    }
}

/// Codes in a `+`-joined language spec, in order.
pub fn language_codes(language_spec: &str) -> impl Iterator<Item = &str> {
    language_spec
        .split('+')
        .map(str::trim)
        .filter(|code| !code.is_empty())
}

/// Chinese (simplified/traditional, incl. vertical), Japanese, and Korean codes.
pub fn is_cjk_language(code: &str) -> bool {
    code.starts_with("chi_") || code.starts_with("jpn") || code.starts_with("kor")
}

/// Per-recognition engine settings taken from the user config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrSettings {
    /// Language data shipped beside the application (or configured), tried first
    pub bundled_data_dir: Option<Utf8PathBuf>,
    /// Configured engine binary; `None` resolves it from `PATH`
    pub tesseract_path: Option<String>,
    /// Upper bound for a single recognition
    pub timeout: Duration,
}

impl OcrSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bundled_data_dir: bundled_data_dir(config),
            tesseract_path: config.tesseract_path.clone(),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
        }
    }

    /// Language codes whose `<code>.traineddata` is missing from the bundled directory.
    pub fn missing_language_data(&self, language_spec: &str) -> Vec<String> {
        let Some(dir) = &self.bundled_data_dir else {
            return Vec::new();
        };
        language_codes(language_spec)
            .filter(|code| !dir.join(format!("{code}.traineddata")).exists())
            .map(str::to_string)
            .collect()
    }
}

/// A live engine instance.
#[async_trait]
pub trait OcrEngine: Send {
    async fn recognize(&mut self, image_path: &Utf8Path) -> Result<String, OcrError>;

    /// Free engine resources. Called exactly once, after recognition succeeded or failed.
    async fn terminate(&mut self) -> Result<(), OcrError>;
}

/// Creates engine instances.
#[async_trait]
pub trait OcrEngineFactory: Send + Sync {
    /// Initialize an engine for `language_spec`.
    ///
    /// `data_dir` is the language-model directory, or `None` for the engine's own default
    /// resolution.
    async fn create(
        &self,
        language_spec: &str,
        data_dir: Option<&Utf8Path>,
        tuning: &TuningProfile,
        settings: &OcrSettings,
    ) -> Result<Box<dyn OcrEngine>, OcrError>;
}

/// Anything that turns an image into text. Implemented by [`OcrAdapter`].
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(
        &self,
        image_path: &Utf8Path,
        language_spec: &str,
        settings: &OcrSettings,
    ) -> Result<String, OcrError>;
}

/// Recognition pipeline around an [`OcrEngineFactory`].
pub struct OcrAdapter {
    factory: Arc<dyn OcrEngineFactory>,
}

impl OcrAdapter {
    /// # Arguments
    /// * `factory` - Engine implementation
    pub fn new(factory: Arc<dyn OcrEngineFactory>) -> Self {
        Self { factory }
    }

    /// Build the production adapter around the `tesseract` program.
    pub fn tesseract() -> Self {
        Self::new(Arc::new(TesseractFactory))
    }

    async fn init_engine(
        &self,
        language_spec: &str,
        tuning: &TuningProfile,
        settings: &OcrSettings,
    ) -> Result<Box<dyn OcrEngine>, OcrError> {
        let bundled_error = match &settings.bundled_data_dir {
            Some(dir) => match self.factory.create(language_spec, Some(dir), tuning, settings).await {
                Ok(engine) => {
                    tracing::debug!("OCR engine initialized with data from {}", dir);
                    return Ok(engine);
                }
                Err(e) => {
                    tracing::warn!(
                        "Engine init with bundled data {} failed, trying default: {}",
                        dir,
                        e
                    );
                    Some(e)
                }
            },
            None => None,
        };

        self.factory
            .create(language_spec, None, tuning, settings)
            .await
            .map_err(|default_error| {
                let message = match bundled_error {
                    Some(bundled) => format!("bundled data: {}; default data: {}", bundled, default_error),
                    None => default_error.to_string(),
                };
                tracing::error!("OCR engine initialization failed: {}", message);
                OcrError::EngineInit { message }
            })
    }

    /// Recognize the text in `image_path`.
    ///
    /// The engine is torn down whether recognition succeeds or fails. On success the image
    /// is deleted; a file that is already gone is not an error.
    pub async fn recognize(
        &self,
        image_path: &Utf8Path,
        language_spec: &str,
        settings: &OcrSettings,
    ) -> Result<String, OcrError> {
        tracing::info!("Recognizing {} with languages {}", image_path, language_spec);

        let missing = settings.missing_language_data(language_spec);
        if !missing.is_empty() {
            tracing::warn!(
                "Language data not found in bundled directory for: {}",
                missing.join(", ")
            );
        }

        let tuning = TuningProfile::for_language_spec(language_spec);
        if !tuning.is_default() {
            tracing::debug!("Applying CJK tuning profile");
        }

        let mut engine = self.init_engine(language_spec, &tuning, settings).await?;

        let start = Instant::now();
        let result = match timeout(settings.timeout, engine.recognize(image_path)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Recognition timed out after {:?}", settings.timeout);
                Err(OcrError::Timeout(settings.timeout))
            }
        };

        if let Err(e) = engine.terminate().await {
            tracing::warn!("Failed to terminate OCR engine: {}", e);
        }

        let text = result?;
        tracing::info!(
            "Recognition completed in {:.2}s, {} chars",
            start.elapsed().as_secs_f32(),
            text.chars().count()
        );

        remove_image(image_path);
        Ok(text)
    }
}

#[async_trait]
impl TextRecognizer for OcrAdapter {
    async fn recognize(
        &self,
        image_path: &Utf8Path,
        language_spec: &str,
        settings: &OcrSettings,
    ) -> Result<String, OcrError> {
        OcrAdapter::recognize(self, image_path, language_spec, settings).await
    }
}

/// Delete an image, tolerating a file that is already gone.
pub fn remove_image(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path, e),
    }
}

/// Bundled language-data directory: the configured override, else `tessdata` beside the
/// executable when it exists.
pub fn bundled_data_dir(config: &Config) -> Option<Utf8PathBuf> {
    if let Some(dir) = &config.tessdata_dir {
        return Some(Utf8PathBuf::from(dir));
    }

    let exe = std::env::current_exe().ok()?;
    let exe = Utf8PathBuf::from_path_buf(exe).ok()?;
    let dir = exe.parent()?.join("tessdata");
    dir.is_dir().then_some(dir)
}

/// Engine factory for the `tesseract` command-line program.
pub struct TesseractFactory;

impl TesseractFactory {
    /// Use the configured binary, else `tesseract` from `PATH`.
    pub fn resolve_binary(configured: Option<&str>) -> String {
        configured
            .map(str::to_string)
            .or_else(|| {
                which::which("tesseract")
                    .ok()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "tesseract".to_string())
    }

    /// Parse `tesseract --list-langs` output into language codes.
    pub fn parse_language_list(output: &str) -> Vec<String> {
        output
            .lines()
            .skip_while(|line| !line.starts_with("List of available languages"))
            .skip(1)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    async fn available_languages(
        binary: &str,
        data_dir: Option<&Utf8Path>,
    ) -> Result<Vec<String>, OcrError> {
        let mut cmd = Command::new(binary);
        if let Some(dir) = data_dir {
            cmd.args(["--tessdata-dir", dir.as_str()]);
        }
        cmd.arg("--list-langs").stdin(Stdio::null());

        let output = cmd.output().await.map_err(|e| OcrError::EngineInit {
            message: format!("Failed to run {}: {}", binary, e),
        })?;
        if !output.status.success() {
            return Err(OcrError::EngineInit {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Older releases print the list on stderr
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Self::parse_language_list(&text))
    }
}

#[async_trait]
impl OcrEngineFactory for TesseractFactory {
    async fn create(
        &self,
        language_spec: &str,
        data_dir: Option<&Utf8Path>,
        tuning: &TuningProfile,
        settings: &OcrSettings,
    ) -> Result<Box<dyn OcrEngine>, OcrError> {
        let binary = Self::resolve_binary(settings.tesseract_path.as_deref());
        let available = Self::available_languages(&binary, data_dir).await?;
        let missing: Vec<&str> = language_codes(language_spec)
            .filter(|code| !available.iter().any(|a| a == code))
            .collect();
        if !missing.is_empty() {
            return Err(OcrError::EngineInit {
                message: format!("language data not available: {}", missing.join(", ")),
            });
        }

        Ok(Box::new(TesseractEngine {
            binary,
            language_spec: language_spec.to_string(),
            data_dir: data_dir.map(Utf8Path::to_path_buf),
            tuning: tuning.clone(),
        }))
    }
}

/// One configured `tesseract` invocation.
pub struct TesseractEngine {
    binary: String,
    language_spec: String,
    data_dir: Option<Utf8PathBuf>,
    tuning: TuningProfile,
}

impl TesseractEngine {
    /// Arguments for recognizing `image_path` to stdout.
    pub fn build_args(&self, image_path: &Utf8Path) -> Vec<String> {
        let mut args = vec![
            image_path.to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language_spec.clone(),
        ];
        if let Some(dir) = &self.data_dir {
            args.push("--tessdata-dir".to_string());
            args.push(dir.to_string());
        }
        if let Some(psm) = self.tuning.page_seg_mode {
            args.push("--psm".to_string());
            args.push(psm.to_string());
        }
        for (name, value) in &self.tuning.variables {
            args.push("-c".to_string());
            args.push(format!("{name}={value}"));
        }
        args
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&mut self, image_path: &Utf8Path) -> Result<String, OcrError> {
        let args = self.build_args(image_path);
        tracing::debug!("Executing: {} {}", self.binary, args.join(" "));

        // Dropping the future on timeout kills the process
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(OcrError::Recognition(format!(
                "tesseract exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn terminate(&mut self) -> Result<(), OcrError> {
        // Each recognition is a separate process that has already exited
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        creates: Mutex<Vec<Option<Utf8PathBuf>>>,
        terminated: AtomicUsize,
    }

    struct StubEngine {
        text: Result<String, String>,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        async fn recognize(&mut self, _image_path: &Utf8Path) -> Result<String, OcrError> {
            self.text.clone().map_err(OcrError::Recognition)
        }

        async fn terminate(&mut self) -> Result<(), OcrError> {
            self.calls.terminated.fetch_add(1, Ordering::SeqCst);
            Err(OcrError::Recognition("teardown noise".to_string()))
        }
    }

    struct StubFactory {
        fail_bundled: bool,
        fail_default: bool,
        text: Result<String, String>,
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl OcrEngineFactory for StubFactory {
        async fn create(
            &self,
            _language_spec: &str,
            data_dir: Option<&Utf8Path>,
            _tuning: &TuningProfile,
            _settings: &OcrSettings,
        ) -> Result<Box<dyn OcrEngine>, OcrError> {
            self.calls
                .creates
                .lock()
                .unwrap()
                .push(data_dir.map(Utf8Path::to_path_buf));
            let fail = if data_dir.is_some() { self.fail_bundled } else { self.fail_default };
            if fail {
                return Err(OcrError::EngineInit {
                    message: "no data".to_string(),
                });
            }
            Ok(Box::new(StubEngine {
                text: self.text.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    fn settings(bundled_data_dir: Option<Utf8PathBuf>, timeout: Duration) -> OcrSettings {
        OcrSettings {
            bundled_data_dir,
            tesseract_path: None,
            timeout,
        }
    }

    fn setup(
        fail_bundled: bool,
        fail_default: bool,
        text: Result<&str, &str>,
    ) -> (OcrAdapter, OcrSettings, Arc<Calls>, Utf8PathBuf, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let image = root.join("shot.png");
        fs::write(&image, b"png").unwrap();

        let calls = Arc::new(Calls::default());
        let factory = StubFactory {
            fail_bundled,
            fail_default,
            text: text.map(str::to_string).map_err(str::to_string),
            calls: calls.clone(),
        };
        let adapter = OcrAdapter::new(Arc::new(factory));
        let settings = settings(Some(root.join("tessdata")), Duration::from_secs(5));
        (adapter, settings, calls, image, temp_dir)
    }

    #[test]
    fn test_cjk_detection() {
        assert!(is_cjk_language("chi_sim"));
        assert!(is_cjk_language("chi_tra_vert"));
        assert!(is_cjk_language("jpn"));
        assert!(is_cjk_language("kor"));
        assert!(!is_cjk_language("eng"));
        assert!(!is_cjk_language("chr"));
    }

    #[test]
    fn test_tuning_applies_when_any_code_is_cjk() {
        assert_eq!(TuningProfile::for_language_spec("eng+jpn"), TuningProfile::cjk());
        assert!(TuningProfile::for_language_spec("eng+fra").is_default());
    }

    #[test]
    fn test_build_args() {
        let engine = TesseractEngine {
            binary: "tesseract".to_string(),
            language_spec: "chi_sim+eng".to_string(),
            data_dir: Some("/opt/tessdata".into()),
            tuning: TuningProfile::cjk(),
        };
        let args = engine.build_args(Utf8Path::new("/tmp/a.png"));
        assert_eq!(&args[..4], ["/tmp/a.png", "stdout", "-l", "chi_sim+eng"]);
        assert!(args.windows(2).any(|w| w == ["--tessdata-dir", "/opt/tessdata"]));
        assert!(args.windows(2).any(|w| w == ["--psm", "6"]));
        assert!(args.contains(&"textord_heavy_nr=1".to_string()));
    }

    #[test]
    fn test_parse_language_list() {
        let output = "List of available languages in \"/usr/share/tessdata/\" (3):\nchi_sim\neng\nosd\n";
        assert_eq!(
            TesseractFactory::parse_language_list(output),
            vec!["chi_sim", "eng", "osd"]
        );
    }

    #[tokio::test]
    async fn test_recognize_success_deletes_image_and_terminates() {
        let (adapter, settings, calls, image, _temp_dir) = setup(false, false, Ok("Hello"));

        let text = adapter.recognize(&image, "eng", &settings).await.unwrap();

        assert_eq!(text, "Hello");
        assert!(!image.exists());
        assert_eq!(calls.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(calls.creates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_default_data() {
        let (adapter, settings, calls, image, _temp_dir) = setup(true, false, Ok("Hello"));

        adapter.recognize(&image, "eng", &settings).await.unwrap();

        let creates = calls.creates.lock().unwrap();
        assert_eq!(creates.len(), 2);
        assert!(creates[0].is_some());
        assert!(creates[1].is_none());
    }

    #[tokio::test]
    async fn test_both_inits_fail() {
        let (adapter, settings, calls, image, _temp_dir) = setup(true, true, Ok("Hello"));

        let result = adapter.recognize(&image, "eng", &settings).await;

        assert!(matches!(result, Err(OcrError::EngineInit { .. })));
        assert_eq!(calls.creates.lock().unwrap().len(), 2);
        assert!(image.exists());
    }

    #[tokio::test]
    async fn test_failed_recognition_still_terminates() {
        let (adapter, settings, calls, image, _temp_dir) = setup(false, false, Err("garbled"));

        let result = adapter.recognize(&image, "eng", &settings).await;

        assert!(matches!(result, Err(OcrError::Recognition(_))));
        assert_eq!(calls.terminated.load(Ordering::SeqCst), 1);
        assert!(image.exists());
    }

    #[test]
    fn test_missing_language_data() {
        let (_adapter, settings, _calls, _image, _temp_dir) = setup(false, false, Ok(""));
        assert_eq!(settings.missing_language_data("eng+jpn"), vec!["eng", "jpn"]);
    }

    #[test]
    fn test_settings_follow_config() {
        let config = Config {
            tessdata_dir: Some("/opt/tessdata".to_string()),
            tesseract_path: Some("/opt/bin/tesseract".to_string()),
            ocr_timeout_secs: 30,
            ..Config::default()
        };

        let settings = OcrSettings::from_config(&config);

        assert_eq!(settings.bundled_data_dir, Some(Utf8PathBuf::from("/opt/tessdata")));
        assert_eq!(settings.tesseract_path.as_deref(), Some("/opt/bin/tesseract"));
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_configured_binary_wins() {
        assert_eq!(
            TesseractFactory::resolve_binary(Some("/opt/bin/tesseract")),
            "/opt/bin/tesseract"
        );
    }

    #[test]
    fn test_remove_image_idempotent() {
        remove_image(Utf8Path::new("/nonexistent/quick-ocr/none.png"));
    }

    struct HangingEngine {
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl OcrEngine for HangingEngine {
        async fn recognize(&mut self, _image_path: &Utf8Path) -> Result<String, OcrError> {
            std::future::pending().await
        }

        async fn terminate(&mut self) -> Result<(), OcrError> {
            self.calls.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct HangingFactory {
        calls: Arc<Calls>,
    }

    #[async_trait]
    impl OcrEngineFactory for HangingFactory {
        async fn create(
            &self,
            _language_spec: &str,
            _data_dir: Option<&Utf8Path>,
            _tuning: &TuningProfile,
            _settings: &OcrSettings,
        ) -> Result<Box<dyn OcrEngine>, OcrError> {
            Ok(Box::new(HangingEngine {
                calls: self.calls.clone(),
            }))
        }
    }

    #[test]
    fn test_recognition_timeout_terminates_engine() {
        let calls = Arc::new(Calls::default());
        let adapter = OcrAdapter::new(Arc::new(HangingFactory { calls: calls.clone() }));
        let settings = settings(None, Duration::from_millis(50));

        let result = tokio_test::block_on(adapter.recognize(
            Utf8Path::new("/tmp/none.png"),
            "eng",
            &settings,
        ));

        assert!(matches!(result, Err(OcrError::Timeout(_))));
        assert_eq!(calls.terminated.load(Ordering::SeqCst), 1);
    }
}
