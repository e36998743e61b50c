use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use crate::audio::cache::BufferCache;
use crate::audio::decoder::decode_bytes;
use crate::error::{FetchError, LoadError};
use crate::logging::OperationTimer;
use crate::models::DecodedBuffer;

/// Retrieves the raw encoded bytes behind a locator.
///
/// Called from tokio's blocking pool, so implementations may block.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}

/// Whether a locator is fetched over HTTP
pub fn is_remote(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reads locators from the filesystem
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Path a locator maps to; with a root, `/audio/x.mp3` means `<root>/audio/x.mp3`
    pub fn resolve(&self, locator: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(locator.trim_start_matches('/')),
            None => PathBuf::from(locator),
        }
    }
}

impl ByteSource for FileSource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(locator);
        std::fs::read(&path).map_err(|e| FetchError::new(locator, format!("{}: {}", path.display(), e)))
    }
}

/// Fetches `http(s)://` locators with a blocking client
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[cfg(feature = "http")]
impl ByteSource for HttpSource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        // Built per request: the blocking client must be created and dropped off the async runtime
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::new(locator, e))?;

        let response = client
            .get(locator)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::new(locator, e))?;

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|e| FetchError::new(locator, e))
    }
}

/// Dispatches remote locators to HTTP and everything else to the filesystem
#[derive(Debug, Clone)]
pub struct LocatorSource {
    files: FileSource,
    #[cfg(feature = "http")]
    http: HttpSource,
}

impl LocatorSource {
    pub fn new(audio_root: Option<PathBuf>) -> Self {
        Self {
            files: FileSource::new(audio_root),
            #[cfg(feature = "http")]
            http: HttpSource::new(Duration::from_secs(30)),
        }
    }
}

impl ByteSource for LocatorSource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        if !is_remote(locator) {
            return self.files.fetch(locator);
        }

        #[cfg(feature = "http")]
        {
            self.http.fetch(locator)
        }
        #[cfg(not(feature = "http"))]
        {
            Err(FetchError::new(locator, "built without HTTP support"))
        }
    }
}

/// Fetches, decodes and caches buffers.
///
/// Each locator is loaded at most once at a time: concurrent callers wait
/// on the first caller's attempt and share its buffer. When that attempt
/// fails the error goes to its caller and the next waiter makes a fresh
/// attempt, so failures are never cached.
#[derive(Clone)]
pub struct BufferLoader {
    cache: Arc<BufferCache>,
    source: Arc<dyn ByteSource>,
}

impl BufferLoader {
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self {
            cache: Arc::new(BufferCache::new()),
            source,
        }
    }

    /// Loader reading from disk (and HTTP when enabled) under an optional root
    pub fn from_root(audio_root: Option<&Path>) -> Self {
        Self::new(Arc::new(LocatorSource::new(audio_root.map(Path::to_path_buf))))
    }

    pub fn cache(&self) -> &Arc<BufferCache> {
        &self.cache
    }

    pub async fn load(&self, locator: &str) -> Result<Arc<DecodedBuffer>, LoadError> {
        if let Some(buffer) = self.cache.get(locator) {
            return Ok(buffer);
        }

        let slot = self.cache.slot(locator);
        let buffer = slot
            .get_or_try_init(|| self.fetch_and_decode(locator.to_string()))
            .await?;
        Ok(Arc::clone(buffer))
    }

    /// Warm the cache without handing out the buffer
    pub async fn prefetch(&self, locator: &str) -> Result<(), LoadError> {
        self.load(locator).await.map(|_| ()).map_err(|e| {
            log::debug!("Prefetch of {} failed: {}", locator, e);
            e
        })
    }

    async fn fetch_and_decode(&self, locator: String) -> Result<Arc<DecodedBuffer>, LoadError> {
        let source = Arc::clone(&self.source);
        let timer = OperationTimer::new(format!("load {}", locator));
        let task_locator = locator.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<Arc<DecodedBuffer>, LoadError> {
            let bytes = source.fetch(&task_locator)?;
            decode_bytes(&task_locator, bytes)
                .map(Arc::new)
                .map_err(|source| LoadError::Decode {
                    locator: task_locator,
                    source,
                })
        })
        .await;

        timer.finish_with_threshold(Duration::from_secs(2));

        match result {
            Ok(loaded) => loaded,
            Err(join_error) => Err(LoadError::Fetch(FetchError::new(
                locator,
                format!("load task failed: {}", join_error),
            ))),
        }
    }
}
