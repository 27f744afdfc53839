#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("the requested resource is not an http/https address")]
    NotHttp,

    #[error("playback speed {0} is outside the supported range of 0.5-3.0")]
    InvalidSpeed(f64),

    #[error("transcoder exited with status {status}: {detail}")]
    Transcoder { status: i32, detail: String },

    #[error("malformed audio container data")]
    MalformedStream,

    #[error("invalid duration format")]
    InvalidDuration,

    #[error("no search results")]
    NoSearchResults,

    #[error("no search provider available")]
    NoSearchProvider,

    #[error("no search suggestion provider available")]
    NoSuggestionProvider,

    #[error("invalid input")]
    InvalidInput,

    #[error("unsupported URL")]
    UnsupportedUrl,

    #[error("downloader error: {0}")]
    Downloader(String),

    #[error("extractor config for {0} is missing")]
    MissingProvider(String),

    #[error("invalid extractor configuration: {provider}.{key}: expected {expected} but got {got}")]
    ConfigType {
        provider: String,
        key: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("extractor[{provider}]: {source}")]
    Provider {
        provider: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unable to get session data")]
    SessionData,

    #[error("invalid track data")]
    InvalidTrackData,

    #[error("unable to find a matching video")]
    TrackNotFound,

    #[error("unable to get a stream for the matched video")]
    UnableToGetStream,

    #[error("error decoding API response")]
    ApiResponse,

    #[error("no suitable audio-only format found")]
    NoSuitableFormat,

    #[error("error getting URL from signature cipher")]
    SignatureCipher,

    #[error("signature decryptor is out of date")]
    DecryptorBroken,

    #[error("malformed scraped JSON")]
    MalformedJson,

    #[error("got invalid data refreshing stream")]
    InvalidRefreshData,

    #[error("skipping stream due to multiple errors")]
    StreamSkipped,

    #[error("player session is gone")]
    SessionClosed,

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a provider failure with the provider's registered name.
    pub(crate) fn provider(name: &str, source: Error) -> Error {
        Error::Provider {
            provider: name.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
